//! Per-cell SOC / DOD / SOH tracking by Coulomb counting.
//!
//! All state quantities are permille `f32`.  A tick contributes a
//! fraction of a permille at realistic currents, so keeping the
//! fractional part is what stops drift from compounding.
//!
//! Per tick, per cell, exactly one of:
//! - a calibration event (discharge floor / charge ceiling), or
//! - [`CellTracker::rebase_dod`].
//!
//! Then, at the end of every tick, [`CellTracker::rebase_next_cycle`].

use heapless::Vec;
use log::info;
use serde::{Deserialize, Serialize};

use super::CurrentDirection;
use super::ocv::OcvTable;
use crate::config::MAX_CELLS;

/// Fresh-cell state of health.
pub const SOH_FULL: f32 = 1000.0;

// ---------------------------------------------------------------------------
// CellSlot
// ---------------------------------------------------------------------------

/// State of one physical cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellSlot {
    /// Stable position in the stack, 0-based.
    pub id: u8,
    /// SOC at the last OCV anchor (permille).
    pub soc0: f32,
    /// Current SOC (permille).  Always `soh - dod_c` after a tick.
    pub soc_c: f32,
    /// DOD at the Coulomb-counting origin (permille).
    pub dod0: f32,
    /// Current DOD (permille).
    pub dod_c: f32,
    /// State of health (permille).
    pub soh: f32,
    /// Signed charge since the Coulomb-counting origin (A·s).
    pub integrated_current_as: f32,
    /// Throughput since the last aging update (A·s).
    pub abs_integrated_current_as: f32,
    /// Last balancing-switch status read back from the device.
    pub balance_active: bool,
}

impl CellSlot {
    /// A healthy cell resting at `soc` permille.
    pub fn at_rest(id: u8, soc: f32) -> Self {
        let dod = SOH_FULL - soc;
        Self {
            id,
            soc0: soc,
            soc_c: soc,
            dod0: dod,
            dod_c: dod,
            soh: SOH_FULL,
            integrated_current_as: 0.0,
            abs_integrated_current_as: 0.0,
            balance_active: false,
        }
    }

    /// Recompute SOC from SOH and DOD.
    pub fn refresh_soc(&mut self) {
        self.soc_c = self.soh - self.dod_c;
    }
}

// ---------------------------------------------------------------------------
// CellTracker
// ---------------------------------------------------------------------------

/// The cell array plus the capacity needed to convert charge to permille.
#[derive(Debug, Clone, Default)]
pub struct CellTracker {
    cells: Vec<CellSlot, MAX_CELLS>,
    capacity_as: f32,
}

impl CellTracker {
    /// Seed every cell from its resting voltage.
    ///
    /// Extra voltages beyond [`MAX_CELLS`] are ignored.
    pub fn initialize(voltages_uv: &[u32], table: &OcvTable, capacity_as: f32) -> Self {
        let mut cells = Vec::new();
        for (id, &v) in voltages_uv.iter().take(MAX_CELLS).enumerate() {
            let soc = f32::from(table.resolve(v));
            // Capacity is bounded by MAX_CELLS above.
            let _ = cells.push(CellSlot::at_rest(id as u8, soc));
        }
        info!("CELLS | initialised {} cells from OCV", cells.len());
        Self { cells, capacity_as }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cells(&self) -> &[CellSlot] {
        &self.cells
    }

    pub fn cell(&self, index: usize) -> Option<&CellSlot> {
        self.cells.get(index)
    }

    pub fn cell_mut(&mut self, index: usize) -> Option<&mut CellSlot> {
        self.cells.get_mut(index)
    }

    pub fn capacity_as(&self) -> f32 {
        self.capacity_as
    }

    // ── Coulomb counting ─────────────────────────────────────

    /// Accumulate one tick of pack current into every cell.
    ///
    /// The throughput counter adds discharge charge and subtracts charge
    /// (negative) current, so it only ever grows.
    pub fn integrate(&mut self, current_ma: i32, direction: CurrentDirection, dt_secs: f32) {
        let charge_as = current_ma as f32 * 0.001 * dt_secs;
        for cell in &mut self.cells {
            cell.integrated_current_as += charge_as;
            match direction {
                CurrentDirection::Discharge => cell.abs_integrated_current_as += charge_as,
                CurrentDirection::Charge => cell.abs_integrated_current_as -= charge_as,
                CurrentDirection::OpenCircuit => {}
            }
        }
    }

    /// Move `dod_c` by the charge counted since the origin.
    pub fn rebase_dod(&mut self, index: usize) {
        let capacity_as = self.capacity_as;
        if let Some(cell) = self.cells.get_mut(index) {
            let delta_dod = cell.integrated_current_as * 1000.0 / capacity_as;
            cell.dod_c = cell.dod0 + delta_dod;
            cell.refresh_soc();
        }
    }

    /// Cell reached the discharge floor: whatever it has delivered so far
    /// is its real capacity.
    pub fn calibrate_on_discharge_floor(&mut self, index: usize) {
        if let Some(cell) = self.cells.get_mut(index) {
            cell.soh = cell.dod_c;
            cell.soc_c = 0.0;
            cell.integrated_current_as = 0.0;
            info!("CELLS | cell {} discharge floor: SOH={:.1}", cell.id, cell.soh);
        }
    }

    /// Cell reached the charge ceiling at the end of the CV tail.
    pub fn calibrate_on_charge_ceiling(&mut self, index: usize) {
        if let Some(cell) = self.cells.get_mut(index) {
            cell.soh = cell.soc_c - cell.dod_c;
            cell.soc_c = cell.soh;
            cell.dod_c = 0.0;
            cell.integrated_current_as = 0.0;
            info!("CELLS | cell {} charge ceiling: SOH={:.1}", cell.id, cell.soh);
        }
    }

    /// Move the Coulomb-counting origin to the current DOD.
    ///
    /// Idempotent until the next [`integrate`](Self::integrate).
    pub fn rebase_next_cycle(&mut self) {
        for cell in &mut self.cells {
            cell.dod0 = cell.dod_c;
            cell.integrated_current_as = 0.0;
        }
    }

    /// Re-anchor one cell to an OCV-derived SOC.
    ///
    /// The difference to the previous anchor is folded back into the
    /// integrator as ampere-seconds and applied through
    /// [`rebase_dod`](Self::rebase_dod), so `soc_c` lands on `soc`.
    pub fn reanchor_to_ocv(&mut self, index: usize, soc: f32) {
        let capacity_as = self.capacity_as;
        let Some(cell) = self.cells.get_mut(index) else {
            return;
        };
        cell.integrated_current_as = (cell.soc0 - soc) * capacity_as / 1000.0;
        cell.dod0 = cell.soh - cell.soc0;
        self.rebase_dod(index);
        if let Some(cell) = self.cells.get_mut(index) {
            cell.soc0 = soc;
        }
    }

    // ── Balancing status ─────────────────────────────────────

    /// Apply the device's balance-status bitmask (bit `i` = cell `i`).
    pub fn apply_balance_status(&mut self, bits: u16) {
        for (i, cell) in self.cells.iter_mut().enumerate() {
            cell.balance_active = bits & (1 << i) != 0;
        }
    }

    // ── Persistence ──────────────────────────────────────────

    /// Overwrite SOH from a persisted record and refresh SOC.
    pub fn restore_soh(&mut self, soh: &[f32]) {
        for (cell, &s) in self.cells.iter_mut().zip(soh) {
            cell.soh = s;
            cell.dod_c = s - cell.soc_c;
            cell.dod0 = cell.dod_c;
        }
    }
}
