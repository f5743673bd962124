//! Equivalent-full-cycle counting and SOH fade.
//!
//! One aging update runs per open-circuit sojourn: the charge that moved
//! through each cell since the previous update is converted to full-cycle
//! equivalents (a charge plus a discharge swing is one cycle) and
//! subtracted from SOH in proportion to the rated cycle life.

use heapless::Vec;
use log::info;
use serde::{Deserialize, Serialize};

use super::CurrentDirection;
use super::cells::CellTracker;
use crate::config::MAX_CELLS;
use crate::error::FaultCounts;

/// Storage namespace / key for the persisted [`AgingRecord`].
pub const AGING_NAMESPACE: &str = "bmu";
pub const AGING_KEY: &str = "aging";

/// Upper bound on an encoded [`AgingRecord`].
pub const AGING_RECORD_MAX_BYTES: usize = 96;

// ---------------------------------------------------------------------------
// PackAggregate
// ---------------------------------------------------------------------------

/// Pack-wide counters that outlive any single tick.
#[derive(Debug, Clone, PartialEq)]
pub struct PackAggregate {
    /// Equivalent full cycles since commissioning.
    pub efc_counter: f32,
    /// Set once this open-circuit sojourn has been counted.
    pub cycle_open_flag: bool,
    /// Direction of the last classified tick.
    pub current_direction: CurrentDirection,
    /// Latched over/under-voltage counts.
    pub fault_latched: FaultCounts,
}

impl Default for PackAggregate {
    fn default() -> Self {
        Self {
            efc_counter: 0.0,
            cycle_open_flag: false,
            current_direction: CurrentDirection::OpenCircuit,
            fault_latched: FaultCounts::default(),
        }
    }
}

impl PackAggregate {
    /// Record this tick's direction.  Any charge or discharge re-opens the
    /// aging gate for the next open-circuit entry.
    pub fn note_direction(&mut self, direction: CurrentDirection) {
        if direction != CurrentDirection::OpenCircuit {
            self.cycle_open_flag = false;
        }
        self.current_direction = direction;
    }

    /// Count the cycle that just ended and fade every cell's SOH.
    ///
    /// Returns `false` without touching anything if this open-circuit
    /// sojourn was already counted.
    pub fn on_open_circuit_entry(
        &mut self,
        cells: &mut CellTracker,
        reference_cell: usize,
        cycle_life: u32,
    ) -> bool {
        if self.cycle_open_flag {
            return false;
        }
        self.cycle_open_flag = true;

        let full_cycle_as = 2.0 * cells.capacity_as();
        if let Some(reference) = cells.cell(reference_cell) {
            self.efc_counter += reference.abs_integrated_current_as / full_cycle_as;
        }

        for i in 0..cells.len() {
            if let Some(cell) = cells.cell_mut(i) {
                let cycles = cell.abs_integrated_current_as / full_cycle_as;
                cell.soh -= cycles / cycle_life as f32 * 1000.0;
                cell.abs_integrated_current_as = 0.0;
                cell.refresh_soc();
            }
        }

        info!("AGING | EFC={:.3}", self.efc_counter);
        true
    }

    /// EFC as reported in telemetry.
    pub fn efc_rounded(&self) -> u32 {
        self.efc_counter.round().max(0.0) as u32
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Lifetime aging state that must survive a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgingRecord {
    pub efc_counter: f32,
    pub soh: Vec<f32, MAX_CELLS>,
}

impl AgingRecord {
    pub fn capture(aggregate: &PackAggregate, cells: &CellTracker) -> Self {
        let mut soh = Vec::new();
        for cell in cells.cells() {
            let _ = soh.push(cell.soh);
        }
        Self {
            efc_counter: aggregate.efc_counter,
            soh,
        }
    }

    /// Serialise into `buf`, returning the used prefix.
    pub fn encode<'a>(&self, buf: &'a mut [u8]) -> Option<&'a mut [u8]> {
        postcard::to_slice(self, buf).ok()
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        postcard::from_bytes(bytes).ok()
    }
}
