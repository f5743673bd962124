//! Simulated cell stack for the host.
//!
//! Implements every hardware port against a simple electrical model:
//! each cell has a true SOC, its terminal voltage is the OCV polynomial
//! minus an internal-resistance drop, and conversions are encoded with
//! the same register scaling the real front-end uses.  Balancing
//! switches bleed a fixed current while armed.  Over/under-voltage
//! counts accumulate against the configured thresholds exactly like the
//! device's fault registers.

use log::{debug, info};

use crate::app::ports::{BalancingActuator, FaultSource, MeasurementSource, ProtectionPort};
use crate::config::{BmuConfig, MAX_CELLS};
use crate::error::{ActuatorError, FaultCounts, MeasurementError};
use crate::estimation::ocv::OcvCoefficients;
use crate::fsm::context::StatusIndicator;
use crate::measurement::{
    RawMeasurements, encode_cell_uv, encode_ic_temperature_dc, encode_sense_uv, encode_stack_uv,
};

/// Bleed current through an armed balancing resistor (mA).
pub const BLEED_MA: f64 = 80.0;

/// Internal resistance per cell (mΩ).
pub const INTERNAL_RESISTANCE_MOHM: f64 = 20.0;

/// Die temperature reported by the simulated front-end (0.1 °C).
const SIM_IC_TEMPERATURE_DC: i32 = 250;

// ═══════════════════════════════════════════════════════════════
//  Load profiles
// ═══════════════════════════════════════════════════════════════

/// Pack current as a function of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadProfile {
    /// Constant discharge.
    Discharge,
    /// Constant charge.
    Charge,
    /// Discharge, rest, charge, rest, repeated.
    Cycle,
}

/// Ticks per phase of [`LoadProfile::Cycle`].
pub const CYCLE_ACTIVE_TICKS: u64 = 600;
pub const CYCLE_REST_TICKS: u64 = 100;

impl LoadProfile {
    /// Pack current in mA (positive = discharge) at `tick`.
    pub fn current_ma(self, tick: u64, magnitude_ma: i32) -> i32 {
        match self {
            Self::Discharge => magnitude_ma,
            Self::Charge => -magnitude_ma,
            Self::Cycle => {
                let period = 2 * (CYCLE_ACTIVE_TICKS + CYCLE_REST_TICKS);
                match tick % period {
                    t if t < CYCLE_ACTIVE_TICKS => magnitude_ma,
                    t if t < CYCLE_ACTIVE_TICKS + CYCLE_REST_TICKS => 0,
                    t if t < 2 * CYCLE_ACTIVE_TICKS + CYCLE_REST_TICKS => -magnitude_ma,
                    _ => 0,
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Simulated pack
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
struct SimCell {
    /// True state of charge, 0.0 ..= 1.0.
    soc: f64,
    balance_remaining_ms: u32,
}

/// Host stand-in for the front-end, balancing switches and protection
/// outputs.
#[derive(Debug, Clone)]
pub struct SimulatedPack {
    cells: Vec<SimCell>,
    ocv: OcvCoefficients,
    capacity_as: f64,
    shunt_micro_ohm: u32,
    tick_ms: u32,
    overvoltage_uv: u32,
    undervoltage_uv: u32,
    load_ma: i32,
    faults: FaultCounts,
    balancing_enabled: bool,
    relay_open: bool,
    indicator: StatusIndicator,
    failure_indicator: bool,
    conversions: u64,
    /// Conversions `[from, from + count)` fail with a timeout.
    failure_window: Option<(u64, u64)>,
}

impl SimulatedPack {
    /// One cell per entry of `initial_soc` (0.0 ..= 1.0), up to
    /// [`MAX_CELLS`].
    pub fn new(config: &BmuConfig, initial_soc: &[f64]) -> Self {
        let cells = initial_soc
            .iter()
            .take(MAX_CELLS)
            .map(|&soc| SimCell {
                soc: soc.clamp(0.0, 1.0),
                balance_remaining_ms: 0,
            })
            .collect();
        info!(
            "SIM | {} cells, {:.2} Ah, tick {} ms",
            initial_soc.len().min(MAX_CELLS),
            config.rated_capacity_ah,
            config.tick_period_ms
        );
        Self {
            cells,
            ocv: config.ocv_discharge,
            capacity_as: f64::from(config.capacity_as()),
            shunt_micro_ohm: config.shunt_micro_ohm,
            tick_ms: config.tick_period_ms,
            overvoltage_uv: u32::from(config.overvoltage_threshold_mv) * 1000,
            undervoltage_uv: u32::from(config.undervoltage_threshold_mv) * 1000,
            load_ma: 0,
            faults: FaultCounts::default(),
            balancing_enabled: false,
            relay_open: false,
            indicator: StatusIndicator::Off,
            failure_indicator: false,
            conversions: 0,
            failure_window: None,
        }
    }

    /// Cells spread a little around `soc` so balancing has work to do.
    pub fn with_spread(config: &BmuConfig, soc: f64, spread: f64) -> Self {
        let n = config.cells();
        let socs: Vec<f64> = (0..n)
            .map(|i| {
                let offset = (i % 3) as f64 - 1.0;
                soc + offset * spread
            })
            .collect();
        Self::new(config, &socs)
    }

    /// Make `count` conversions fail starting at conversion `from`.
    pub fn fail_conversions(&mut self, from: u64, count: u64) {
        self.failure_window = Some((from, count));
    }

    /// External load (mA, positive = discharge).  Ignored while the relay
    /// is open.
    pub fn set_load_ma(&mut self, load_ma: i32) {
        self.load_ma = load_ma;
    }

    /// Current actually flowing through the stack.
    pub fn pack_current_ma(&self) -> i32 {
        if self.relay_open { 0 } else { self.load_ma }
    }

    pub fn cell_soc(&self, index: usize) -> Option<f64> {
        self.cells.get(index).map(|c| c.soc)
    }

    pub fn relay_open(&self) -> bool {
        self.relay_open
    }

    pub fn indicator(&self) -> StatusIndicator {
        self.indicator
    }

    pub fn failure_indicator(&self) -> bool {
        self.failure_indicator
    }

    pub fn conversions(&self) -> u64 {
        self.conversions
    }

    /// Terminal voltage of one cell (µV).
    pub fn cell_voltage_uv(&self, index: usize) -> Option<u32> {
        let cell = self.cells.get(index)?;
        let ocv_v = self.ocv.volts_at(cell.soc * 100.0);
        let drop_v = f64::from(self.pack_current_ma()) / 1000.0 * INTERNAL_RESISTANCE_MOHM / 1000.0;
        Some(((ocv_v - drop_v) * 1e6).round().max(0.0) as u32)
    }

    // ── Model step ────────────────────────────────────────────

    fn advance(&mut self) {
        let dt_s = f64::from(self.tick_ms) / 1000.0;
        let pack_ma = f64::from(self.pack_current_ma());
        let balancing = self.balancing_enabled;
        let tick_ms = self.tick_ms;
        for cell in &mut self.cells {
            let mut ma = pack_ma;
            if balancing && cell.balance_remaining_ms > 0 {
                ma += BLEED_MA;
                cell.balance_remaining_ms = cell.balance_remaining_ms.saturating_sub(tick_ms);
            }
            cell.soc = (cell.soc - ma / 1000.0 * dt_s / self.capacity_as).clamp(0.0, 1.0);
        }
    }

    fn sample(&mut self) -> RawMeasurements {
        let mut raw = RawMeasurements::default();
        let mut stack_uv = 0u32;
        for i in 0..self.cells.len() {
            let uv = self.cell_voltage_uv(i).unwrap_or(0);
            if uv > self.overvoltage_uv {
                self.faults.overvoltage = self.faults.overvoltage.saturating_add(1);
            }
            if uv < self.undervoltage_uv {
                self.faults.undervoltage = self.faults.undervoltage.saturating_add(1);
            }
            stack_uv = stack_uv.saturating_add(uv);
            raw.cells[i] = encode_cell_uv(uv);
        }
        raw.stack = encode_stack_uv(stack_uv);
        raw.ic_temperature = encode_ic_temperature_dc(SIM_IC_TEMPERATURE_DC);

        let sense_uv =
            i64::from(self.pack_current_ma()) * i64::from(self.shunt_micro_ohm) / 1000;
        let (isense1, isense2) =
            encode_sense_uv(sense_uv.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32);
        raw.isense1 = isense1;
        raw.isense2 = isense2;
        raw
    }
}

impl MeasurementSource for SimulatedPack {
    fn start_conversion_and_wait(&mut self) -> Result<RawMeasurements, MeasurementError> {
        let index = self.conversions;
        self.conversions += 1;
        self.advance();

        if let Some((from, count)) = self.failure_window {
            if index >= from && index < from.saturating_add(count) {
                debug!("SIM | conversion {} fails", index);
                return Err(MeasurementError::Timeout);
            }
        }
        Ok(self.sample())
    }
}

impl BalancingActuator for SimulatedPack {
    fn set_balancing_enabled(&mut self, enabled: bool) -> Result<(), ActuatorError> {
        self.balancing_enabled = enabled;
        if !enabled {
            for cell in &mut self.cells {
                cell.balance_remaining_ms = 0;
            }
        }
        Ok(())
    }

    fn set_cell_balance(
        &mut self,
        cell: u8,
        active: bool,
        minutes: u8,
    ) -> Result<(), ActuatorError> {
        let slot = self
            .cells
            .get_mut(usize::from(cell))
            .ok_or(ActuatorError::CommandRejected)?;
        slot.balance_remaining_ms = if active { u32::from(minutes) * 60_000 } else { 0 };
        Ok(())
    }

    fn read_balance_status(&mut self) -> Result<u16, ActuatorError> {
        if !self.balancing_enabled {
            return Ok(0);
        }
        Ok(self
            .cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.balance_remaining_ms > 0)
            .fold(0u16, |bits, (i, _)| bits | (1 << i)))
    }
}

impl FaultSource for SimulatedPack {
    fn fault_status(&mut self) -> FaultCounts {
        self.faults
    }

    fn clear_faults(&mut self) {
        self.faults = FaultCounts::default();
    }
}

impl ProtectionPort for SimulatedPack {
    fn set_relay_open(&mut self, open: bool) -> Result<(), ActuatorError> {
        if open != self.relay_open {
            info!("SIM | relay {}", if open { "open" } else { "closed" });
        }
        self.relay_open = open;
        Ok(())
    }

    fn show_indicator(&mut self, indicator: StatusIndicator) {
        self.indicator = indicator;
    }

    fn set_failure_indicator(&mut self, on: bool) {
        self.failure_indicator = on;
    }
}
