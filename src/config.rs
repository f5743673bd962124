//! System configuration parameters
//!
//! All tunable parameters for the BMU core.  Values can be overridden from a
//! JSON file (simulator) or live through operator commands; every update is
//! validated before it takes effect.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::estimation::ocv::{OcvCoefficients, OcvTable};

/// Largest supported series stack.
pub const MAX_CELLS: usize = 14;

/// Cell counts the measurement device can be wired for.
pub const SUPPORTED_CELL_COUNTS: [u8; 2] = [7, 14];

/// Calibration margins around the protection thresholds.
///
/// These differ between hardware revisions and have no closed-form
/// derivation, so they are plain data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationMargins {
    /// First margin above the undervoltage threshold (mV).
    pub discharge_floor_mv: u16,
    /// Second margin stacked on top of the floor margin (mV).
    pub discharge_guard_mv: u16,
    /// Distance below the overvoltage threshold that counts as full (mV).
    pub charge_ceiling_mv: u16,
    /// Extra sense-voltage allowance above the dead band for the CV tail (µV).
    pub charge_tail_uv: u32,
}

impl Default for CalibrationMargins {
    fn default() -> Self {
        Self {
            discharge_floor_mv: 200,
            discharge_guard_mv: 200,
            charge_ceiling_mv: 300,
            charge_tail_uv: 50,
        }
    }
}

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BmuConfig {
    // --- Pack ---
    /// Number of series cells (7 or 14).
    pub cell_count: u8,
    /// Rated cell capacity in ampere-hours.
    pub rated_capacity_ah: f32,
    /// Rated cycle life used by the aging model.
    pub cycle_life: u32,

    // --- Protection thresholds ---
    /// Cell overvoltage threshold (mV).
    pub overvoltage_threshold_mv: u16,
    /// Cell undervoltage threshold (mV).
    pub undervoltage_threshold_mv: u16,
    /// Calibration margins relative to the thresholds above.
    pub margins: CalibrationMargins,

    // --- Current sensing ---
    /// Sense-voltage dead band separating open circuit from charge/discharge (µV).
    pub sense_dead_band_uv: u32,
    /// Shunt resistance (µΩ).
    pub shunt_micro_ohm: u32,

    // --- Balancing ---
    /// Spread above which a balancing round selects cells (µV).
    pub voltage_difference_threshold_uv: u32,
    /// Most cells switched on in a single round.
    pub max_balanced_cells: u8,
    /// Per-cell switch duration (minutes).
    pub balance_duration_min: u8,
    /// Rest appended to every balancing round (ms).
    pub rest_time_ms: u32,
    /// Blackout after balancing is switched off, before OCV is trusted (ms).
    pub settle_offset_ms: u32,

    // --- Aging ---
    /// Cell whose throughput counter drives the EFC counter.
    pub reference_cell: u8,

    // --- OCV model ---
    /// Fitted OCV curve used while discharging (and at rest after discharge).
    pub ocv_discharge: OcvCoefficients,
    /// Fitted OCV curve used while charging (and at rest after charge).
    pub ocv_charge: OcvCoefficients,

    // --- Timing ---
    /// Control tick period (ms).
    pub tick_period_ms: u32,
    /// Consecutive measurement failures before escalating to Fault.
    pub measurement_failure_limit: u8,
}

impl Default for BmuConfig {
    fn default() -> Self {
        Self {
            // Pack
            cell_count: 14,
            rated_capacity_ah: 2.5,
            cycle_life: 1000,

            // Protection
            overvoltage_threshold_mv: 2500,
            undervoltage_threshold_mv: 1600,
            margins: CalibrationMargins::default(),

            // Sensing
            sense_dead_band_uv: 3000,
            shunt_micro_ohm: 100_000, // 100 mΩ

            // Balancing
            voltage_difference_threshold_uv: 5000, // 5 mV
            max_balanced_cells: 3,
            balance_duration_min: 1,
            rest_time_ms: 1000,
            settle_offset_ms: 30_000,

            // Aging
            reference_cell: 0,

            // OCV
            ocv_discharge: OcvCoefficients::DEFAULT_FIT,
            ocv_charge: OcvCoefficients::LINEAR_FIT,

            // Timing
            tick_period_ms: 200, // 5 Hz
            measurement_failure_limit: 3,
        }
    }
}

impl BmuConfig {
    /// Reject configurations the core must never tick with.
    pub fn validate(&self) -> Result<()> {
        if !SUPPORTED_CELL_COUNTS.contains(&self.cell_count) {
            return Err(Error::Config("cell_count must be 7 or 14"));
        }
        if !(self.rated_capacity_ah.is_finite() && self.rated_capacity_ah > 0.0) {
            return Err(Error::Config("rated_capacity_ah must be positive"));
        }
        if self.cycle_life == 0 {
            return Err(Error::Config("cycle_life must be nonzero"));
        }
        if self.tick_period_ms == 0 {
            return Err(Error::Config("tick_period_ms must be nonzero"));
        }
        if self.overvoltage_threshold_mv <= self.undervoltage_threshold_mv {
            return Err(Error::Config(
                "overvoltage threshold must exceed undervoltage threshold",
            ));
        }
        if self.margins.charge_ceiling_mv >= self.overvoltage_threshold_mv {
            return Err(Error::Config("charge ceiling margin exceeds overvoltage threshold"));
        }
        if self.max_balanced_cells == 0 || self.max_balanced_cells > self.cell_count {
            return Err(Error::Config("max_balanced_cells must be within 1..=cell_count"));
        }
        if self.reference_cell >= self.cell_count {
            return Err(Error::Config("reference_cell out of range"));
        }
        if self.shunt_micro_ohm == 0 {
            return Err(Error::Config("shunt_micro_ohm must be nonzero"));
        }
        if self.measurement_failure_limit == 0 {
            return Err(Error::Config("measurement_failure_limit must be nonzero"));
        }
        if !OcvTable::build(&self.ocv_discharge).is_monotonic() {
            return Err(Error::Config("discharge OCV fit is not monotonic"));
        }
        if !OcvTable::build(&self.ocv_charge).is_monotonic() {
            return Err(Error::Config("charge OCV fit is not monotonic"));
        }
        Ok(())
    }

    /// Number of cells as an index bound.
    pub fn cells(&self) -> usize {
        self.cell_count as usize
    }

    /// Rated capacity in ampere-seconds.
    pub fn capacity_as(&self) -> f32 {
        self.rated_capacity_ah * 3600.0
    }

    /// Tick period in seconds (integration step).
    pub fn tick_period_secs(&self) -> f32 {
        self.tick_period_ms as f32 / 1000.0
    }

    /// Length of one balancing round including its rest (ms).
    pub fn balance_round_ms(&self) -> i64 {
        i64::from(self.balance_duration_min) * 60_000 + i64::from(self.rest_time_ms)
    }

    /// Cell voltage at or below which discharge calibration fires (µV).
    pub fn discharge_floor_uv(&self) -> u32 {
        (u32::from(self.undervoltage_threshold_mv)
            + u32::from(self.margins.discharge_floor_mv)
            + u32::from(self.margins.discharge_guard_mv))
            * 1000
    }

    /// Cell voltage at or above which charge calibration may fire (µV).
    pub fn charge_ceiling_uv(&self) -> u32 {
        u32::from(
            self.overvoltage_threshold_mv
                .saturating_sub(self.margins.charge_ceiling_mv),
        ) * 1000
    }

    /// Largest sense-voltage magnitude still considered the end of the CV tail (µV).
    pub fn charge_tail_sense_uv(&self) -> u32 {
        self.sense_dead_band_uv + self.margins.charge_tail_uv
    }

    /// Discharge calibration condition for one cell.
    pub fn discharge_floor_reached(&self, cell_uv: u32) -> bool {
        cell_uv <= self.discharge_floor_uv()
    }

    /// Charge calibration condition for one cell.
    pub fn charge_ceiling_reached(&self, cell_uv: u32, sense_uv: i32) -> bool {
        cell_uv >= self.charge_ceiling_uv()
            && sense_uv.unsigned_abs() <= self.charge_tail_sense_uv()
    }
}
