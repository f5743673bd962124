//! Open-circuit-voltage lookup.
//!
//! The OCV curve is a fitted 4th-degree polynomial in SOC percent,
//! sampled once per permille into a 1001-entry table of microvolts.
//! Resolving a resting cell voltage back to SOC is a binary search over
//! that table.

use log::debug;
use serde::{Deserialize, Serialize};

use super::CurrentDirection;

/// Table entries: SOC 0..=1000 permille.
pub const OCV_TABLE_SIZE: usize = 1001;

/// Highest SOC index in the table.
pub const SOC_MAX: u16 = (OCV_TABLE_SIZE - 1) as u16;

// ---------------------------------------------------------------------------
// Coefficients
// ---------------------------------------------------------------------------

/// `V(x) = c4·x⁴ + c3·x³ + c2·x² + c1·x + c0` volts, `x` in SOC percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OcvCoefficients {
    pub c4: f64,
    pub c3: f64,
    pub c2: f64,
    pub c1: f64,
    pub c0: f64,
}

impl OcvCoefficients {
    /// Bench fit of the reference cell (discharge, 25 °C).
    pub const DEFAULT_FIT: Self = Self {
        c4: -4.642e-09,
        c3: 1.241e-06,
        c2: -0.000_112_3,
        c1: 0.006_514,
        c0: 1.871,
    };

    /// Straight-line fit of the same cell, used while charging.  It sits
    /// above [`DEFAULT_FIT`](Self::DEFAULT_FIT) below roughly 80 % SOC.
    pub const LINEAR_FIT: Self = Self {
        c4: 0.0,
        c3: 0.0,
        c2: 0.0,
        c1: 0.002_11,
        c0: 1.95,
    };

    /// Evaluate the curve in volts at `percent` SOC.
    pub fn volts_at(&self, percent: f64) -> f64 {
        // Horner form
        (((self.c4 * percent + self.c3) * percent + self.c2) * percent + self.c1) * percent
            + self.c0
    }

    /// Table entry for `soc_permille`, rounded to the nearest microvolt.
    ///
    /// Negative values saturate to 0 and overflow saturates to `u32::MAX`,
    /// which keeps a monotone curve monotone after quantisation.
    pub fn sample_uv(&self, soc_permille: u16) -> u32 {
        let x = f64::from(soc_permille) * 0.1;
        (self.volts_at(x) * 1e6).round() as u32
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Voltage (µV) indexed by SOC permille.
#[derive(Clone, PartialEq, Eq)]
pub struct OcvTable {
    entries: [u32; OCV_TABLE_SIZE],
}

impl core::fmt::Debug for OcvTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OcvTable")
            .field("min_uv", &self.entries[0])
            .field("max_uv", &self.entries[OCV_TABLE_SIZE - 1])
            .finish()
    }
}

impl OcvTable {
    /// Sample `coefficients` at every permille step.
    pub fn build(coefficients: &OcvCoefficients) -> Self {
        let mut entries = [0u32; OCV_TABLE_SIZE];
        for (soc, entry) in entries.iter_mut().enumerate() {
            *entry = coefficients.sample_uv(soc as u16);
        }
        Self { entries }
    }

    /// Voltage at `soc` permille (clamped to the table).
    pub fn voltage_at(&self, soc: u16) -> u32 {
        self.entries[usize::from(soc.min(SOC_MAX))]
    }

    pub fn entries(&self) -> &[u32; OCV_TABLE_SIZE] {
        &self.entries
    }

    /// `table[i] <= table[i + 1]` for every `i`.
    pub fn is_monotonic(&self) -> bool {
        self.entries.windows(2).all(|w| w[0] <= w[1])
    }

    /// Largest SOC whose table voltage does not exceed `voltage_uv`.
    ///
    /// Out-of-table voltages clamp to 0 or 1000 and return immediately;
    /// the search only runs strictly inside the table range, where
    /// `table[left] <= voltage < table[right]` holds on every iteration.
    pub fn resolve(&self, voltage_uv: u32) -> u16 {
        let last = OCV_TABLE_SIZE - 1;
        if voltage_uv <= self.entries[0] {
            return 0;
        }
        if voltage_uv >= self.entries[last] {
            return SOC_MAX;
        }

        let (mut left, mut right) = (0usize, last);
        while left + 1 != right {
            let mid = left + (right - left) / 2;
            if self.entries[mid] > voltage_uv {
                right = mid;
            } else {
                left = mid;
            }
        }
        left as u16
    }
}

// ---------------------------------------------------------------------------
// Direction-keyed model
// ---------------------------------------------------------------------------

/// The active OCV table plus the fits it can be rebuilt from.
///
/// Charge and discharge use separately fitted curves; open circuit keeps
/// whichever table was last active.
#[derive(Debug, Clone)]
pub struct OcvModel {
    discharge: OcvCoefficients,
    charge: OcvCoefficients,
    active: CurrentDirection,
    table: OcvTable,
}

impl OcvModel {
    /// Start on the discharge fit.
    pub fn new(discharge: OcvCoefficients, charge: OcvCoefficients) -> Self {
        Self {
            discharge,
            charge,
            active: CurrentDirection::Discharge,
            table: OcvTable::build(&discharge),
        }
    }

    /// Follow the pack current.  Returns `true` if the table was rebuilt.
    pub fn select(&mut self, direction: CurrentDirection) -> bool {
        let coefficients = match direction {
            CurrentDirection::OpenCircuit => return false,
            d if d == self.active => return false,
            CurrentDirection::Discharge => self.discharge,
            CurrentDirection::Charge => self.charge,
        };
        debug!("OCV | rebuilding table for {:?}", direction);
        self.table = OcvTable::build(&coefficients);
        self.active = direction;
        true
    }

    /// Replace both fits and rebuild the active table.
    pub fn reload(&mut self, discharge: OcvCoefficients, charge: OcvCoefficients) {
        self.discharge = discharge;
        self.charge = charge;
        let active = if self.active == CurrentDirection::Charge { charge } else { discharge };
        self.table = OcvTable::build(&active);
    }

    pub fn active_direction(&self) -> CurrentDirection {
        self.active
    }

    pub fn table(&self) -> &OcvTable {
        &self.table
    }
}
