//! Per-cell state estimation.
//!
//! ```text
//!  OcvTable ──▶ CellTracker ──▶ PackAggregate (EFC / SOH aging)
//!  (voltage→SOC)  (Coulomb counting, calibration)
//! ```
//!
//! Everything here is pure arithmetic over owned state; hardware access
//! happens in the app layer.

pub mod aging;
pub mod cells;
pub mod ocv;

use serde::{Deserialize, Serialize};

/// Direction of the pack current, derived from the sense voltage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurrentDirection {
    Discharge,
    Charge,
    OpenCircuit,
}

impl CurrentDirection {
    /// Classify a signed sense voltage against the open-circuit dead band.
    ///
    /// Positive sense voltage is discharge current.
    pub fn from_sense(sense_uv: i32, dead_band_uv: u32) -> Self {
        if sense_uv.unsigned_abs() <= dead_band_uv {
            Self::OpenCircuit
        } else if sense_uv > 0 {
            Self::Discharge
        } else {
            Self::Charge
        }
    }
}
