//! Unified error types for the BMU core.
//!
//! A single `Error` enum that every subsystem converts into, so the tick
//! orchestrator handles failures uniformly.  All variants are `Copy` and
//! carry no heap data.
//!
//! Latched over/under-voltage faults are *not* errors: they are a modeled
//! domain event (see [`FaultCounts`]) that drives the pack state machine.

use core::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the core funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The measurement source could not complete a conversion.
    Measurement(MeasurementError),
    /// A balancing or protection command was rejected.
    Actuator(ActuatorError),
    /// Configuration is invalid.  Fatal at startup.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Measurement(e) => write!(f, "measurement: {e}"),
            Self::Actuator(e) => write!(f, "actuator: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl core::error::Error for Error {}

// ---------------------------------------------------------------------------
// Measurement errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementError {
    /// Conversion did not finish within the tick budget.
    Timeout,
    /// The transport to the analog front-end failed.
    CommunicationFailed,
    /// A converted value is outside the physically plausible range.
    OutOfRange,
}

impl fmt::Display for MeasurementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "conversion timed out"),
            Self::CommunicationFailed => write!(f, "AFE communication failed"),
            Self::OutOfRange => write!(f, "reading out of range"),
        }
    }
}

impl From<MeasurementError> for Error {
    fn from(e: MeasurementError) -> Self {
        Self::Measurement(e)
    }
}

// ---------------------------------------------------------------------------
// Actuator errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    /// The device refused a balancing command.
    CommandRejected,
    /// Balancing status bits could not be read back.
    StatusReadFailed,
    /// The protection relay pin could not be driven.
    RelayWriteFailed,
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandRejected => write!(f, "balancing command rejected"),
            Self::StatusReadFailed => write!(f, "balance status read failed"),
            Self::RelayWriteFailed => write!(f, "relay write failed"),
        }
    }
}

impl From<ActuatorError> for Error {
    fn from(e: ActuatorError) -> Self {
        Self::Actuator(e)
    }
}

// ---------------------------------------------------------------------------
// Latched faults (domain event, not an error)
// ---------------------------------------------------------------------------

/// Over/under-voltage fault counters as reported by the fault source.
///
/// Any nonzero count forces the pack into `Fault` until acknowledged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultCounts {
    pub overvoltage: u16,
    pub undervoltage: u16,
}

impl FaultCounts {
    pub const fn is_clear(&self) -> bool {
        self.overvoltage == 0 && self.undervoltage == 0
    }

    /// Element-wise max; counts never decrease while latched.
    pub fn merge(self, other: Self) -> Self {
        Self {
            overvoltage: self.overvoltage.max(other.overvoltage),
            undervoltage: self.undervoltage.max(other.undervoltage),
        }
    }
}

impl fmt::Display for FaultCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OV={} UV={}", self.overvoltage, self.undervoltage)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
