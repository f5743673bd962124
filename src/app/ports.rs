//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ AppService (domain)
//! ```
//!
//! Driven adapters (measurement device, balancing switches, protection
//! outputs, event sinks, storage) implement these traits.  The
//! [`AppService`](super::service::AppService) consumes them via generics,
//! so the domain core never touches hardware directly.
//!
//! All port errors are typed; callers handle every variant explicitly.

use crate::error::{ActuatorError, FaultCounts, MeasurementError};
use crate::fsm::context::StatusIndicator;
use crate::measurement::RawMeasurements;

// ───────────────────────────────────────────────────────────────
// Measurement port (driven adapter: AFE → domain)
// ───────────────────────────────────────────────────────────────

/// Read-side port: the domain calls this once per tick.
pub trait MeasurementSource {
    /// Trigger a conversion and block until it completes.  Implementations
    /// enforce their own timeout and fail fast with
    /// [`MeasurementError::Timeout`].
    fn start_conversion_and_wait(&mut self) -> Result<RawMeasurements, MeasurementError>;

    /// Keep the device's communication watchdog alive while idling
    /// between ticks.
    fn keep_alive(&mut self) -> Result<(), MeasurementError> {
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Balancing actuator port (driven adapter: domain → AFE switches)
// ───────────────────────────────────────────────────────────────

/// Passive-balancing switch bank.  Only the balancing scheduler calls this.
pub trait BalancingActuator {
    /// Global balancing enable.
    fn set_balancing_enabled(&mut self, enabled: bool) -> Result<(), ActuatorError>;

    /// Arm or disarm one cell's switch for `minutes`.
    fn set_cell_balance(
        &mut self,
        cell: u8,
        active: bool,
        minutes: u8,
    ) -> Result<(), ActuatorError>;

    /// Switch status bitmask, bit `i` = cell `i`.
    fn read_balance_status(&mut self) -> Result<u16, ActuatorError>;
}

// ───────────────────────────────────────────────────────────────
// Fault source port (driven adapter: AFE fault registers → domain)
// ───────────────────────────────────────────────────────────────

pub trait FaultSource {
    /// Over/under-voltage counts currently reported by the device.
    fn fault_status(&mut self) -> FaultCounts;

    /// Reset the device's fault registers.
    fn clear_faults(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Protection port (driven adapter: domain → relay / LEDs)
// ───────────────────────────────────────────────────────────────

pub trait ProtectionPort {
    /// Open (`true`) or close the pack protection relay.
    fn set_relay_open(&mut self, open: bool) -> Result<(), ActuatorError>;

    /// Show the pack state colour.
    fn show_indicator(&mut self, indicator: StatusIndicator);

    /// Visible safe-failure indicator for measurement or actuator loss.
    fn set_failure_indicator(&mut self, on: bool);
}

// ───────────────────────────────────────────────────────────────
// Combined hardware bound
// ───────────────────────────────────────────────────────────────

/// Everything the tick needs from the pack hardware.  One `&mut` value
/// satisfies all four ports, which avoids juggling several mutable
/// borrows of the same device.
pub trait PackHardware: MeasurementSource + BalancingActuator + FaultSource + ProtectionPort {}

impl<T> PackHardware for T where
    T: MeasurementSource + BalancingActuator + FaultSource + ProtectionPort
{
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.  Adapters decide where they go (serial log, JSON
/// lines, a test recorder).
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage for the aging record.
///
/// - Keys are namespaced to prevent collisions between subsystems.
/// - Write operations MUST be atomic, with no partial writes on power loss.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Caller's buffer is smaller than the stored value.
    BufferTooSmall,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::BufferTooSmall => write!(f, "buffer too small"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}
