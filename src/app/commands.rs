//! Inbound commands to the application service.
//!
//! These represent operator actions (serial console, host GUI, the
//! simulator CLI) that the [`AppService`](super::service::AppService)
//! interprets and acts upon.

use crate::config::BmuConfig;

/// Commands that external adapters can send into the application core.
#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    /// Clear latched faults and leave `Fault`.
    AcknowledgeFault,

    /// Operator balancing intent.
    SetBalancing(bool),

    /// Live threshold update from the host.  Validated before use.
    UpdateThresholds {
        voltage_difference_uv: u32,
        overvoltage_mv: u16,
        undervoltage_mv: u16,
    },

    /// Hot-reload the whole configuration.  Validated before use.
    UpdateConfig(BmuConfig),
}
