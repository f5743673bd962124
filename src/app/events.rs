//! Outbound application events.
//!
//! The [`AppService`](super::service::AppService) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other
//! side decide what to do with them: log to serial, print JSON lines,
//! record them in a test.

use serde::Serialize;

use crate::error::FaultCounts;
use crate::fsm::StateId;
use crate::telemetry::TelemetryRecord;

/// Structured events emitted by the application core.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AppEvent {
    /// One record per successful tick.
    Telemetry(TelemetryRecord),

    /// The FSM transitioned between states.
    StateChanged { from: StateId, to: StateId },

    /// Over/under-voltage counts were latched.
    FaultDetected(FaultCounts),

    /// The operator acknowledged and the latch was cleared.
    FaultCleared,

    /// A conversion failed; `streak` counts consecutive failures.
    MeasurementFailed { streak: u8 },

    /// An aging update counted a cycle.
    CycleCounted { efc: f32 },

    /// The application service has started (carries initial state).
    Started(StateId),
}
