//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the `log` facade (UART on the target, `tracing-subscriber` on the
//! host).  A host-link adapter would implement the same trait.

use log::{debug, info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Adapter that logs every [`AppEvent`] to the console.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Telemetry(t) => {
                let soc_min = t.soc_permille.iter().min().copied().unwrap_or(0);
                let soc_max = t.soc_permille.iter().max().copied().unwrap_or(0);
                let balancing = t.balance_active.iter().filter(|&&b| b).count();
                debug!(
                    "TELEM | state={:?} | pack={:.3}V I={}mA T={:.1}\u{00b0}C | \
                     SOC={}..{}\u{2030} | EFC={} | balancing={} ({} active)",
                    t.state,
                    f64::from(t.pack_voltage_uv) / 1e6,
                    t.current_ma,
                    f64::from(t.ic_temperature_dc) / 10.0,
                    soc_min,
                    soc_max,
                    t.efc,
                    if t.balancing_enabled { "on" } else { "off" },
                    balancing,
                );
            }
            AppEvent::StateChanged { from, to } => {
                info!("STATE | {:?} -> {:?}", from, to);
            }
            AppEvent::FaultDetected(counts) => {
                warn!("FAULT | latched {}", counts);
            }
            AppEvent::FaultCleared => {
                info!("FAULT | acknowledged and cleared");
            }
            AppEvent::MeasurementFailed { streak } => {
                warn!("MEAS | conversion failed, streak={}", streak);
            }
            AppEvent::CycleCounted { efc } => {
                info!("AGING | EFC={:.3}", efc);
            }
            AppEvent::Started(state) => {
                info!("START | initial_state={:?}", state);
            }
        }
    }
}
