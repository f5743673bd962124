//! Mock pack hardware for integration tests.
//!
//! Serves scripted cell voltages and sense voltage as raw register codes,
//! and records every actuator call so tests can assert on the full
//! command history without a measurement device.

use bmu::app::events::AppEvent;
use bmu::app::ports::{BalancingActuator, EventSink, FaultSource, MeasurementSource, ProtectionPort};
use bmu::config::MAX_CELLS;
use bmu::error::{ActuatorError, FaultCounts, MeasurementError};
use bmu::fsm::context::StatusIndicator;
use bmu::measurement::{
    RawMeasurements, encode_cell_uv, encode_ic_temperature_dc, encode_sense_uv, encode_stack_uv,
};
use bmu::tick_timer::TickCountdown;

// ── Actuator call record ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorCall {
    BalancingEnabled(bool),
    CellBalance { cell: u8, active: bool, minutes: u8 },
    Relay { open: bool },
    Indicator(StatusIndicator),
    FailureIndicator(bool),
    ClearFaults,
}

// ── MockPack ──────────────────────────────────────────────────

pub struct MockPack {
    pub cell_uv: Vec<u32>,
    pub sense_uv: i32,
    pub faults: FaultCounts,
    /// Conversions still to fail.
    pub fail_next: u32,
    pub reject_balance: bool,
    pub calls: Vec<ActuatorCall>,
    /// Countdown decremented once per keep-alive, standing in for the
    /// timer interrupt.
    pub ticker: Option<&'static TickCountdown>,
    pub keep_alives: u32,
    pub fail_keep_alive: bool,
    balancing_enabled: bool,
    armed: u16,
}

#[allow(dead_code)]
impl MockPack {
    pub fn new(cell_uv: &[u32]) -> Self {
        Self {
            cell_uv: cell_uv.to_vec(),
            sense_uv: 0,
            faults: FaultCounts::default(),
            fail_next: 0,
            reject_balance: false,
            calls: Vec::new(),
            ticker: None,
            keep_alives: 0,
            fail_keep_alive: false,
            balancing_enabled: false,
            armed: 0,
        }
    }

    /// `n` cells at the same voltage.
    pub fn uniform(n: usize, uv: u32) -> Self {
        Self::new(&vec![uv; n])
    }

    pub fn relay_open(&self) -> bool {
        self.calls
            .iter()
            .rev()
            .find_map(|c| match c {
                ActuatorCall::Relay { open } => Some(*open),
                _ => None,
            })
            .unwrap_or(false)
    }

    pub fn indicator(&self) -> Option<StatusIndicator> {
        self.calls.iter().rev().find_map(|c| match c {
            ActuatorCall::Indicator(i) => Some(*i),
            _ => None,
        })
    }

    pub fn failure_indicator(&self) -> bool {
        self.calls
            .iter()
            .rev()
            .find_map(|c| match c {
                ActuatorCall::FailureIndicator(on) => Some(*on),
                _ => None,
            })
            .unwrap_or(false)
    }

    /// Cells whose switch is currently armed, ascending.
    pub fn armed_cells(&self) -> Vec<u8> {
        (0..MAX_CELLS as u8).filter(|&i| self.armed & (1 << i) != 0).collect()
    }

    pub fn balancing_enabled(&self) -> bool {
        self.balancing_enabled
    }

    pub fn count(&self, call: &ActuatorCall) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }
}

impl MeasurementSource for MockPack {
    fn start_conversion_and_wait(&mut self) -> Result<RawMeasurements, MeasurementError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(MeasurementError::Timeout);
        }
        let mut raw = RawMeasurements::default();
        for (slot, &uv) in raw.cells.iter_mut().zip(&self.cell_uv) {
            *slot = encode_cell_uv(uv);
        }
        raw.stack = encode_stack_uv(self.cell_uv.iter().sum());
        raw.ic_temperature = encode_ic_temperature_dc(250);
        (raw.isense1, raw.isense2) = encode_sense_uv(self.sense_uv);
        Ok(raw)
    }

    fn keep_alive(&mut self) -> Result<(), MeasurementError> {
        self.keep_alives += 1;
        if let Some(t) = self.ticker {
            t.on_timer_interrupt();
        }
        if self.fail_keep_alive {
            Err(MeasurementError::CommunicationFailed)
        } else {
            Ok(())
        }
    }
}

impl BalancingActuator for MockPack {
    fn set_balancing_enabled(&mut self, enabled: bool) -> Result<(), ActuatorError> {
        self.calls.push(ActuatorCall::BalancingEnabled(enabled));
        self.balancing_enabled = enabled;
        if !enabled {
            self.armed = 0;
        }
        Ok(())
    }

    fn set_cell_balance(
        &mut self,
        cell: u8,
        active: bool,
        minutes: u8,
    ) -> Result<(), ActuatorError> {
        if self.reject_balance {
            return Err(ActuatorError::CommandRejected);
        }
        self.calls.push(ActuatorCall::CellBalance { cell, active, minutes });
        if active {
            self.armed |= 1 << cell;
        } else {
            self.armed &= !(1 << cell);
        }
        Ok(())
    }

    fn read_balance_status(&mut self) -> Result<u16, ActuatorError> {
        Ok(if self.balancing_enabled { self.armed } else { 0 })
    }
}

impl FaultSource for MockPack {
    fn fault_status(&mut self) -> FaultCounts {
        self.faults
    }

    fn clear_faults(&mut self) {
        self.calls.push(ActuatorCall::ClearFaults);
        self.faults = FaultCounts::default();
    }
}

impl ProtectionPort for MockPack {
    fn set_relay_open(&mut self, open: bool) -> Result<(), ActuatorError> {
        self.calls.push(ActuatorCall::Relay { open });
        Ok(())
    }

    fn show_indicator(&mut self, indicator: StatusIndicator) {
        self.calls.push(ActuatorCall::Indicator(indicator));
    }

    fn set_failure_indicator(&mut self, on: bool) {
        self.calls.push(ActuatorCall::FailureIndicator(on));
    }
}

// ── Recording sink ────────────────────────────────────────────

pub struct RecordingSink {
    pub events: Vec<AppEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn telemetry_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, AppEvent::Telemetry(_)))
            .count()
    }

    pub fn transitions(&self) -> Vec<(bmu::fsm::StateId, bmu::fsm::StateId)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                AppEvent::StateChanged { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.push(event.clone());
    }
}
