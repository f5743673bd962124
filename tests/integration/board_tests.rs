//! AppService driving the GPIO protection adapter.
//!
//! Measurement, balancing and fault status come from the scripted pack;
//! relay and LEDs go through `GpioProtection` onto pins whose levels the
//! test can read back.

use std::cell::Cell;
use std::rc::Rc;

use bmu::adapters::gpio_protection::GpioProtection;
use bmu::app::commands::AppCommand;
use bmu::app::ports::{BalancingActuator, FaultSource, MeasurementSource, ProtectionPort};
use bmu::app::service::AppService;
use bmu::config::BmuConfig;
use bmu::error::{ActuatorError, FaultCounts, MeasurementError};
use bmu::fsm::StateId;
use bmu::fsm::context::StatusIndicator;
use bmu::measurement::RawMeasurements;
use core::convert::Infallible;
use embedded_hal::digital::{ErrorType, OutputPin};

use crate::mock_hw::{MockPack, RecordingSink};

// ── Pins ──────────────────────────────────────────────────────

/// Output pin whose level is shared with the test.
#[derive(Clone, Default)]
struct LevelPin(Rc<Cell<bool>>);

impl LevelPin {
    fn is_high(&self) -> bool {
        self.0.get()
    }
}

impl ErrorType for LevelPin {
    type Error = Infallible;
}

impl OutputPin for LevelPin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.set(true);
        Ok(())
    }
}

#[derive(Default)]
struct Pins {
    relay: LevelPin,
    red: LevelPin,
    green: LevelPin,
    blue: LevelPin,
    failure: LevelPin,
}

impl Pins {
    /// Lit channels as (r, g, b); the LEDs are active-low.
    fn lit(&self) -> (bool, bool, bool) {
        (!self.red.is_high(), !self.green.is_high(), !self.blue.is_high())
    }
}

// ── Board ─────────────────────────────────────────────────────

type Outputs = GpioProtection<LevelPin, LevelPin, LevelPin, LevelPin, LevelPin>;

/// Scripted front end plus real protection outputs.
struct Board {
    pack: MockPack,
    outputs: Outputs,
}

impl MeasurementSource for Board {
    fn start_conversion_and_wait(&mut self) -> Result<RawMeasurements, MeasurementError> {
        self.pack.start_conversion_and_wait()
    }
}

impl BalancingActuator for Board {
    fn set_balancing_enabled(&mut self, enabled: bool) -> Result<(), ActuatorError> {
        self.pack.set_balancing_enabled(enabled)
    }

    fn set_cell_balance(
        &mut self,
        cell: u8,
        active: bool,
        minutes: u8,
    ) -> Result<(), ActuatorError> {
        self.pack.set_cell_balance(cell, active, minutes)
    }

    fn read_balance_status(&mut self) -> Result<u16, ActuatorError> {
        self.pack.read_balance_status()
    }
}

impl FaultSource for Board {
    fn fault_status(&mut self) -> FaultCounts {
        self.pack.fault_status()
    }

    fn clear_faults(&mut self) {
        self.pack.clear_faults();
    }
}

impl ProtectionPort for Board {
    fn set_relay_open(&mut self, open: bool) -> Result<(), ActuatorError> {
        self.outputs.set_relay_open(open)
    }

    fn show_indicator(&mut self, indicator: StatusIndicator) {
        self.outputs.show_indicator(indicator);
    }

    fn set_failure_indicator(&mut self, on: bool) {
        self.outputs.set_failure_indicator(on);
    }
}

fn board() -> (Board, Pins) {
    let pins = Pins::default();
    let outputs = GpioProtection::new(
        pins.relay.clone(),
        pins.red.clone(),
        pins.green.clone(),
        pins.blue.clone(),
        pins.failure.clone(),
    );
    let board = Board {
        pack: MockPack::uniform(7, 2_050_000),
        outputs,
    };
    (board, pins)
}

fn started() -> (AppService, Board, Pins, RecordingSink) {
    let (mut board, pins) = board();
    let mut sink = RecordingSink::new();
    let mut app = AppService::new(BmuConfig { cell_count: 7, ..BmuConfig::default() }).unwrap();
    app.start(&mut board, &mut sink).unwrap();
    (app, board, pins, sink)
}

// ── Tests ─────────────────────────────────────────────────────

#[test]
fn start_closes_relay_and_darkens_leds() {
    let (_app, _board, pins, _sink) = started();
    assert!(!pins.relay.is_high());
    assert_eq!(pins.lit(), (false, false, false));
    assert!(pins.failure.is_high());
}

#[test]
fn direction_colours_reach_the_pins() {
    let (mut app, mut board, pins, mut sink) = started();

    board.pack.sense_uv = 50_000;
    app.tick(&mut board, &mut sink).unwrap();
    assert_eq!(pins.lit(), (false, true, false));

    board.pack.sense_uv = -50_000;
    app.tick(&mut board, &mut sink).unwrap();
    assert_eq!(pins.lit(), (false, false, true));

    board.pack.sense_uv = 0;
    app.tick(&mut board, &mut sink).unwrap();
    assert_eq!(pins.lit(), (true, true, true));
}

#[test]
fn fault_drives_relay_pin_high_until_acknowledged() {
    let (mut app, mut board, pins, mut sink) = started();
    app.tick(&mut board, &mut sink).unwrap();

    board.pack.faults = FaultCounts { overvoltage: 1, undervoltage: 0 };
    app.tick(&mut board, &mut sink).unwrap();
    assert_eq!(app.state(), StateId::Fault);
    assert!(pins.relay.is_high());
    assert_eq!(pins.lit(), (true, false, false));

    app.handle_command(AppCommand::AcknowledgeFault, &mut board).unwrap();
    app.tick(&mut board, &mut sink).unwrap();
    assert_eq!(app.state(), StateId::Idle);
    assert!(!pins.relay.is_high());
}

#[test]
fn measurement_failure_lights_the_failure_led() {
    let (mut app, mut board, pins, mut sink) = started();
    board.pack.fail_next = 1;
    assert!(app.tick(&mut board, &mut sink).is_err());
    assert!(!pins.failure.is_high());

    app.tick(&mut board, &mut sink).unwrap();
    assert!(pins.failure.is_high());
}
