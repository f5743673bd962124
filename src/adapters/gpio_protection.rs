//! GPIO protection outputs.
//!
//! Implements [`ProtectionPort`] over `embedded-hal` 1.0 output pins: the
//! pack relay, an RGB status LED and a separate failure LED.  The LEDs
//! are wired active-low (pin low = lit); the relay driver is active-high
//! (pin high = open).

use embedded_hal::digital::OutputPin;
use log::warn;

use crate::app::ports::ProtectionPort;
use crate::error::ActuatorError;
use crate::fsm::context::StatusIndicator;

/// Relay, RGB status LED and failure LED.
pub struct GpioProtection<RELAY, R, G, B, FAIL> {
    relay: RELAY,
    red: R,
    green: G,
    blue: B,
    failure: FAIL,
}

impl<RELAY, R, G, B, FAIL> GpioProtection<RELAY, R, G, B, FAIL>
where
    RELAY: OutputPin,
    R: OutputPin,
    G: OutputPin,
    B: OutputPin,
    FAIL: OutputPin,
{
    pub fn new(relay: RELAY, red: R, green: G, blue: B, failure: FAIL) -> Self {
        Self {
            relay,
            red,
            green,
            blue,
            failure,
        }
    }

    /// Give the pins back.
    pub fn release(self) -> (RELAY, R, G, B, FAIL) {
        (self.relay, self.red, self.green, self.blue, self.failure)
    }
}

/// Which colour channels are lit for an indicator, as (r, g, b).
pub const fn indicator_channels(indicator: StatusIndicator) -> (bool, bool, bool) {
    match indicator {
        StatusIndicator::Off => (false, false, false),
        StatusIndicator::Blue => (false, false, true),
        StatusIndicator::Green => (false, true, false),
        StatusIndicator::White => (true, true, true),
        StatusIndicator::Red => (true, false, false),
    }
}

/// Drive an active-low LED.
fn drive_led(pin: &mut impl OutputPin, lit: bool) -> bool {
    if lit { pin.set_low().is_ok() } else { pin.set_high().is_ok() }
}

impl<RELAY, R, G, B, FAIL> ProtectionPort for GpioProtection<RELAY, R, G, B, FAIL>
where
    RELAY: OutputPin,
    R: OutputPin,
    G: OutputPin,
    B: OutputPin,
    FAIL: OutputPin,
{
    fn set_relay_open(&mut self, open: bool) -> Result<(), ActuatorError> {
        let result = if open {
            self.relay.set_high()
        } else {
            self.relay.set_low()
        };
        result.map_err(|_| ActuatorError::RelayWriteFailed)
    }

    fn show_indicator(&mut self, indicator: StatusIndicator) {
        let (r, g, b) = indicator_channels(indicator);
        let ok = drive_led(&mut self.red, r)
            & drive_led(&mut self.green, g)
            & drive_led(&mut self.blue, b);
        if !ok {
            warn!("GPIO | status LED write failed");
        }
    }

    fn set_failure_indicator(&mut self, on: bool) {
        if !drive_led(&mut self.failure, on) {
            warn!("GPIO | failure LED write failed");
        }
    }
}
