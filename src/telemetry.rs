//! Fixed-layout telemetry record.
//!
//! One record per tick, flattened to little-endian `u32` words for the
//! serial link.  Signed quantities travel as two's complement.  For `N`
//! cells the layout is:
//!
//! ```text
//!  word            field
//!  0               pack voltage (µV)
//!  1 ..= N         cell voltages (µV)
//!  N+1             IC temperature (0.1 °C)
//!  N+2             pack current (mA)
//!  N+3 ..= 2N+2    SOC (permille)
//!  2N+3 ..= 3N+2   SOH (permille)
//!  3N+3            EFC (rounded)
//!  3N+4 ..= 4N+3   balance-switch bits (0/1)
//!  4N+4            machine state
//!  4N+5            balancing enabled (0/1)
//! ```

use heapless::Vec;
use serde::Serialize;

use crate::config::MAX_CELLS;
use crate::fsm::StateId;

/// Word count for the largest stack.
pub const TELEMETRY_MAX_WORDS: usize = 4 * MAX_CELLS + 6;

/// Byte image size for the largest stack.
pub const TELEMETRY_MAX_BYTES: usize = TELEMETRY_MAX_WORDS * 4;

/// Word count for an `n`-cell stack.
pub const fn telemetry_words(n: usize) -> usize {
    4 * n + 6
}

/// Everything the host sees about one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub pack_voltage_uv: u32,
    pub cell_voltage_uv: Vec<u32, MAX_CELLS>,
    pub ic_temperature_dc: i32,
    pub current_ma: i32,
    pub soc_permille: Vec<u16, MAX_CELLS>,
    pub soh_permille: Vec<u16, MAX_CELLS>,
    pub efc: u32,
    pub balance_active: Vec<bool, MAX_CELLS>,
    pub state: StateId,
    pub balancing_enabled: bool,
}

/// Round a permille estimate into the reported range.
pub fn permille_word(value: f32) -> u16 {
    value.round().clamp(0.0, f32::from(u16::MAX)) as u16
}

impl TelemetryRecord {
    pub fn cell_count(&self) -> usize {
        self.cell_voltage_uv.len()
    }

    /// Flatten into the wire layout.
    pub fn to_words(&self) -> Vec<u32, TELEMETRY_MAX_WORDS> {
        let mut words: Vec<u32, TELEMETRY_MAX_WORDS> = Vec::new();
        // Every section is bounded by MAX_CELLS, so the total never exceeds
        // TELEMETRY_MAX_WORDS and the pushes cannot fail.
        let _ = words.push(self.pack_voltage_uv);
        let _ = words.extend_from_slice(&self.cell_voltage_uv);
        let _ = words.push(self.ic_temperature_dc as u32);
        let _ = words.push(self.current_ma as u32);
        for &soc in &self.soc_permille {
            let _ = words.push(u32::from(soc));
        }
        for &soh in &self.soh_permille {
            let _ = words.push(u32::from(soh));
        }
        let _ = words.push(self.efc);
        for &active in &self.balance_active {
            let _ = words.push(u32::from(active));
        }
        let _ = words.push(self.state as u32);
        let _ = words.push(u32::from(self.balancing_enabled));
        words
    }

    /// Little-endian byte image of [`to_words`](Self::to_words).
    pub fn to_le_bytes(&self) -> Vec<u8, TELEMETRY_MAX_BYTES> {
        let mut bytes = Vec::new();
        for word in self.to_words() {
            let _ = bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes
    }
}
