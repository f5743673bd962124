//! Raw AFE codes to physical units.
//!
//! The conversion constants belong to the measurement device's register
//! interface and are fixed; the core applies them once per tick to
//! produce an immutable [`PackSnapshot`].
//!
//! | Quantity        | Raw field          | Scale                        |
//! |-----------------|--------------------|------------------------------|
//! | Cell voltage    | 15 bit             | 152.58789 µV / LSB           |
//! | Stack voltage   | 15 bit             | 2441.41 µV / LSB             |
//! | IC temperature  | 15 bit             | 0.032 K / LSB                |
//! | Current sense   | 19 bit, 2's compl. | 0.6 µV / LSB                 |

use heapless::Vec;

use crate::config::{BmuConfig, MAX_CELLS};
use crate::error::{FaultCounts, MeasurementError};

/// Valid-data mask on every measurement register.
pub const MEAS_RAW_MASK: u16 = 0x7FFF;

/// Cell voltage: 152.58789 µV per LSB, as a fraction.
pub const CELL_UV_PER_LSB_NUM: u64 = 15_258_789;
pub const CELL_UV_PER_LSB_DEN: u64 = 100_000;

/// Stack voltage: 2441.41 µV per LSB, as a fraction.
pub const STACK_UV_PER_LSB_NUM: u64 = 244_141;
pub const STACK_UV_PER_LSB_DEN: u64 = 100;

/// IC temperature: 32 mK per LSB from absolute zero.
pub const IC_TEMP_MK_PER_LSB: i32 = 32;
pub const ZERO_CELSIUS_MK: i32 = 273_150;

/// Current sense: 0.6 µV per LSB, as a fraction.
pub const ISENSE_UV_PER_LSB_NUM: i32 = 6;
pub const ISENSE_UV_PER_LSB_DEN: i32 = 10;

/// Sign bit of the 19-bit current-sense code.
const ISENSE_SIGN_BIT: u32 = 1 << 18;

// ---------------------------------------------------------------------------
// Raw measurements
// ---------------------------------------------------------------------------

/// Register values as read from the measurement device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawMeasurements {
    pub stack: u16,
    /// Cell channels in stack order; only the first `cell_count` are used.
    pub cells: [u16; MAX_CELLS],
    pub ic_temperature: u16,
    /// Upper 15 bits of the current-sense code.
    pub isense1: u16,
    /// Lower 4 bits of the current-sense code.
    pub isense2: u16,
}

// ── Decoding ──────────────────────────────────────────────────

pub fn cell_uv(raw: u16) -> u32 {
    (u64::from(raw & MEAS_RAW_MASK) * CELL_UV_PER_LSB_NUM / CELL_UV_PER_LSB_DEN) as u32
}

pub fn stack_uv(raw: u16) -> u32 {
    (u64::from(raw & MEAS_RAW_MASK) * STACK_UV_PER_LSB_NUM / STACK_UV_PER_LSB_DEN) as u32
}

/// IC temperature in tenths of a degree Celsius.
pub fn ic_temperature_dc(raw: u16) -> i32 {
    (i32::from(raw & MEAS_RAW_MASK) * IC_TEMP_MK_PER_LSB - ZERO_CELSIUS_MK) / 100
}

/// Signed sense voltage across the shunt (µV).
pub fn sense_uv(isense1: u16, isense2: u16) -> i32 {
    let code = (u32::from(isense1 & MEAS_RAW_MASK) << 4) | u32::from(isense2 & 0x000F);
    let signed = if code & ISENSE_SIGN_BIT != 0 {
        (code | 0xFFF8_0000) as i32
    } else {
        code as i32
    };
    signed * ISENSE_UV_PER_LSB_NUM / ISENSE_UV_PER_LSB_DEN
}

/// Pack current (mA) for a sense voltage and shunt resistance.
pub fn current_ma(sense_uv: i32, shunt_micro_ohm: u32) -> i32 {
    (i64::from(sense_uv) * 1000 / i64::from(shunt_micro_ohm.max(1))) as i32
}

// ── Encoding (simulation and tests) ───────────────────────────

pub fn encode_cell_uv(uv: u32) -> u16 {
    (u64::from(uv) * CELL_UV_PER_LSB_DEN)
        .div_ceil(CELL_UV_PER_LSB_NUM)
        .min(u64::from(MEAS_RAW_MASK)) as u16
}

pub fn encode_stack_uv(uv: u32) -> u16 {
    (u64::from(uv) * STACK_UV_PER_LSB_DEN / STACK_UV_PER_LSB_NUM).min(u64::from(MEAS_RAW_MASK))
        as u16
}

pub fn encode_ic_temperature_dc(dc: i32) -> u16 {
    ((dc * 100 + ZERO_CELSIUS_MK) / IC_TEMP_MK_PER_LSB).clamp(0, i32::from(MEAS_RAW_MASK)) as u16
}

/// Split a sense voltage into the two current-sense registers.
pub fn encode_sense_uv(uv: i32) -> (u16, u16) {
    let code = (i64::from(uv) * i64::from(ISENSE_UV_PER_LSB_DEN) / i64::from(ISENSE_UV_PER_LSB_NUM))
        .clamp(-(1 << 18), (1 << 18) - 1);
    let code = (code as u32) & 0x0007_FFFF;
    (((code >> 4) as u16) & MEAS_RAW_MASK, (code & 0xF) as u16)
}

// ---------------------------------------------------------------------------
// PackSnapshot
// ---------------------------------------------------------------------------

/// One tick's worth of converted measurements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackSnapshot {
    pub pack_voltage_uv: u32,
    pub cell_voltage_uv: Vec<u32, MAX_CELLS>,
    /// Tenths of a degree Celsius.
    pub ic_temperature_dc: i32,
    /// Positive while discharging.
    pub current_ma: i32,
    pub sense_uv: i32,
    pub faults: FaultCounts,
}

impl PackSnapshot {
    /// Convert the first `config.cell_count` channels.
    ///
    /// A saturated cell channel means the conversion is unusable.
    pub fn from_raw(
        raw: &RawMeasurements,
        config: &BmuConfig,
        faults: FaultCounts,
    ) -> Result<Self, MeasurementError> {
        let mut cell_voltage_uv = Vec::new();
        for &code in raw.cells.iter().take(config.cells()) {
            if code & MEAS_RAW_MASK == MEAS_RAW_MASK {
                return Err(MeasurementError::OutOfRange);
            }
            cell_voltage_uv
                .push(cell_uv(code))
                .map_err(|_| MeasurementError::OutOfRange)?;
        }

        let sense = sense_uv(raw.isense1, raw.isense2);
        Ok(Self {
            pack_voltage_uv: stack_uv(raw.stack),
            cell_voltage_uv,
            ic_temperature_dc: ic_temperature_dc(raw.ic_temperature),
            current_ma: current_ma(sense, config.shunt_micro_ohm),
            sense_uv: sense,
            faults,
        })
    }
}
