//! Fuzz target: raw register conversion
//!
//! Builds a register image from arbitrary bytes and runs it through
//! `PackSnapshot::from_raw`, then through the SOC resolver, verifying:
//! - No panics under arbitrary register values
//! - A converted snapshot carries exactly `cell_count` cells
//! - Resolved SOC never leaves the table range
//!
//! cargo fuzz run fuzz_raw_conversion

#![no_main]

use bmu::config::{BmuConfig, MAX_CELLS};
use bmu::error::FaultCounts;
use bmu::estimation::ocv::{OcvCoefficients, OcvTable, SOC_MAX};
use bmu::measurement::{PackSnapshot, RawMeasurements};
use libfuzzer_sys::fuzz_target;

fn word(data: &[u8], i: usize) -> u16 {
    let lo = data.get(2 * i).copied().unwrap_or(0);
    let hi = data.get(2 * i + 1).copied().unwrap_or(0);
    u16::from_le_bytes([lo, hi])
}

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let mut raw = RawMeasurements {
        stack: word(data, 0),
        ic_temperature: word(data, 1),
        isense1: word(data, 2),
        isense2: word(data, 3),
        ..RawMeasurements::default()
    };
    for (i, cell) in raw.cells.iter_mut().enumerate() {
        *cell = word(data, 4 + i);
    }

    let cell_count = if data[0] & 1 == 0 { 7 } else { 14 };
    let config = BmuConfig { cell_count, ..BmuConfig::default() };
    let Ok(snapshot) = PackSnapshot::from_raw(&raw, &config, FaultCounts::default()) else {
        return;
    };
    assert_eq!(snapshot.cell_voltage_uv.len(), usize::from(cell_count));
    assert!(snapshot.cell_voltage_uv.len() <= MAX_CELLS);

    let table = OcvTable::build(&OcvCoefficients::DEFAULT_FIT);
    for &uv in &snapshot.cell_voltage_uv {
        assert!(table.resolve(uv) <= SOC_MAX, "SOC above range for {} uV", uv);
    }
});
