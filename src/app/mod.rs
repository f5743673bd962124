//! Application core: pure domain logic, zero I/O.
//!
//! This module holds the per-tick orchestration of the BMU: measurement,
//! fault latching, state machine, balancing scheduler and aging.  All
//! interaction with hardware happens through **port traits** defined in
//! [`ports`], keeping this layer fully testable without real peripherals.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
