//! Battery management unit core.
//!
//! Exposes the pure-logic modules (estimation, balancing, state machine)
//! together with the port traits hardware integrations implement.  The
//! `adapters` module carries the host-side implementations used by the
//! simulator and the integration tests.

#![deny(unused_must_use)]

pub mod app;
pub mod balancing;
pub mod config;
pub mod error;
pub mod estimation;
pub mod fsm;
pub mod measurement;
pub mod safety;
pub mod telemetry;
pub mod tick_timer;

pub mod adapters;
