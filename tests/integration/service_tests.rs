//! Integration tests for the AppService tick pipeline.
//!
//! Measurement → fault latch → FSM → protection → balancing → aging →
//! telemetry, driven through the port traits with a scripted pack.

use bmu::adapters::memory_store::MemoryStore;
use bmu::app::commands::AppCommand;
use bmu::app::events::AppEvent;
use bmu::app::ports::StoragePort;
use bmu::app::service::AppService;
use bmu::config::BmuConfig;
use bmu::error::{Error, FaultCounts, MeasurementError};
use bmu::estimation::aging::{AGING_KEY, AGING_NAMESPACE};
use bmu::fsm::StateId;
use bmu::fsm::context::StatusIndicator;
use bmu::tick_timer::TickCountdown;

use crate::mock_hw::{ActuatorCall, MockPack, RecordingSink};

/// Resting cell voltage inside the default OCV curve.
const REST_UV: u32 = 2_050_000;
/// Sense voltage for ~0.5 A of discharge through the 100 mΩ shunt.
const DISCHARGE_SENSE_UV: i32 = 50_000;

fn config7() -> BmuConfig {
    BmuConfig { cell_count: 7, ..BmuConfig::default() }
}

fn started(mut pack: MockPack, config: BmuConfig) -> (AppService, MockPack, RecordingSink) {
    let mut app = AppService::new(config).expect("valid config");
    let mut sink = RecordingSink::new();
    app.start(&mut pack, &mut sink).expect("first conversion");
    (app, pack, sink)
}

fn rest_pack() -> (AppService, MockPack, RecordingSink) {
    started(MockPack::uniform(7, REST_UV), config7())
}

// ── Startup ───────────────────────────────────────────────────

#[test]
fn start_closes_relay_and_waits_in_idle() {
    let (app, pack, sink) = rest_pack();

    assert_eq!(app.state(), StateId::Idle);
    assert_eq!(sink.events, vec![AppEvent::Started(StateId::Idle)]);
    assert!(!pack.relay_open());
    assert_eq!(pack.indicator(), Some(StatusIndicator::Off));
    assert_eq!(app.cells().len(), 7);
    assert_eq!(app.tick_count(), 0);
}

#[test]
fn start_fails_without_a_first_conversion() {
    let mut pack = MockPack::uniform(7, REST_UV);
    pack.fail_next = 1;
    let mut app = AppService::new(config7()).unwrap();
    let mut sink = RecordingSink::new();
    assert_eq!(
        app.start(&mut pack, &mut sink),
        Err(Error::Measurement(MeasurementError::Timeout))
    );
    assert!(sink.events.is_empty());
}

// ── Telemetry ─────────────────────────────────────────────────

#[test]
fn every_successful_tick_emits_one_telemetry_record() {
    let (mut app, mut pack, mut sink) = rest_pack();
    for _ in 0..5 {
        app.tick(&mut pack, &mut sink).unwrap();
    }
    assert_eq!(sink.telemetry_count(), 5);

    let last = sink.events.iter().rev().find(|e| matches!(e, AppEvent::Telemetry(_)));
    let Some(AppEvent::Telemetry(t)) = last else {
        panic!("no telemetry");
    };
    assert_eq!(t.state, StateId::OpenCircuit);
    assert_eq!(t.cell_count(), 7);
    assert_eq!(t.soc_permille.len(), 7);
    assert_eq!(t.soh_permille.len(), 7);
    assert!(t.soh_permille.iter().all(|&s| s == 1000));
    assert_eq!(t.to_words().len(), bmu::telemetry::telemetry_words(7));
}

// ── Direction handling ────────────────────────────────────────

#[test]
fn discharge_then_rest_counts_a_cycle() {
    let (mut app, mut pack, mut sink) = rest_pack();
    let soc_before = app.cells().cell(0).unwrap().soc_c;

    pack.sense_uv = DISCHARGE_SENSE_UV;
    for _ in 0..10 {
        app.tick(&mut pack, &mut sink).unwrap();
    }
    assert_eq!(app.state(), StateId::Discharge);
    assert_eq!(pack.indicator(), Some(StatusIndicator::Green));
    assert!(app.cells().cell(0).unwrap().soc_c < soc_before);

    pack.sense_uv = 0;
    app.tick(&mut pack, &mut sink).unwrap();
    assert_eq!(app.state(), StateId::OpenCircuit);
    assert_eq!(pack.indicator(), Some(StatusIndicator::White));

    assert_eq!(
        sink.transitions(),
        vec![
            (StateId::Idle, StateId::Discharge),
            (StateId::Discharge, StateId::OpenCircuit)
        ]
    );
    assert!(sink.events.iter().any(|e| matches!(e, AppEvent::CycleCounted { .. })));
    assert!(app.aggregate().efc_counter > 0.0);
    assert!(app.is_aging_dirty());
}

#[test]
fn aging_is_counted_once_per_rest() {
    let (mut app, mut pack, mut sink) = rest_pack();
    pack.sense_uv = DISCHARGE_SENSE_UV;
    app.tick(&mut pack, &mut sink).unwrap();
    pack.sense_uv = 0;
    for _ in 0..20 {
        app.tick(&mut pack, &mut sink).unwrap();
    }
    let counted = sink
        .events
        .iter()
        .filter(|e| matches!(e, AppEvent::CycleCounted { .. }))
        .count();
    assert_eq!(counted, 1);
}

#[test]
fn charge_lights_blue_and_raises_soc() {
    let (mut app, mut pack, mut sink) = rest_pack();
    let soc_before = app.cells().cell(0).unwrap().soc_c;
    pack.sense_uv = -DISCHARGE_SENSE_UV;
    for _ in 0..5 {
        app.tick(&mut pack, &mut sink).unwrap();
    }
    assert_eq!(app.state(), StateId::Charge);
    assert_eq!(pack.indicator(), Some(StatusIndicator::Blue));
    assert!(app.cells().cell(0).unwrap().soc_c > soc_before);
}

#[test]
fn discharge_floor_calibrates_the_cell_that_reached_it() {
    let (mut app, mut pack, mut sink) = rest_pack();
    let dod_before = app.cells().cell(0).unwrap().dod_c;

    // Default floor: 1600 + 200 + 200 mV
    pack.cell_uv[0] = 1_990_000;
    pack.sense_uv = DISCHARGE_SENSE_UV;
    app.tick(&mut pack, &mut sink).unwrap();

    let calibrated = app.cells().cell(0).unwrap();
    assert_eq!(calibrated.soc_c, 0.0);
    assert_eq!(calibrated.soh, dod_before);

    let untouched = app.cells().cell(1).unwrap();
    assert_eq!(untouched.soh, 1000.0);
    assert!(untouched.soc_c > 0.0);
}

#[test]
fn charge_ceiling_calibrates_at_the_end_of_the_tail() {
    let (mut app, mut pack, mut sink) = rest_pack();

    // Default ceiling: 2500 - 300 mV, above the top of either OCV table.
    pack.cell_uv[0] = 2_210_000;

    // Bulk charge: the cell is high but current is still flowing.
    pack.sense_uv = -20_000;
    app.tick(&mut pack, &mut sink).unwrap();
    assert_eq!(app.state(), StateId::Charge);
    let before = *app.cells().cell(0).unwrap();
    assert_ne!(before.dod_c, 0.0);
    assert_eq!(before.soh, 1000.0);

    // CV tail: just outside the dead band, inside the tail allowance.
    pack.sense_uv = -3_020;
    app.tick(&mut pack, &mut sink).unwrap();
    assert_eq!(app.state(), StateId::Charge);

    let calibrated = app.cells().cell(0).unwrap();
    assert_eq!(calibrated.soh, before.soc_c - before.dod_c);
    assert_eq!(calibrated.soc_c, calibrated.soh);
    assert_eq!(calibrated.dod_c, 0.0);

    let untouched = app.cells().cell(1).unwrap();
    assert_eq!(untouched.soh, 1000.0);
    assert_ne!(untouched.dod_c, 0.0);
}

// ── Fault latch ───────────────────────────────────────────────

#[test]
fn latched_fault_opens_relay_until_acknowledged() {
    let (mut app, mut pack, mut sink) = rest_pack();
    app.tick(&mut pack, &mut sink).unwrap();

    pack.faults = FaultCounts { overvoltage: 0, undervoltage: 2 };
    app.tick(&mut pack, &mut sink).unwrap();
    assert_eq!(app.state(), StateId::Fault);
    assert!(pack.relay_open());
    assert_eq!(pack.indicator(), Some(StatusIndicator::Red));
    assert_eq!(app.latched_faults().undervoltage, 2);
    assert!(sink.events.contains(&AppEvent::FaultDetected(FaultCounts {
        overvoltage: 0,
        undervoltage: 2
    })));

    // Holds without acknowledgement, even once the device reads clean.
    pack.faults = FaultCounts::default();
    for _ in 0..5 {
        app.tick(&mut pack, &mut sink).unwrap();
    }
    assert_eq!(app.state(), StateId::Fault);
    assert_eq!(app.latched_faults().undervoltage, 2);

    app.handle_command(AppCommand::AcknowledgeFault, &mut pack).unwrap();
    app.tick(&mut pack, &mut sink).unwrap();
    assert_eq!(app.state(), StateId::Idle);
    assert!(!pack.relay_open());
    assert!(app.latched_faults().is_clear());
    assert_eq!(pack.count(&ActuatorCall::ClearFaults), 1);
    assert!(sink.events.contains(&AppEvent::FaultCleared));

    app.tick(&mut pack, &mut sink).unwrap();
    assert_eq!(app.state(), StateId::OpenCircuit);
}

#[test]
fn acknowledgement_outside_fault_is_ignored() {
    let (mut app, mut pack, mut sink) = rest_pack();
    app.tick(&mut pack, &mut sink).unwrap();
    app.handle_command(AppCommand::AcknowledgeFault, &mut pack).unwrap();
    app.tick(&mut pack, &mut sink).unwrap();

    assert_eq!(app.state(), StateId::OpenCircuit);
    assert_eq!(pack.count(&ActuatorCall::ClearFaults), 0);

    // A stale acknowledgement does not release a later fault.
    pack.faults.overvoltage = 1;
    app.tick(&mut pack, &mut sink).unwrap();
    app.tick(&mut pack, &mut sink).unwrap();
    assert_eq!(app.state(), StateId::Fault);
}

// ── Measurement failure ───────────────────────────────────────

#[test]
fn single_measurement_failure_skips_the_tick() {
    let (mut app, mut pack, mut sink) = rest_pack();
    app.tick(&mut pack, &mut sink).unwrap();
    let telemetry = sink.telemetry_count();

    pack.fail_next = 1;
    assert_eq!(
        app.tick(&mut pack, &mut sink),
        Err(Error::Measurement(MeasurementError::Timeout))
    );
    assert!(pack.failure_indicator());
    assert_eq!(sink.telemetry_count(), telemetry);
    assert!(sink.events.contains(&AppEvent::MeasurementFailed { streak: 1 }));
    assert_eq!(app.state(), StateId::OpenCircuit);

    app.tick(&mut pack, &mut sink).unwrap();
    assert!(!pack.failure_indicator());
    assert_eq!(sink.telemetry_count(), telemetry + 1);
}

#[test]
fn persistent_measurement_loss_forces_fault_and_balancing_off() {
    let mut pack = MockPack::new(&[
        2_000_000, 2_010_000, 1_990_000, 2_050_000, 2_000_000, 2_000_000, 2_000_000,
    ]);
    let mut sink = RecordingSink::new();
    let mut app = AppService::new(config7()).unwrap();
    app.start(&mut pack, &mut sink).unwrap();
    app.handle_command(AppCommand::SetBalancing(true), &mut pack).unwrap();
    app.tick(&mut pack, &mut sink).unwrap();
    assert!(pack.balancing_enabled());

    pack.fail_next = 3;
    for streak in 1..=2u8 {
        assert!(app.tick(&mut pack, &mut sink).is_err());
        assert_eq!(app.state(), StateId::OpenCircuit);
        assert!(sink.events.contains(&AppEvent::MeasurementFailed { streak }));
    }
    assert!(pack.balancing_enabled());

    assert!(app.tick(&mut pack, &mut sink).is_err());
    assert_eq!(app.state(), StateId::Fault);
    assert!(!pack.balancing_enabled());
    assert!(pack.relay_open());
    assert!(pack.failure_indicator());
    // Nothing was latched from the device.
    assert!(app.latched_faults().is_clear());

    // Conversions recover but the fault and indicator hold.
    app.tick(&mut pack, &mut sink).unwrap();
    assert_eq!(app.state(), StateId::Fault);
    assert!(pack.failure_indicator());
    assert!(!pack.balancing_enabled());

    app.handle_command(AppCommand::AcknowledgeFault, &mut pack).unwrap();
    app.tick(&mut pack, &mut sink).unwrap();
    assert_eq!(app.state(), StateId::Idle);
    assert!(!pack.failure_indicator());
    assert!(!pack.relay_open());
}

#[test]
fn failure_limit_is_configurable() {
    let config = BmuConfig { measurement_failure_limit: 1, ..config7() };
    let (mut app, mut pack, mut sink) = started(MockPack::uniform(7, REST_UV), config);
    pack.fail_next = 1;
    assert!(app.tick(&mut pack, &mut sink).is_err());
    assert_eq!(app.state(), StateId::Fault);
}

// ── Tick timing ───────────────────────────────────────────────

static COUNTDOWN: TickCountdown = TickCountdown::new();

#[test]
fn run_cycle_idles_for_the_tick_period() {
    let (mut app, mut pack, mut sink) = rest_pack();
    pack.ticker = Some(&COUNTDOWN);

    app.run_cycle(&COUNTDOWN, &mut pack, &mut sink).unwrap();
    // One keep-alive per simulated millisecond of the 200 ms period.
    assert_eq!(pack.keep_alives, 200);
    assert!(COUNTDOWN.expired());
    assert_eq!(sink.telemetry_count(), 1);

    pack.fail_keep_alive = true;
    app.run_cycle(&COUNTDOWN, &mut pack, &mut sink).unwrap();
    assert!(app.failure_indicator());
}

// ── Commands ──────────────────────────────────────────────────

#[test]
fn cell_count_cannot_change_at_runtime() {
    let (mut app, mut pack, _) = rest_pack();
    let result = app.handle_command(
        AppCommand::UpdateConfig(BmuConfig::default()),
        &mut pack,
    );
    assert_eq!(result, Err(Error::Config("cell_count cannot change at runtime")));
    assert_eq!(app.current_config().cell_count, 7);
}

#[test]
fn invalid_thresholds_leave_config_untouched() {
    let (mut app, mut pack, _) = rest_pack();
    let before = app.current_config();
    let result = app.handle_command(
        AppCommand::UpdateThresholds {
            voltage_difference_uv: 10_000,
            overvoltage_mv: 1500,
            undervoltage_mv: 1600,
        },
        &mut pack,
    );
    assert!(matches!(result, Err(Error::Config(_))));
    assert_eq!(app.current_config(), before);

    app.handle_command(
        AppCommand::UpdateThresholds {
            voltage_difference_uv: 10_000,
            overvoltage_mv: 2600,
            undervoltage_mv: 1700,
        },
        &mut pack,
    )
    .unwrap();
    let after = app.current_config();
    assert_eq!(after.voltage_difference_threshold_uv, 10_000);
    assert_eq!(after.overvoltage_threshold_mv, 2600);
    assert_eq!(after.undervoltage_threshold_mv, 1700);
}

// ── Aging persistence ─────────────────────────────────────────

#[test]
fn aging_survives_a_restart() {
    let (mut app, mut pack, mut sink) = rest_pack();
    pack.sense_uv = DISCHARGE_SENSE_UV;
    for _ in 0..10 {
        app.tick(&mut pack, &mut sink).unwrap();
    }
    pack.sense_uv = 0;
    app.tick(&mut pack, &mut sink).unwrap();

    let mut store = MemoryStore::new();
    assert!(app.save_aging_if_needed(&mut store));
    assert!(!app.is_aging_dirty());
    assert!(!app.save_aging_if_needed(&mut store));

    let (mut restored, _, _) = rest_pack();
    restored.restore_aging(&store);
    assert_eq!(restored.aggregate().efc_counter, app.aggregate().efc_counter);
    for (a, b) in restored.cells().cells().iter().zip(app.cells().cells()) {
        assert_eq!(a.soh, b.soh);
    }
}

#[test]
fn unusable_aging_record_means_fresh_cells() {
    // Corrupt bytes
    let mut store = MemoryStore::new();
    store.write(AGING_NAMESPACE, AGING_KEY, &[0xFF; 3]).unwrap();
    let (mut app, _, _) = rest_pack();
    app.restore_aging(&store);
    assert_eq!(app.aggregate().efc_counter, 0.0);

    // Record for a 7-cell pack loaded into a 14-cell pack
    let (mut seven, mut pack, mut sink) = rest_pack();
    pack.sense_uv = DISCHARGE_SENSE_UV;
    seven.tick(&mut pack, &mut sink).unwrap();
    pack.sense_uv = 0;
    seven.tick(&mut pack, &mut sink).unwrap();
    let mut store = MemoryStore::new();
    assert!(seven.save_aging_if_needed(&mut store));

    let (mut fourteen, _, _) = started(MockPack::uniform(14, REST_UV), BmuConfig::default());
    fourteen.restore_aging(&store);
    assert_eq!(fourteen.aggregate().efc_counter, 0.0);
    assert!(fourteen.cells().cells().iter().all(|c| c.soh == 1000.0));
}
