//! Application service, the hexagonal core.
//!
//! [`AppService`] owns the FSM, its context, the safety supervisor and
//! the balancing scheduler.  It exposes a clean, hardware-agnostic API.
//! All I/O flows through port traits injected at call sites, making the
//! entire service testable with mock adapters.
//!
//! ```text
//!  MeasurementSource ──▶ ┌──────────────────────────────┐ ──▶ EventSink
//!  FaultSource ────────▶ │          AppService          │
//!                        │ FSM · Safety · Balancing ·   │ ──▶ StoragePort
//!  BalancingActuator ◀── │ Cells · Aging                │
//!  ProtectionPort ◀───── └──────────────────────────────┘
//! ```

use log::{debug, info, warn};

use crate::balancing::BalancingScheduler;
use crate::config::BmuConfig;
use crate::error::{ActuatorError, Error, FaultCounts, MeasurementError, Result};
use crate::estimation::aging::{
    AGING_KEY, AGING_NAMESPACE, AGING_RECORD_MAX_BYTES, AgingRecord, PackAggregate,
};
use crate::estimation::cells::CellTracker;
use crate::fsm::context::FsmContext;
use crate::fsm::states::build_state_table;
use crate::fsm::{Fsm, StateId};
use crate::measurement::PackSnapshot;
use crate::safety::SafetySupervisor;
use crate::telemetry::{TelemetryRecord, permille_word};
use crate::tick_timer::TickCountdown;

use super::commands::AppCommand;
use super::events::AppEvent;
use super::ports::{
    BalancingActuator, EventSink, MeasurementSource, PackHardware, ProtectionPort, StorageError,
    StoragePort,
};

// ───────────────────────────────────────────────────────────────
// AppService
// ───────────────────────────────────────────────────────────────

/// The application service orchestrates all domain logic.
pub struct AppService {
    fsm: Fsm,
    ctx: FsmContext,
    safety: SafetySupervisor,
    balancing: BalancingScheduler,
    tick_count: u64,
    /// Failure indicator as last commanded.
    failure_indicator: bool,
    /// Measurement loss escalated to `Fault`; held until acknowledged.
    measurement_lost: bool,
    /// An aging update has not been written to storage yet.
    aging_dirty: bool,
}

impl AppService {
    /// Construct the service from configuration.
    ///
    /// Invalid configuration is fatal: the service is never built.
    /// Does **not** start the FSM; call [`start`](Self::start) next.
    pub fn new(config: BmuConfig) -> Result<Self> {
        config.validate()?;
        let safety = SafetySupervisor::new(&config);
        let ctx = FsmContext::new(config);
        let fsm = Fsm::new(build_state_table(), StateId::Idle);

        Ok(Self {
            fsm,
            ctx,
            safety,
            balancing: BalancingScheduler::new(),
            tick_count: 0,
            failure_indicator: false,
            measurement_lost: false,
            aging_dirty: false,
        })
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Seed every cell from a first conversion, then start the FSM in Idle.
    pub fn start(&mut self, hw: &mut impl PackHardware, sink: &mut impl EventSink) -> Result<()> {
        let faults = hw.fault_status();
        let snapshot = Self::measure(hw, &self.ctx.config, faults)?;
        self.ctx.initialize_cells(snapshot);

        self.fsm.start(&mut self.ctx);
        self.apply_protection(hw)?;
        hw.set_failure_indicator(false);

        sink.emit(&AppEvent::Started(self.fsm.current_state()));
        info!(
            "AppService started in {:?} with {} cells",
            self.fsm.current_state(),
            self.ctx.cells.len()
        );
        Ok(())
    }

    // ── Per-tick orchestration ────────────────────────────────

    /// Run one full control cycle: measure → safety → FSM → protection →
    /// balancing → aging → telemetry.
    ///
    /// The `hw` parameter satisfies **every** hardware port. This avoids
    /// multiple mutable borrows while keeping the port boundary explicit.
    ///
    /// On a measurement or actuator failure the failure indicator is
    /// raised and the error is returned; no telemetry is emitted for the
    /// tick.
    pub fn tick(&mut self, hw: &mut impl PackHardware, sink: &mut impl EventSink) -> Result<()> {
        self.tick_count += 1;
        let prev_state = self.fsm.current_state();

        // 1. Measure.  Never run handlers on a stale snapshot.
        let reported = hw.fault_status();
        let snapshot = match Self::measure(hw, &self.ctx.config, reported) {
            Ok(s) => s,
            Err(e) => return Err(self.on_measurement_failure(e, prev_state, hw, sink)),
        };
        self.safety.record_measurement_ok();

        // 2. Latch faults.
        let before = self.safety.latched();
        let latched = self.safety.evaluate(snapshot.faults);
        if latched != before {
            sink.emit(&AppEvent::FaultDetected(latched));
        }
        self.ctx.aggregate.fault_latched = latched;

        // 3. Classify; 4. dispatch.
        self.ctx.load_snapshot(snapshot);
        self.fsm.tick(&mut self.ctx);
        if self.ctx.commands.clear_faults_requested {
            self.clear_faults(hw, sink);
        }

        // 5. Protection outputs.
        let mut outcome = self.apply_protection(hw).map_err(Error::from);

        // 6. Balancing, never while in Fault.
        if outcome.is_ok() {
            let permitted =
                self.ctx.commands.balancing_permitted && self.fsm.current_state() != StateId::Fault;
            outcome = self.balancing.control_loop(
                &self.ctx.snapshot,
                &mut self.ctx.cells,
                self.ctx.ocv.table(),
                hw,
                &self.ctx.config,
                permitted,
            );
        }

        // 7. Aging, once per open-circuit sojourn.
        if outcome.is_ok() && self.fsm.current_state() == StateId::OpenCircuit {
            self.run_aging(sink);
        }

        // 8. Move the Coulomb-counting origin, whatever happened above.
        self.ctx.cells.rebase_next_cycle();

        let new_state = self.fsm.current_state();
        if new_state != prev_state {
            sink.emit(&AppEvent::StateChanged {
                from: prev_state,
                to: new_state,
            });
        }

        if let Err(e) = outcome {
            warn!("Tick {} aborted: {}", self.tick_count, e);
            self.set_failure_indicator(hw, true);
            return Err(e);
        }
        if !self.measurement_lost {
            self.set_failure_indicator(hw, false);
        }

        // 9. Telemetry.
        sink.emit(&AppEvent::Telemetry(self.build_telemetry()));
        Ok(())
    }

    /// Arm the tick timer, run one tick, then idle until the period ends
    /// while keeping the measurement link alive.
    pub fn run_cycle(
        &mut self,
        countdown: &TickCountdown,
        hw: &mut impl PackHardware,
        sink: &mut impl EventSink,
    ) -> Result<()> {
        countdown.arm(self.ctx.config.tick_period_ms);
        let outcome = self.tick(hw, sink);

        if let Err(e) = countdown.wait(|| hw.keep_alive()) {
            warn!("Keep-alive failed while idling: {}", e);
            self.set_failure_indicator(hw, true);
        }
        outcome
    }

    // ── Command handling ──────────────────────────────────────

    /// Process an operator command.  Invalid configuration is rejected
    /// and the live configuration is left untouched.
    pub fn handle_command(
        &mut self,
        cmd: AppCommand,
        hw: &mut impl BalancingActuator,
    ) -> Result<()> {
        match cmd {
            AppCommand::AcknowledgeFault => {
                if self.fsm.current_state() == StateId::Fault {
                    info!("Fault acknowledgement queued");
                    self.ctx.fault_ack = true;
                } else {
                    debug!("Acknowledgement ignored in {:?}", self.fsm.current_state());
                }
            }
            AppCommand::SetBalancing(enabled) => {
                self.balancing.set_enabled(enabled, &self.ctx.config);
                if !enabled && self.balancing.is_armed() {
                    self.balancing.force_off(hw, &self.ctx.config)?;
                }
            }
            AppCommand::UpdateThresholds {
                voltage_difference_uv,
                overvoltage_mv,
                undervoltage_mv,
            } => {
                let candidate = BmuConfig {
                    voltage_difference_threshold_uv: voltage_difference_uv,
                    overvoltage_threshold_mv: overvoltage_mv,
                    undervoltage_threshold_mv: undervoltage_mv,
                    ..self.ctx.config.clone()
                };
                self.apply_config(candidate)?;
                info!(
                    "Thresholds updated: dV={} uV OV={} mV UV={} mV",
                    voltage_difference_uv, overvoltage_mv, undervoltage_mv
                );
            }
            AppCommand::UpdateConfig(new_config) => {
                self.apply_config(new_config)?;
                info!("Configuration updated at runtime");
            }
        }
        Ok(())
    }

    // ── Persistence ───────────────────────────────────────────

    /// Restore lifetime SOH and EFC.  A missing, corrupt or mismatched
    /// record leaves the fresh-cell assumption in place.
    pub fn restore_aging(&mut self, storage: &impl StoragePort) {
        let mut buf = [0u8; AGING_RECORD_MAX_BYTES];
        let len = match storage.read(AGING_NAMESPACE, AGING_KEY, &mut buf) {
            Ok(len) => len,
            Err(StorageError::NotFound) => {
                info!("No aging record; assuming fresh cells");
                return;
            }
            Err(e) => {
                warn!("Aging record unreadable ({}); assuming fresh cells", e);
                return;
            }
        };
        let Some(record) = buf.get(..len).and_then(AgingRecord::decode) else {
            warn!("Aging record corrupt; assuming fresh cells");
            return;
        };
        if record.soh.len() != self.ctx.cells.len() {
            warn!(
                "Aging record is for {} cells, pack has {}; ignoring",
                record.soh.len(),
                self.ctx.cells.len()
            );
            return;
        }
        self.ctx.cells.restore_soh(&record.soh);
        self.ctx.aggregate.efc_counter = record.efc_counter;
        info!("Aging restored: EFC={:.3}", record.efc_counter);
    }

    /// Write the aging record if an update is pending.
    /// Returns `true` if the record was saved.
    pub fn save_aging_if_needed(&mut self, storage: &mut impl StoragePort) -> bool {
        if !self.aging_dirty {
            return false;
        }
        let record = AgingRecord::capture(&self.ctx.aggregate, &self.ctx.cells);
        let mut buf = [0u8; AGING_RECORD_MAX_BYTES];
        let Some(bytes) = record.encode(&mut buf) else {
            warn!("Aging record does not fit {} bytes", AGING_RECORD_MAX_BYTES);
            return false;
        };
        match storage.write(AGING_NAMESPACE, AGING_KEY, bytes) {
            Ok(()) => {
                self.aging_dirty = false;
                debug!("Aging record saved ({} bytes)", bytes.len());
                true
            }
            Err(e) => {
                warn!("Aging record save failed: {}", e);
                false
            }
        }
    }

    pub fn is_aging_dirty(&self) -> bool {
        self.aging_dirty
    }

    // ── Queries ───────────────────────────────────────────────

    /// Assemble the telemetry record from the current context.
    pub fn build_telemetry(&self) -> TelemetryRecord {
        let snap = &self.ctx.snapshot;
        let mut record = TelemetryRecord {
            pack_voltage_uv: snap.pack_voltage_uv,
            cell_voltage_uv: snap.cell_voltage_uv.clone(),
            ic_temperature_dc: snap.ic_temperature_dc,
            current_ma: snap.current_ma,
            efc: self.ctx.aggregate.efc_rounded(),
            state: self.fsm.current_state(),
            balancing_enabled: self.balancing.enabled(),
            ..TelemetryRecord::default()
        };
        // Same capacity as the cell array.
        for cell in self.ctx.cells.cells() {
            let _ = record.soc_permille.push(permille_word(cell.soc_c));
            let _ = record.soh_permille.push(permille_word(cell.soh));
            let _ = record.balance_active.push(cell.balance_active);
        }
        record
    }

    /// Current FSM state.
    pub fn state(&self) -> StateId {
        self.fsm.current_state()
    }

    /// Total control ticks executed since startup.
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn latched_faults(&self) -> FaultCounts {
        self.safety.latched()
    }

    pub fn cells(&self) -> &CellTracker {
        &self.ctx.cells
    }

    pub fn aggregate(&self) -> &PackAggregate {
        &self.ctx.aggregate
    }

    pub fn balancing(&self) -> &BalancingScheduler {
        &self.balancing
    }

    pub fn snapshot(&self) -> &PackSnapshot {
        &self.ctx.snapshot
    }

    pub fn failure_indicator(&self) -> bool {
        self.failure_indicator
    }

    pub fn relay_open(&self) -> bool {
        self.ctx.commands.relay_open
    }

    /// Clone of the live configuration.
    pub fn current_config(&self) -> BmuConfig {
        self.ctx.config.clone()
    }

    // ── Internal ──────────────────────────────────────────────

    fn measure(
        hw: &mut impl MeasurementSource,
        config: &BmuConfig,
        faults: FaultCounts,
    ) -> core::result::Result<PackSnapshot, MeasurementError> {
        let raw = hw.start_conversion_and_wait()?;
        PackSnapshot::from_raw(&raw, config, faults)
    }

    fn on_measurement_failure(
        &mut self,
        e: MeasurementError,
        prev_state: StateId,
        hw: &mut impl PackHardware,
        sink: &mut impl EventSink,
    ) -> Error {
        let escalate = self.safety.record_measurement_failure();
        self.set_failure_indicator(hw, true);
        sink.emit(&AppEvent::MeasurementFailed {
            streak: self.safety.failure_streak(),
        });

        if escalate {
            if !self.measurement_lost {
                warn!(
                    "Measurement lost for {} ticks, forcing Fault",
                    self.safety.failure_streak()
                );
            }
            self.measurement_lost = true;
            self.fsm.force_transition(StateId::Fault, &mut self.ctx);
            if let Err(err) = self.balancing.force_off(hw, &self.ctx.config) {
                warn!("Balancing shutdown failed: {}", err);
            }
            if let Err(err) = self.apply_protection(hw) {
                warn!("Relay command failed: {}", err);
            }
            let new_state = self.fsm.current_state();
            if new_state != prev_state {
                sink.emit(&AppEvent::StateChanged {
                    from: prev_state,
                    to: new_state,
                });
            }
        }
        Error::Measurement(e)
    }

    fn clear_faults(&mut self, hw: &mut impl PackHardware, sink: &mut impl EventSink) {
        hw.clear_faults();
        self.safety.clear();
        self.ctx.aggregate.fault_latched = FaultCounts::default();
        self.ctx.commands.clear_faults_requested = false;
        self.measurement_lost = false;
        sink.emit(&AppEvent::FaultCleared);
    }

    fn run_aging(&mut self, sink: &mut impl EventSink) {
        let counted = self.ctx.aggregate.on_open_circuit_entry(
            &mut self.ctx.cells,
            usize::from(self.ctx.config.reference_cell),
            self.ctx.config.cycle_life,
        );
        if counted {
            self.aging_dirty = true;
            sink.emit(&AppEvent::CycleCounted {
                efc: self.ctx.aggregate.efc_counter,
            });
        }
    }

    /// Translate FSM protection commands into port calls.
    fn apply_protection(
        &self,
        hw: &mut impl ProtectionPort,
    ) -> core::result::Result<(), ActuatorError> {
        let cmds = &self.ctx.commands;
        hw.show_indicator(cmds.indicator);
        hw.set_relay_open(cmds.relay_open)
    }

    fn set_failure_indicator(&mut self, hw: &mut impl ProtectionPort, on: bool) {
        if self.failure_indicator != on {
            hw.set_failure_indicator(on);
            self.failure_indicator = on;
        }
    }

    fn apply_config(&mut self, config: BmuConfig) -> Result<()> {
        config.validate()?;
        if config.cell_count != self.ctx.config.cell_count {
            return Err(Error::Config("cell_count cannot change at runtime"));
        }
        self.safety.set_failure_limit(config.measurement_failure_limit);
        self.ctx.apply_config(config);
        Ok(())
    }
}
