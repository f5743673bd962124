//! Shared mutable context threaded through every FSM handler.
//!
//! `FsmContext` is the single struct that state handlers read from and
//! write to.  It owns the tick's snapshot and classified event, the cell
//! array with its OCV model, the pack aggregate, and the protection
//! commands the service applies after the tick.

use serde::Serialize;

use super::PackEvent;
use crate::config::BmuConfig;
use crate::estimation::CurrentDirection;
use crate::estimation::aging::PackAggregate;
use crate::estimation::cells::CellTracker;
use crate::estimation::ocv::OcvModel;
use crate::measurement::PackSnapshot;

// ---------------------------------------------------------------------------
// Protection commands (written by state handlers; applied by the service)
// ---------------------------------------------------------------------------

/// Colour of the pack status LED.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum StatusIndicator {
    #[default]
    Off,
    Blue,
    Green,
    White,
    Red,
}

/// Commands that state handlers write to request protection actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectionCommands {
    /// Protection relay open (pack disconnected).
    pub relay_open: bool,
    pub indicator: StatusIndicator,
    /// Balancing may run.  Cleared for the whole fault sojourn.
    pub balancing_permitted: bool,
    /// Set by the acknowledgement path; the service clears the device
    /// faults and resets this flag.
    pub clear_faults_requested: bool,
}

impl Default for ProtectionCommands {
    fn default() -> Self {
        Self {
            relay_open: false,
            indicator: StatusIndicator::Off,
            balancing_permitted: true,
            clear_faults_requested: false,
        }
    }
}

// ---------------------------------------------------------------------------
// FsmContext
// ---------------------------------------------------------------------------

/// The shared context passed to every state handler function.
pub struct FsmContext {
    // -- Timing --
    /// Integration step in seconds.
    pub tick_period_secs: f32,

    // -- Inputs --
    /// This tick's converted measurements.
    pub snapshot: PackSnapshot,
    /// This tick's classified event.
    pub event: PackEvent,
    /// Operator acknowledgement, consumed by the next update.
    pub fault_ack: bool,

    // -- Estimation state --
    pub cells: CellTracker,
    pub ocv: OcvModel,
    pub aggregate: PackAggregate,

    // -- Outputs --
    pub commands: ProtectionCommands,

    // -- Configuration --
    pub config: BmuConfig,
}

impl FsmContext {
    /// Create a new context with the given configuration.  Cells stay
    /// empty until [`initialize_cells`](Self::initialize_cells).
    pub fn new(config: BmuConfig) -> Self {
        Self {
            tick_period_secs: config.tick_period_secs(),
            snapshot: PackSnapshot::default(),
            event: PackEvent::default(),
            fault_ack: false,
            cells: CellTracker::default(),
            ocv: OcvModel::new(config.ocv_discharge, config.ocv_charge),
            aggregate: PackAggregate::default(),
            commands: ProtectionCommands::default(),
            config,
        }
    }

    /// Seed the cell array from the first snapshot.
    pub fn initialize_cells(&mut self, snapshot: PackSnapshot) {
        self.cells = CellTracker::initialize(
            &snapshot.cell_voltage_uv,
            self.ocv.table(),
            self.config.capacity_as(),
        );
        self.snapshot = snapshot;
    }

    /// Store a new snapshot and classify it against the latched faults.
    ///
    /// Updates the pack direction, which re-opens the aging gate on
    /// charge/discharge and swaps the OCV table on a direction flip.
    pub fn load_snapshot(&mut self, snapshot: PackSnapshot) {
        self.event = PackEvent::classify(
            snapshot.sense_uv,
            self.config.sense_dead_band_uv,
            self.aggregate.fault_latched,
        );
        let direction =
            CurrentDirection::from_sense(snapshot.sense_uv, self.config.sense_dead_band_uv);
        self.aggregate.note_direction(direction);
        self.ocv.select(direction);
        self.snapshot = snapshot;
    }

    /// Swap in a new configuration, keeping cell state.
    pub fn apply_config(&mut self, config: BmuConfig) {
        if config.ocv_discharge != self.config.ocv_discharge
            || config.ocv_charge != self.config.ocv_charge
        {
            self.ocv.reload(config.ocv_discharge, config.ocv_charge);
        }
        self.tick_period_secs = config.tick_period_secs();
        self.config = config;
    }

    /// Returns `true` if any over/under-voltage count is latched.
    pub fn has_faults(&self) -> bool {
        !self.aggregate.fault_latched.is_clear()
    }
}
