//! Function-pointer finite state machine engine for the pack.
//!
//! Classic embedded FSM pattern:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  StateTable                                                  │
//! │  ┌─────────────┬───────────┬──────────┬───────────────────┐  │
//! │  │ StateId     │ on_enter  │ on_exit  │ on_update         │  │
//! │  ├─────────────┼───────────┼──────────┼───────────────────┤  │
//! │  │ Idle        │ fn(ctx)   │    -     │ fn(ctx)->Option<> │  │
//! │  │ Charge      │ fn(ctx)   │    -     │ fn(ctx)->Option<> │  │
//! │  │ Discharge   │ fn(ctx)   │    -     │ fn(ctx)->Option<> │  │
//! │  │ OpenCircuit │ fn(ctx)   │    -     │ fn(ctx)->Option<> │  │
//! │  │ Fault       │ fn(ctx)   │ fn(ctx)  │ fn(ctx)->Option<> │  │
//! │  └─────────────┴───────────┴──────────┴───────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each tick the engine calls `on_update` for the **current** state.
//! If it returns `Some(next_id)`, the engine runs `on_exit` for the
//! current state, then `on_enter` for the next, and updates the
//! current pointer.  All functions receive `&mut FsmContext`, which
//! holds the snapshot, the classified event, the cell array and config.

pub mod context;
pub mod states;

use context::FsmContext;
use log::info;
use serde::Serialize;

use crate::error::FaultCounts;
use crate::estimation::CurrentDirection;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Pack states.  The discriminant is what telemetry reports.
/// Must stay in sync with the state table built in [`states::build_state_table`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum StateId {
    #[default]
    Idle = 0,
    Charge = 1,
    Discharge = 2,
    OpenCircuit = 3,
    Fault = 4,
}

impl StateId {
    /// Total number of states, used to size the table array.
    pub const COUNT: usize = 5;

    /// Convert a `u8` index back to `StateId`.  Panics on out-of-range in
    /// debug builds; returns `Fault` in release (safe fallback).
    pub fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::Idle,
            1 => Self::Charge,
            2 => Self::Discharge,
            3 => Self::OpenCircuit,
            4 => Self::Fault,
            _ => {
                debug_assert!(false, "invalid state index: {idx}");
                Self::Fault
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// What this tick's measurement says the pack is doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PackEvent {
    Discharge,
    Charge,
    #[default]
    OpenCircuit,
    Fault,
}

impl PackEvent {
    /// Classify from the sense voltage; latched faults override.
    pub fn classify(sense_uv: i32, dead_band_uv: u32, latched: FaultCounts) -> Self {
        if !latched.is_clear() {
            return Self::Fault;
        }
        match CurrentDirection::from_sense(sense_uv, dead_band_uv) {
            CurrentDirection::Discharge => Self::Discharge,
            CurrentDirection::Charge => Self::Charge,
            CurrentDirection::OpenCircuit => Self::OpenCircuit,
        }
    }

    /// State this event leads to.
    pub fn target_state(self) -> StateId {
        match self {
            Self::Discharge => StateId::Discharge,
            Self::Charge => StateId::Charge,
            Self::OpenCircuit => StateId::OpenCircuit,
            Self::Fault => StateId::Fault,
        }
    }
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// Signature for `on_enter` and `on_exit` actions.
/// These run exactly once on each state transition.
pub type StateActionFn = fn(&mut FsmContext);

/// Signature for the per-tick update handler.
/// Returns `Some(next)` to trigger a transition, or `None` to stay.
pub type StateUpdateFn = fn(&mut FsmContext) -> Option<StateId>;

// ---------------------------------------------------------------------------
// State descriptor (one row in the table)
// ---------------------------------------------------------------------------

/// Static descriptor for a single FSM state.
/// Stored in a fixed-size array, with no heap, no `dyn`.
pub struct StateDescriptor {
    pub id: StateId,
    pub name: &'static str,
    pub on_enter: Option<StateActionFn>,
    pub on_exit: Option<StateActionFn>,
    pub on_update: StateUpdateFn,
}

// ---------------------------------------------------------------------------
// FSM engine
// ---------------------------------------------------------------------------

/// The finite state machine engine.
pub struct Fsm {
    /// Fixed-size table indexed by `StateId as usize`.
    table: [StateDescriptor; StateId::COUNT],
    /// Index of the currently active state.
    current: usize,
}

impl Fsm {
    /// Construct a new FSM with the given state table, starting in `initial`.
    pub fn new(table: [StateDescriptor; StateId::COUNT], initial: StateId) -> Self {
        Self {
            table,
            current: initial as usize,
        }
    }

    /// Run the initial `on_enter` for the starting state.
    /// Call once after construction, before the first `tick()`.
    pub fn start(&mut self, ctx: &mut FsmContext) {
        info!("FSM starting in state: {}", self.table[self.current].name);
        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }

    /// Advance the FSM by one tick.
    ///
    /// 1. Call `on_update` for the current state.
    /// 2. If it returns `Some(next)`, execute the transition:
    ///    `on_exit(current)` → update pointer → `on_enter(next)`.
    pub fn tick(&mut self, ctx: &mut FsmContext) {
        let next = (self.table[self.current].on_update)(ctx);

        if let Some(next_id) = next {
            self.transition(next_id, ctx);
        }
    }

    /// Force an immediate transition (used for measurement-loss
    /// escalation, which bypasses the event classification).
    pub fn force_transition(&mut self, next: StateId, ctx: &mut FsmContext) {
        if next as usize != self.current {
            self.transition(next, ctx);
        }
    }

    /// The current state's identity.
    pub fn current_state(&self) -> StateId {
        StateId::from_index(self.current)
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn transition(&mut self, next_id: StateId, ctx: &mut FsmContext) {
        let next_idx = next_id as usize;

        info!(
            "FSM transition: {} -> {}",
            self.table[self.current].name, self.table[next_idx].name
        );

        if let Some(exit) = self.table[self.current].on_exit {
            exit(ctx);
        }

        self.current = next_idx;

        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }
}
