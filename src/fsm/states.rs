//! Concrete state handler functions and table builder.
//!
//! Each state is defined by three plain `fn` pointers, so the table needs
//! neither closures nor a heap.
//!
//! ```text
//!            ┌──────────── [discharge / charge / open circuit] ───────────┐
//!            ▼                                                            │
//!  IDLE ──▶ DISCHARGE ◀──▶ CHARGE ◀──▶ OPEN_CIRCUIT ◀──▶ DISCHARGE ...     │
//!                                                                         │
//!  Any non-fault state ──[fault latched]──▶ FAULT ──[acknowledged]──▶ IDLE
//! ```
//!
//! Every non-fault update runs the handler for this tick's direction
//! (integration, then calibration or DOD rebase per cell) before
//! deciding on the next state, so continuing in the same state still
//! counts charge.

use log::{debug, info, warn};

use super::context::{FsmContext, StatusIndicator};
use super::{PackEvent, StateDescriptor, StateId};
use crate::estimation::CurrentDirection;

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

/// Build the static state table.  Called once at startup.
pub fn build_state_table() -> [StateDescriptor; StateId::COUNT] {
    [
        // Index 0: Idle
        StateDescriptor {
            id: StateId::Idle,
            name: "Idle",
            on_enter: Some(idle_enter),
            on_exit: None,
            on_update: idle_update,
        },
        // Index 1: Charge
        StateDescriptor {
            id: StateId::Charge,
            name: "Charge",
            on_enter: Some(charge_enter),
            on_exit: None,
            on_update: charge_update,
        },
        // Index 2: Discharge
        StateDescriptor {
            id: StateId::Discharge,
            name: "Discharge",
            on_enter: Some(discharge_enter),
            on_exit: None,
            on_update: discharge_update,
        },
        // Index 3: OpenCircuit
        StateDescriptor {
            id: StateId::OpenCircuit,
            name: "OpenCircuit",
            on_enter: Some(open_circuit_enter),
            on_exit: None,
            on_update: open_circuit_update,
        },
        // Index 4: Fault
        StateDescriptor {
            id: StateId::Fault,
            name: "Fault",
            on_enter: Some(fault_enter),
            on_exit: Some(fault_exit),
            on_update: fault_update,
        },
    ]
}

// ═══════════════════════════════════════════════════════════════════════════
//  Shared dispatch
// ═══════════════════════════════════════════════════════════════════════════

/// Common update for every non-fault state.
fn dispatch(ctx: &mut FsmContext, current: StateId) -> Option<StateId> {
    // Acknowledgement only means something in Fault.
    ctx.fault_ack = false;

    let direction = match ctx.event {
        PackEvent::Fault => return Some(StateId::Fault),
        PackEvent::Discharge => CurrentDirection::Discharge,
        PackEvent::Charge => CurrentDirection::Charge,
        PackEvent::OpenCircuit => CurrentDirection::OpenCircuit,
    };
    run_direction_handler(ctx, direction);

    let next = ctx.event.target_state();
    (next != current).then_some(next)
}

/// Integrate this tick's current, then per cell either calibrate or
/// rebase DOD.  Open circuit never calibrates.
fn run_direction_handler(ctx: &mut FsmContext, direction: CurrentDirection) {
    ctx.cells
        .integrate(ctx.snapshot.current_ma, direction, ctx.tick_period_secs);

    let sense_uv = ctx.snapshot.sense_uv;
    for i in 0..ctx.cells.len() {
        let Some(&cell_uv) = ctx.snapshot.cell_voltage_uv.get(i) else {
            ctx.cells.rebase_dod(i);
            continue;
        };
        match direction {
            CurrentDirection::Discharge if ctx.config.discharge_floor_reached(cell_uv) => {
                ctx.cells.calibrate_on_discharge_floor(i);
            }
            CurrentDirection::Charge if ctx.config.charge_ceiling_reached(cell_uv, sense_uv) => {
                ctx.cells.calibrate_on_charge_ceiling(i);
            }
            _ => ctx.cells.rebase_dod(i),
        }
    }
    debug!(
        "HANDLER | {:?} I={}mA cell0 SOC={:.1}",
        direction,
        ctx.snapshot.current_ma,
        ctx.cells.cell(0).map_or(0.0, |c| c.soc_c)
    );
}

// ═══════════════════════════════════════════════════════════════════════════
//  IDLE state: before the first classified tick and after a fault
// ═══════════════════════════════════════════════════════════════════════════

fn idle_enter(ctx: &mut FsmContext) {
    ctx.commands.indicator = StatusIndicator::Off;
    info!("IDLE: waiting for first classified tick");
}

fn idle_update(ctx: &mut FsmContext) -> Option<StateId> {
    dispatch(ctx, StateId::Idle)
}

// ═══════════════════════════════════════════════════════════════════════════
//  CHARGE state
// ═══════════════════════════════════════════════════════════════════════════

fn charge_enter(ctx: &mut FsmContext) {
    ctx.commands.indicator = StatusIndicator::Blue;
    info!("CHARGE: I={} mA", ctx.snapshot.current_ma);
}

fn charge_update(ctx: &mut FsmContext) -> Option<StateId> {
    dispatch(ctx, StateId::Charge)
}

// ═══════════════════════════════════════════════════════════════════════════
//  DISCHARGE state
// ═══════════════════════════════════════════════════════════════════════════

fn discharge_enter(ctx: &mut FsmContext) {
    ctx.commands.indicator = StatusIndicator::Green;
    info!("DISCHARGE: I={} mA", ctx.snapshot.current_ma);
}

fn discharge_update(ctx: &mut FsmContext) -> Option<StateId> {
    dispatch(ctx, StateId::Discharge)
}

// ═══════════════════════════════════════════════════════════════════════════
//  OPEN_CIRCUIT state: resting; the service runs the aging update here
// ═══════════════════════════════════════════════════════════════════════════

fn open_circuit_enter(ctx: &mut FsmContext) {
    ctx.commands.indicator = StatusIndicator::White;
    info!("OPEN_CIRCUIT: pack at rest");
}

fn open_circuit_update(ctx: &mut FsmContext) -> Option<StateId> {
    dispatch(ctx, StateId::OpenCircuit)
}

// ═══════════════════════════════════════════════════════════════════════════
//  FAULT state: relay open until the operator acknowledges
// ═══════════════════════════════════════════════════════════════════════════

fn fault_enter(ctx: &mut FsmContext) {
    ctx.commands.relay_open = true;
    ctx.commands.balancing_permitted = false;
    ctx.commands.indicator = StatusIndicator::Red;
    warn!(
        "FAULT: relay open, balancing disabled, latched {}",
        ctx.aggregate.fault_latched
    );
}

fn fault_exit(ctx: &mut FsmContext) {
    ctx.commands.relay_open = false;
    ctx.commands.balancing_permitted = true;
    info!("FAULT: acknowledged, relay closed");
}

fn fault_update(ctx: &mut FsmContext) -> Option<StateId> {
    if ctx.fault_ack {
        ctx.fault_ack = false;
        ctx.commands.clear_faults_requested = true;
        return Some(StateId::Idle);
    }
    None
}
