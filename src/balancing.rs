//! Passive cell balancing: selection and round timing.
//!
//! Rounds repeat on a fixed cadence while the operator keeps balancing
//! enabled.  Each round picks the highest cells above the pack minimum
//! and bleeds them for `balance_duration_min`.  Turning balancing off
//! starts a settle window during which terminal voltages are not
//! trusted; at its end every cell is re-anchored to its OCV.
//!
//! ```text
//!  rest_timer (ms)
//!
//!  -settle ─────────▶ 0 ───────────────────▶ round_ms ──▶ 0 ...
//!  │   settle window  │  switches bleeding   │  new round
//!  │                  └── OCV re-anchor on the last negative tick
//!  └── balancing just turned off
//! ```

use heapless::Vec;
use log::{debug, info};

use crate::app::ports::BalancingActuator;
use crate::config::{BmuConfig, MAX_CELLS};
use crate::error::Result;
use crate::estimation::cells::CellTracker;
use crate::estimation::ocv::OcvTable;
use crate::measurement::PackSnapshot;

// ═══════════════════════════════════════════════════════════════
//  Selection
// ═══════════════════════════════════════════════════════════════

/// One armed switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceCommand {
    pub cell: u8,
    pub minutes: u8,
}

/// Pick the cells to bleed this round.
///
/// Voltages are stably sorted ascending.  If the spread exceeds
/// `threshold_uv`, cells are walked from the top down; at most `cap` of
/// those above `min + threshold_uv` are selected.  The minimum cell is
/// never selected.  Returns selections in descending-voltage order.
pub fn select_for_balancing(
    voltages_uv: &[u32],
    labels: &[u8],
    threshold_uv: u32,
    cap: u8,
    minutes: u8,
) -> Vec<BalanceCommand, MAX_CELLS> {
    let mut selection = Vec::new();

    let mut sorted: Vec<(u32, u8), MAX_CELLS> = voltages_uv
        .iter()
        .copied()
        .zip(labels.iter().copied())
        .take(MAX_CELLS)
        .collect();
    sorted.sort_by_key(|&(v, _)| v);

    let (Some(&(min, _)), Some(&(max, _))) = (sorted.first(), sorted.last()) else {
        return selection;
    };
    if max - min <= threshold_uv {
        return selection;
    }

    let mut above = 0usize;
    for (rank, &(v, label)) in sorted.iter().skip(1).rev().enumerate() {
        if v - min > threshold_uv {
            above += 1;
        }
        if above <= usize::from(cap) && rank < above {
            // Bounded by MAX_CELLS through `sorted`.
            let _ = selection.push(BalanceCommand { cell: label, minutes });
        }
    }
    selection
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler
// ═══════════════════════════════════════════════════════════════

/// Balancing round state.  The only component that commands the
/// [`BalancingActuator`].
#[derive(Debug, Clone, Default)]
pub struct BalancingScheduler {
    /// Operator intent.
    enabled: bool,
    /// Counts up in ms; negative during the settle window.
    rest_timer_ms: i64,
    /// A round armed switches since the last OCV re-anchor.
    soc_update_pending: bool,
    /// Global balancing is currently commanded on.
    armed: bool,
}

impl BalancingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn rest_timer_ms(&self) -> i64 {
        self.rest_timer_ms
    }

    pub fn soc_update_pending(&self) -> bool {
        self.soc_update_pending
    }

    /// Record operator intent.  Enabling outside a settle window pre-loads
    /// the timer so the first round starts on the next control loop.
    pub fn set_enabled(&mut self, enabled: bool, config: &BmuConfig) {
        if enabled && !self.enabled && self.rest_timer_ms >= 0 {
            self.rest_timer_ms = config.balance_round_ms();
        }
        if enabled != self.enabled {
            info!("BALANCE | operator {}", if enabled { "enabled" } else { "disabled" });
        }
        self.enabled = enabled;
    }

    /// One control step, run every tick after the FSM.
    ///
    /// `permitted` is cleared by the `Fault` state; withdrawing it turns
    /// balancing off exactly like the operator does.
    pub fn control_loop(
        &mut self,
        snapshot: &PackSnapshot,
        cells: &mut CellTracker,
        table: &OcvTable,
        actuator: &mut impl BalancingActuator,
        config: &BmuConfig,
        permitted: bool,
    ) -> Result<()> {
        let bits = actuator.read_balance_status()?;
        cells.apply_balance_status(bits);

        if self.armed && !(self.enabled && permitted) {
            self.turn_off(actuator, config)?;
        }

        let tick_ms = i64::from(config.tick_period_ms);
        if self.rest_timer_ms < 0 {
            let last_settle_tick = self.rest_timer_ms + tick_ms >= 0;
            if last_settle_tick && self.soc_update_pending {
                self.reanchor_from_ocv(snapshot, cells, table);
            }
        }

        self.rest_timer_ms += tick_ms;

        if self.rest_timer_ms >= config.balance_round_ms() {
            self.rest_timer_ms = 0;
            if self.enabled && permitted {
                self.launch_round(snapshot, actuator, config)?;
            }
        }
        Ok(())
    }

    /// Command balancing off unconditionally (fault and measurement-loss
    /// paths).  Starts the settle window if a round was running.
    pub fn force_off(
        &mut self,
        actuator: &mut impl BalancingActuator,
        config: &BmuConfig,
    ) -> Result<()> {
        if self.armed {
            self.turn_off(actuator, config)
        } else {
            actuator.set_balancing_enabled(false)?;
            Ok(())
        }
    }

    // ── Internal ──────────────────────────────────────────────────

    fn turn_off(
        &mut self,
        actuator: &mut impl BalancingActuator,
        config: &BmuConfig,
    ) -> Result<()> {
        // Disarm first so a rejected command is not retried every tick.
        self.armed = false;
        self.rest_timer_ms = -i64::from(config.settle_offset_ms);
        info!("BALANCE | off, settling for {} ms", config.settle_offset_ms);
        actuator.set_balancing_enabled(false)?;
        Ok(())
    }

    fn launch_round(
        &mut self,
        snapshot: &PackSnapshot,
        actuator: &mut impl BalancingActuator,
        config: &BmuConfig,
    ) -> Result<()> {
        let voltages = &snapshot.cell_voltage_uv;
        let labels: Vec<u8, MAX_CELLS> = (0..voltages.len() as u8).collect();
        let selection = select_for_balancing(
            voltages,
            &labels,
            config.voltage_difference_threshold_uv,
            config.max_balanced_cells,
            config.balance_duration_min,
        );

        if selection.is_empty() {
            debug!("BALANCE | pack within threshold, nothing to bleed");
            if self.armed {
                return self.turn_off(actuator, config);
            }
            actuator.set_balancing_enabled(false)?;
            return Ok(());
        }

        actuator.set_balancing_enabled(true)?;
        for &cell in &labels {
            match selection.iter().find(|c| c.cell == cell) {
                Some(cmd) => actuator.set_cell_balance(cell, true, cmd.minutes)?,
                None => actuator.set_cell_balance(cell, false, 0)?,
            }
        }
        self.armed = true;
        self.soc_update_pending = true;

        let armed: Vec<u8, MAX_CELLS> = selection.iter().map(|c| c.cell).collect();
        info!(
            "BALANCE | round armed cells {:?} for {} min",
            armed.as_slice(),
            config.balance_duration_min
        );
        Ok(())
    }

    fn reanchor_from_ocv(
        &mut self,
        snapshot: &PackSnapshot,
        cells: &mut CellTracker,
        table: &OcvTable,
    ) {
        for (i, &v) in snapshot.cell_voltage_uv.iter().enumerate() {
            cells.reanchor_to_ocv(i, f32::from(table.resolve(v)));
        }
        self.soc_update_pending = false;
        info!("BALANCE | settle complete, SOC re-derived from OCV");
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
