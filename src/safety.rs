//! Safety supervisor.
//!
//! The supervisor runs **every tick before the FSM**.  It latches the
//! over/under-voltage counts reported by the fault source and counts
//! consecutive measurement failures.
//!
//! ## Fault lifecycle
//!
//! 1. The device reports a nonzero over- or under-voltage count.
//! 2. The supervisor latches it (element-wise max with what is already
//!    latched) and the classifier turns the tick into a fault event.
//! 3. The FSM enters `Fault`; `fault_enter` opens the relay.
//! 4. Counts stay latched even if the device stops reporting them.
//! 5. Only an operator acknowledgement clears the device and the latch.
//!
//! Measurement loss is tracked separately: after `limit` consecutive
//! failed conversions the service escalates to `Fault` on its own.

use log::{error, info, warn};

use crate::config::BmuConfig;
use crate::error::FaultCounts;

/// Safety supervisor.
#[derive(Debug, Clone)]
pub struct SafetySupervisor {
    /// Latched over/under-voltage counts.
    latched: FaultCounts,
    /// Consecutive failed conversions.
    failure_streak: u8,
    /// Streak at which measurement loss escalates.
    limit: u8,
}

impl SafetySupervisor {
    pub fn new(config: &BmuConfig) -> Self {
        Self {
            latched: FaultCounts::default(),
            failure_streak: 0,
            limit: config.measurement_failure_limit.max(1),
        }
    }

    /// Latch this tick's reported counts.  Returns the latched set.
    pub fn evaluate(&mut self, reported: FaultCounts) -> FaultCounts {
        let merged = self.latched.merge(reported);
        if merged != self.latched {
            error!("SAFETY FAULT SET: {merged}");
        }
        self.latched = merged;
        self.latched
    }

    /// Latched counts.
    pub fn latched(&self) -> FaultCounts {
        self.latched
    }

    /// True if **any** count is latched.
    pub fn has_faults(&self) -> bool {
        !self.latched.is_clear()
    }

    /// Operator acknowledgement.
    pub fn clear(&mut self) {
        if self.has_faults() {
            info!("SAFETY FAULT CLEARED: {}", self.latched);
        }
        self.latched = FaultCounts::default();
    }

    // ── Measurement loss ──────────────────────────────────────────

    /// Count one failed conversion.  Returns `true` once the streak has
    /// reached the escalation limit.
    pub fn record_measurement_failure(&mut self) -> bool {
        self.failure_streak = self.failure_streak.saturating_add(1);
        warn!(
            "SAFETY measurement failed ({}/{})",
            self.failure_streak, self.limit
        );
        self.failure_streak >= self.limit
    }

    /// A good conversion ends the streak.
    pub fn record_measurement_ok(&mut self) {
        if self.failure_streak > 0 {
            info!("SAFETY measurement recovered after {} failures", self.failure_streak);
        }
        self.failure_streak = 0;
    }

    pub fn failure_streak(&self) -> u8 {
        self.failure_streak
    }

    pub fn set_failure_limit(&mut self, limit: u8) {
        self.limit = limit.max(1);
    }
}
