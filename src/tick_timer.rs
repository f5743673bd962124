//! Millisecond countdown shared with the timer interrupt.
//!
//! The only state the interrupt touches.  The main loop arms it with the
//! tick period, does its work, then spins until it expires:
//!
//! ```text
//!   main loop                       timer ISR (1 kHz)
//!   ─────────                       ─────────────────
//!   arm(200)
//!   tick(...)                       on_timer_interrupt()  199
//!   wait(keep_alive) ── spin ──▶    on_timer_interrupt()  ...
//!                    ◀── 0 ──────   on_timer_interrupt()  0
//! ```

use core::sync::atomic::{AtomicI32, Ordering};

pub struct TickCountdown {
    remaining_ms: AtomicI32,
}

impl TickCountdown {
    /// Usable as a `static`.
    pub const fn new() -> Self {
        Self {
            remaining_ms: AtomicI32::new(0),
        }
    }

    pub fn arm(&self, period_ms: u32) {
        let ms = i32::try_from(period_ms).unwrap_or(i32::MAX);
        self.remaining_ms.store(ms, Ordering::Release);
    }

    /// Call from the 1 ms interrupt.
    pub fn on_timer_interrupt(&self) {
        self.remaining_ms.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn remaining(&self) -> i32 {
        self.remaining_ms.load(Ordering::Acquire)
    }

    pub fn expired(&self) -> bool {
        self.remaining() <= 0
    }

    /// Spin until the countdown expires, calling `keep_alive` on every
    /// pass.  A failing keep-alive does not cut the wait short; the first
    /// error is returned once the countdown expires.
    pub fn wait<E>(&self, mut keep_alive: impl FnMut() -> Result<(), E>) -> Result<(), E> {
        let mut outcome = Ok(());
        while !self.expired() {
            if let Err(e) = keep_alive() {
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
            core::hint::spin_loop();
        }
        outcome
    }
}

impl Default for TickCountdown {
    fn default() -> Self {
        Self::new()
    }
}
