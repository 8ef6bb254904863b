//! Egress pacing to a bits-per-second ceiling.
//!
//! The limiter counts body bytes written since the start of the current
//! rate-limit epoch. The budget at time `t` is what the configured rate has
//! earned since the epoch plus one approximate MTU of slack, so a writer
//! that honours [`Allowance::Bytes`] never exceeds `rate * elapsed + MTU`.
//! When less than one write unit is available the limiter asks the caller
//! to come back at a deadline instead.
//!
//! Credit earned while the writer had nothing to send is forfeited: after
//! [`RateLimiter::on_idle`] the next allowance starts from one MTU again, so
//! an idle period never turns into a burst.

use std::time::Duration;

use tracing::{debug, trace};

use crate::time::Instant;

/// Slack granted on top of the earned budget: one packet's worth.
pub const APPROXIMATE_MTU: u64 = 1400;

/// Longest the limiter will ever ask a writer to wait.
pub const MAX_RATE_LIMIT_DELAY: Duration = Duration::from_secs(10);

/// What the limiter permits right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allowance {
    /// No limit configured.
    Unlimited,
    /// Up to this many bytes may be written now.
    Bytes(u64),
    /// Nothing useful may be written before this instant.
    Delayed(Instant),
}

#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    bytes_per_ms: u64,
    epoch: Instant,
    bytes_sent: u64,
    resume_at: Option<Instant>,
    /// The writer drained its buffer since the last allowance.
    idle: bool,
}

impl RateLimiter {
    /// A limiter with no ceiling.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Set the ceiling in bits per second; 0 disables pacing. Rates below
    /// one byte per millisecond are rounded up to it. Starts a new epoch and
    /// clears any pending delay.
    pub fn set_limit(&mut self, bits_per_second: u64, now: Instant) {
        self.bytes_per_ms = match bits_per_second {
            0 => 0,
            bps => (bps / 8000).max(1),
        };
        self.epoch = now;
        self.bytes_sent = 0;
        self.resume_at = None;
        // Nothing was sent under the new limit yet.
        self.idle = self.bytes_per_ms > 0;
        debug!(
            bits_per_second,
            bytes_per_ms = self.bytes_per_ms,
            "egress rate limit set"
        );
    }

    pub fn is_enabled(&self) -> bool {
        self.bytes_per_ms > 0
    }

    pub fn bytes_per_ms(&self) -> u64 {
        self.bytes_per_ms
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Pending resume deadline, if the writer is being held back.
    pub fn deadline(&self) -> Option<Instant> {
        self.resume_at
    }

    pub fn is_delayed(&self) -> bool {
        self.resume_at.is_some()
    }

    /// Bytes that may be written at `now` without breaking the ceiling.
    pub fn budget(&self, now: Instant) -> u64 {
        let elapsed_ms = now.saturating_duration_since(self.epoch).as_millis();
        let elapsed_ms = u64::try_from(elapsed_ms).unwrap_or(u64::MAX);
        self.bytes_per_ms
            .saturating_mul(elapsed_ms)
            .saturating_add(APPROXIMATE_MTU)
            .saturating_sub(self.bytes_sent)
    }

    /// Decide how much of `pending` bytes may go out at `now`.
    pub fn allowance(&mut self, now: Instant, pending: u64) -> Allowance {
        if !self.is_enabled() {
            return Allowance::Unlimited;
        }
        if let Some(at) = self.resume_at {
            if now < at {
                return Allowance::Delayed(at);
            }
            self.resume_at = None;
        }
        if std::mem::take(&mut self.idle) {
            self.forfeit_unused_credit(now);
        }

        let budget = self.budget(now);
        let want = pending.min(APPROXIMATE_MTU);
        if budget >= want {
            return Allowance::Bytes(budget);
        }

        let shortfall = want - budget;
        let delay_ms = shortfall.div_ceil(self.bytes_per_ms).max(1);
        let delay = Duration::from_millis(delay_ms).min(MAX_RATE_LIMIT_DELAY);
        let at = now.saturating_add(delay);
        trace!(delay_ms, budget, pending, "egress rate limited");
        self.resume_at = Some(at);
        Allowance::Delayed(at)
    }

    /// The writer has nothing buffered.
    pub fn on_idle(&mut self) {
        self.idle = self.is_enabled();
    }

    /// Count everything earned so far as spent, leaving one MTU of budget.
    fn forfeit_unused_credit(&mut self, now: Instant) {
        let elapsed_ms = now.saturating_duration_since(self.epoch).as_millis();
        let earned = self
            .bytes_per_ms
            .saturating_mul(u64::try_from(elapsed_ms).unwrap_or(u64::MAX));
        if earned > self.bytes_sent {
            trace!(forfeited = earned - self.bytes_sent, "idle rate limit credit dropped");
            self.bytes_sent = earned;
        }
    }

    pub fn on_bytes_sent(&mut self, bytes: u64) {
        if self.is_enabled() {
            self.bytes_sent = self.bytes_sent.saturating_add(bytes);
        }
    }

    /// Clear the delay if its deadline has passed. Returns true if the
    /// writer should try again.
    pub fn on_timeout(&mut self, now: Instant) -> bool {
        match self.resume_at {
            Some(at) if at <= now => {
                self.resume_at = None;
                true
            }
            _ => false,
        }
    }

    /// Drop any pending delay without changing the ceiling.
    pub fn cancel(&mut self) {
        self.resume_at = None;
    }
}
