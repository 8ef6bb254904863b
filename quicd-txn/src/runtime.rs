//! Tokio glue for transaction timers.
//!
//! Transactions only report deadlines; something has to sleep until the
//! earliest one and call back. [`drive_timers`] does that for one session
//! on a current-thread runtime, the same thread the session lives on.

use std::cell::RefCell;

use anyhow::Result;
use tokio::runtime::Runtime;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::session::TransactionTable;
use crate::time::{Clock, Instant};

/// Current-thread runtime for a connection's event loop. Sessions are not
/// `Send`, so everything touching them stays on this thread.
pub fn create_runtime() -> Result<Runtime> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    Ok(rt)
}

/// Clock on tokio's timeline, so paused test time drives transactions too.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }

    pub fn to_tokio(&self, instant: Instant) -> tokio::time::Instant {
        self.origin + std::time::Duration::from_nanos(instant.as_nanos())
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        let elapsed = self.origin.elapsed().as_nanos();
        Instant::from_nanos(u64::try_from(elapsed).unwrap_or(u64::MAX))
    }
}

/// Wakeups for [`drive_timers`].
#[derive(Debug, Default)]
pub struct TimerControl {
    rearm: Notify,
    shutdown: Notify,
}

impl TimerControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deadlines may have moved; recompute the next one.
    pub fn rearm(&self) {
        self.rearm.notify_one();
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

/// Sleep until the session's next deadline, fire it, repeat. Returns on
/// shutdown.
pub async fn drive_timers(table: &RefCell<TransactionTable>, clock: &TokioClock, control: &TimerControl) {
    loop {
        let next = table.borrow().next_timeout();
        match next {
            Some(deadline) => {
                trace!(deadline_ns = deadline.as_nanos(), "timer armed");
                tokio::select! {
                    _ = tokio::time::sleep_until(clock.to_tokio(deadline)) => {
                        let now = clock.now();
                        table.borrow_mut().on_timeout(now);
                    }
                    _ = control.rearm.notified() => {}
                    _ = control.shutdown.notified() => break,
                }
            }
            None => {
                tokio::select! {
                    _ = control.rearm.notified() => {}
                    _ = control.shutdown.notified() => break,
                }
            }
        }
    }
    debug!("timer driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_create_runtime() {
        let rt = create_runtime().unwrap();
        let out = rt.block_on(async { 7 });
        assert_eq!(out, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let clock = TokioClock::new();
        let start = clock.now();
        tokio::time::sleep(Duration::from_millis(250)).await;
        let elapsed = clock.now().saturating_duration_since(start);
        assert!(elapsed >= Duration::from_millis(250));
        assert_eq!(clock.to_tokio(start), clock.origin + Duration::from_nanos(start.as_nanos()));
    }
}
