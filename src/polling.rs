/*
 * Timing and cancellation primitives shared by every wait loop of the start
 * pipeline. Each loop checks the cancellation token at the top of an
 * iteration and sleeps in short slices so a cancel request is honored
 * promptly instead of after a full poll interval.
 */
use crate::error::{EmbedError, Result};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Number of polls per second of configured wait time.
pub const POLLS_PER_SECOND: u32 = 4;

/// Total re-parent attempts before giving up.
pub const MAX_REPARENT_ATTEMPTS: u32 = 11;

const CANCEL_CHECK_SLICE: Duration = Duration::from_millis(25);

/// Cadences used by the pipeline. Tests substitute zero durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// Delay between two polls of the process table, the window list, or a main window.
    pub poll_interval: Duration,
    /// Delay between two re-parent attempts.
    pub reparent_retry_delay: Duration,
    /// How long to wait for a freshly started process to become input-idle.
    pub input_idle_timeout: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000 / POLLS_PER_SECOND as u64),
            reparent_retry_delay: Duration::from_millis(100),
            input_idle_timeout: Duration::from_secs(5),
        }
    }
}

impl PollTiming {
    /// Timing without any delay, for deterministic tests of the loops.
    pub fn immediate() -> Self {
        Self {
            poll_interval: Duration::ZERO,
            reparent_retry_delay: Duration::ZERO,
            input_idle_timeout: Duration::ZERO,
        }
    }
}

/// Number of polls allowed for a wait bounded by `max_wait_secs`; at least one.
pub fn poll_budget(max_wait_secs: u32) -> u32 {
    max_wait_secs.saturating_mul(POLLS_PER_SECOND).max(1)
}

/// Cooperative cancellation flag shared between the host and its start worker.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(EmbedError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleeps for `duration`, waking early with `Err(Cancelled)` if cancelled meanwhile.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        self.check()?;
        let deadline = Instant::now() + duration;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep((deadline - now).min(CANCEL_CHECK_SLICE));
            self.check()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_is_four_polls_per_second_and_never_zero() {
        assert_eq!(poll_budget(10), 40);
        assert_eq!(poll_budget(1), 4);
        assert_eq!(poll_budget(0), 1);
        assert_eq!(poll_budget(u32::MAX), u32::MAX);
    }

    #[test]
    fn default_poll_interval_matches_cadence() {
        assert_eq!(PollTiming::default().poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn cancelled_token_fails_checks_and_sleeps() {
        let token = CancellationToken::new();
        assert!(token.check().is_ok());
        assert!(token.sleep(Duration::ZERO).is_ok());

        let shared = token.clone();
        shared.cancel();
        assert_eq!(token.check(), Err(EmbedError::Cancelled));
        assert_eq!(token.sleep(Duration::from_secs(60)), Err(EmbedError::Cancelled));
    }

    #[test]
    fn sleep_wakes_early_when_cancelled_from_another_thread() {
        let token = CancellationToken::new();
        let remote = token.clone();
        let started = Instant::now();
        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });
        let result = token.sleep(Duration::from_secs(30));
        worker.join().unwrap();
        assert_eq!(result, Err(EmbedError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
