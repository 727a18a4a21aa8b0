//! Bounded exponential backoff for a single external call.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_MULTIPLIER: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    multiplier: u32,
}

impl RetryPolicy {
    /// `max_attempts` counts every call, including the first. Values below 1
    /// are raised to 1.
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }

    pub fn with_multiplier(mut self, multiplier: u32) -> Self {
        self.multiplier = multiplier.max(1);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay slept after the failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .checked_pow(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor)
    }

    /// The sleeps between attempts, in order. Never includes a sleep after
    /// the last attempt.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..self.max_attempts).map(move |attempt| self.delay_after(attempt))
    }

    /// Runs `op` until it succeeds, fails with an error `is_retryable`
    /// rejects, or the attempt cap is reached. The last error is returned on
    /// exhaustion.
    pub async fn run<T, E, F, Fut, P>(&self, mut op: F, is_retryable: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("Call succeeded on attempt {}", attempt);
                    }
                    return Ok(value);
                }
                Err(e) if attempt < self.max_attempts && is_retryable(&e) => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        "Attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt, self.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if is_retryable(&e) {
                        warn!("Giving up after {} attempts: {}", attempt, e);
                    }
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1))
    }
}
