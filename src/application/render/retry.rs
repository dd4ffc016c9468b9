use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

pub const DEFAULT_MANUAL_RETRY_COOLDOWN: Duration = Duration::from_millis(5_000);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("manual retry throttled for another {}ms", .remaining.as_millis())]
pub struct RetryThrottled {
    pub remaining: Duration,
}

/// Rate limits forced re-renders to one per cooldown window.
#[derive(Debug)]
pub struct ManualRetryController {
    cooldown: Duration,
    last_accepted: Option<Instant>,
}

impl ManualRetryController {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_accepted: None,
        }
    }

    /// Accept the retry and record `now`, or report how long is left.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), RetryThrottled> {
        if let Some(last) = self.last_accepted {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.cooldown {
                return Err(RetryThrottled {
                    remaining: self.cooldown - elapsed,
                });
            }
        }
        self.last_accepted = Some(now);
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

impl Default for ManualRetryController {
    fn default() -> Self {
        Self::new(DEFAULT_MANUAL_RETRY_COOLDOWN)
    }
}
