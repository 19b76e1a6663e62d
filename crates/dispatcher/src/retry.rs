//! Bounded retry with exponential backoff
//!
//! `ConnectFailed` / `Timeout` are retried; `RejectedByBroker` is final on
//! the first attempt. A raised stop signal ends a backoff sleep early and
//! the event is reported `Failed`.

use std::time::{Duration, Instant};

use contracts::{ChangeEvent, DeliveryOutcome, JobBroker, NotifierConfig};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// Retry budget and backoff bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total submit attempts per event, first one included
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    ///
    /// `initial * 2^(attempt-1)`, capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .checked_mul(1u32 << shift)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&NotifierConfig::default())
    }
}

impl From<&NotifierConfig> for RetryPolicy {
    fn from(config: &NotifierConfig) -> Self {
        Self::new(
            config.max_retry_attempts,
            Duration::from_millis(config.retry_initial_backoff_ms),
            Duration::from_millis(config.retry_max_backoff_ms),
        )
    }
}

/// Deliver one event, retrying per `policy`.
///
/// Always returns a terminal outcome; delivery errors never escape.
pub async fn deliver_with_retry<B>(
    broker: &B,
    event: &ChangeEvent,
    policy: &RetryPolicy,
    stop: &mut watch::Receiver<bool>,
) -> DeliveryOutcome
where
    B: JobBroker + Sync,
{
    let job = event.kind().job_name();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let started = Instant::now();
        let result = broker.submit(job, event.path().as_bytes()).await;
        observability::record_submit_latency_ms(started.elapsed().as_secs_f64() * 1000.0);

        let error = match result {
            Ok(handle) => {
                observability::record_delivery_attempt(None);
                trace!(event = %event, handle = %handle, attempt, "Job accepted");
                return DeliveryOutcome::delivered(event, attempt);
            }
            Err(e) => e,
        };
        observability::record_delivery_attempt(Some(error.kind()));

        if !error.is_retryable() {
            return DeliveryOutcome::dropped(event, attempt, error.to_string());
        }
        if attempt >= policy.max_attempts {
            debug!(event = %event, attempts = attempt, "Retry budget exhausted");
            return DeliveryOutcome::dropped(event, attempt, error.to_string());
        }

        let delay = policy.backoff_for(attempt);
        warn!(
            event = %event,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Submit failed, retrying"
        );
        observability::record_retry();

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = stop.wait_for(|stopped| *stopped) => {
                return DeliveryOutcome::failed(event, attempt, error.to_string());
            }
        }
    }
}
