//! Upstream HTTP abstractions shared by the catalog and taxonomy clients.

pub mod catalog;
pub mod taxonomy;
pub mod ureq_transport;

use std::io::Read;
use std::num::NonZeroU32;
use std::time::Duration;

use governor::state::NotKeyed;
use governor::{Quota, RateLimiter};
use log::info;
use serde_json::Value;

use crate::error::MediaError;

/// Upstream asset reference: CDN URL plus the catalog's numeric asset id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    pub url: String,
    pub asset_id: String,
}

/// Response handed back by a transport. Non-2xx statuses are responses, not errors.
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: Box<dyn Read + Send>,
}

impl HttpResponse {
    pub fn read_json(self) -> Result<Value, MediaError> {
        let mut body = String::new();
        let mut reader = self.body;
        reader
            .read_to_string(&mut body)
            .map_err(|error| MediaError::Transport(format!("Failed to read response: {error}")))?;
        serde_json::from_str(&body).map_err(|error| {
            MediaError::upstream_transient(format!("Invalid JSON response: {error}"))
        })
    }
}

/// Blocking GET transport. Implementations must not follow up on non-2xx
/// statuses; classification is left to the caller.
pub trait HttpTransport: Send + Sync {
    fn get(&self, url: &str) -> Result<HttpResponse, MediaError>;
}

/// Bounded exponential backoff: retry `n` waits `unit * base^n`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: f64,
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: 1.5,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        self.backoff_unit
            .mul_f64(self.backoff_base.max(1.0).powi(exponent))
    }
}

/// Runs `operation` until it succeeds, fails with a non-transient error, or
/// `policy.max_retries` retries are spent. A transient failure that outlives
/// the budget becomes a permanent upstream error.
pub fn execute_with_backoff<T, F>(
    policy: &RetryPolicy,
    label: &str,
    mut operation: F,
) -> Result<T, MediaError>
where
    F: FnMut() -> Result<T, MediaError>,
{
    let mut retries = 0u32;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && retries < policy.max_retries => {
                retries = retries.saturating_add(1);
                let backoff = policy.delay_for_retry(retries);
                info!(
                    "{}: {}; retry {} in {:?}",
                    label, error, retries, backoff
                );
                std::thread::sleep(backoff);
            }
            Err(MediaError::Upstream { message, .. }) => {
                info!("{}: retried {} times, aborting", label, retries);
                return Err(MediaError::upstream_permanent(message));
            }
            Err(error) => return Err(error),
        }
    }
}

/// Turns a transport-level failure into a retryable upstream failure.
pub fn transient_on_transport(error: MediaError) -> MediaError {
    match error {
        MediaError::Transport(message) => MediaError::upstream_transient(message),
        other => other,
    }
}

/// Process-wide pacing for upstream requests.
pub struct UpstreamLimiter {
    limiter: Option<
        RateLimiter<NotKeyed, governor::state::InMemoryState, governor::clock::DefaultClock>,
    >,
}

impl UpstreamLimiter {
    /// `requests_per_second == 0` disables pacing.
    pub fn new(requests_per_second: u32) -> Self {
        let limiter = NonZeroU32::new(requests_per_second)
            .map(|rate| RateLimiter::direct(Quota::per_second(rate)));
        Self { limiter }
    }

    #[cfg(test)]
    pub fn unlimited() -> Self {
        Self { limiter: None }
    }

    pub fn wait_for_slot(&self) {
        let Some(limiter) = &self.limiter else {
            return;
        };
        while limiter.check().is_err() {
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}
