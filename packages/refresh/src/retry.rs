//! Download with retry for transient HTTP failures.
//!
//! Every attempt re-sends the request and re-reads the whole body, so a
//! connection dropped mid-download is retried like a refused connection.
//! Backoff is linear: the wait after attempt `n` is `n × step`.
//!
//! Retried: connection errors, timeouts, interrupted bodies, HTTP 429, and
//! HTTP 5xx. Any other 4xx is permanent.

use std::sync::Arc;
use std::time::Duration;

use crime_fr_source::progress::ProgressCallback;

use crate::RefreshError;

/// Default wait added per failed attempt.
pub const BACKOFF_STEP: Duration = Duration::from_secs(2);

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub max_attempts: u32,
    /// Wait added per failed attempt.
    pub step: Duration,
}

impl RetryPolicy {
    /// Policy with the default step.
    #[must_use]
    pub const fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            step: BACKOFF_STEP,
        }
    }

    /// Wait after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.step * attempt
    }

    const fn attempts(&self) -> u32 {
        if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        }
    }
}

/// How a response status should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 2xx.
    Success,
    /// 429 or 5xx: try again.
    Transient,
    /// Anything else: give up.
    Permanent,
}

/// Classifies an HTTP status.
#[must_use]
pub fn classify_status(status: reqwest::StatusCode) -> StatusClass {
    if status.is_success() {
        StatusClass::Success
    } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        StatusClass::Transient
    } else {
        StatusClass::Permanent
    }
}

/// Returns `true` if the error is likely transient and worth retrying.
#[must_use]
pub fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_request()
}

/// Downloads `url` in full, retrying transient failures per `policy`.
///
/// # Errors
///
/// Returns [`RefreshError::Http`] or [`RefreshError::Status`] for a
/// permanent failure, or for the last transient failure once every attempt
/// is used.
#[allow(clippy::future_not_send)]
pub async fn fetch_bytes(
    client: &reqwest::Client,
    url: &str,
    policy: &RetryPolicy,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<Vec<u8>, RefreshError> {
    let attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match fetch_once(client, url, progress).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if e.is_transient() && attempt < attempts => {
                let delay = policy.delay_after(attempt);
                log::warn!("  attempt {attempt}/{attempts} failed: {e}; retrying in {delay:?}...");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                log::error!("Download of {url} failed after {attempt} attempt(s): {e}");
                return Err(e);
            }
        }
    }
}

#[allow(clippy::future_not_send)]
async fn fetch_once(
    client: &reqwest::Client,
    url: &str,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<Vec<u8>, RefreshError> {
    let mut response = client.get(url).send().await?;
    let status = response.status();

    if classify_status(status) != StatusClass::Success {
        return Err(RefreshError::Status {
            status: status.as_u16(),
            url: url.to_owned(),
        });
    }

    let mut bytes = Vec::new();
    if let Some(len) = response.content_length() {
        progress.set_total(len);
        bytes.reserve(usize::try_from(len).unwrap_or(0));
    }

    while let Some(chunk) = response.chunk().await? {
        progress.inc(chunk.len() as u64);
        bytes.extend_from_slice(&chunk);
    }

    log::debug!("Downloaded {} bytes from {url}", bytes.len());
    Ok(bytes)
}
