#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Refreshes the local crime file from the national open-data export.
//!
//! [`refresh`] downloads the configured stable URL (with retry), normalizes
//! the payload to the dashboard's four-column layout, overwrites the crime
//! file atomically, and clears the source cache so the next query reads
//! the new data. [`trim::trim_file`] is the one-off conversion of a raw
//! export downloaded by hand.

pub mod normalize;
pub mod retry;
pub mod trim;
pub mod write;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crime_fr_source::SourceError;
use crime_fr_source::cache::SourceCache;
use crime_fr_source::config::DashboardConfig;
use crime_fr_source::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::normalize::normalize_export;
use crate::retry::{RetryPolicy, StatusClass, classify_status, fetch_bytes};
use crate::write::write_crime_file;

/// Errors that can occur while refreshing the crime file.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV decoding or encoding error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The payload does not have the expected columns, or a local file is
    /// missing.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// No row survived normalization; the existing file is kept.
    #[error("Downloaded export has no usable rows")]
    Empty,
}

impl RefreshError {
    /// Returns `true` if retrying the download may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => retry::is_transient(e),
            Self::Status { status, .. } => reqwest::StatusCode::from_u16(*status)
                .is_ok_and(|s| classify_status(s) == StatusClass::Transient),
            Self::Io(_) | Self::Csv(_) | Self::Source(_) | Self::Empty => false,
        }
    }
}

/// Outcome of a refresh run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    /// When the file was written.
    pub refreshed_at: DateTime<Utc>,
    /// File written.
    pub path: PathBuf,
    /// Rows written.
    pub rows: usize,
    /// Rows dropped for a missing year or count.
    pub dropped: usize,
    /// First and last year present.
    pub years: Option<(i32, i32)>,
}

/// Normalizes a downloaded payload and installs it at `path`.
///
/// # Errors
///
/// Returns [`RefreshError::Empty`] when no row survives normalization,
/// otherwise any parsing or writing error.
pub fn install_export(
    bytes: &[u8],
    path: &std::path::Path,
) -> Result<RefreshSummary, RefreshError> {
    let export = normalize_export(bytes)?;
    if export.rows.is_empty() {
        return Err(RefreshError::Empty);
    }

    write_crime_file(path, &export.rows)?;

    Ok(RefreshSummary {
        refreshed_at: Utc::now(),
        path: path.to_path_buf(),
        rows: export.rows.len(),
        dropped: export.dropped,
        years: export.year_range(),
    })
}

/// Downloads, normalizes, and installs the latest crime export, then
/// clears `cache` if given.
///
/// # Errors
///
/// Returns [`RefreshError`] if the download fails after every retry, the
/// payload cannot be normalized, or the file cannot be written.
#[allow(clippy::future_not_send)]
pub async fn refresh(
    config: &DashboardConfig,
    cache: Option<&SourceCache>,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<RefreshSummary, RefreshError> {
    let settings = &config.refresh;
    log::info!("Downloading from the stable URL...\n{}", settings.url);
    progress.set_message("Downloading crime export".to_owned());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs))
        .build()?;
    let policy = RetryPolicy::new(settings.max_attempts);
    let bytes = fetch_bytes(&client, &settings.url, &policy, progress).await?;

    progress.set_message("Normalizing".to_owned());
    let summary = install_export(&bytes, &config.refresh_output_path())?;

    if let Some(cache) = cache {
        cache.clear();
    }

    progress.finish(format!("Wrote {} rows", summary.rows));
    Ok(summary)
}
