#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the crime dashboard server.
//!
//! These types are serialized to JSON for the REST API. Aggregated views
//! reuse the pipeline's own serializable types; only the envelopes and
//! query parameters live here.

use chrono::{DateTime, Utc};
use crime_fr_models::EnrichedRecord;
use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    /// Whether the service is healthy.
    pub healthy: bool,
    /// Service version.
    pub version: String,
}

/// Error body returned with every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    /// Human-readable message.
    pub error: String,
}

impl ApiError {
    /// Builds an error body.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Query parameters shared by the dashboard endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardQueryParams {
    /// Year to keep.
    pub year: Option<i32>,
    /// Comma-separated list of commune names to keep.
    pub communes: Option<String>,
    /// Department code to keep (e.g. `75`, `2A`, `971`).
    pub department: Option<String>,
    /// Ignore `year` and keep every year.
    #[serde(default)]
    pub all_years: bool,
    /// Indicator label, or `all`.
    pub indicator: Option<String>,
    /// Maximum number of ranked communes.
    pub limit: Option<usize>,
    /// Ranking order: `count` or `rate`.
    pub by: Option<String>,
    /// Ignore extrapolated population figures.
    #[serde(default)]
    pub measured_only: bool,
    /// Number of indicators kept in series and comparisons.
    pub top: Option<usize>,
}

impl DashboardQueryParams {
    /// Splits [`Self::communes`] on commas, dropping blank entries.
    #[must_use]
    pub fn commune_names(&self) -> Vec<String> {
        self.communes
            .as_deref()
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Query parameters for the commune search endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommuneSearchParams {
    /// Case-insensitive substring; blank matches nothing.
    pub search: Option<String>,
}

/// Response from the records endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordsResponse<'a> {
    /// Number of rows.
    pub total_count: usize,
    /// Prepared rows.
    pub rows: &'a [EnrichedRecord],
}

/// Response from the cache clearing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheClearedResponse {
    /// When the caches were dropped.
    pub cleared_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commune_list_is_split_and_trimmed() {
        let params = DashboardQueryParams {
            communes: Some(" Paris, ,Lyon ,".to_owned()),
            ..DashboardQueryParams::default()
        };
        assert_eq!(params.commune_names(), vec!["Paris", "Lyon"]);
        assert!(DashboardQueryParams::default().commune_names().is_empty());
    }

    #[test]
    fn query_params_use_camel_case() {
        let params: DashboardQueryParams =
            serde_json::from_str(r#"{"year":2023,"allYears":true,"measuredOnly":true}"#).unwrap();
        assert_eq!(params.year, Some(2023));
        assert!(params.all_years);
        assert!(params.measured_only);
    }
}
