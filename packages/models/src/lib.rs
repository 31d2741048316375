#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Crime record, commune, and population types shared across the
//! dashboard toolchain.
//!
//! Every loader produces one of the row types defined here, and the
//! preparation pipeline joins them into [`EnrichedRecord`]s. Commune codes
//! are always carried as zero-padded 5-character strings (see
//! [`normalize_commune_code`]); they are never parsed as integers.

pub mod department;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use department::derive_department;

/// Width of an INSEE commune code.
pub const COMMUNE_CODE_LEN: usize = 5;

/// Trims a raw commune code and left-pads it with `0` to
/// [`COMMUNE_CODE_LEN`] characters.
///
/// Codes that are already 5 characters or longer are returned trimmed but
/// otherwise untouched, so Corsican codes such as `"2A004"` survive as-is.
#[must_use]
pub fn normalize_commune_code(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!("{trimmed:0>COMMUNE_CODE_LEN$}")
}

/// One row of the crime source: a count for a single
/// (commune, year, indicator) triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrimeRecord {
    /// Zero-padded commune code.
    pub commune_code: String,
    /// Reference year. `None` when the source value failed to parse.
    pub year: Option<i32>,
    /// Offense category label, verbatim from the source.
    pub indicator: String,
    /// Recorded count. `None` when the source value failed to parse.
    pub count: Option<f64>,
    /// Rate per 1,000 inhabitants as published by the source, if any.
    pub rate_per_mille: Option<f64>,
}

/// One row of the commune reference table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommuneRef {
    /// Zero-padded commune code.
    pub commune_code: String,
    /// Display name (e.g. `"Paris"`).
    pub commune_name: String,
}

/// Whether a population figure was published or synthesized.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PopulationOrigin {
    /// Figure read from the population source.
    Measured,
    /// Figure carried forward from the last measured year.
    Extrapolated,
}

impl PopulationOrigin {
    /// Returns `true` for carried-forward figures.
    #[must_use]
    pub const fn is_extrapolated(self) -> bool {
        matches!(self, Self::Extrapolated)
    }
}

/// Population of one commune for one year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulationRecord {
    /// Zero-padded commune code.
    pub commune_code: String,
    /// Reference year.
    pub year: i32,
    /// Population. `None` when the source value failed to parse.
    pub population: Option<f64>,
    /// Where the figure comes from.
    pub origin: PopulationOrigin,
}

/// A crime record joined with its commune name, department, and
/// population, as produced by the preparation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedRecord {
    /// Zero-padded commune code.
    pub commune_code: String,
    /// Commune display name, if the reference table knows the code.
    pub commune_name: Option<String>,
    /// Derived department code, `None` for malformed commune codes.
    pub department: Option<String>,
    /// Reference year.
    pub year: Option<i32>,
    /// Offense category label.
    pub indicator: String,
    /// Recorded count.
    pub count: Option<f64>,
    /// Rate as published by the crime source.
    pub source_rate_per_mille: Option<f64>,
    /// Population for (commune, year), if known.
    pub population: Option<f64>,
    /// Origin of [`Self::population`], `None` when there is no match.
    pub population_origin: Option<PopulationOrigin>,
    /// `count / population * 1000`, `None` whenever population is
    /// missing, zero, or negative.
    pub rate_per_mille: Option<f64>,
}

/// Computes a rate per 1,000 inhabitants.
///
/// Returns `None` when either input is missing, when the population is not
/// strictly positive, or when the result would not be finite.
#[must_use]
pub fn rate_per_mille(count: Option<f64>, population: Option<f64>) -> Option<f64> {
    let count = count?;
    let population = population?;
    if population.is_nan() || population <= 0.0 {
        return None;
    }
    let rate = count / population * 1000.0;
    rate.is_finite().then_some(rate)
}
