#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Loaders for the three dashboard source tables.
//!
//! * [`crime`] reads the per-commune, per-year, per-indicator counts
//!   (semicolon-separated, gzip-compressed).
//! * [`communes`] reads the INSEE commune code → name reference.
//! * [`population`] reads per-commune population, either already long or
//!   as a wide spreadsheet that must be melted.
//!
//! Column names vary between source vintages; [`columns`] resolves each
//! logical field from an ordered list of candidates and fails with
//! [`SourceError::SchemaMismatch`] when none matches. Loaded tables are
//! memoized by [`cache::SourceCache`].

pub mod cache;
pub mod columns;
pub mod communes;
pub mod config;
pub mod crime;
pub mod files;
pub mod parsing;
pub mod population;
pub mod progress;

use std::path::PathBuf;

/// Errors that can occur while locating or loading a source table.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// None of the candidate files exist.
    #[error("Missing source: none of {candidates:?} exist")]
    MissingSource {
        /// Every path that was tried, in order.
        candidates: Vec<PathBuf>,
    },

    /// Required columns were not found under any recognized name.
    #[error("Schema mismatch in {file}: expected {expected:?}, found columns {found:?}")]
    SchemaMismatch {
        /// File (or label) being read.
        file: String,
        /// Missing fields with their accepted column names.
        expected: Vec<String>,
        /// Column names actually present.
        found: Vec<String>,
    },

    /// I/O error (file open/read/write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV decoding error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Spreadsheet decoding error.
    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    /// Configuration could not be parsed.
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
}
