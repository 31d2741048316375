#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! The data preparation pipeline behind the crime dashboard.
//!
//! [`Pipeline::prepare`] loads the three source tables (through the
//! [`SourceCache`](crime_fr_source::cache::SourceCache)), joins crime
//! records to commune names, derives departments, applies the year,
//! commune, and department filters, then joins population and computes the
//! rate per mille. Results are memoized per normalized [`PrepareQuery`].
//!
//! The [`views`] module re-aggregates prepared rows for each dashboard tab,
//! and [`export`] writes ranking tables to disk.

pub mod export;
pub mod pipeline;
pub mod query;
pub mod views;

use crime_fr_source::SourceError;
use thiserror::Error;

pub use pipeline::{Pipeline, PreparedTable, Sources, enrich};
pub use query::PrepareQuery;

/// Errors that can occur while preparing or exporting dashboard data.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A source table could not be located or loaded.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The prepared table is larger than the presentation layer accepts.
    #[error("Result has {rows} rows, above the {max} row ceiling; narrow the filters")]
    TooManyRows {
        /// Rows in the prepared table.
        rows: usize,
        /// Configured ceiling.
        max: usize,
    },

    /// Writing an export file failed.
    #[error("Export error: {0}")]
    Export(#[from] csv::Error),

    /// Filesystem error while exporting.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Refuses tables above `max_rows`.
///
/// # Errors
///
/// Returns [`PipelineError::TooManyRows`] when `rows > max_rows`.
pub const fn ensure_renderable(rows: usize, max_rows: usize) -> Result<(), PipelineError> {
    if rows > max_rows {
        return Err(PipelineError::TooManyRows {
            rows,
            max: max_rows,
        });
    }
    Ok(())
}
