//! Ranking export.
//!
//! One CSV file per ranking table: `top_count.csv` and `top_rate.csv`
//! across all indicators, then `indicator_<slug>.csv` per indicator
//! (ranked by count).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crime_fr_models::EnrichedRecord;

use crate::PipelineError;
use crate::views::{CommuneRanking, IndicatorFilter, RankBy, RankingRequest, top_communes};

/// File name of the all-indicator ranking by count.
pub const TOP_COUNT_FILE: &str = "top_count.csv";
/// File name of the all-indicator ranking by rate.
pub const TOP_RATE_FILE: &str = "top_rate.csv";

/// Turns an indicator label into a file-name-safe slug.
///
/// ASCII letters and digits are kept (lower-cased); every other run of
/// characters becomes a single `_`.
#[must_use]
pub fn slugify(label: &str) -> String {
    let mut slug = String::with_capacity(label.len());
    for c in label.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "indicator".to_owned()
    } else {
        slug.to_owned()
    }
}

/// Writes every ranking table under `dir`, creating it if needed, and
/// returns the files written in order.
///
/// # Errors
///
/// Returns [`PipelineError::Io`] if the directory cannot be created and
/// [`PipelineError::Export`] if a file cannot be written.
pub fn export_rankings(
    rows: &[EnrichedRecord],
    dir: &Path,
    limit: usize,
) -> Result<Vec<PathBuf>, PipelineError> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    for (file, by) in [(TOP_COUNT_FILE, RankBy::Count), (TOP_RATE_FILE, RankBy::Rate)] {
        let request = RankingRequest {
            indicator: IndicatorFilter::All,
            by,
            limit,
            measured_only: false,
        };
        let path = dir.join(file);
        write_rankings(&path, &top_communes(rows, &request))?;
        written.push(path);
    }

    let indicators: BTreeSet<&str> = rows.iter().map(|r| r.indicator.as_str()).collect();
    let mut used = BTreeSet::new();

    for indicator in indicators {
        let base = slugify(indicator);
        let mut slug = base.clone();
        let mut n = 2;
        while !used.insert(slug.clone()) {
            slug = format!("{base}_{n}");
            n += 1;
        }

        let request = RankingRequest {
            indicator: IndicatorFilter::Only(indicator.to_owned()),
            by: RankBy::Count,
            limit,
            measured_only: false,
        };
        let path = dir.join(format!("indicator_{slug}.csv"));
        write_rankings(&path, &top_communes(rows, &request))?;
        written.push(path);
    }

    log::info!("Exported {} ranking files to {}", written.len(), dir.display());
    Ok(written)
}

fn write_rankings(path: &Path, rankings: &[CommuneRanking]) -> Result<(), PipelineError> {
    let mut writer = csv::Writer::from_path(path)?;
    for ranking in rankings {
        writer.serialize(ranking)?;
    }
    writer.flush()?;
    Ok(())
}
