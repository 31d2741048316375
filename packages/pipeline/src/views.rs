//! Re-aggregations of prepared rows for the dashboard tabs.
//!
//! Every function here is a pure fold over `&[EnrichedRecord]`; empty
//! input yields empty output. Missing counts contribute nothing to sums.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crime_fr_models::{EnrichedRecord, PopulationOrigin, derive_department, rate_per_mille};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::pipeline::Sources;

/// Indicators kept in the time series when no single indicator is chosen.
pub const SERIES_TOP_INDICATORS: usize = 10;
/// Indicator rows kept in the heatmap.
pub const HEATMAP_MAX_INDICATORS: usize = 50;
/// Indicators (radar axes) kept in the commune comparison.
pub const COMPARISON_TOP_INDICATORS: usize = 8;

/// The indicator selection of the dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum IndicatorFilter {
    /// Every indicator ("all crimes").
    #[default]
    All,
    /// A single indicator label.
    Only(String),
}

impl IndicatorFilter {
    /// Query-parameter value meaning [`Self::All`].
    pub const ALL: &'static str = "all";

    /// Parses a query parameter: absent, blank, or `all` (any case) select
    /// every indicator.
    #[must_use]
    pub fn from_param(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Self::All,
            Some(v) if v.eq_ignore_ascii_case(Self::ALL) => Self::All,
            Some(v) => Self::Only(v.to_owned()),
        }
    }

    /// Returns `true` if `indicator` is selected.
    #[must_use]
    pub fn matches(&self, indicator: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(wanted) => wanted == indicator,
        }
    }
}

/// Total count of one indicator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorTotal {
    /// Indicator label.
    pub indicator: String,
    /// Summed count.
    pub count: f64,
}

/// Total count of one department for one year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentTotal {
    /// Reference year.
    pub year: Option<i32>,
    /// Department code.
    pub department: String,
    /// Summed count.
    pub count: f64,
}

/// What a commune ranking is ordered by.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum RankBy {
    /// Total count, descending.
    #[default]
    Count,
    /// Rate per mille, descending, communes without a rate last.
    Rate,
}

/// Ranking parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingRequest {
    /// Indicator selection.
    pub indicator: IndicatorFilter,
    /// Ordering.
    pub by: RankBy,
    /// Maximum number of communes returned.
    pub limit: usize,
    /// Ignore extrapolated population figures (rates become `None`).
    pub measured_only: bool,
}

impl Default for RankingRequest {
    fn default() -> Self {
        Self {
            indicator: IndicatorFilter::All,
            by: RankBy::Count,
            limit: 20,
            measured_only: false,
        }
    }
}

/// One commune's totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommuneRanking {
    /// Commune display name.
    pub commune_name: String,
    /// Commune code.
    pub commune_code: String,
    /// Department code.
    pub department: Option<String>,
    /// Summed count.
    pub total_count: f64,
    /// First known population among the commune's rows.
    pub population: Option<f64>,
    /// `total_count` per 1,000 inhabitants.
    pub rate_per_mille: Option<f64>,
}

/// One point of an indicator's time series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    /// Reference year.
    pub year: i32,
    /// Indicator label.
    pub indicator: String,
    /// Summed count.
    pub count: f64,
}

/// Year × indicator matrix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heatmap {
    /// Column labels, ascending.
    pub years: Vec<i32>,
    /// One row per indicator.
    pub rows: Vec<HeatmapRow>,
    /// `true` if indicator rows were dropped to respect the cap.
    pub truncated: bool,
}

/// One heatmap row; `values[i]` belongs to `years[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapRow {
    /// Indicator label.
    pub indicator: String,
    /// Counts per year, `0` where there is no data.
    pub values: Vec<f64>,
}

/// Indicator profile of several communes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    /// Axes, largest total first.
    pub indicators: Vec<String>,
    /// One series per commune, sorted by name.
    pub communes: Vec<ComparisonSeries>,
}

/// One commune's values; `values[i]` belongs to `indicators[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonSeries {
    /// Commune display name.
    pub commune_name: String,
    /// Counts per indicator, `0` where there is no data.
    pub values: Vec<f64>,
}

/// Choices for the dashboard's filter controls.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    /// Years present in the crime source, most recent first.
    pub years: Vec<i32>,
    /// Indicator labels, sorted.
    pub indicators: Vec<String>,
    /// Departments of communes present in the crime source, sorted.
    pub departments: Vec<String>,
    /// Commune names from the reference table, sorted.
    pub communes: Vec<String>,
}

/// Builds the filter choices from the loaded sources.
#[must_use]
pub fn filter_options(sources: &Sources) -> FilterOptions {
    let departments: BTreeSet<&str> = sources
        .crime
        .records
        .iter()
        .filter_map(|r| derive_department(&r.commune_code))
        .collect();

    FilterOptions {
        years: sources.crime.years(),
        indicators: sources
            .crime
            .indicators()
            .into_iter()
            .map(str::to_owned)
            .collect(),
        departments: departments.into_iter().map(str::to_owned).collect(),
        communes: sources
            .communes
            .names()
            .into_iter()
            .map(str::to_owned)
            .collect(),
    }
}

fn count_of(row: &EnrichedRecord) -> f64 {
    row.count.filter(|c| c.is_finite()).unwrap_or(0.0)
}

fn descending(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}

/// Indicator totals summed per label, largest first.
fn indicator_totals<'a>(rows: impl Iterator<Item = &'a EnrichedRecord>) -> Vec<(&'a str, f64)> {
    let mut totals: HashMap<&str, f64> = HashMap::new();
    for row in rows {
        *totals.entry(row.indicator.as_str()).or_default() += count_of(row);
    }
    let mut totals: Vec<(&str, f64)> = totals.into_iter().collect();
    totals.sort_by(|a, b| descending(a.1, b.1).then_with(|| a.0.cmp(b.0)));
    totals
}

/// Sum of counts per indicator, largest first (pie chart).
#[must_use]
pub fn indicator_breakdown(
    rows: &[EnrichedRecord],
    filter: &IndicatorFilter,
) -> Vec<IndicatorTotal> {
    indicator_totals(rows.iter().filter(|r| filter.matches(&r.indicator)))
        .into_iter()
        .map(|(indicator, count)| IndicatorTotal {
            indicator: indicator.to_owned(),
            count,
        })
        .collect()
}

/// Sum of counts per (year, department) (choropleth). Rows without a
/// department are skipped.
#[must_use]
pub fn department_totals(
    rows: &[EnrichedRecord],
    filter: &IndicatorFilter,
) -> Vec<DepartmentTotal> {
    let mut totals: BTreeMap<(Option<i32>, &str), f64> = BTreeMap::new();
    for row in rows.iter().filter(|r| filter.matches(&r.indicator)) {
        if let Some(department) = row.department.as_deref() {
            *totals.entry((row.year, department)).or_default() += count_of(row);
        }
    }
    totals
        .into_iter()
        .map(|((year, department), count)| DepartmentTotal {
            year,
            department: department.to_owned(),
            count,
        })
        .collect()
}

/// Per-commune totals, in no particular order. Rows without a commune name
/// are skipped.
#[must_use]
pub fn commune_rankings(
    rows: &[EnrichedRecord],
    filter: &IndicatorFilter,
    measured_only: bool,
) -> Vec<CommuneRanking> {
    let mut index: HashMap<(&str, &str), usize> = HashMap::new();
    let mut rankings: Vec<CommuneRanking> = Vec::new();

    for row in rows.iter().filter(|r| filter.matches(&r.indicator)) {
        let Some(name) = row.commune_name.as_deref() else {
            continue;
        };
        let population = if measured_only
            && row.population_origin == Some(PopulationOrigin::Extrapolated)
        {
            None
        } else {
            row.population
        };

        let i = *index
            .entry((name, row.commune_code.as_str()))
            .or_insert_with(|| {
                rankings.push(CommuneRanking {
                    commune_name: name.to_owned(),
                    commune_code: row.commune_code.clone(),
                    department: row.department.clone(),
                    total_count: 0.0,
                    population: None,
                    rate_per_mille: None,
                });
                rankings.len() - 1
            });

        let entry = &mut rankings[i];
        entry.total_count += count_of(row);
        if entry.population.is_none() {
            entry.population = population;
        }
    }

    for entry in &mut rankings {
        entry.rate_per_mille = rate_per_mille(Some(entry.total_count), entry.population);
    }

    rankings
}

/// The top communes for `request`.
#[must_use]
pub fn top_communes(rows: &[EnrichedRecord], request: &RankingRequest) -> Vec<CommuneRanking> {
    let mut rankings = commune_rankings(rows, &request.indicator, request.measured_only);

    match request.by {
        RankBy::Count => rankings.sort_by(|a, b| {
            descending(a.total_count, b.total_count)
                .then_with(|| a.commune_name.cmp(&b.commune_name))
        }),
        RankBy::Rate => rankings.sort_by(|a, b| {
            match (a.rate_per_mille, b.rate_per_mille) {
                (Some(x), Some(y)) => descending(x, y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
            .then_with(|| a.commune_name.cmp(&b.commune_name))
        }),
    }

    rankings.truncate(request.limit);
    rankings
}

/// Sum of counts per (year, indicator), sorted by year then indicator.
///
/// With [`IndicatorFilter::All`] and `top_k = Some(k)`, only the `k`
/// indicators with the largest totals are kept. Rows without a year are
/// skipped.
#[must_use]
pub fn time_series(
    rows: &[EnrichedRecord],
    filter: &IndicatorFilter,
    top_k: Option<usize>,
) -> Vec<SeriesPoint> {
    let selected: Option<BTreeSet<&str>> = match (filter, top_k) {
        (IndicatorFilter::All, Some(k)) => Some(
            indicator_totals(rows.iter())
                .into_iter()
                .take(k)
                .map(|(indicator, _)| indicator)
                .collect(),
        ),
        _ => None,
    };

    let mut totals: BTreeMap<(i32, &str), f64> = BTreeMap::new();
    for row in rows.iter().filter(|r| filter.matches(&r.indicator)) {
        let Some(year) = row.year else {
            continue;
        };
        if selected
            .as_ref()
            .is_some_and(|keep| !keep.contains(row.indicator.as_str()))
        {
            continue;
        }
        *totals.entry((year, row.indicator.as_str())).or_default() += count_of(row);
    }

    totals
        .into_iter()
        .map(|((year, indicator), count)| SeriesPoint {
            year,
            indicator: indicator.to_owned(),
            count,
        })
        .collect()
}

/// Year × indicator sums (heatmap). Indicators are ordered by total,
/// largest first, and capped at `max_indicators`.
#[must_use]
pub fn heatmap(rows: &[EnrichedRecord], max_indicators: usize) -> Heatmap {
    let dated = || rows.iter().filter(|r| r.year.is_some());

    let years: Vec<i32> = dated()
        .filter_map(|r| r.year)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let totals = indicator_totals(dated());
    let truncated = totals.len() > max_indicators;

    let mut cells: HashMap<(&str, i32), f64> = HashMap::new();
    for row in dated() {
        if let Some(year) = row.year {
            *cells.entry((row.indicator.as_str(), year)).or_default() += count_of(row);
        }
    }

    let matrix = totals
        .into_iter()
        .take(max_indicators)
        .map(|(indicator, _)| HeatmapRow {
            indicator: indicator.to_owned(),
            values: years
                .iter()
                .map(|&y| cells.get(&(indicator, y)).copied().unwrap_or(0.0))
                .collect(),
        })
        .collect();

    Heatmap {
        years,
        rows: matrix,
        truncated,
    }
}

/// Per-commune values on the `top_k` indicators with the largest totals
/// (radar chart). Rows without a commune name are skipped.
#[must_use]
pub fn comparison(rows: &[EnrichedRecord], top_k: usize) -> Comparison {
    let named = || rows.iter().filter(|r| r.commune_name.is_some());

    let indicators: Vec<&str> = indicator_totals(named())
        .into_iter()
        .take(top_k)
        .map(|(indicator, _)| indicator)
        .collect();

    let mut cells: BTreeMap<&str, HashMap<&str, f64>> = BTreeMap::new();
    for row in named() {
        if let Some(name) = row.commune_name.as_deref() {
            *cells
                .entry(name)
                .or_default()
                .entry(row.indicator.as_str())
                .or_default() += count_of(row);
        }
    }

    Comparison {
        communes: cells
            .into_iter()
            .map(|(name, values)| ComparisonSeries {
                commune_name: name.to_owned(),
                values: indicators
                    .iter()
                    .map(|i| values.get(i).copied().unwrap_or(0.0))
                    .collect(),
            })
            .collect(),
        indicators: indicators.into_iter().map(str::to_owned).collect(),
    }
}
