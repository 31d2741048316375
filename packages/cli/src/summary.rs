//! Plain-text summary of a prepared table, printed by `crime_fr query`.

use std::collections::BTreeSet;
use std::fmt;

use crime_fr_models::{EnrichedRecord, PopulationOrigin};
use crime_fr_pipeline::views::{
    CommuneRanking, IndicatorFilter, IndicatorTotal, RankBy, RankingRequest, indicator_breakdown,
    top_communes,
};

/// Headline figures of a prepared table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSummary {
    pub rows: usize,
    pub years: Option<(i32, i32)>,
    pub communes: usize,
    pub unnamed_rows: usize,
    pub rows_without_rate: usize,
    pub extrapolated_rows: usize,
    pub total_count: f64,
    pub top_indicators: Vec<IndicatorTotal>,
    pub top_communes: Vec<CommuneRanking>,
}

impl TableSummary {
    /// Summarizes `rows`, keeping the `top` largest indicators and
    /// communes.
    #[must_use]
    pub fn build(rows: &[EnrichedRecord], filter: &IndicatorFilter, top: usize) -> Self {
        let years: BTreeSet<i32> = rows.iter().filter_map(|r| r.year).collect();
        let communes: BTreeSet<&str> = rows.iter().map(|r| r.commune_code.as_str()).collect();

        let mut top_indicators = indicator_breakdown(rows, filter);
        top_indicators.truncate(top);

        let request = RankingRequest {
            indicator: filter.clone(),
            by: RankBy::Count,
            limit: top,
            measured_only: false,
        };

        Self {
            rows: rows.len(),
            years: years.first().copied().zip(years.last().copied()),
            communes: communes.len(),
            unnamed_rows: rows.iter().filter(|r| r.commune_name.is_none()).count(),
            rows_without_rate: rows.iter().filter(|r| r.rate_per_mille.is_none()).count(),
            extrapolated_rows: rows
                .iter()
                .filter(|r| r.population_origin == Some(PopulationOrigin::Extrapolated))
                .count(),
            total_count: rows
                .iter()
                .filter(|r| filter.matches(&r.indicator))
                .filter_map(|r| r.count)
                .sum(),
            top_indicators,
            top_communes: top_communes(rows, &request),
        }
    }
}

impl fmt::Display for TableSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Rows:               {}", self.rows)?;
        match self.years {
            Some((first, last)) if first == last => writeln!(f, "Year:               {first}")?,
            Some((first, last)) => writeln!(f, "Years:              {first}-{last}")?,
            None => writeln!(f, "Years:              -")?,
        }
        writeln!(f, "Communes:           {}", self.communes)?;
        writeln!(f, "Total count:        {:.0}", self.total_count)?;
        writeln!(f, "Unnamed rows:       {}", self.unnamed_rows)?;
        writeln!(f, "Rows without rate:  {}", self.rows_without_rate)?;
        writeln!(f, "Extrapolated rows:  {}", self.extrapolated_rows)?;

        if !self.top_indicators.is_empty() {
            writeln!(f)?;
            writeln!(f, "{:<60} {:>12}", "INDICATOR", "COUNT")?;
            for total in &self.top_indicators {
                writeln!(f, "{:<60} {:>12.0}", total.indicator, total.count)?;
            }
        }

        if !self.top_communes.is_empty() {
            writeln!(f)?;
            writeln!(f, "{:<40} {:>12} {:>10}", "COMMUNE", "COUNT", "PER MILLE")?;
            for commune in &self.top_communes {
                let rate = commune
                    .rate_per_mille
                    .map_or_else(|| "-".to_owned(), |r| format!("{r:.2}"));
                writeln!(
                    f,
                    "{:<40} {:>12.0} {:>10}",
                    commune.commune_name, commune.total_count, rate
                )?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(
        name: Option<&str>,
        code: &str,
        year: i32,
        indicator: &str,
        count: f64,
    ) -> EnrichedRecord {
        EnrichedRecord {
            commune_code: code.to_owned(),
            commune_name: name.map(str::to_owned),
            department: None,
            year: Some(year),
            indicator: indicator.to_owned(),
            count: Some(count),
            source_rate_per_mille: None,
            population: None,
            population_origin: None,
            rate_per_mille: None,
        }
    }

    #[test]
    fn summarizes_rows() {
        let mut extrapolated = row(Some("Paris"), "75056", 2024, "Vols", 5.0);
        extrapolated.population = Some(2_000_000.0);
        extrapolated.population_origin = Some(PopulationOrigin::Extrapolated);
        extrapolated.rate_per_mille = Some(0.0025);

        let rows = vec![
            row(Some("Paris"), "75056", 2023, "Vols", 10.0),
            row(Some("Paris"), "75056", 2023, "Cambriolages", 3.0),
            row(None, "99999", 2022, "Vols", 1.0),
            extrapolated,
        ];

        let summary = TableSummary::build(&rows, &IndicatorFilter::All, 1);

        assert_eq!(summary.rows, 4);
        assert_eq!(summary.years, Some((2022, 2024)));
        assert_eq!(summary.communes, 2);
        assert_eq!(summary.unnamed_rows, 1);
        assert_eq!(summary.rows_without_rate, 3);
        assert_eq!(summary.extrapolated_rows, 1);
        assert!((summary.total_count - 19.0).abs() < f64::EPSILON);
        assert_eq!(summary.top_indicators.len(), 1);
        assert_eq!(summary.top_indicators[0].indicator, "Vols");
        assert_eq!(summary.top_communes[0].commune_name, "Paris");
    }

    #[test]
    fn empty_table_prints_placeholders() {
        let summary = TableSummary::build(&[], &IndicatorFilter::All, 5);
        let text = summary.to_string();
        assert!(text.contains("Rows:               0"));
        assert!(text.contains("Years:              -"));
        assert!(!text.contains("INDICATOR"));
    }

    #[test]
    fn indicator_filter_limits_total() {
        let rows = vec![
            row(Some("Paris"), "75056", 2023, "Vols", 10.0),
            row(Some("Paris"), "75056", 2023, "Cambriolages", 3.0),
        ];
        let filter = IndicatorFilter::Only("Cambriolages".to_owned());
        let summary = TableSummary::build(&rows, &filter, 5);
        assert!((summary.total_count - 3.0).abs() < f64::EPSILON);
        assert_eq!(summary.top_indicators.len(), 1);
    }
}
