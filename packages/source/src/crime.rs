//! Crime event loader.
//!
//! Reads the communal crime statistics export: one row per
//! (commune, year, indicator), semicolon-separated, usually gzip
//! compressed. Year, count, and the optional published rate are coerced
//! to numbers; values that do not parse become `None` and the row is
//! kept.

use std::io::Read;
use std::path::{Path, PathBuf};

use crime_fr_models::{CrimeRecord, normalize_commune_code};

use crate::SourceError;
use crate::columns::{ColumnSpec, clean_headers, resolve_columns};
use crate::files::{first_existing, label, open_table};
use crate::parsing::{CoercionReport, coerce, parse_decimal, parse_year};

/// Field delimiter of the crime export.
pub const CRIME_DELIMITER: u8 = b';';

/// Accepted column names, current vintage first.
pub const CRIME_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::required("commune_code", &["CODGEO_2025", "codgeo", "CODGEO"]),
    ColumnSpec::required("year", &["annee", "ANNEE"]),
    ColumnSpec::required("indicator", &["indicateur", "INDICATEUR"]),
    ColumnSpec::required("count", &["nombre", "NB", "nb"]),
    ColumnSpec::optional("rate_per_mille", &["taux_pour_mille"]),
];

const CODE: usize = 0;
const YEAR: usize = 1;
const INDICATOR: usize = 2;
const COUNT: usize = 3;
const RATE: usize = 4;

/// The loaded crime source.
#[derive(Debug, Clone)]
pub struct CrimeTable {
    /// File the records were read from.
    pub path: PathBuf,
    /// One record per source row.
    pub records: Vec<CrimeRecord>,
    /// Field-level coercion failures.
    pub report: CoercionReport,
}

impl CrimeTable {
    /// Distinct years, most recent first.
    #[must_use]
    pub fn years(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self.records.iter().filter_map(|r| r.year).collect();
        years.sort_unstable_by(|a, b| b.cmp(a));
        years.dedup();
        years
    }

    /// Distinct indicator labels, sorted.
    #[must_use]
    pub fn indicators(&self) -> Vec<&str> {
        let mut indicators: Vec<&str> = self
            .records
            .iter()
            .map(|r| r.indicator.as_str())
            .filter(|s| !s.is_empty())
            .collect();
        indicators.sort_unstable();
        indicators.dedup();
        indicators
    }
}

/// Picks the first existing crime file among `candidates`.
///
/// # Errors
///
/// Returns [`SourceError::MissingSource`] naming every candidate when none
/// exists.
pub fn resolve_crime_source(candidates: &[PathBuf]) -> Result<PathBuf, SourceError> {
    let path = first_existing(candidates)?;
    log::info!("Using crime source {}", path.display());
    Ok(path)
}

/// Loads the crime source at `path`.
///
/// # Errors
///
/// Returns [`SourceError`] if the file is missing, unreadable, or lacks a
/// required column.
pub fn load_crime_file(path: &Path) -> Result<CrimeTable, SourceError> {
    let file = label(path);
    let (records, report) = read_crime_records(&file, open_table(path)?)?;

    log::info!(
        "[{file}] loaded {} crime records ({} values coerced to null)",
        records.len(),
        report.invalid_total()
    );

    Ok(CrimeTable {
        path: path.to_path_buf(),
        records,
        report,
    })
}

/// Parses crime records from an already-decompressed reader.
///
/// # Errors
///
/// Returns [`SourceError::Csv`] on malformed CSV and
/// [`SourceError::SchemaMismatch`] when a required column is missing.
pub fn read_crime_records<R: Read>(
    file: &str,
    reader: R,
) -> Result<(Vec<CrimeRecord>, CoercionReport), SourceError> {
    let mut csv = csv::ReaderBuilder::new()
        .delimiter(CRIME_DELIMITER)
        .flexible(true)
        .from_reader(reader);

    let headers = clean_headers(csv.headers()?.iter());
    let cols = resolve_columns(file, &headers, CRIME_COLUMNS)?;

    let mut report = CoercionReport::default();
    let mut records = Vec::new();

    for result in csv.records() {
        let row = result?;
        let field = |n: usize| cols.get(n).and_then(|i| row.get(i)).unwrap_or("");

        let rate = if cols.get(RATE).is_some() {
            coerce(field(RATE), parse_decimal, &mut report.invalid_rates)
        } else {
            None
        };

        records.push(CrimeRecord {
            commune_code: normalize_commune_code(field(CODE)),
            year: coerce(field(YEAR), parse_year, &mut report.invalid_years),
            indicator: field(INDICATOR).trim().to_owned(),
            count: coerce(field(COUNT), parse_decimal, &mut report.invalid_counts),
            rate_per_mille: rate,
        });
    }

    report.rows = records.len();

    if report.invalid_total() > 0 {
        log::warn!(
            "[{file}] coerced to null: {} years, {} counts, {} rates",
            report.invalid_years,
            report.invalid_counts,
            report.invalid_rates
        );
    }

    Ok((records, report))
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURRENT: &str = "\
CODGEO_2025;annee;indicateur;unite_de_compte;nombre;taux_pour_mille
75056;2023;Cambriolages de logement;logement;5000;2,3
1001;2023;Vols de véhicules;véhicule;3;0,4
97411;2023;Cambriolages de logement;logement;n/a;
";

    #[test]
    fn reads_current_vintage() {
        let (records, report) = read_crime_records("t", CURRENT.as_bytes()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(report.rows, 3);

        let paris = &records[0];
        assert_eq!(paris.commune_code, "75056");
        assert_eq!(paris.year, Some(2023));
        assert_eq!(paris.indicator, "Cambriolages de logement");
        assert_eq!(paris.count, Some(5000.0));
        assert_eq!(paris.rate_per_mille, Some(2.3));
    }

    #[test]
    fn pads_codes_and_coerces_bad_numbers_to_null() {
        let (records, report) = read_crime_records("t", CURRENT.as_bytes()).unwrap();
        assert_eq!(records[1].commune_code, "01001");
        assert_eq!(records[2].count, None);
        assert_eq!(records[2].rate_per_mille, None);
        assert_eq!(report.invalid_counts, 1);
        assert_eq!(report.invalid_rates, 0);
    }

    #[test]
    fn reads_legacy_vintage_without_rate() {
        let legacy = "CODGEO;ANNEE;INDICATEUR;NB\n13055;2019;Coups et blessures volontaires;12\n";
        let (records, _) = read_crime_records("t", legacy.as_bytes()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].commune_code, "13055");
        assert_eq!(records[0].year, Some(2019));
        assert_eq!(records[0].count, Some(12.0));
        assert_eq!(records[0].rate_per_mille, None);
    }

    #[test]
    fn missing_indicator_column_is_schema_mismatch() {
        let bad = "codgeo;annee;nombre\n75056;2023;1\n";
        let err = read_crime_records("bad.csv", bad.as_bytes()).unwrap_err();
        match err {
            SourceError::SchemaMismatch { expected, found, .. } => {
                assert_eq!(expected.len(), 1);
                assert!(expected[0].starts_with("indicator"));
                assert_eq!(found, vec!["codgeo", "annee", "nombre"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn lists_years_and_indicators() {
        let text = "codgeo;annee;indicateur;nombre\n\
                    75056;2022;B;1\n75056;2023;A;1\n75056;2023;B;1\n75056;x;A;1\n";
        let (records, report) = read_crime_records("t", text.as_bytes()).unwrap();
        let table = CrimeTable {
            path: PathBuf::from("t"),
            records,
            report,
        };
        assert_eq!(table.years(), vec![2023, 2022]);
        assert_eq!(table.indicators(), vec!["A", "B"]);
        assert_eq!(table.report.invalid_years, 1);
    }

    #[test]
    fn no_candidate_is_missing_source() {
        let dir = std::env::temp_dir().join(format!("crime_fr_crime_{}", uuid::Uuid::new_v4()));
        let candidates = vec![dir.join("crime_2016_latest.csv.gz")];
        assert!(matches!(
            resolve_crime_source(&candidates),
            Err(SourceError::MissingSource { .. })
        ));
    }
}
