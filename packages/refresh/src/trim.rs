//! One-off conversion of a raw national export into the dashboard's crime
//! file: keep the useful columns and a year window, rename the commune
//! code column, and normalize the rate's decimal comma.

use std::io::{Read, Write};
use std::path::Path;

use crime_fr_source::columns::{ColumnSpec, clean_headers, resolve_columns};
use crime_fr_source::files::{label, open_table};
use crime_fr_source::parsing::{parse_decimal, parse_year};
use serde::{Deserialize, Serialize};

use crate::RefreshError;
use crate::normalize::format_number;
use crate::write::{OUTPUT_DELIMITER, write_gzip_atomically};

/// Columns read from the raw export.
pub const TRIM_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::required("year", &["annee", "ANNEE"]),
    ColumnSpec::required("commune_code", &["codgeo", "CODGEO", "CODGEO_2025"]),
    ColumnSpec::required("indicator", &["indicateur", "INDICATEUR"]),
    ColumnSpec::required("count", &["nombre", "NB", "nb"]),
    ColumnSpec::optional("rate_per_mille", &["taux_pour_mille"]),
];

/// Header of the trimmed file.
pub const TRIM_OUTPUT_COLUMNS: [&str; 5] =
    ["annee", "CODGEO_2025", "indicateur", "nombre", "taux_pour_mille"];

/// Inclusive year window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    /// First year kept.
    pub from: i32,
    /// Last year kept.
    pub to: i32,
}

impl Default for YearRange {
    fn default() -> Self {
        Self {
            from: 2016,
            to: 2024,
        }
    }
}

impl YearRange {
    /// Returns `true` if `year` is inside the window.
    #[must_use]
    pub const fn contains(&self, year: i32) -> bool {
        self.from <= year && year <= self.to
    }
}

/// Outcome of a trim run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrimSummary {
    /// Rows read from the raw export.
    pub rows_read: usize,
    /// Rows written.
    pub rows_kept: usize,
}

/// Trims a `;`-separated raw export from `reader` into `writer`.
///
/// Rows whose year does not parse, or falls outside `range`, are dropped.
/// Counts and rates that do not parse are written empty.
///
/// # Errors
///
/// Returns [`RefreshError::Source`] if a required column is missing and
/// [`RefreshError::Csv`] on malformed CSV.
pub fn trim_export<R: Read, W: Write>(
    file: &str,
    reader: R,
    writer: W,
    range: YearRange,
) -> Result<TrimSummary, RefreshError> {
    let mut input = csv::ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .from_reader(reader);
    let headers = clean_headers(input.headers()?.iter());
    let cols = resolve_columns(file, &headers, TRIM_COLUMNS)?;

    let mut output = csv::WriterBuilder::new()
        .delimiter(OUTPUT_DELIMITER)
        .from_writer(writer);
    output.write_record(TRIM_OUTPUT_COLUMNS)?;

    let mut summary = TrimSummary::default();
    for result in input.records() {
        let row = result?;
        summary.rows_read += 1;
        let field = |n: usize| cols.get(n).and_then(|i| row.get(i)).unwrap_or("");

        let Some(year) = parse_year(field(0)).filter(|&y| range.contains(y)) else {
            continue;
        };

        let year = year.to_string();
        let count = parse_decimal(field(3)).map(format_number).unwrap_or_default();
        let rate = parse_decimal(field(4)).map(|r| r.to_string()).unwrap_or_default();

        output.write_record([
            year.as_str(),
            field(1).trim(),
            field(2).trim(),
            count.as_str(),
            rate.as_str(),
        ])?;
        summary.rows_kept += 1;
    }

    output.flush()?;
    Ok(summary)
}

/// Trims the raw export at `input` (gzip or plain) into a gzip file at
/// `output`, written atomically.
///
/// # Errors
///
/// Returns [`RefreshError`] if the input cannot be read or the output
/// cannot be written.
pub fn trim_file(
    input: &Path,
    output: &Path,
    range: YearRange,
) -> Result<TrimSummary, RefreshError> {
    let file = label(input);
    let reader = open_table(input)?;
    log::info!("Trimming {file} to {}..={}", range.from, range.to);

    let mut summary = TrimSummary::default();
    write_gzip_atomically(output, |out| {
        summary = trim_export(&file, reader, out, range)?;
        Ok(())
    })?;

    log::info!(
        "{} saved with {} rows ({} read)",
        output.display(),
        summary.rows_kept,
        summary.rows_read
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use crime_fr_source::crime::read_crime_records;

    use super::*;

    const RAW: &str = "\
CODGEO_2025_NOM;annee;codgeo;indicateur;unite_de_compte;nombre;taux_pour_mille;complement
Paris;2015;75056;Vols;infraction;1800;0,86;x
Paris;2016;75056;Vols;infraction;1850;0,88;x
Paris;2024;75056;Vols;infraction;2200;1,05;x
Paris;2025;75056;Vols;infraction;2300;1,10;x
Ajaccio;2020;2A004;Vols;infraction;NA;;x
";

    #[test]
    fn keeps_the_year_window_and_fixes_decimal_commas() {
        let mut out = Vec::new();
        let summary = trim_export("raw", RAW.as_bytes(), &mut out, YearRange::default()).unwrap();

        assert_eq!(summary, TrimSummary { rows_read: 5, rows_kept: 3 });

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "annee;CODGEO_2025;indicateur;nombre;taux_pour_mille");
        assert_eq!(lines[1], "2016;75056;Vols;1850;0.88");
        assert_eq!(lines[3], "2020;2A004;Vols;;");
    }

    #[test]
    fn trimmed_output_is_readable_by_the_loader() {
        let mut out = Vec::new();
        trim_export("raw", RAW.as_bytes(), &mut out, YearRange { from: 2024, to: 2025 }).unwrap();

        let (records, report) = read_crime_records("trimmed", out.as_slice()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].rate_per_mille, Some(1.05));
        assert_eq!(report.invalid_total(), 0);
    }

    #[test]
    fn trim_file_writes_gzip() {
        let dir = std::env::temp_dir().join(format!("crime_fr_trim_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let input = dir.join("raw.csv");
        let output = dir.join("crime_2016_2024.csv.gz");
        std::fs::write(&input, RAW).unwrap();

        let summary = trim_file(&input, &output, YearRange::default()).unwrap();

        assert_eq!(summary.rows_kept, 3);
        let bytes = std::fs::read(&output).unwrap();
        assert!(crime_fr_source::files::is_gzip(&bytes));
    }
}
