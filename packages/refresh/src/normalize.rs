//! Turns a downloaded crime export into the dashboard's crime file layout.

use std::borrow::Cow;
use std::io::Read as _;

use crime_fr_source::columns::{clean_headers, resolve_columns};
use crime_fr_source::crime::CRIME_COLUMNS;
use crime_fr_source::files::is_gzip;
use crime_fr_source::parsing::{parse_decimal, parse_year};
use flate2::read::MultiGzDecoder;

use crate::RefreshError;

/// Header of the normalized crime file.
pub const OUTPUT_COLUMNS: [&str; 4] = ["CODGEO_2025", "annee", "indicateur", "nombre"];

/// Label used in schema errors for downloaded payloads.
const PAYLOAD_LABEL: &str = "downloaded export";

/// One cleaned row.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    /// Trimmed commune code.
    pub commune_code: String,
    /// Reference year.
    pub year: i32,
    /// Indicator label.
    pub indicator: String,
    /// Recorded count.
    pub count: f64,
}

/// The cleaned export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedExport {
    /// Rows with both a year and a count.
    pub rows: Vec<NormalizedRow>,
    /// Rows dropped because their year or count did not parse.
    pub dropped: usize,
}

impl NormalizedExport {
    /// Earliest and latest year.
    #[must_use]
    pub fn year_range(&self) -> Option<(i32, i32)> {
        let min = self.rows.iter().map(|r| r.year).min()?;
        let max = self.rows.iter().map(|r| r.year).max()?;
        Some((min, max))
    }
}

/// Decompresses `bytes` if they start with the gzip magic number.
///
/// # Errors
///
/// Returns [`RefreshError::Io`] if the gzip stream is corrupt.
pub fn decompress(bytes: &[u8]) -> Result<Cow<'_, [u8]>, RefreshError> {
    if !is_gzip(bytes) {
        return Ok(Cow::Borrowed(bytes));
    }
    let mut out = Vec::new();
    MultiGzDecoder::new(bytes).read_to_end(&mut out)?;
    log::debug!("Decompressed {} bytes to {}", bytes.len(), out.len());
    Ok(Cow::Owned(out))
}

/// Picks the field delimiter: `;` unless the header line has no `;` but
/// does have a `,`.
#[must_use]
pub fn detect_delimiter(text: &[u8]) -> u8 {
    let header = text.split(|&b| b == b'\n').next().unwrap_or_default();
    if !header.contains(&b';') && header.contains(&b',') {
        b','
    } else {
        b';'
    }
}

/// Parses and cleans a downloaded export (gzip or plain, `;` or `,`).
///
/// # Errors
///
/// Returns [`RefreshError::Source`] if a required column is missing and
/// [`RefreshError::Csv`] on malformed CSV.
pub fn normalize_export(bytes: &[u8]) -> Result<NormalizedExport, RefreshError> {
    let text = decompress(bytes)?;
    let delimiter = detect_delimiter(&text);

    let mut csv = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(text.as_ref());

    let headers = clean_headers(csv.headers()?.iter());
    log::info!("Columns received: {headers:?}");
    let cols = resolve_columns(PAYLOAD_LABEL, &headers, &CRIME_COLUMNS[..OUTPUT_COLUMNS.len()])?;

    let mut export = NormalizedExport::default();
    for result in csv.records() {
        let row = result?;
        let field = |n: usize| cols.get(n).and_then(|i| row.get(i)).unwrap_or("");

        let (Some(year), Some(count)) = (parse_year(field(1)), parse_decimal(field(3))) else {
            export.dropped += 1;
            continue;
        };

        export.rows.push(NormalizedRow {
            commune_code: field(0).trim().to_owned(),
            year,
            indicator: field(2).trim().to_owned(),
            count,
        });
    }

    if let Some((first, last)) = export.year_range() {
        log::info!("Detected year range: {first} -> {last}");
    }
    log::info!("Rows: {} ({} dropped)", export.rows.len(), export.dropped);

    Ok(export)
}

/// Formats a count the way the crime file stores it: integral values
/// without a decimal part.
#[must_use]
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use crime_fr_source::SourceError;

    use super::*;

    const SEMICOLON: &str = "\
CODGEO;ANNEE;INDICATEUR;NB
 75056 ;2023;Vols;2100
97411;2023;Vols;
97411;n/a;Vols;4
2A004;2022;Vols;15
";

    #[test]
    fn normalizes_legacy_column_names_and_drops_null_rows() {
        let export = normalize_export(SEMICOLON.as_bytes()).unwrap();
        assert_eq!(export.rows.len(), 2);
        assert_eq!(export.dropped, 2);
        assert_eq!(export.rows[0].commune_code, "75056");
        assert_eq!(export.year_range(), Some((2022, 2023)));
    }

    #[test]
    fn falls_back_to_comma() {
        let text = "codgeo,annee,indicateur,nombre\n75056,2023,Vols,10\n";
        assert_eq!(detect_delimiter(text.as_bytes()), b',');
        let export = normalize_export(text.as_bytes()).unwrap();
        assert_eq!(export.rows.len(), 1);
        assert!((export.rows[0].count - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn semicolon_header_with_commas_in_labels_stays_semicolon() {
        let text = "CODGEO_2025;annee;indicateur;nombre\n75056;2023;Vols, violences;10\n";
        assert_eq!(detect_delimiter(text.as_bytes()), b';');
    }

    #[test]
    fn gzip_payload_is_detected() {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(SEMICOLON.as_bytes()).unwrap();
        let gz = encoder.finish().unwrap();

        assert!(matches!(decompress(&gz).unwrap(), Cow::Owned(_)));
        assert_eq!(normalize_export(&gz).unwrap().rows.len(), 2);
    }

    #[test]
    fn missing_count_column_is_schema_mismatch() {
        let text = "CODGEO;ANNEE;INDICATEUR\n75056;2023;Vols\n";
        assert!(matches!(
            normalize_export(text.as_bytes()),
            Err(RefreshError::Source(SourceError::SchemaMismatch { .. }))
        ));
    }

    #[test]
    fn numbers_keep_integral_form() {
        assert_eq!(format_number(2100.0), "2100");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(-3.0), "-3");
    }
}
