//! Population loader.
//!
//! Two layouts are supported:
//!
//! * **Long**: a CSV with explicit code, year, and population columns.
//! * **Wide**: one row per commune and one `pNN_pop` column per year, from
//!   a spreadsheet (`.xlsx`, `.xls`, `.xlsm`, `.ods`) or a CSV. It is
//!   melted into long form, parsing the 2-digit suffix as `2000 + NN`.
//!
//! For the wide layout, years after the last measured one can be filled
//! up to a configurable boundary by carrying the last measured figures
//! forward. Those records are tagged [`PopulationOrigin::Extrapolated`].

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use calamine::{Reader as _, open_workbook_auto};
use crime_fr_models::{PopulationOrigin, PopulationRecord, normalize_commune_code};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::SourceError;
use crate::columns::{ColumnSpec, clean_headers, resolve_columns};
use crate::files::{label, open_table};
use crate::parsing::{coerce, parse_decimal, parse_year};

/// Layout of the population source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopulationFormat {
    /// Code, year, population columns.
    Long,
    /// One population column per year.
    Wide,
}

/// Accepted column names for the long layout.
pub const LONG_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::required("commune_code", &["codgeo", "CODGEO"]),
    ColumnSpec::required("year", &["annee", "ANNEE"]),
    ColumnSpec::required("population", &["Population", "pop"]),
];

/// Accepted identifier column names for the wide layout.
pub const WIDE_ID_COLUMN: ColumnSpec = ColumnSpec::required("commune_code", &["codgeo", "CODGEO"]);

/// Year columns of the wide layout, e.g. `p13_pop` for 2013.
static YEAR_COLUMN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^p(\d{2})_pop$").unwrap_or_else(|_| unreachable!()));

/// Parses a wide-layout column name into a 4-digit year.
#[must_use]
pub fn parse_year_column(name: &str) -> Option<i32> {
    let caps = YEAR_COLUMN.captures(name.trim())?;
    let suffix: i32 = caps.get(1)?.as_str().parse().ok()?;
    Some(2000 + suffix)
}

/// Population records indexed by (commune code, year).
#[derive(Debug, Clone, Default)]
pub struct PopulationTable {
    records: Vec<PopulationRecord>,
    index: HashMap<String, HashMap<i32, usize>>,
}

impl PopulationTable {
    /// Builds the index. The first record for a (code, year) key wins.
    #[must_use]
    pub fn from_records(records: Vec<PopulationRecord>) -> Self {
        let mut index: HashMap<String, HashMap<i32, usize>> = HashMap::new();
        let mut duplicates = 0usize;

        for (i, record) in records.iter().enumerate() {
            let by_year = index.entry(record.commune_code.clone()).or_default();
            match by_year.entry(record.year) {
                Entry::Vacant(slot) => {
                    slot.insert(i);
                }
                Entry::Occupied(_) => duplicates += 1,
            }
        }

        if duplicates > 0 {
            log::warn!("{duplicates} duplicate (commune, year) population rows ignored");
        }

        Self { records, index }
    }

    /// Population record for a commune and year.
    #[must_use]
    pub fn lookup(&self, commune_code: &str, year: i32) -> Option<&PopulationRecord> {
        let i = *self.index.get(commune_code)?.get(&year)?;
        Some(&self.records[i])
    }

    /// Latest year with a measured figure.
    #[must_use]
    pub fn last_measured_year(&self) -> Option<i32> {
        self.records
            .iter()
            .filter(|r| r.origin == PopulationOrigin::Measured)
            .map(|r| r.year)
            .max()
    }

    /// All records.
    #[must_use]
    pub fn records(&self) -> &[PopulationRecord] {
        &self.records
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if there are no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Loads the population source at `path`.
///
/// `extrapolate_until` only applies to the wide layout.
///
/// # Errors
///
/// Returns [`SourceError`] if the file is missing or unreadable, or if its
/// columns do not match the expected layout.
pub fn load_population_file(
    path: &Path,
    format: PopulationFormat,
    extrapolate_until: Option<i32>,
) -> Result<PopulationTable, SourceError> {
    let file = label(path);

    let records = match format {
        PopulationFormat::Long => read_long_population(&file, open_table(path)?)?,
        PopulationFormat::Wide => {
            let mut records = if is_spreadsheet(path) {
                read_wide_population_spreadsheet(path)?
            } else {
                read_wide_population_csv(&file, open_table(path)?)?
            };
            let added = extrapolate(&mut records, extrapolate_until);
            if added > 0 {
                log::info!("[{file}] extrapolated {added} population records");
            }
            records
        }
    };

    log::info!("[{file}] loaded {} population records", records.len());

    Ok(PopulationTable::from_records(records))
}

/// Parses the long layout. Rows whose year does not parse cannot be joined
/// and are dropped; unparseable populations become `None`.
///
/// # Errors
///
/// Returns [`SourceError::Csv`] on malformed CSV and
/// [`SourceError::SchemaMismatch`] when a required column is missing.
pub fn read_long_population<R: Read>(
    file: &str,
    reader: R,
) -> Result<Vec<PopulationRecord>, SourceError> {
    let mut csv = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let headers = clean_headers(csv.headers()?.iter());
    let cols = resolve_columns(file, &headers, LONG_COLUMNS)?;

    let mut records = Vec::new();
    let mut invalid_years = 0usize;
    let mut invalid_populations = 0usize;

    for result in csv.records() {
        let row = result?;
        let field = |n: usize| cols.get(n).and_then(|i| row.get(i)).unwrap_or("");

        let Some(year) = coerce(field(1), parse_year, &mut invalid_years) else {
            continue;
        };

        records.push(PopulationRecord {
            commune_code: normalize_commune_code(field(0)),
            year,
            population: coerce(field(2), parse_decimal, &mut invalid_populations),
            origin: PopulationOrigin::Measured,
        });
    }

    if invalid_years + invalid_populations > 0 {
        log::warn!(
            "[{file}] {invalid_years} rows dropped for unparseable year, \
             {invalid_populations} populations coerced to null"
        );
    }

    Ok(records)
}

/// Parses the wide layout from a CSV.
///
/// # Errors
///
/// Returns [`SourceError::Csv`] on malformed CSV and
/// [`SourceError::SchemaMismatch`] when the identifier or year columns do
/// not match the expected naming.
pub fn read_wide_population_csv<R: Read>(
    file: &str,
    reader: R,
) -> Result<Vec<PopulationRecord>, SourceError> {
    let mut csv = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = clean_headers(csv.headers()?.iter());

    let mut rows = Vec::new();
    for result in csv.records() {
        let row = result?;
        rows.push(row.iter().map(str::to_owned).collect::<Vec<_>>());
    }

    melt_wide(file, &headers, rows)
}

/// Parses the wide layout from the first worksheet of a spreadsheet.
///
/// # Errors
///
/// Returns [`SourceError::Spreadsheet`] if the workbook cannot be read and
/// [`SourceError::SchemaMismatch`] when the columns do not match.
pub fn read_wide_population_spreadsheet(
    path: &Path,
) -> Result<Vec<PopulationRecord>, SourceError> {
    let file = label(path);
    if !path.is_file() {
        return Err(SourceError::MissingSource {
            candidates: vec![path.to_path_buf()],
        });
    }

    let mut workbook = open_workbook_auto(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| SourceError::SchemaMismatch {
            file: file.clone(),
            expected: vec!["at least one worksheet".to_owned()],
            found: Vec::new(),
        })??;

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(ToString::to_string).collect::<Vec<String>>());

    let headers = rows
        .next()
        .map(|h| clean_headers(h.iter().map(String::as_str)))
        .unwrap_or_default();

    melt_wide(&file, &headers, rows)
}

/// Melts wide rows into one [`PopulationRecord`] per (commune, year
/// column).
///
/// Every header starting with `p` must be a year column (`pNN_pop`); any
/// other `p…` header is treated as naming drift and rejected rather than
/// producing records without a year.
///
/// # Errors
///
/// Returns [`SourceError::SchemaMismatch`] when the identifier column is
/// missing, when no year column is present, or when a `p…` header does
/// not follow the year-column pattern.
pub fn melt_wide<I>(
    file: &str,
    headers: &[String],
    rows: I,
) -> Result<Vec<PopulationRecord>, SourceError>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let id_col = resolve_columns(file, headers, &[WIDE_ID_COLUMN])?
        .get(0)
        .unwrap_or_default();

    let mut year_cols = Vec::new();
    let mut drifted = Vec::new();
    for (i, header) in headers.iter().enumerate() {
        if let Some(year) = parse_year_column(header) {
            year_cols.push((i, year));
        } else if header.starts_with(['p', 'P']) {
            drifted.push(header.clone());
        }
    }

    if year_cols.is_empty() || !drifted.is_empty() {
        let mut expected = vec!["year columns named pNN_pop".to_owned()];
        expected.extend(drifted.iter().map(|h| format!("unrecognized year column '{h}'")));
        return Err(SourceError::SchemaMismatch {
            file: file.to_owned(),
            expected,
            found: headers.to_vec(),
        });
    }

    log::debug!(
        "[{file}] melting {} year columns ({:?})",
        year_cols.len(),
        year_cols.iter().map(|(_, y)| *y).collect::<Vec<_>>()
    );

    let mut invalid = 0usize;
    let mut records = Vec::new();

    for row in rows {
        let code = row.get(id_col).map_or("", String::as_str);
        if code.trim().is_empty() {
            continue;
        }
        let commune_code = normalize_commune_code(code);

        for &(i, year) in &year_cols {
            let raw = row.get(i).map_or("", String::as_str);
            records.push(PopulationRecord {
                commune_code: commune_code.clone(),
                year,
                population: coerce(raw, parse_decimal, &mut invalid),
                origin: PopulationOrigin::Measured,
            });
        }
    }

    if invalid > 0 {
        log::warn!("[{file}] {invalid} population values coerced to null");
    }

    Ok(records)
}

/// Appends carried-forward records for every year after the last measured
/// one, up to and including `until`. Returns the number of records added.
pub fn extrapolate(records: &mut Vec<PopulationRecord>, until: Option<i32>) -> usize {
    let Some(until) = until else {
        return 0;
    };
    let Some(last) = records
        .iter()
        .filter(|r| r.origin == PopulationOrigin::Measured)
        .map(|r| r.year)
        .max()
    else {
        return 0;
    };
    if last >= until {
        return 0;
    }

    let base: Vec<PopulationRecord> = records
        .iter()
        .filter(|r| r.year == last && r.origin == PopulationOrigin::Measured)
        .cloned()
        .collect();

    let before = records.len();
    for year in (last + 1)..=until {
        records.extend(base.iter().map(|r| PopulationRecord {
            year,
            origin: PopulationOrigin::Extrapolated,
            ..r.clone()
        }));
    }

    log::debug!("Carried {last} population forward through {until}");

    records.len() - before
}

fn is_spreadsheet(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| {
            ["xlsx", "xls", "xlsm", "xlsb", "ods"]
                .iter()
                .any(|ext| e.eq_ignore_ascii_case(ext))
        })
}
