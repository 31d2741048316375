//! Commune reference loader.
//!
//! Reads the INSEE commune table (`COM`, `LIBELLE`, comma-separated) and
//! keeps only the code → name mapping. Codes are kept as strings.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io::Read;
use std::path::Path;

use crime_fr_models::{CommuneRef, normalize_commune_code};

use crate::SourceError;
use crate::columns::{ColumnSpec, clean_headers, resolve_columns};
use crate::files::{label, open_table};

/// Accepted column names for the reference table.
pub const COMMUNE_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::required("commune_code", &["COM"]),
    ColumnSpec::required("commune_name", &["LIBELLE"]),
];

/// The commune code → name lookup.
#[derive(Debug, Clone, Default)]
pub struct CommuneTable {
    records: Vec<CommuneRef>,
    by_code: HashMap<String, usize>,
}

impl CommuneTable {
    /// Builds the lookup. When a code appears more than once the first
    /// row wins.
    #[must_use]
    pub fn from_records(records: Vec<CommuneRef>) -> Self {
        let mut by_code = HashMap::with_capacity(records.len());
        let mut duplicates = 0usize;

        for (i, record) in records.iter().enumerate() {
            match by_code.entry(record.commune_code.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(i);
                }
                Entry::Occupied(_) => duplicates += 1,
            }
        }

        if duplicates > 0 {
            log::debug!("{duplicates} duplicate commune codes ignored (first row kept)");
        }

        Self { records, by_code }
    }

    /// Name of the commune with the given code.
    #[must_use]
    pub fn name_of(&self, commune_code: &str) -> Option<&str> {
        self.by_code
            .get(commune_code)
            .map(|&i| self.records[i].commune_name.as_str())
    }

    /// Distinct commune names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .records
            .iter()
            .map(|r| r.commune_name.as_str())
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Distinct names containing `term`, case-insensitively.
    #[must_use]
    pub fn search(&self, term: &str) -> Vec<&str> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.names()
            .into_iter()
            .filter(|name| name.to_lowercase().contains(&needle))
            .collect()
    }

    /// All reference rows in file order.
    #[must_use]
    pub fn records(&self) -> &[CommuneRef] {
        &self.records
    }

    /// Number of reference rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Loads the commune reference at `path`.
///
/// # Errors
///
/// Returns [`SourceError`] if the file is missing, unreadable, or lacks the
/// `COM`/`LIBELLE` columns.
pub fn load_commune_file(path: &Path) -> Result<CommuneTable, SourceError> {
    let file = label(path);
    let records = read_communes(&file, open_table(path)?)?;
    log::info!("[{file}] loaded {} communes", records.len());
    Ok(CommuneTable::from_records(records))
}

/// Parses commune reference rows. Rows with an empty code or name are
/// skipped.
///
/// # Errors
///
/// Returns [`SourceError::Csv`] on malformed CSV and
/// [`SourceError::SchemaMismatch`] when a required column is missing.
pub fn read_communes<R: Read>(file: &str, reader: R) -> Result<Vec<CommuneRef>, SourceError> {
    let mut csv = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let headers = clean_headers(csv.headers()?.iter());
    let cols = resolve_columns(file, &headers, COMMUNE_COLUMNS)?;

    let mut records = Vec::new();
    for result in csv.records() {
        let row = result?;
        let code = cols.get(0).and_then(|i| row.get(i)).unwrap_or("");
        let name = cols.get(1).and_then(|i| row.get(i)).unwrap_or("").trim();
        if code.trim().is_empty() || name.is_empty() {
            continue;
        }
        records.push(CommuneRef {
            commune_code: normalize_commune_code(code),
            commune_name: name.to_owned(),
        });
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE: &str = "\
TYPECOM,COM,REG,DEP,CTCD,ARR,TNCC,NCC,NCCENR,LIBELLE,CAN,COMPARENT
COM,01001,84,01,01D,012,5,ABERGEMENT CLEMENCIAT,Abergement-Clémenciat,L'Abergement-Clémenciat,0108,
COM,2A004,94,2A,2AD,2A1,0,AJACCIO,Ajaccio,Ajaccio,2A98,
COM,75056,11,75,75C,751,0,PARIS,Paris,Paris,7599,
COMD,75056,11,75,75C,751,0,PARIS,Paris,Paris bis,7599,75056
COM,69123,84,69,69D,691,0,LYON,Lyon,Lyon,6999,
";

    fn table() -> CommuneTable {
        CommuneTable::from_records(read_communes("ref", REFERENCE.as_bytes()).unwrap())
    }

    #[test]
    fn maps_codes_to_names() {
        let t = table();
        assert_eq!(t.name_of("75056"), Some("Paris"));
        assert_eq!(t.name_of("2A004"), Some("Ajaccio"));
        assert_eq!(t.name_of("01001"), Some("L'Abergement-Clémenciat"));
        assert_eq!(t.name_of("99999"), None);
    }

    #[test]
    fn first_duplicate_wins() {
        let t = table();
        assert_eq!(t.len(), 5);
        assert_eq!(t.name_of("75056"), Some("Paris"));
    }

    #[test]
    fn keeps_leading_zeros_from_unpadded_source() {
        let text = "COM,LIBELLE\n1001,L'Abergement-Clémenciat\n";
        let records = read_communes("ref", text.as_bytes()).unwrap();
        assert_eq!(records[0].commune_code, "01001");
    }

    #[test]
    fn searches_case_insensitively() {
        let t = table();
        assert_eq!(t.search("par"), vec!["Paris", "Paris bis"]);
        assert_eq!(t.search("LYON"), vec!["Lyon"]);
        assert!(t.search("  ").is_empty());
    }

    #[test]
    fn missing_libelle_is_schema_mismatch() {
        let text = "COM,NCC\n75056,PARIS\n";
        assert!(matches!(
            read_communes("ref", text.as_bytes()),
            Err(SourceError::SchemaMismatch { .. })
        ));
    }
}
