//! Column-name resolution across source vintages.
//!
//! Each logical field lists the header names it has been published under,
//! most recent first. [`resolve_columns`] maps a header row onto those
//! fields once, before any data row is read.

use crate::SourceError;

/// A logical field and the header names it may appear under.
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    /// Canonical field name used in diagnostics.
    pub field: &'static str,
    /// Accepted header names, tried in order.
    pub candidates: &'static [&'static str],
    /// Whether the load fails when no candidate matches.
    pub required: bool,
}

impl ColumnSpec {
    /// A field that must be present.
    #[must_use]
    pub const fn required(field: &'static str, candidates: &'static [&'static str]) -> Self {
        Self {
            field,
            candidates,
            required: true,
        }
    }

    /// A field that may be absent.
    #[must_use]
    pub const fn optional(field: &'static str, candidates: &'static [&'static str]) -> Self {
        Self {
            field,
            candidates,
            required: false,
        }
    }

    /// Finds this field's column index in `headers`.
    ///
    /// For each candidate in order, an exact match is preferred over a
    /// case-insensitive one.
    #[must_use]
    pub fn find(&self, headers: &[String]) -> Option<usize> {
        self.candidates.iter().find_map(|candidate| {
            headers
                .iter()
                .position(|h| h == candidate)
                .or_else(|| headers.iter().position(|h| h.eq_ignore_ascii_case(candidate)))
        })
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.field, self.candidates.join("|"))
    }
}

/// Column indices resolved from a header row, in the order of the specs
/// they were resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumns {
    indices: Vec<Option<usize>>,
}

impl ResolvedColumns {
    /// Index of the `n`th spec's column, `None` for an absent optional
    /// field.
    #[must_use]
    pub fn get(&self, n: usize) -> Option<usize> {
        self.indices.get(n).copied().flatten()
    }
}

/// Normalizes raw header cells: trims whitespace and strips a UTF-8 BOM.
#[must_use]
pub fn clean_headers<'a, I>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    raw.into_iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_owned())
        .collect()
}

/// Resolves every spec against `headers`.
///
/// # Errors
///
/// Returns [`SourceError::SchemaMismatch`] listing every required field
/// that matched no candidate, together with the headers that were found.
pub fn resolve_columns(
    file: &str,
    headers: &[String],
    specs: &[ColumnSpec],
) -> Result<ResolvedColumns, SourceError> {
    let indices: Vec<Option<usize>> = specs.iter().map(|spec| spec.find(headers)).collect();

    let missing: Vec<String> = specs
        .iter()
        .zip(&indices)
        .filter(|(spec, idx)| spec.required && idx.is_none())
        .map(|(spec, _)| spec.describe())
        .collect();

    if !missing.is_empty() {
        return Err(SourceError::SchemaMismatch {
            file: file.to_owned(),
            expected: missing,
            found: headers.to_vec(),
        });
    }

    for (spec, idx) in specs.iter().zip(&indices) {
        if let Some(i) = idx {
            log::debug!("[{file}] {} -> column '{}'", spec.field, headers[*i]);
        }
    }

    Ok(ResolvedColumns { indices })
}
