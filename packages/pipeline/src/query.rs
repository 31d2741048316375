//! Arguments of [`Pipeline::prepare`](crate::Pipeline::prepare).

use std::collections::BTreeSet;

/// Filters applied by the preparation pipeline.
///
/// Two queries that differ only in ways the pipeline ignores (a year given
/// together with `include_all_years`, an empty commune set, surrounding
/// whitespace) normalize to the same value and share a memo entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrepareQuery {
    /// Keep only this year. Ignored when `include_all_years` is set;
    /// `None` applies no year filter.
    pub year: Option<i32>,
    /// Keep only rows whose joined commune name is one of these, exactly.
    pub communes: Option<BTreeSet<String>>,
    /// Keep only rows in this derived department.
    pub department: Option<String>,
    /// Keep every year (time series, heatmap, search views).
    pub include_all_years: bool,
}

impl PrepareQuery {
    /// Query for a single year, whole country.
    #[must_use]
    pub fn for_year(year: i32) -> Self {
        Self {
            year: Some(year),
            ..Self::default()
        }
    }

    /// Query across every year, whole country.
    #[must_use]
    pub fn all_years() -> Self {
        Self {
            include_all_years: true,
            ..Self::default()
        }
    }

    /// Restricts the query to the given commune names.
    #[must_use]
    pub fn with_communes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.communes = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Restricts the query to a department.
    #[must_use]
    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    /// Canonical form used as the memo key.
    ///
    /// Commune names and the department are trimmed; blank names are
    /// dropped and an empty set means no commune filter. Department codes
    /// are upper-cased so `2a` matches Corsica's `2A`.
    #[must_use]
    pub fn normalized(self) -> Self {
        let communes = self
            .communes
            .map(|names| {
                names
                    .into_iter()
                    .map(|n| n.trim().to_owned())
                    .filter(|n| !n.is_empty())
                    .collect::<BTreeSet<_>>()
            })
            .filter(|names| !names.is_empty());

        let department = self
            .department
            .map(|d| d.trim().to_ascii_uppercase())
            .filter(|d| !d.is_empty());

        Self {
            year: if self.include_all_years {
                None
            } else {
                self.year
            },
            communes,
            department,
            include_all_years: self.include_all_years,
        }
    }

    /// Year the rows must match, if any.
    #[must_use]
    pub const fn year_filter(&self) -> Option<i32> {
        if self.include_all_years {
            None
        } else {
            self.year
        }
    }
}
