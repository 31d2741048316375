//! Numeric coercion for source fields.
//!
//! Unparseable values become `None` instead of failing the load. Some
//! exports write decimals with a comma separator (`"3,2"`), which is
//! normalized to a period before parsing.

/// Parses a decimal number, accepting a comma decimal separator.
///
/// Returns `None` for empty, unparseable, or non-finite values.
#[must_use]
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let value = if trimmed.contains(',') {
        trimmed.replace(',', ".").parse::<f64>().ok()?
    } else {
        trimmed.parse::<f64>().ok()?
    };
    value.is_finite().then_some(value)
}

/// Parses a year. Accepts integral decimals such as `"2016.0"`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn parse_year(raw: &str) -> Option<i32> {
    let trimmed = raw.trim();
    if let Ok(year) = trimmed.parse::<i32>() {
        return Some(year);
    }
    let value = parse_decimal(trimmed)?;
    if value.fract() != 0.0 || value < f64::from(i32::MIN) || value > f64::from(i32::MAX) {
        return None;
    }
    Some(value as i32)
}

/// Per-field counts of non-empty values that failed to parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoercionReport {
    /// Rows read.
    pub rows: usize,
    /// Non-empty year values that did not parse.
    pub invalid_years: usize,
    /// Non-empty count values that did not parse.
    pub invalid_counts: usize,
    /// Non-empty rate values that did not parse.
    pub invalid_rates: usize,
}

impl CoercionReport {
    /// Total number of coerced-to-null values.
    #[must_use]
    pub const fn invalid_total(&self) -> usize {
        self.invalid_years + self.invalid_counts + self.invalid_rates
    }
}

/// Parses `raw` with `parse`, bumping `failures` when a non-empty value
/// could not be parsed.
pub fn coerce<T>(raw: &str, parse: fn(&str) -> Option<T>, failures: &mut usize) -> Option<T> {
    let parsed = parse(raw);
    if parsed.is_none() && !raw.trim().is_empty() {
        *failures += 1;
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_period_and_comma_decimals() {
        assert_eq!(parse_decimal("3.5"), Some(3.5));
        assert_eq!(parse_decimal("3,5"), Some(3.5));
        assert_eq!(parse_decimal(" 12 "), Some(12.0));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_decimal(""), None);
        assert_eq!(parse_decimal("NA"), None);
        assert_eq!(parse_decimal("NaN"), None);
        assert_eq!(parse_decimal("inf"), None);
        assert_eq!(parse_decimal("1,2,3"), None);
    }

    #[test]
    fn parses_years() {
        assert_eq!(parse_year("2016"), Some(2016));
        assert_eq!(parse_year("2016.0"), Some(2016));
        assert_eq!(parse_year("2016.5"), None);
        assert_eq!(parse_year("deux mille"), None);
    }

    #[test]
    fn counts_only_non_empty_failures() {
        let mut failures = 0;
        assert_eq!(coerce("", parse_decimal, &mut failures), None);
        assert_eq!(failures, 0);
        assert_eq!(coerce("abc", parse_decimal, &mut failures), None);
        assert_eq!(failures, 1);
        assert_eq!(coerce("4", parse_decimal, &mut failures), Some(4.0));
        assert_eq!(failures, 1);
    }
}
