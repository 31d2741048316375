//! French department code derivation.
//!
//! Maps a 5-character INSEE commune code to its department: two
//! characters for mainland departments and Corsica (`"2A"`/`"2B"`), three
//! characters for overseas departments and collectivities (`"971"` ..
//! `"988"`).

use crate::COMMUNE_CODE_LEN;

/// Commune code prefixes whose department is identified by three
/// characters.
pub const OVERSEAS_PREFIXES: &[&str] = &["97", "98"];

/// Derives the department code from a commune code.
///
/// Returns `None` unless `commune_code` is exactly 5 ASCII characters.
/// The result borrows from the input, depends only on its first two or
/// three characters, and is safe to cache per code.
#[must_use]
pub fn derive_department(commune_code: &str) -> Option<&str> {
    if commune_code.len() != COMMUNE_CODE_LEN || !commune_code.is_ascii() {
        return None;
    }

    let prefix = &commune_code[..2];

    if OVERSEAS_PREFIXES.contains(&prefix) {
        return Some(&commune_code[..3]);
    }

    Some(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainland() {
        assert_eq!(derive_department("75056"), Some("75"));
        assert_eq!(derive_department("01001"), Some("01"));
        assert_eq!(derive_department("20004"), Some("20"));
    }

    #[test]
    fn overseas_uses_three_characters() {
        assert_eq!(derive_department("97411"), Some("974"));
        assert_eq!(derive_department("97101"), Some("971"));
        assert_eq!(derive_department("98818"), Some("988"));
    }

    #[test]
    fn corsica() {
        assert_eq!(derive_department("2A004"), Some("2A"));
        assert_eq!(derive_department("2B033"), Some("2B"));
    }

    #[test]
    fn malformed_codes() {
        assert_eq!(derive_department("1"), None);
        assert_eq!(derive_department(""), None);
        assert_eq!(derive_department("750560"), None);
        assert_eq!(derive_department("7505"), None);
        assert_eq!(derive_department("97é1"), None);
    }

    #[test]
    fn deterministic() {
        for code in ["75056", "97411", "2A004", "13055", "98735"] {
            assert_eq!(derive_department(code), derive_department(code));
        }
    }
}
