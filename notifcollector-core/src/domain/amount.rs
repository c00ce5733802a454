//! Locale-aware amount normalization
//!
//! Wallet notifications mix `1.234,56` (es-AR) and `1,234.56` (en-US)
//! grouping. A single comma after the last period is a decimal comma;
//! anything else treats commas as thousands separators.

use rust_decimal::Decimal;

use super::result::{Error, Result};

/// Parse a locale-formatted numeric string into a canonical decimal
///
/// - `"1.234,56"` -> `1234.56`
/// - `"1,234.56"` -> `1234.56`
/// - `"1"` -> `1`
pub fn normalize_amount(raw: &str) -> Result<Decimal> {
    let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();

    let comma_count = cleaned.matches(',').count();
    let decimal_comma = comma_count == 1
        && match (cleaned.rfind(','), cleaned.rfind('.')) {
            (Some(comma), Some(period)) => comma > period,
            (Some(_), None) => true,
            _ => false,
        };

    let canonical = if decimal_comma {
        cleaned.replace('.', "").replace(',', ".")
    } else {
        cleaned.replace(',', "")
    };

    if !canonical.chars().any(|c| c.is_ascii_digit())
        || canonical.matches('.').count() > 1
        || !canonical.chars().all(|c| c.is_ascii_digit() || c == '.')
    {
        return Err(Error::MalformedNumber(raw.to_string()));
    }

    canonical
        .parse::<Decimal>()
        .map(|d| d.normalize())
        .map_err(|_| Error::MalformedNumber(raw.to_string()))
}

/// Canonical text form used in dedup seeds: `.` separator, no grouping,
/// at least one fractional digit (`1` -> `1.0`, `1234.50` -> `1234.5`).
pub fn canonical_amount(amount: &Decimal) -> String {
    let normalized = amount.normalize();
    if normalized.scale() == 0 {
        format!("{}.0", normalized)
    } else {
        normalized.to_string()
    }
}

/// Amount as written into the dedup seed.
///
/// Same as [`canonical_amount`] inside `[0.001, 10^7)`. Outside that range
/// the seed uses scientific form with one integer digit (`1.0E7`,
/// `1.23456789E7`, `5.0E-4`), so keys line up with clients that format the
/// amount as a double.
pub fn seed_amount(amount: &Decimal) -> String {
    let normalized = amount.normalize();
    let magnitude = normalized.abs();
    let plain = magnitude.is_zero()
        || (magnitude >= Decimal::new(1, 3) && magnitude < Decimal::new(10_000_000, 0));
    if plain {
        return canonical_amount(&normalized);
    }

    let digits = normalized.mantissa().unsigned_abs().to_string();
    let exponent = digits.len() as i64 - 1 - i64::from(normalized.scale());
    let significant = digits.trim_end_matches('0');
    let (lead, rest) = significant.split_at(1);
    format!(
        "{}{}.{}E{}",
        if normalized.is_sign_negative() { "-" } else { "" },
        lead,
        if rest.is_empty() { "0" } else { rest },
        exponent
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_latam_format() {
        assert_eq!(normalize_amount("1.234,56").unwrap(), dec("1234.56"));
        assert_eq!(normalize_amount("12.450,00").unwrap(), dec("12450"));
        assert_eq!(normalize_amount("0,5").unwrap(), dec("0.5"));
    }

    #[test]
    fn test_us_format() {
        assert_eq!(normalize_amount("1,234.56").unwrap(), dec("1234.56"));
        assert_eq!(normalize_amount("1,234,567.8").unwrap(), dec("1234567.8"));
    }

    #[test]
    fn test_plain_integer() {
        assert_eq!(normalize_amount("1").unwrap(), dec("1"));
        assert_eq!(canonical_amount(&normalize_amount("1").unwrap()), "1.0");
    }

    #[test]
    fn test_whitespace_is_stripped() {
        assert_eq!(normalize_amount(" 1 234,56 ").unwrap(), dec("1234.56"));
    }

    #[test]
    fn test_multiple_commas_are_grouping() {
        // Two commas: never a decimal comma
        assert_eq!(normalize_amount("1,234,567").unwrap(), dec("1234567"));
    }

    #[test]
    fn test_canonical_value_is_fixed_point() {
        for raw in ["1234.56", "1", "0.5", "99.99"] {
            let once = normalize_amount(raw).unwrap();
            let twice = normalize_amount(&canonical_amount(&once)).unwrap();
            assert_eq!(once, twice, "not idempotent for {}", raw);
        }
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(normalize_amount(""), Err(Error::MalformedNumber(_))));
        assert!(matches!(normalize_amount("."), Err(Error::MalformedNumber(_))));
        assert!(matches!(normalize_amount("1.2.3"), Err(Error::MalformedNumber(_))));
        assert!(matches!(normalize_amount("12a"), Err(Error::MalformedNumber(_))));
    }

    #[test]
    fn test_canonical_amount_trims_trailing_zeros() {
        assert_eq!(canonical_amount(&dec("1234.50")), "1234.5");
        assert_eq!(canonical_amount(&dec("12450.00")), "12450.0");
    }

    #[test]
    fn test_seed_amount_plain_range() {
        assert_eq!(seed_amount(&dec("1")), "1.0");
        assert_eq!(seed_amount(&dec("1234.50")), "1234.5");
        assert_eq!(seed_amount(&dec("9999999.99")), "9999999.99");
        assert_eq!(seed_amount(&dec("0.001")), "0.001");
        assert_eq!(seed_amount(&dec("0")), "0.0");
    }

    #[test]
    fn test_seed_amount_switches_to_exponent_form() {
        assert_eq!(seed_amount(&dec("10000000")), "1.0E7");
        assert_eq!(seed_amount(&dec("12345678.9")), "1.23456789E7");
        assert_eq!(seed_amount(&dec("250000000.00")), "2.5E8");
        assert_eq!(seed_amount(&dec("0.0005")), "5.0E-4");
        // Storage form is unaffected
        assert_eq!(canonical_amount(&dec("10000000")), "10000000.0");
    }
}
