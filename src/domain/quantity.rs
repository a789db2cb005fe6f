//! Kubernetes resource quantities
//!
//! Only the storage subset is handled: an integer or decimal number followed
//! by an optional binary (`Ki`..`Ei`) or decimal (`k`..`E`) suffix.

use crate::error::{Error, Result};

const BINARY_UNITS: &[(&str, u64)] = &[
    ("Ei", 1 << 60),
    ("Pi", 1 << 50),
    ("Ti", 1 << 40),
    ("Gi", 1 << 30),
    ("Mi", 1 << 20),
    ("Ki", 1 << 10),
];

const DECIMAL_UNITS: &[(&str, u64)] = &[
    ("E", 1_000_000_000_000_000_000),
    ("P", 1_000_000_000_000_000),
    ("T", 1_000_000_000_000),
    ("G", 1_000_000_000),
    ("M", 1_000_000),
    ("k", 1_000),
];

/// Parse a quantity string (e.g. "10Gi", "500M", "1073741824") to bytes
pub fn parse_quantity(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::CapacityParse("empty quantity".into()));
    }

    let num_end = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (num_str, unit) = s.split_at(num_end);

    let multiplier = if unit.is_empty() {
        1
    } else {
        BINARY_UNITS
            .iter()
            .chain(DECIMAL_UNITS)
            .find(|(suffix, _)| *suffix == unit)
            .map(|(_, m)| *m)
            .ok_or_else(|| Error::CapacityParse(format!("unknown unit: {}", unit)))?
    };

    if let Ok(whole) = num_str.parse::<u64>() {
        return whole
            .checked_mul(multiplier)
            .ok_or_else(|| Error::CapacityParse(format!("quantity overflows: {}", s)));
    }

    let num: f64 = num_str
        .parse()
        .map_err(|_| Error::CapacityParse(format!("invalid number: {}", num_str)))?;
    Ok((num * multiplier as f64).ceil() as u64)
}

/// Format bytes using the largest binary unit that divides them exactly
pub fn format_quantity(bytes: u64) -> String {
    if bytes == 0 {
        return "0".to_string();
    }
    BINARY_UNITS
        .iter()
        .find(|(_, m)| bytes % m == 0)
        .map(|(suffix, m)| format!("{}{}", bytes / m, suffix))
        .unwrap_or_else(|| bytes.to_string())
}

/// Whether two quantity strings denote the same number of bytes
pub fn quantities_equal(a: &str, b: &str) -> Result<bool> {
    Ok(parse_quantity(a)? == parse_quantity(b)?)
}
