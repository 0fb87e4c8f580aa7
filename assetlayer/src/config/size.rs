//! Human-readable byte sizes (`512MB`, `2GB`).

use super::ConfigError;

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;
const TB: u64 = GB * 1024;

const UNITS: [(u64, &str); 4] = [(TB, "TB"), (GB, "GB"), (MB, "MB"), (KB, "KB")];

/// Parses a size such as `512MB`, `1.5 GB`, `64k` or `4096`.
///
/// Units are binary and case-insensitive; the trailing `B` is optional.
pub fn parse_size(input: &str) -> Result<u64, ConfigError> {
    let trimmed = input.trim();
    let invalid = || ConfigError::InvalidSize(input.to_string());

    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    if number.is_empty() {
        return Err(invalid());
    }

    let multiplier = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" => KB,
        "M" | "MB" => MB,
        "G" | "GB" => GB,
        "T" | "TB" => TB,
        _ => return Err(invalid()),
    };

    if let Ok(whole) = number.parse::<u64>() {
        return whole.checked_mul(multiplier).ok_or_else(invalid);
    }
    let value: f64 = number.parse().map_err(|_| invalid())?;
    let bytes = value * multiplier as f64;
    if !bytes.is_finite() || bytes < 0.0 || bytes > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(bytes.round() as u64)
}

/// Formats a byte count for display, e.g. `512 MB` or `1.5 GB`.
pub fn format_size(bytes: u64) -> String {
    for (unit, suffix) in UNITS {
        if bytes >= unit {
            return if bytes % unit == 0 {
                format!("{} {}", bytes / unit, suffix)
            } else {
                format!("{:.1} {}", bytes as f64 / unit as f64, suffix)
            };
        }
    }
    format!("{} B", bytes)
}

/// Formats a byte count so that [`parse_size`] reads back the same value.
pub(crate) fn format_size_exact(bytes: u64) -> String {
    for (unit, suffix) in UNITS {
        if bytes >= unit && bytes % unit == 0 {
            return format!("{}{}", bytes / unit, suffix);
        }
    }
    bytes.to_string()
}
