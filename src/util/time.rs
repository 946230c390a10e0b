//! Time parsing and formatting utilities.

use crate::error::{BeadsError, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Format a timestamp as RFC3339 with nanoseconds, as stored in
/// `last_import_time` and the per-tracker sync stamps.
#[must_use]
pub fn to_rfc3339_nanos(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Current time as RFC3339 with nanoseconds.
#[must_use]
pub fn now_rfc3339_nanos() -> String {
    to_rfc3339_nanos(Utc::now())
}

/// Parse a flexible time specification into a `DateTime<Utc>`.
///
/// Supports:
/// - RFC3339: `2026-01-15T12:00:00Z`
/// - Simple date: `2026-01-15` (midnight UTC)
/// - Relative duration from now: `+1h`, `-2d`, `+1w`, `+30m`
///
/// # Errors
///
/// Returns `InvalidInput` for unrecognized formats or units.
pub fn parse_flexible_timestamp(s: &str, field_name: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(date) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let naive = date.and_hms_opt(0, 0, 0).ok_or_else(|| {
            BeadsError::InvalidInput(format!("{field_name}: invalid date '{s}'"))
        })?;
        return Ok(DateTime::from_naive_utc_and_offset(naive, Utc));
    }

    if let Some(rest) = s.strip_prefix(['+', '-'].as_ref()) {
        let negative = s.starts_with('-');
        if let Some(unit) = rest.chars().last() {
            let amount_str = &rest[..rest.len() - 1];
            if let Ok(amount) = amount_str.parse::<i64>() {
                let amount = if negative { -amount } else { amount };
                let duration = match unit {
                    'm' => Duration::minutes(amount),
                    'h' => Duration::hours(amount),
                    'd' => Duration::days(amount),
                    'w' => Duration::weeks(amount),
                    _ => {
                        return Err(BeadsError::InvalidInput(format!(
                            "{field_name}: invalid duration unit in '{s}' (use m, h, d, w)"
                        )));
                    }
                };
                return Ok(Utc::now() + duration);
            }
        }
    }

    Err(BeadsError::InvalidInput(format!(
        "{field_name}: unrecognized time '{s}' (try RFC3339, 2026-01-15, or +1h)"
    )))
}
