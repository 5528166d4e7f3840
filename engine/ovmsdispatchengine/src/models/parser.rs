//! Value parsers: stateless, deterministic, and never failing.
//!
//! A payload that cannot be interpreted degrades to passthrough of the
//! raw value (or current local time for timestamps) with a
//! [`FallbackReason`] attached, never an error.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use regex::Regex;
use tracing::warn;

use crate::catalog::MeasurementKind;
use crate::models::values::{FallbackReason, ParseOutcome, ParsedValue, ValueStats};

/// Unit vocabulary recognized as a trailing suffix on delimited lists.
pub const PRESSURE_UNIT_VOCABULARY: &[&str] = &["psi", "kpa", "bar"];

/// Canonical pressure unit all converted lists are normalized into.
pub const CANONICAL_PRESSURE_UNIT: &str = "kPa";

pub const PSI_TO_KPA: f64 = 6.89476;
pub const BAR_TO_KPA: f64 = 100.0;

/// String payloads that stand for "no value" on the wire.
const SPECIAL_STATE_WORDS: &[&str] = &["unavailable", "unknown", "none", "null", "nan"];

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Parse a raw payload using the measurement-kind hint from the catalog.
pub fn parse_value(raw: &str, kind: MeasurementKind) -> ParseOutcome {
    if kind == MeasurementKind::Timestamp {
        return parse_timestamp(raw);
    }

    let (body, _unit) = split_unit_suffix(raw.trim());
    if body.contains(',') || body.contains(';') {
        if let Some(stats) = parse_delimited_values(raw, kind) {
            return ParseOutcome::Ok(ParsedValue::Stats(stats));
        }
        // All-or-nothing: fall through to scalar behavior for the
        // original input, tagged with the multi-value rejection.
        return match parse_scalar(raw) {
            ParseOutcome::Ok(v) => ParseOutcome::Ok(v),
            ParseOutcome::Fallback(v, _) => {
                ParseOutcome::Fallback(v, FallbackReason::MultiValueRejected)
            }
        };
    }

    if kind == MeasurementKind::Pressure {
        if let Some(value) = parse_pressure_scalar(raw) {
            return ParseOutcome::Ok(value);
        }
    }

    parse_scalar(raw)
}

/// Generic scalar parse: numeric when possible, passthrough otherwise.
pub fn parse_scalar(raw: &str) -> ParseOutcome {
    let t = raw.trim();
    if t.is_empty() {
        return ParseOutcome::Fallback(
            ParsedValue::Text(raw.to_string()),
            FallbackReason::EmptyPayload,
        );
    }

    let lower = t.to_lowercase();
    if SPECIAL_STATE_WORDS.contains(&lower.as_str()) {
        return ParseOutcome::Fallback(
            ParsedValue::Text(raw.to_string()),
            FallbackReason::SpecialStateWord,
        );
    }

    // Common boolean words coerce to 0/1 for numeric consumers.
    if matches!(lower.as_str(), "no" | "off" | "false" | "disabled") {
        return ParseOutcome::Ok(ParsedValue::Number { v: 0.0, unit: None });
    }
    if matches!(lower.as_str(), "yes" | "on" | "true" | "enabled") {
        return ParseOutcome::Ok(ParsedValue::Number { v: 1.0, unit: None });
    }

    match t.parse::<f64>() {
        Ok(v) => ParseOutcome::Ok(ParsedValue::Number { v, unit: None }),
        Err(_) => ParseOutcome::Fallback(
            ParsedValue::Text(raw.to_string()),
            FallbackReason::NonNumericText,
        ),
    }
}

/// Single pressure reading with an embedded unit suffix, e.g. `"32psi"`.
fn parse_pressure_scalar(raw: &str) -> Option<ParsedValue> {
    let (body, unit) = split_unit_suffix(raw.trim());
    let unit = unit?;
    let v = body.trim().parse::<f64>().ok()?;
    let converted = match unit {
        "psi" => v * PSI_TO_KPA,
        "bar" => v * BAR_TO_KPA,
        _ => v,
    };
    Some(ParsedValue::Number {
        v: converted,
        unit: Some(CANONICAL_PRESSURE_UNIT.to_string()),
    })
}

/// Timestamp parse with an ordered fallback chain; the final step
/// substitutes the current local time rather than failing.
pub fn parse_timestamp(raw: &str) -> ParseOutcome {
    let t = raw.trim();

    // General ISO-8601-tolerant parse.
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return ParseOutcome::Ok(ParsedValue::Timestamp(dt.with_timezone(&Local)));
    }

    // Strict ISO after normalizing a trailing literal Z.
    let normalized = if t.ends_with('Z') {
        format!("{}+00:00", &t[..t.len() - 1])
    } else {
        t.to_string()
    };
    if let Ok(dt) = DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f%:z") {
        return ParseOutcome::Ok(ParsedValue::Timestamp(dt.with_timezone(&Local)));
    }

    // Naive ISO with the T separator but no offset; local zone attached.
    if let Ok(naive) = NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S%.f") {
        return ParseOutcome::Ok(ParsedValue::Timestamp(with_local_offset(naive)));
    }

    // Leading "YYYY-MM-DD HH:MM:SS", tolerating a trailing timezone label.
    let re = Regex::new(r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})").unwrap();
    if let Some(caps) = re.captures(t) {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&caps[1], "%Y-%m-%d %H:%M:%S") {
            return ParseOutcome::Ok(ParsedValue::Timestamp(with_local_offset(naive)));
        }
    }

    warn!(payload = raw, "unparseable timestamp, substituting current local time");
    ParseOutcome::Fallback(
        ParsedValue::Timestamp(Local::now()),
        FallbackReason::TimestampUnparseable,
    )
}

/// Attach the local zone offset to an instant that lacks one.
pub fn with_local_offset(naive: NaiveDateTime) -> DateTime<Local> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(Local::now)
}

/// Multi-value numeric parse with unit suffix.
///
/// All-or-nothing: any unparseable or empty element abandons the whole
/// interpretation and returns `None`, leaving the caller to fall back to
/// scalar/passthrough behavior for the original input.
pub fn parse_delimited_values(raw: &str, kind: MeasurementKind) -> Option<ValueStats> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (body, detected_unit) = split_unit_suffix(trimmed);

    let separator = if body.contains(';') {
        ';'
    } else if body.contains(',') {
        ','
    } else {
        return None;
    };

    let parts: Vec<&str> = body.split(separator).map(str::trim).collect();
    if parts.is_empty() || parts.iter().any(|p| p.is_empty()) {
        return None;
    }

    let mut values = Vec::with_capacity(parts.len());
    for part in &parts {
        values.push(part.parse::<f64>().ok()?);
    }

    let unit = if kind == MeasurementKind::Pressure && detected_unit.is_some() {
        let factor = match detected_unit {
            Some("psi") => PSI_TO_KPA,
            Some("bar") => BAR_TO_KPA,
            _ => 1.0,
        };
        if factor != 1.0 {
            for v in values.iter_mut() {
                *v *= factor;
            }
        }
        Some(CANONICAL_PRESSURE_UNIT.to_string())
    } else {
        detected_unit.map(|u| u.to_string())
    };

    let count = values.len();
    let mean = round4(values.iter().sum::<f64>() / count as f64);
    let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    Some(ValueStats {
        mean,
        values,
        unit,
        count,
        min,
        max,
    })
}

/// Detect a known unit suffix (ASCII-case-insensitive) at the end of
/// the string; returns the remaining body and the detected unit.
/// Suffix detection works on the original bytes; payloads are untrusted
/// and may contain multi-byte characters anywhere.
fn split_unit_suffix(s: &str) -> (&str, Option<&'static str>) {
    for unit in PRESSURE_UNIT_VOCABULARY {
        let Some(cut) = s.len().checked_sub(unit.len()) else {
            continue;
        };
        if s.is_char_boundary(cut) && s[cut..].eq_ignore_ascii_case(unit) {
            return (s[..cut].trim_end(), Some(*unit));
        }
    }
    (s, None)
}
