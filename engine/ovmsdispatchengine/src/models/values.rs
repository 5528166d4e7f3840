//! Typed results of payload parsing and the delivered update payload.

use std::collections::BTreeMap;

use chrono::{DateTime, Local};
use serde::Serialize;

/// Statistics over a delimited numeric list (tire pressures, cell voltages).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueStats {
    /// Mean of the (possibly unit-converted) values, rounded to 4 decimals.
    pub mean: f64,
    pub values: Vec<f64>,
    /// Canonical unit if a conversion happened, else the detected unit.
    pub unit: Option<String>,
    pub count: usize,
    pub min: f64,
    pub max: f64,
}

/// A typed value parsed from a raw payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ParsedValue {
    Number { v: f64, unit: Option<String> },
    Text(String),
    Timestamp(DateTime<Local>),
    Stats(ValueStats),
}

/// Why a parse degraded instead of producing its preferred typed value.
///
/// Parse degradation is not an error; the raw value passes through and the
/// reason travels with it so callers can assert on it without relying on
/// side-channel logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    EmptyPayload,
    /// "unavailable", "unknown", "none", "null", "nan".
    SpecialStateWord,
    NonNumericText,
    /// All-or-nothing delimited-list policy rejected the payload.
    MultiValueRejected,
    /// Every timestamp parse step failed; current local time substituted.
    TimestampUnparseable,
}

/// Result of a parse that never fails: either the preferred typed value,
/// or a degraded value with the reason for the degradation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ParseOutcome {
    Ok(ParsedValue),
    Fallback(ParsedValue, FallbackReason),
}

impl ParseOutcome {
    pub fn value(&self) -> &ParsedValue {
        match self {
            ParseOutcome::Ok(v) | ParseOutcome::Fallback(v, _) => v,
        }
    }

    pub fn into_parts(self) -> (ParsedValue, Option<FallbackReason>) {
        match self {
            ParseOutcome::Ok(v) => (v, None),
            ParseOutcome::Fallback(v, reason) => (v, Some(reason)),
        }
    }

    pub fn fallback_reason(&self) -> Option<FallbackReason> {
        match self {
            ParseOutcome::Ok(_) => None,
            ParseOutcome::Fallback(_, reason) => Some(*reason),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, ParseOutcome::Fallback(..))
    }
}

/// Payload delivered to one observer for one topic update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityUpdate {
    pub value: ParsedValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackReason>,
    /// Derived auxiliary attributes (GPS quality/accuracy etc.).
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Provenance: the topic the update originated from.
    pub source_topic: String,
}
