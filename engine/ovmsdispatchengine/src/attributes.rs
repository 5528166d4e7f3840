//! Derivation of synthetic auxiliary attributes for metric families.
//!
//! Currently covers the GPS family: quality figures (HDOP, signal
//! quality) produce an estimated horizontal accuracy in meters.

use std::collections::BTreeMap;

use serde_json::json;
use tracing::debug;

use crate::topics::GpsMetric;

/// Best possible accuracy estimate in meters.
pub const GPS_ACCURACY_MIN_METERS: f64 = 5.0;
/// Worst accuracy estimate reported before the figure stops being useful.
pub const GPS_ACCURACY_MAX_METERS: f64 = 100.0;
/// Each HDOP unit is roughly 5 meters of horizontal error.
pub const GPS_HDOP_METERS_MULTIPLIER: f64 = 5.0;

/// Clamp a candidate accuracy estimate into the reportable range.
pub fn clamp_accuracy(meters: f64) -> f64 {
    meters.clamp(GPS_ACCURACY_MIN_METERS, GPS_ACCURACY_MAX_METERS)
}

/// Derives synthetic attributes for specific topic families.
#[derive(Debug, Clone, Default)]
pub struct AttributeManager;

impl AttributeManager {
    pub fn new() -> Self {
        Self
    }

    /// Derive auxiliary attributes for a topic and payload.
    ///
    /// Unparseable payloads are not an error: whatever subset of
    /// attributes could be derived is returned, possibly none.
    pub fn derive_attributes(
        &self,
        topic: &str,
        payload: &str,
    ) -> BTreeMap<String, serde_json::Value> {
        let mut attributes = BTreeMap::new();

        let Some(metric) = GpsMetric::from_topic(topic) else {
            return attributes;
        };

        let Ok(value) = payload.trim().parse::<f64>() else {
            debug!(topic, payload, "non-numeric GPS payload, no attributes derived");
            return attributes;
        };

        match metric {
            GpsMetric::Hdop => {
                attributes.insert("gps_hdop".to_string(), json!(value));
                let accuracy = clamp_accuracy(value * GPS_HDOP_METERS_MULTIPLIER);
                attributes.insert("gps_accuracy".to_string(), json!(accuracy));
                attributes.insert("gps_accuracy_unit".to_string(), json!("m"));
            }
            GpsMetric::SignalQuality => {
                attributes.insert("gps_signal_quality".to_string(), json!(value));
                let accuracy = clamp_accuracy(GPS_ACCURACY_MAX_METERS - value);
                attributes.insert("gps_accuracy".to_string(), json!(accuracy));
                attributes.insert("gps_accuracy_unit".to_string(), json!("m"));
            }
            GpsMetric::Speed => {
                attributes.insert("gps_speed".to_string(), json!(value));
            }
        }

        attributes
    }
}
