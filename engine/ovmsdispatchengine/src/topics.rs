//! Topic classification for OVMS-style telemetry topics.
//!
//! Topics are hierarchical strings of the form
//! `<namespace>/<vehicle-id>/<metric-path...>`, e.g. `ovms/mycar/v/b/soc`.

use serde::{Deserialize, Serialize};

/// Segment keywords that mark a single-axis coordinate metric.
pub const COORDINATE_KEYWORDS: &[&str] = &["latitude", "longitude", "lat", "lon", "lng"];

/// Segment keywords that mark a combined (multi-axis) location topic.
const COMBINED_LOCATION_KEYWORDS: &[&str] = &["location", "position", "coordinates"];

/// GPS metric families the attribute manager derives values for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpsMetric {
    Hdop,
    SignalQuality,
    Speed,
}

impl GpsMetric {
    /// Classify a topic by its metric suffix, if it belongs to the GPS family.
    pub fn from_topic(topic: &str) -> Option<Self> {
        let lower = topic.to_lowercase();
        if lower.contains("gpshdop") {
            Some(GpsMetric::Hdop)
        } else if lower.contains("gpssq") {
            Some(GpsMetric::SignalQuality)
        } else if lower.contains("gpsspeed") {
            Some(GpsMetric::Speed)
        } else {
            None
        }
    }
}

/// True iff the metric suffix denotes latitude or longitude.
pub fn is_coordinate_topic(topic: &str) -> bool {
    topic
        .split('/')
        .any(|part| COORDINATE_KEYWORDS.contains(&part.to_lowercase().as_str()))
}

/// True iff the topic carries a GPS quality figure (signal quality or HDOP).
pub fn is_gps_quality_topic(topic: &str) -> bool {
    matches!(
        GpsMetric::from_topic(topic),
        Some(GpsMetric::Hdop) | Some(GpsMetric::SignalQuality)
    )
}

/// True iff the topic denotes a combined multi-axis location consumer
/// rather than a single coordinate axis.
pub fn is_combined_location_topic(topic: &str) -> bool {
    let lower = topic.to_lowercase();
    lower.contains("location")
        || lower
            .split('/')
            .any(|part| COMBINED_LOCATION_KEYWORDS.contains(&part))
}

/// For a single-axis coordinate topic, the topic of the opposite axis.
///
/// `ovms/mycar/v/p/latitude` -> `ovms/mycar/v/p/longitude` and vice versa.
pub fn companion_axis_topic(topic: &str) -> Option<String> {
    let mut parts: Vec<String> = topic.split('/').map(|p| p.to_string()).collect();
    let last = parts.last()?.to_lowercase();
    let companion = match last.as_str() {
        "latitude" => "longitude",
        "longitude" => "latitude",
        "lat" => "lon",
        "lon" | "lng" => "lat",
        _ => return None,
    };
    *parts.last_mut()? = companion.to_string();
    Some(parts.join("/"))
}

/// Strip the leading namespace and vehicle segments, returning the metric
/// path shared by all vehicles reporting the same metric.
///
/// `ovms/mycar/v/b/soc` -> `v/b/soc`. Topics with fewer than three
/// segments have no base metric path and yield an empty string.
pub fn extract_base_metric_path(topic: &str) -> String {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() >= 3 {
        parts[2..].join("/")
    } else {
        String::new()
    }
}

/// The vehicle-identifying segment (second segment) of a topic.
pub fn vehicle_id(topic: &str) -> Option<&str> {
    let mut parts = topic.split('/');
    parts.next()?;
    parts.next().filter(|p| !p.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_metric_path() {
        assert_eq!(extract_base_metric_path("ovms/mycar/v/b/soc"), "v/b/soc");
        assert_eq!(
            extract_base_metric_path("ovms/othercar/v/b/soc"),
            "v/b/soc"
        );
        assert_eq!(extract_base_metric_path("ovms/mycar"), "");
        assert_eq!(extract_base_metric_path(""), "");
    }

    #[test]
    fn test_coordinate_topics() {
        assert!(is_coordinate_topic("ovms/mycar/v/p/latitude"));
        assert!(is_coordinate_topic("ovms/mycar/v/p/longitude"));
        assert!(is_coordinate_topic("ovms/mycar/v/p/LAT"));
        assert!(!is_coordinate_topic("ovms/mycar/v/b/soc"));
        assert!(!is_coordinate_topic("ovms/mycar/v/p/gpssq"));
    }

    #[test]
    fn test_companion_axis() {
        assert_eq!(
            companion_axis_topic("ovms/mycar/v/p/latitude").as_deref(),
            Some("ovms/mycar/v/p/longitude")
        );
        assert_eq!(
            companion_axis_topic("ovms/mycar/v/p/longitude").as_deref(),
            Some("ovms/mycar/v/p/latitude")
        );
        assert_eq!(companion_axis_topic("ovms/mycar/v/b/soc"), None);
    }

    #[test]
    fn test_combined_location() {
        assert!(is_combined_location_topic("combined_location"));
        assert!(is_combined_location_topic("ovms/mycar/v/p/position"));
        assert!(!is_combined_location_topic("ovms/mycar/v/p/latitude"));
    }

    #[test]
    fn test_gps_metric_family() {
        assert_eq!(
            GpsMetric::from_topic("ovms/mycar/v/p/gpshdop"),
            Some(GpsMetric::Hdop)
        );
        assert_eq!(
            GpsMetric::from_topic("ovms/mycar/v/p/gpssq"),
            Some(GpsMetric::SignalQuality)
        );
        assert_eq!(
            GpsMetric::from_topic("ovms/mycar/v/p/gpsspeed"),
            Some(GpsMetric::Speed)
        );
        assert_eq!(GpsMetric::from_topic("ovms/mycar/v/b/soc"), None);
        assert!(is_gps_quality_topic("ovms/mycar/v/p/gpssq"));
        assert!(!is_gps_quality_topic("ovms/mycar/v/p/gpsspeed"));
    }

    #[test]
    fn test_vehicle_id() {
        assert_eq!(vehicle_id("ovms/mycar/v/b/soc"), Some("mycar"));
        assert_eq!(vehicle_id("ovms"), None);
    }
}
