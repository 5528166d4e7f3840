//! Per-vehicle GPS quality state.
//!
//! The transport client remembers the most recent signal-quality and
//! HDOP readings per vehicle. Values persist for the process lifetime
//! and are overwritten on each new reading, never cleared.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{debug, warn};

use ovmsdispatchengine::attributes::{
    clamp_accuracy, GPS_ACCURACY_MAX_METERS, GPS_HDOP_METERS_MULTIPLIER,
};
use ovmsdispatchengine::topics::{self, GpsMetric};

#[derive(Debug, Clone, Copy, Default)]
struct VehicleGpsQuality {
    signal_quality: Option<f64>,
    hdop: Option<f64>,
}

/// Most recent GPS quality readings, keyed by vehicle id.
#[derive(Debug, Default)]
pub struct GpsQualityState {
    inner: RwLock<HashMap<String, VehicleGpsQuality>>,
}

impl GpsQualityState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reading if the topic carries a GPS quality metric.
    pub fn observe(&self, topic: &str, payload: &str) {
        let Some(metric) = GpsMetric::from_topic(topic) else {
            return;
        };
        let Some(vehicle) = topics::vehicle_id(topic) else {
            return;
        };
        let Ok(value) = payload.trim().parse::<f64>() else {
            warn!(topic, payload, "unparseable GPS quality payload, keeping last reading");
            return;
        };

        let Ok(mut state) = self.inner.write() else {
            warn!("GPS quality state lock poisoned, dropping reading");
            return;
        };
        let entry = state.entry(vehicle.to_string()).or_default();
        match metric {
            GpsMetric::Hdop => entry.hdop = Some(value),
            GpsMetric::SignalQuality => entry.signal_quality = Some(value),
            GpsMetric::Speed => return,
        }
        debug!(vehicle, ?metric, value, "updated GPS quality state");
    }

    /// Estimated horizontal accuracy in meters for a vehicle.
    ///
    /// The signal-quality-derived figure takes precedence over the
    /// HDOP-derived one; with neither known the answer is `None` rather
    /// than a default magic number.
    pub fn get_gps_accuracy(&self, vehicle: &str) -> Option<f64> {
        let state = self.inner.read().ok()?;
        let quality = state.get(vehicle)?;
        if let Some(sq) = quality.signal_quality {
            return Some(clamp_accuracy(GPS_ACCURACY_MAX_METERS - sq));
        }
        quality
            .hdop
            .map(|hdop| clamp_accuracy(hdop * GPS_HDOP_METERS_MULTIPLIER))
    }
}
