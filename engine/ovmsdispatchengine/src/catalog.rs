//! Metric catalog lookup surface.
//!
//! The static catalog of known metrics (names, icons, measurement
//! categories) is owned by an external collaborator; the core only needs
//! the measurement kind and canonical unit for a base metric path.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Measurement kind resolved once at catalog-lookup time and matched
/// exhaustively in the parsers and attribute manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeasurementKind {
    Scalar,
    Timestamp,
    Percentage,
    Pressure,
    Coordinate,
    Speed,
    Temperature,
}

/// What the catalog knows about a metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricInfo {
    pub kind: MeasurementKind,
    /// Canonical unit for the metric, if one is defined.
    pub unit: Option<String>,
}

impl MetricInfo {
    pub fn new(kind: MeasurementKind, unit: Option<&str>) -> Self {
        Self {
            kind,
            unit: unit.map(|u| u.to_string()),
        }
    }
}

/// Catalog lookup capability consumed by the dispatcher and parsers.
pub trait MetricCatalog: Send + Sync {
    /// Look up a metric by its base metric path (vehicle segment stripped).
    fn lookup(&self, base_metric_path: &str) -> Option<MetricInfo>;
}

/// Map-backed catalog, seeded with the location and tire metrics the core
/// itself exercises. The entity-lifecycle collaborator extends it with
/// the full vehicle metric set.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    entries: HashMap<String, MetricInfo>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog preloaded with the metrics the dispatch core depends on.
    pub fn with_defaults() -> Self {
        let mut catalog = Self::new();
        catalog.insert("v/p/latitude", MetricInfo::new(MeasurementKind::Coordinate, None));
        catalog.insert("v/p/longitude", MetricInfo::new(MeasurementKind::Coordinate, None));
        catalog.insert("v/p/gpssq", MetricInfo::new(MeasurementKind::Percentage, Some("%")));
        catalog.insert("v/p/gpshdop", MetricInfo::new(MeasurementKind::Scalar, None));
        catalog.insert("v/p/gpsspeed", MetricInfo::new(MeasurementKind::Speed, Some("km/h")));
        catalog.insert("v/t/pressure", MetricInfo::new(MeasurementKind::Pressure, Some("kPa")));
        catalog.insert("v/b/soc", MetricInfo::new(MeasurementKind::Percentage, Some("%")));
        catalog.insert("m/time/utc", MetricInfo::new(MeasurementKind::Timestamp, None));
        catalog
    }

    pub fn insert(&mut self, base_metric_path: &str, info: MetricInfo) {
        self.entries.insert(base_metric_path.to_string(), info);
    }
}

impl MetricCatalog for StaticCatalog {
    fn lookup(&self, base_metric_path: &str) -> Option<MetricInfo> {
        self.entries.get(base_metric_path).cloned()
    }
}
