//! Dispatch core for OVMS-style vehicle telemetry.
//!
//! Turns (topic, raw payload) events from a publish/subscribe transport
//! into typed, attributed updates delivered once per resolved observer.

pub mod attributes;
pub mod catalog;
pub mod dispatcher;
pub mod models;
pub mod registry;
pub mod topics;

pub use attributes::{
    clamp_accuracy, AttributeManager, GPS_ACCURACY_MAX_METERS, GPS_ACCURACY_MIN_METERS,
    GPS_HDOP_METERS_MULTIPLIER,
};
pub use catalog::{MeasurementKind, MetricCatalog, MetricInfo, StaticCatalog};
pub use dispatcher::{DeliveryError, DeliverySink, DispatchPolicy, UpdateDispatcher};
pub use models::values::{EntityUpdate, FallbackReason, ParseOutcome, ParsedValue, ValueStats};
pub use registry::{EntityKind, EntityRegistry, RelationKind};
pub use topics::{
    companion_axis_topic, extract_base_metric_path, is_combined_location_topic,
    is_coordinate_topic, is_gps_quality_topic, vehicle_id, GpsMetric,
};
