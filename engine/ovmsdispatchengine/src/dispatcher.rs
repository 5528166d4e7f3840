//! Update dispatcher: resolves the observers for a topic update, builds
//! each observer's typed payload and delivers it exactly once.

use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::attributes::AttributeManager;
use crate::catalog::{MeasurementKind, MetricCatalog};
use crate::models::parser;
use crate::models::values::EntityUpdate;
use crate::registry::EntityRegistry;
use crate::topics::{
    companion_axis_topic, extract_base_metric_path, is_combined_location_topic,
    is_coordinate_topic,
};

/// Tunable resolution behavior.
#[derive(Debug, Clone, Default)]
pub struct DispatchPolicy {
    /// When enabled, an update also refreshes observers of other vehicles
    /// sharing the same base metric path. Off by default: vehicles are
    /// isolated unless explicitly related.
    pub cross_vehicle_propagation: bool,
}

/// Per-observer delivery failure. Delivery errors never abort the rest of
/// a dispatch pass.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery channel full")]
    Full,
    #[error("delivery channel closed")]
    Closed,
    #[error("observer rejected update: {0}")]
    Rejected(String),
}

/// The per-observer delivery primitive, implemented by the UI-binding
/// collaborator.
pub trait DeliverySink: Send + Sync {
    fn deliver(&self, entity_id: &str, update: EntityUpdate) -> Result<(), DeliveryError>;
}

/// Which resolution rule discovered an observer. Lower ranks first in the
/// deterministic resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum DiscoveryRule {
    Exact,
    CoordinatePair,
    Related,
    SharedBaseMetric,
}

pub struct UpdateDispatcher {
    registry: Arc<RwLock<EntityRegistry>>,
    attributes: AttributeManager,
    catalog: Arc<dyn MetricCatalog>,
    sink: Arc<dyn DeliverySink>,
    policy: DispatchPolicy,
}

impl UpdateDispatcher {
    pub fn new(
        registry: Arc<RwLock<EntityRegistry>>,
        catalog: Arc<dyn MetricCatalog>,
        sink: Arc<dyn DeliverySink>,
    ) -> Self {
        Self {
            registry,
            attributes: AttributeManager::new(),
            catalog,
            sink,
            policy: DispatchPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolve all observers for one (topic, payload) event, build each
    /// observer's payload and deliver it exactly once per observer.
    pub fn dispatch_update(&self, topic: &str, payload: &str) {
        let targets = self.resolve_targets(topic);
        if targets.is_empty() {
            debug!(topic, "no entities registered for topic");
            return;
        }
        debug!(count = targets.len(), topic, "dispatching update");

        let attributes = self.attributes.derive_attributes(topic, payload);
        let update_kind = self.kind_for_topic(topic);

        for (entity_id, entity_topic) in targets {
            // Hint appropriate to this observer's own metric when the
            // catalog knows it, else the update topic's kind.
            let kind = entity_topic
                .as_deref()
                .filter(|et| *et != topic)
                .and_then(|et| self.catalog.lookup(&extract_base_metric_path(et)))
                .map(|info| info.kind)
                .unwrap_or(update_kind);

            let outcome = parser::parse_value(payload, kind);
            if let Some(reason) = outcome.fallback_reason() {
                warn!(topic, entity_id = %entity_id, ?reason, "value parse degraded");
            }
            let (value, fallback) = outcome.into_parts();

            let update = EntityUpdate {
                value,
                fallback,
                attributes: attributes.clone(),
                source_topic: topic.to_string(),
            };

            if let Err(err) = self.sink.deliver(&entity_id, update) {
                warn!(entity_id = %entity_id, error = %err, "delivery failed, continuing dispatch pass");
            }
        }
    }

    /// The full resolved observer set for a topic, ordered by discovery
    /// rule then registration order.
    pub fn entities_for_topic(&self, topic: &str) -> Vec<String> {
        self.resolve_targets(topic)
            .into_iter()
            .map(|(entity_id, _)| entity_id)
            .collect()
    }

    /// Membership test behind [`entities_for_topic`]: an observer is in
    /// the resolved set iff this returns true for it.
    pub fn should_entity_receive_topic_update(&self, entity_id: &str, topic: &str) -> bool {
        let Ok(registry) = self.registry.read() else {
            error!("entity registry lock poisoned");
            return false;
        };
        discovery_rule(&registry, entity_id, topic, &self.policy).is_some()
    }

    fn resolve_targets(&self, topic: &str) -> Vec<(String, Option<String>)> {
        let Ok(registry) = self.registry.read() else {
            error!("entity registry lock poisoned, dropping update");
            return Vec::new();
        };

        let mut hits: Vec<(DiscoveryRule, usize, String, Option<String>)> = Vec::new();
        for (index, entity_id) in registry.all_observers().into_iter().enumerate() {
            if let Some(rule) = discovery_rule(&registry, &entity_id, topic, &self.policy) {
                let entity_topic = registry.topic_for_observer(&entity_id).map(str::to_string);
                hits.push((rule, index, entity_id, entity_topic));
            }
        }
        hits.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        hits.into_iter()
            .map(|(_, _, entity_id, entity_topic)| (entity_id, entity_topic))
            .collect()
    }

    fn kind_for_topic(&self, topic: &str) -> MeasurementKind {
        self.catalog
            .lookup(&extract_base_metric_path(topic))
            .map(|info| info.kind)
            .unwrap_or(MeasurementKind::Scalar)
    }
}

/// The membership test: the first resolution rule (in rule order) under
/// which this entity receives the topic's updates, if any. Each entity
/// matches at most once, so resolution is idempotent by construction.
fn discovery_rule(
    registry: &EntityRegistry,
    entity_id: &str,
    topic: &str,
    policy: &DispatchPolicy,
) -> Option<DiscoveryRule> {
    // a. Exact registration.
    if registry
        .observers_for_topic(topic)
        .iter()
        .any(|e| e == entity_id)
    {
        return Some(DiscoveryRule::Exact);
    }

    let entity_topic = registry.topic_for_observer(entity_id);

    // b. Single-axis coordinate update refreshing multi-axis consumers.
    if is_coordinate_topic(topic)
        && registry
            .kind_of(entity_id)
            .is_some_and(|k| k.accepts_coordinate_pair())
    {
        let companion = companion_axis_topic(topic);
        let own_topic_qualifies = entity_topic.is_some_and(|et| {
            Some(et) == companion.as_deref() || is_combined_location_topic(et)
        });
        let related_to_axis = registry.related_observers(entity_id).iter().any(|other| {
            registry
                .topic_for_observer(other)
                .is_some_and(|ot| ot == topic || Some(ot) == companion.as_deref())
        });
        if own_topic_qualifies || related_to_axis {
            return Some(DiscoveryRule::CoordinatePair);
        }
    }

    // c. One hop from the primary observer, no transitive closure.
    if let Some(primary) = registry.observer_for_topic(topic) {
        if registry.is_related(primary, entity_id) {
            return Some(DiscoveryRule::Related);
        }
    }

    // d. Same base metric path on another vehicle, policy-gated.
    if policy.cross_vehicle_propagation {
        let base = extract_base_metric_path(topic);
        if !base.is_empty() {
            if let Some(et) = entity_topic {
                if et != topic && extract_base_metric_path(et) == base {
                    return Some(DiscoveryRule::SharedBaseMetric);
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::models::values::{FallbackReason, ParsedValue};
    use crate::registry::{EntityKind, RelationKind};

    /// Sink recording deliveries; can be told to fail for one entity.
    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<(String, EntityUpdate)>>,
        fail_for: Option<String>,
    }

    impl DeliverySink for RecordingSink {
        fn deliver(&self, entity_id: &str, update: EntityUpdate) -> Result<(), DeliveryError> {
            if self.fail_for.as_deref() == Some(entity_id) {
                return Err(DeliveryError::Rejected("test failure".to_string()));
            }
            self.delivered
                .lock()
                .unwrap()
                .push((entity_id.to_string(), update));
            Ok(())
        }
    }

    fn dispatcher_with(
        registry: Arc<RwLock<EntityRegistry>>,
        sink: Arc<RecordingSink>,
    ) -> UpdateDispatcher {
        UpdateDispatcher::new(registry, Arc::new(StaticCatalog::with_defaults()), sink)
    }

    fn delivered(sink: &RecordingSink) -> Vec<(String, EntityUpdate)> {
        sink.delivered.lock().unwrap().clone()
    }

    #[test]
    fn test_exact_match_delivery() {
        let registry = Arc::new(RwLock::new(EntityRegistry::new()));
        registry.write().unwrap().register(
            "ovms/mycar/v/b/soc",
            "sensor.soc",
            EntityKind::Sensor,
            0,
        );
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher_with(registry, sink.clone());

        dispatcher.dispatch_update("ovms/mycar/v/b/soc", "80");

        let updates = delivered(&sink);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "sensor.soc");
        assert_eq!(
            updates[0].1.value,
            ParsedValue::Number { v: 80.0, unit: None }
        );
        assert_eq!(updates[0].1.source_topic, "ovms/mycar/v/b/soc");
    }

    #[test]
    fn test_resolution_miss_is_noop() {
        let registry = Arc::new(RwLock::new(EntityRegistry::new()));
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher_with(registry, sink.clone());
        dispatcher.dispatch_update("ovms/mycar/v/b/soc", "80");
        assert!(delivered(&sink).is_empty());
    }

    #[test]
    fn test_coordinate_update_reaches_combined_tracker() {
        let registry = Arc::new(RwLock::new(EntityRegistry::new()));
        {
            let mut reg = registry.write().unwrap();
            reg.register("ovms/mycar/v/p/latitude", "sensor.latitude", EntityKind::Sensor, 0);
            reg.register("combined_location", "device_tracker.car", EntityKind::DeviceTracker, 10);
        }
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher_with(registry, sink.clone());

        let entities = dispatcher.entities_for_topic("ovms/mycar/v/p/latitude");
        assert_eq!(
            entities,
            vec!["sensor.latitude".to_string(), "device_tracker.car".to_string()]
        );

        dispatcher.dispatch_update("ovms/mycar/v/p/latitude", "45.123456");
        assert_eq!(delivered(&sink).len(), 2);
    }

    #[test]
    fn test_companion_axis_tracker_resolved() {
        let registry = Arc::new(RwLock::new(EntityRegistry::new()));
        {
            let mut reg = registry.write().unwrap();
            reg.register("ovms/mycar/v/p/latitude", "sensor.latitude", EntityKind::Sensor, 0);
            reg.register(
                "ovms/mycar/v/p/longitude",
                "device_tracker.lon",
                EntityKind::DeviceTracker,
                0,
            );
            // Sensors on the companion axis do not accept coordinate pairs.
            reg.register("ovms/mycar/v/p/longitude", "sensor.longitude", EntityKind::Sensor, 0);
        }
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher_with(registry, sink.clone());

        let entities = dispatcher.entities_for_topic("ovms/mycar/v/p/latitude");
        assert_eq!(
            entities,
            vec!["sensor.latitude".to_string(), "device_tracker.lon".to_string()]
        );
    }

    #[test]
    fn test_related_tracker_resolved_for_coordinate_topic() {
        let registry = Arc::new(RwLock::new(EntityRegistry::new()));
        {
            let mut reg = registry.write().unwrap();
            reg.register("ovms/mycar/v/p/latitude", "sensor.latitude", EntityKind::Sensor, 0);
            reg.register("ovms/mycar/tracker", "device_tracker.car", EntityKind::DeviceTracker, 0);
            reg.register_relationship(
                "device_tracker.car",
                "sensor.latitude",
                RelationKind::CoordinatePair,
            );
        }
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher_with(registry, sink.clone());

        assert!(dispatcher
            .should_entity_receive_topic_update("device_tracker.car", "ovms/mycar/v/p/latitude"));
        dispatcher.dispatch_update("ovms/mycar/v/p/latitude", "45.0");
        assert_eq!(delivered(&sink).len(), 2);
    }

    #[test]
    fn test_related_observers_one_hop_only() {
        let registry = Arc::new(RwLock::new(EntityRegistry::new()));
        {
            let mut reg = registry.write().unwrap();
            reg.register("t/a/x", "sensor.a", EntityKind::Sensor, 0);
            reg.register("t/b/x", "sensor.b", EntityKind::Sensor, 0);
            reg.register("t/c/x", "sensor.c", EntityKind::Sensor, 0);
            reg.register_relationship("sensor.a", "sensor.b", RelationKind::SameMetricFamily);
            reg.register_relationship("sensor.b", "sensor.c", RelationKind::SameMetricFamily);
        }
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher_with(registry, sink.clone());

        // a's update reaches b (one hop) but never c (two hops).
        let entities = dispatcher.entities_for_topic("t/a/x");
        assert_eq!(entities, vec!["sensor.a".to_string(), "sensor.b".to_string()]);
        assert!(!dispatcher.should_entity_receive_topic_update("sensor.c", "t/a/x"));
    }

    #[test]
    fn test_no_duplicate_deliveries_across_rules() {
        let registry = Arc::new(RwLock::new(EntityRegistry::new()));
        {
            let mut reg = registry.write().unwrap();
            // Three observers on one topic, all related to each other:
            // several rules match each observer, delivery still happens once.
            for id in ["sensor.a", "sensor.b", "sensor.c"] {
                reg.register("ovms/mycar/v/b/soc", id, EntityKind::Sensor, 0);
            }
            reg.register_relationship("sensor.a", "sensor.b", RelationKind::SameMetricFamily);
            reg.register_relationship("sensor.a", "sensor.c", RelationKind::SameMetricFamily);
            reg.register_relationship("sensor.b", "sensor.c", RelationKind::SameMetricFamily);
        }
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher_with(registry, sink.clone());

        dispatcher.dispatch_update("ovms/mycar/v/b/soc", "80");

        let updates = delivered(&sink);
        assert_eq!(updates.len(), 3);
        let mut ids: Vec<&str> = updates.iter().map(|(id, _)| id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_cross_vehicle_disabled_by_default() {
        let registry = Arc::new(RwLock::new(EntityRegistry::new()));
        {
            let mut reg = registry.write().unwrap();
            reg.register("ovms/mycar/v/b/soc", "sensor.mycar_soc", EntityKind::Sensor, 0);
            reg.register("ovms/othercar/v/b/soc", "sensor.othercar_soc", EntityKind::Sensor, 0);
        }
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher_with(registry.clone(), sink.clone());

        assert_eq!(
            dispatcher.entities_for_topic("ovms/mycar/v/b/soc"),
            vec!["sensor.mycar_soc".to_string()]
        );

        // Same registry, propagation enabled: the sibling vehicle's
        // observer joins the resolved set.
        let sink2 = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher_with(registry, sink2).with_policy(DispatchPolicy {
            cross_vehicle_propagation: true,
        });
        assert_eq!(
            dispatcher.entities_for_topic("ovms/mycar/v/b/soc"),
            vec![
                "sensor.mycar_soc".to_string(),
                "sensor.othercar_soc".to_string()
            ]
        );
    }

    #[test]
    fn test_predicate_consistent_with_resolved_set() {
        let registry = Arc::new(RwLock::new(EntityRegistry::new()));
        {
            let mut reg = registry.write().unwrap();
            reg.register("ovms/mycar/v/p/latitude", "sensor.latitude", EntityKind::Sensor, 0);
            reg.register("combined_location", "device_tracker.car", EntityKind::DeviceTracker, 10);
            reg.register("ovms/mycar/v/b/soc", "sensor.soc", EntityKind::Sensor, 0);
        }
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher_with(registry.clone(), sink);

        for topic in ["ovms/mycar/v/p/latitude", "ovms/mycar/v/b/soc", "ovms/x/y"] {
            let resolved = dispatcher.entities_for_topic(topic);
            for entity in registry.read().unwrap().all_observers() {
                assert_eq!(
                    resolved.contains(&entity),
                    dispatcher.should_entity_receive_topic_update(&entity, topic),
                    "predicate disagrees with resolved set for {entity} on {topic}"
                );
            }
        }
    }

    #[test]
    fn test_delivery_failure_does_not_abort_pass() {
        let registry = Arc::new(RwLock::new(EntityRegistry::new()));
        {
            let mut reg = registry.write().unwrap();
            reg.register("t", "sensor.a", EntityKind::Sensor, 0);
            reg.register("t", "sensor.b", EntityKind::Sensor, 0);
            reg.register("t", "sensor.c", EntityKind::Sensor, 0);
        }
        let sink = Arc::new(RecordingSink {
            delivered: Mutex::new(Vec::new()),
            fail_for: Some("sensor.b".to_string()),
        });
        let dispatcher = dispatcher_with(registry, sink.clone());

        dispatcher.dispatch_update("t", "1");

        let ids: Vec<String> = delivered(&sink).into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["sensor.a".to_string(), "sensor.c".to_string()]);
    }

    #[test]
    fn test_gps_attributes_merged_into_payload() {
        let registry = Arc::new(RwLock::new(EntityRegistry::new()));
        registry.write().unwrap().register(
            "ovms/mycar/v/p/gpssq",
            "sensor.gpssq",
            EntityKind::Sensor,
            0,
        );
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher_with(registry, sink.clone());

        dispatcher.dispatch_update("ovms/mycar/v/p/gpssq", "80");

        let updates = delivered(&sink);
        assert_eq!(updates.len(), 1);
        let update = &updates[0].1;
        assert_eq!(update.attributes["gps_accuracy"].as_f64(), Some(20.0));
        assert_eq!(update.attributes["gps_accuracy_unit"], "m");
        assert_eq!(update.value, ParsedValue::Number { v: 80.0, unit: None });
    }

    #[test]
    fn test_fallback_value_still_delivered() {
        let registry = Arc::new(RwLock::new(EntityRegistry::new()));
        registry
            .write()
            .unwrap()
            .register("ovms/mycar/v/t/pressure", "sensor.tires", EntityKind::Sensor, 0);
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher_with(registry, sink.clone());

        dispatcher.dispatch_update("ovms/mycar/v/t/pressure", "invalid,data,here");

        let updates = delivered(&sink);
        assert_eq!(updates.len(), 1);
        assert_eq!(
            updates[0].1.fallback,
            Some(FallbackReason::MultiValueRejected)
        );
        assert_eq!(
            updates[0].1.value,
            ParsedValue::Text("invalid,data,here".to_string())
        );
    }

    #[test]
    fn test_pressure_topic_parses_statistics() {
        let registry = Arc::new(RwLock::new(EntityRegistry::new()));
        registry
            .write()
            .unwrap()
            .register("ovms/mycar/v/t/pressure", "sensor.tires", EntityKind::Sensor, 0);
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = dispatcher_with(registry, sink.clone());

        dispatcher.dispatch_update("ovms/mycar/v/t/pressure", "32,33,31,32psi");

        let updates = delivered(&sink);
        match &updates[0].1.value {
            ParsedValue::Stats(stats) => {
                assert_eq!(stats.count, 4);
                assert_eq!(stats.unit.as_deref(), Some("kPa"));
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }
}
