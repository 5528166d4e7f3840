//! Topic to observer directory.
//!
//! Tracks which entity listens to which topic, the entity's kind and
//! per-topic priority, and an explicit one-hop relationship graph.
//! Mappings are never removed implicitly; removal is [`EntityRegistry::unregister`].

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Observer kinds, polymorphic over their capability set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Sensor,
    BinarySensor,
    DeviceTracker,
    Switch,
}

impl EntityKind {
    /// Can this entity consume a single scalar value?
    pub fn accepts_scalar(&self) -> bool {
        !matches!(self, EntityKind::DeviceTracker)
    }

    /// Can this entity consume a multi-axis coordinate pair?
    pub fn accepts_coordinate_pair(&self) -> bool {
        matches!(self, EntityKind::DeviceTracker)
    }

    /// Does this entity carry derived auxiliary attributes?
    pub fn accepts_derived_attributes(&self) -> bool {
        matches!(self, EntityKind::Sensor | EntityKind::DeviceTracker)
    }
}

/// Kind of an explicit entity-to-entity relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Latitude/longitude axes feeding one multi-axis consumer.
    CoordinatePair,
    /// Same metric, different vehicle or derived variant.
    SameMetricFamily,
}

/// Registry of observers, their topics, kinds, priorities and relations.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    /// topic -> entity ids in registration order; first is the primary.
    topics: HashMap<String, Vec<String>>,
    /// entity id -> its registered topic.
    reverse: HashMap<String, String>,
    kinds: HashMap<String, EntityKind>,
    /// (topic, entity id) -> priority; higher wins on ties.
    priorities: HashMap<(String, String), i32>,
    relationships: HashMap<String, HashSet<String>>,
    relation_kinds: HashMap<(String, String), RelationKind>,
    /// Registration order of entity ids.
    order: Vec<String>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity for a topic.
    ///
    /// Idempotent: re-registering the same (topic, entity) pair updates
    /// kind and priority without duplicating entries. Returns `true` when
    /// the pair was newly inserted.
    pub fn register(
        &mut self,
        topic: &str,
        entity_id: &str,
        kind: EntityKind,
        priority: i32,
    ) -> bool {
        let entries = self.topics.entry(topic.to_string()).or_default();
        let newly_inserted = if entries.iter().any(|e| e == entity_id) {
            debug!(entity_id, topic, "entity already registered, updating metadata");
            false
        } else {
            entries.push(entity_id.to_string());
            true
        };

        self.kinds.insert(entity_id.to_string(), kind);
        self.priorities
            .insert((topic.to_string(), entity_id.to_string()), priority);
        self.reverse.insert(entity_id.to_string(), topic.to_string());
        self.relationships.entry(entity_id.to_string()).or_default();
        if !self.order.iter().any(|e| e == entity_id) {
            self.order.push(entity_id.to_string());
        }

        debug_assert!(self.is_consistent(), "registry bookkeeping out of sync");
        debug!(entity_id, topic, priority, "registered entity");
        newly_inserted
    }

    /// Declare a bidirectional relationship between two entities.
    pub fn register_relationship(&mut self, entity_id: &str, related_id: &str, kind: RelationKind) {
        self.relationships
            .entry(entity_id.to_string())
            .or_default()
            .insert(related_id.to_string());
        self.relationships
            .entry(related_id.to_string())
            .or_default()
            .insert(entity_id.to_string());
        self.relation_kinds
            .insert((entity_id.to_string(), related_id.to_string()), kind);
        self.relation_kinds
            .insert((related_id.to_string(), entity_id.to_string()), kind);
        debug!(entity_id, related_id, ?kind, "registered relationship");
    }

    /// Explicitly remove an entity from every map.
    pub fn unregister(&mut self, entity_id: &str) {
        if let Some(topic) = self.reverse.remove(entity_id) {
            if let Some(entries) = self.topics.get_mut(&topic) {
                entries.retain(|e| e != entity_id);
                if entries.is_empty() {
                    self.topics.remove(&topic);
                }
            }
            self.priorities.remove(&(topic, entity_id.to_string()));
        }
        self.kinds.remove(entity_id);
        self.order.retain(|e| e != entity_id);
        if let Some(related) = self.relationships.remove(entity_id) {
            for other in related {
                if let Some(set) = self.relationships.get_mut(&other) {
                    set.remove(entity_id);
                }
                self.relation_kinds
                    .remove(&(entity_id.to_string(), other.clone()));
                self.relation_kinds.remove(&(other, entity_id.to_string()));
            }
        }
        debug!(entity_id, "unregistered entity");
    }

    /// The primary entity registered for a topic, if any.
    pub fn observer_for_topic(&self, topic: &str) -> Option<&str> {
        self.topics
            .get(topic)
            .and_then(|entries| entries.first())
            .map(String::as_str)
    }

    /// Every entity exactly registered for a topic, registration order.
    pub fn observers_for_topic(&self, topic: &str) -> Vec<String> {
        self.topics.get(topic).cloned().unwrap_or_default()
    }

    pub fn topic_for_observer(&self, entity_id: &str) -> Option<&str> {
        self.reverse.get(entity_id).map(String::as_str)
    }

    pub fn kind_of(&self, entity_id: &str) -> Option<EntityKind> {
        self.kinds.get(entity_id).copied()
    }

    pub fn priority_of(&self, topic: &str, entity_id: &str) -> i32 {
        self.priorities
            .get(&(topic.to_string(), entity_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// One-hop relation set of an entity; empty if none declared.
    pub fn related_observers(&self, entity_id: &str) -> HashSet<String> {
        self.relationships.get(entity_id).cloned().unwrap_or_default()
    }

    pub fn is_related(&self, entity_id: &str, other_id: &str) -> bool {
        self.relationships
            .get(entity_id)
            .is_some_and(|set| set.contains(other_id))
    }

    /// Related entities filtered by relationship kind, registration order.
    pub fn related_observers_by_kind(&self, entity_id: &str, kind: RelationKind) -> Vec<String> {
        let Some(related) = self.relationships.get(entity_id) else {
            return Vec::new();
        };
        self.order
            .iter()
            .filter(|e| {
                related.contains(*e)
                    && self
                        .relation_kinds
                        .get(&(entity_id.to_string(), (*e).clone()))
                        == Some(&kind)
            })
            .cloned()
            .collect()
    }

    /// All entities of a kind, registration order.
    pub fn observers_by_kind(&self, kind: EntityKind) -> Vec<String> {
        self.order
            .iter()
            .filter(|e| self.kinds.get(*e) == Some(&kind))
            .cloned()
            .collect()
    }

    /// All registered entity ids, registration order.
    pub fn all_observers(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Position of an entity in registration order.
    pub fn registration_index(&self, entity_id: &str) -> Option<usize> {
        self.order.iter().position(|e| e == entity_id)
    }

    /// Per-kind entity counts, for diagnostics.
    pub fn observer_stats(&self) -> BTreeMap<EntityKind, usize> {
        let mut stats = BTreeMap::new();
        for kind in self.kinds.values() {
            *stats.entry(*kind).or_insert(0) += 1;
        }
        stats
    }

    /// Invariant check over the four maps. A violation is a programming
    /// error; production callers recover by logging and continuing.
    fn is_consistent(&self) -> bool {
        for (entity, topic) in &self.reverse {
            let listed = self
                .topics
                .get(topic)
                .is_some_and(|entries| entries.iter().any(|e| e == entity));
            if !listed {
                error!(entity = %entity, topic = %topic, "reverse map entry without forward mapping");
                return false;
            }
            if !self.kinds.contains_key(entity) {
                error!(entity = %entity, "entity without a kind");
                return false;
            }
        }
        true
    }
}
