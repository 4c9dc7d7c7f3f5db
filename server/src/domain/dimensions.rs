//! Dimension registries: deduplicating stores for Endpoints, Origins,
//! Entities, and Properties, each mapping a natural-key string to a
//! generated UUID.
//!
//! Grounded on `original_source/types/endpoint.go`, `origin.go`, `entity.go`,
//! `properties.go`. Each registry is a `parking_lot::Mutex`-guarded
//! map/index/dirty-set trio, matching the rest of this codebase's
//! `parking_lot` usage (`core/shutdown.rs`'s handle list uses the same
//! primitive) rather than `std::sync::Mutex`.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::interaction::Interaction;
use super::stats::{PropertyValue, SimpleStats, StatsError};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Stats(#[from] StatsError),
    #[error("property {name:?} already has type {existing}, got {incoming}")]
    PropertyTypeMismatch {
        name: String,
        existing: &'static str,
        incoming: &'static str,
    },
}

/// `(action, entityType, entityID, originType, originID)` — an
/// interaction's *kind*.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
}

impl Endpoint {
    fn from_interaction(i: &Interaction) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: i.action.clone(),
            entity_type: i.entity_type.clone(),
            entity_id: i.entity_id.clone(),
            origin_type: i.origin_type.clone(),
            origin_id: i.origin_id.clone(),
        }
    }
}

/// `(originType, originID)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
}

impl Origin {
    fn from_interaction(i: &Interaction) -> Self {
        Self {
            id: Uuid::new_v4(),
            origin_type: i.origin_type.clone(),
            origin_id: i.origin_id.clone(),
        }
    }

    /// Two origins are equal iff both type and id match (absent treated as
    /// present-and-equal only when both sides are absent).
    pub fn eq_natural(&self, other: &Origin) -> bool {
        self.origin_type == other.origin_type && self.origin_id == other.origin_id
    }
}

/// `(entityType, entityID)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: String,
}

impl Entity {
    fn from_interaction(i: &Interaction) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type: i.entity_type.clone().unwrap_or_default(),
            entity_id: i.entity_id.clone().unwrap_or_default(),
        }
    }
}

/// `(name, typeTag, Stats)`. Created when a property name is first seen;
/// `typeTag` is immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: String,
    pub stats: SimpleStats,
}

/// Generic natural-key-indexed dedup registry shared by Endpoints, Origins,
/// and Entities: a primary map keyed by UUID, a natural-key index, and a
/// dirty set drained by the post-batch write-behind.
pub struct Registry<T: Clone> {
    inner: Mutex<RegistryInner<T>>,
}

struct RegistryInner<T> {
    list: HashMap<Uuid, T>,
    index: HashMap<String, Uuid>,
    dirty: HashMap<Uuid, T>,
}

impl<T: Clone> Registry<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                list: HashMap::new(),
                index: HashMap::new(),
                dirty: HashMap::new(),
            }),
        }
    }

    /// Existing UUID for a natural key, if any.
    pub fn id_for_key(&self, key: &str) -> Option<Uuid> {
        self.inner.lock().index.get(key).copied()
    }

    pub fn get(&self, id: Uuid) -> Option<T> {
        self.inner.lock().list.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn list(&self) -> Vec<T> {
        self.inner.lock().list.values().cloned().collect()
    }

    /// Insert a freshly constructed record under both keys and mark dirty.
    fn insert_new(&self, key: String, record: T, id: Uuid) {
        let mut inner = self.inner.lock();
        inner.list.insert(id, record.clone());
        inner.index.insert(key, id);
        inner.dirty.insert(id, record);
    }

    /// Rehydrate without marking dirty.
    pub fn load(&self, id: Uuid, key: String, record: T) {
        let mut inner = self.inner.lock();
        inner.list.insert(id, record);
        inner.index.insert(key, id);
    }

    /// Drain the dirty set through `visitor`, clearing entries regardless of
    /// per-entry failure (best-effort write-behind).
    pub fn drain_dirty(&self, mut visitor: impl FnMut(&T)) {
        let dirty: Vec<(Uuid, T)> = {
            let mut inner = self.inner.lock();
            inner.dirty.drain().collect()
        };
        for (_, record) in dirty {
            visitor(&record);
        }
    }

}

impl<T: Clone> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Endpoints(Registry<Endpoint>);

impl Endpoints {
    pub fn new() -> Self {
        Self(Registry::new())
    }

    pub fn id_for(&self, i: &Interaction) -> Option<Uuid> {
        self.0.id_for_key(&i.endpoint_key())
    }

    pub fn get(&self, id: Uuid) -> Option<Endpoint> {
        self.0.get(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn list(&self) -> Vec<Endpoint> {
        self.0.list()
    }

    /// Create-if-absent: if `existing` resolves, nothing to mutate
    /// (bare registry records are immutable once created); otherwise create
    /// fresh and return the new id.
    pub fn apply(&self, i: &Interaction, existing: Option<Uuid>) -> Uuid {
        if let Some(id) = existing {
            return id;
        }
        let record = Endpoint::from_interaction(i);
        let id = record.id;
        self.0.insert_new(i.endpoint_key(), record, id);
        id
    }

    pub fn load(&self, record: Endpoint) {
        let key = [
            record.action.as_deref().unwrap_or(""),
            record.entity_type.as_deref().unwrap_or(""),
            record.entity_id.as_deref().unwrap_or(""),
            record.origin_type.as_deref().unwrap_or(""),
            record.origin_id.as_deref().unwrap_or(""),
        ]
        .join("-");
        self.0.load(record.id, key, record);
    }

    pub fn drain_dirty(&self, visitor: impl FnMut(&Endpoint)) {
        self.0.drain_dirty(visitor);
    }

    /// Attempt to register a duplicate-checked endpoint from the dashboard
    /// `POST /dashboard/endpoint` surface; returns `None` if the tuple
    /// already exists.
    pub fn create_unique(&self, i: &Interaction) -> Option<Uuid> {
        let key = i.endpoint_key();
        if self.0.id_for_key(&key).is_some() {
            return None;
        }
        let record = Endpoint::from_interaction(i);
        let id = record.id;
        self.0.insert_new(key, record, id);
        Some(id)
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Origins(Registry<Origin>);

impl Origins {
    pub fn new() -> Self {
        Self(Registry::new())
    }

    pub fn id_for(&self, i: &Interaction) -> Option<Uuid> {
        self.0.id_for_key(&i.origin_key())
    }

    pub fn get(&self, id: Uuid) -> Option<Origin> {
        self.0.get(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn list(&self) -> Vec<Origin> {
        self.0.list()
    }

    pub fn apply(&self, i: &Interaction, existing: Option<Uuid>) -> Uuid {
        if let Some(id) = existing {
            return id;
        }
        let record = Origin::from_interaction(i);
        let id = record.id;
        self.0.insert_new(i.origin_key(), record, id);
        id
    }

    pub fn load(&self, record: Origin) {
        let key = [
            record.origin_type.as_deref().unwrap_or(""),
            record.origin_id.as_deref().unwrap_or(""),
        ]
        .join("-");
        self.0.load(record.id, key, record);
    }

    pub fn drain_dirty(&self, visitor: impl FnMut(&Origin)) {
        self.0.drain_dirty(visitor);
    }
}

impl Default for Origins {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Entities(Registry<Entity>);

impl Entities {
    pub fn new() -> Self {
        Self(Registry::new())
    }

    pub fn id_for(&self, i: &Interaction) -> Option<Uuid> {
        self.0.id_for_key(&i.entity_key())
    }

    pub fn get(&self, id: Uuid) -> Option<Entity> {
        self.0.get(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn list(&self) -> Vec<Entity> {
        self.0.list()
    }

    pub fn apply(&self, i: &Interaction, existing: Option<Uuid>) -> Uuid {
        if let Some(id) = existing {
            return id;
        }
        let record = Entity::from_interaction(i);
        let id = record.id;
        self.0.insert_new(i.entity_key(), record, id);
        id
    }

    pub fn load(&self, record: Entity) {
        let key = format!("{}-{}", record.entity_type, record.entity_id);
        self.0.load(record.id, key, record);
    }

    pub fn drain_dirty(&self, visitor: impl FnMut(&Entity)) {
        self.0.drain_dirty(visitor);
    }
}

impl Default for Entities {
    fn default() -> Self {
        Self::new()
    }
}

/// Properties doubles as a dedup registry *and* the rolling stats for each
/// property name (unlike Endpoints/Origins/Entities, whose richer profile
/// lives only in the interval stats store).
pub struct Properties {
    inner: Mutex<PropertiesInner>,
}

struct PropertiesInner {
    list: HashMap<String, Property>,
    dirty: HashMap<String, Property>,
}

impl Properties {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PropertiesInner {
                list: HashMap::new(),
                dirty: HashMap::new(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, name: &str) -> Option<Property> {
        self.inner.lock().list.get(name).cloned()
    }

    pub fn list(&self) -> Vec<Property> {
        self.inner.lock().list.values().cloned().collect()
    }

    pub fn apply(&self, i: &Interaction) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        for (name, value) in i.properties.iter() {
            match inner.list.get_mut(name) {
                Some(prop) => {
                    if prop.type_tag != value.type_tag() {
                        return Err(RegistryError::PropertyTypeMismatch {
                            name: name.clone(),
                            existing: leak_tag(&prop.type_tag),
                            incoming: value.type_tag(),
                        });
                    }
                    prop.stats.update(value.clone())?;
                }
                None => {
                    let stats = SimpleStats::new(value.clone());
                    inner.list.insert(
                        name.clone(),
                        Property {
                            name: name.clone(),
                            type_tag: value.type_tag().to_string(),
                            stats,
                        },
                    );
                }
            }
            let updated = inner.list.get(name).cloned().expect("just inserted");
            inner.dirty.insert(name.clone(), updated);
        }
        Ok(())
    }

    pub fn load(&self, prop: Property) {
        let mut inner = self.inner.lock();
        inner.list.insert(prop.name.clone(), prop);
    }

    pub fn drain_dirty(&self, mut visitor: impl FnMut(&Property)) {
        let dirty: Vec<(String, Property)> = {
            let mut inner = self.inner.lock();
            inner.dirty.drain().collect()
        };
        for (_, record) in dirty {
            visitor(&record);
        }
    }
}

impl Default for Properties {
    fn default() -> Self {
        Self::new()
    }
}

fn leak_tag(s: &str) -> &'static str {
    match s {
        "string" => "string",
        "number" => "number",
        "string-array" => "string-array",
        "number-array" => "number-array",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn interaction(action: &str, origin_id: &str) -> Interaction {
        Interaction {
            action: Some(action.to_string()),
            entity_type: Some("post".into()),
            entity_id: Some("p1".into()),
            origin_type: Some("page".into()),
            origin_id: Some(origin_id.to_string()),
            user_type: Some("u".into()),
            user_id: Some("u1".into()),
            device_type: None,
            device_id: None,
            session_type: None,
            session_id: None,
            timestamp: None,
            created_at: None,
            received_at: None,
            properties: Map::new(),
        }
    }

    #[test]
    fn endpoints_dedup_by_natural_key() {
        let endpoints = Endpoints::new();
        let i = interaction("view", "/home");
        let existing = endpoints.id_for(&i);
        assert!(existing.is_none());
        let id1 = endpoints.apply(&i, existing);
        assert_eq!(endpoints.len(), 1);

        let existing2 = endpoints.id_for(&i);
        assert_eq!(existing2, Some(id1));
        let id2 = endpoints.apply(&i, existing2);
        assert_eq!(id1, id2);
        assert_eq!(endpoints.len(), 1);
    }

    #[test]
    fn create_unique_rejects_duplicate_tuple() {
        let endpoints = Endpoints::new();
        let i = interaction("view", "/home");
        assert!(endpoints.create_unique(&i).is_some());
        assert!(endpoints.create_unique(&i).is_none());
        assert_eq!(endpoints.len(), 1);
    }

    #[test]
    fn properties_applies_first_seen_and_rejects_type_change() {
        let props = Properties::new();
        let mut i = interaction("view", "/home");
        i.properties
            .insert("amount".to_string(), PropertyValue::Number(1.0));
        props.apply(&i).unwrap();
        assert_eq!(props.len(), 1);

        let mut i2 = interaction("view", "/home");
        i2.properties
            .insert("amount".to_string(), PropertyValue::String("x".into()));
        assert!(props.apply(&i2).is_err());
    }
}
