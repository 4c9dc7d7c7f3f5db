//! Per-dimension interval-stats payloads (the `profile` field) plus the
//! concrete `IntervalStatsStore` instantiations for Endpoint/Origin/Entity/
//! Property.
//!
//! Grounded on `original_source/types/endpoint.go` (`EndpointProfile`),
//! `origin_stats.go` (`OriginProfile`), `entity.go` (`EntityProfile`).
//! Dispatched without a runtime tagged union: Rust's static generics already
//! let `IntervalStatsStore<Uuid, EndpointProfile>` etc. dispatch `update`/
//! `apply` per dimension at compile time, so there's no `Updater`-interface
//! equivalent to model — each profile type is just a distinct instantiation
//! of the same generic store.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::interaction::Interaction;
use super::interval::IntervalStatsStore;
use super::session::UserSession;
use super::stats::{NamedSimpleStatsList, PropertyValue, SimpleStats, StatsError};
use super::summary::SessionStatsList;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointProfile {
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_type_stats: Option<SimpleStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type_stats: Option<SimpleStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_type_stats: Option<SimpleStats>,
    pub session_stats: SessionStatsList,
    pub property_stats: NamedSimpleStatsList,
}

impl EndpointProfile {
    pub fn new(i: &Interaction) -> Self {
        let mut profile = Self {
            total: 1,
            user_type_stats: i.user_type.clone().map(|v| SimpleStats::new(PropertyValue::String(v))),
            device_type_stats: i
                .device_type
                .clone()
                .map(|v| SimpleStats::new(PropertyValue::String(v))),
            session_type_stats: i
                .session_type
                .clone()
                .map(|v| SimpleStats::new(PropertyValue::String(v))),
            session_stats: SessionStatsList::new(),
            property_stats: NamedSimpleStatsList::new(),
        };
        for (name, value) in i.properties.iter() {
            let _ = profile.property_stats.update(name, value.clone());
        }
        profile
    }

    pub fn update(&mut self, i: &Interaction, session: &UserSession) -> Result<(), StatsError> {
        self.total += 1;
        update_optional_string(&mut self.user_type_stats, &i.user_type)?;
        update_optional_string(&mut self.device_type_stats, &i.device_type)?;
        update_optional_string(&mut self.session_type_stats, &i.session_type)?;
        for (name, value) in i.properties.iter() {
            self.property_stats.update(name, value.clone())?;
        }
        self.session_stats.update(session, false)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginProfile {
    pub total: u64,
    pub action_stats: SimpleStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type_stats: Option<SimpleStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_type_stats: Option<SimpleStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type_stats: Option<SimpleStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_type_stats: Option<SimpleStats>,
    pub property_stats: NamedSimpleStatsList,
    pub visit_stats: SessionStatsList,
}

impl OriginProfile {
    pub fn new(i: &Interaction) -> Self {
        let mut profile = Self {
            total: 1,
            action_stats: SimpleStats::new(PropertyValue::String(i.action.clone().unwrap_or_default())),
            entity_type_stats: i
                .entity_type
                .clone()
                .map(|v| SimpleStats::new(PropertyValue::String(v))),
            user_type_stats: i.user_type.clone().map(|v| SimpleStats::new(PropertyValue::String(v))),
            device_type_stats: i
                .device_type
                .clone()
                .map(|v| SimpleStats::new(PropertyValue::String(v))),
            session_type_stats: i
                .session_type
                .clone()
                .map(|v| SimpleStats::new(PropertyValue::String(v))),
            property_stats: NamedSimpleStatsList::new(),
            visit_stats: SessionStatsList::new(),
        };
        for (name, value) in i.properties.iter() {
            let _ = profile.property_stats.update(name, value.clone());
        }
        profile
    }

    pub fn update(&mut self, i: &Interaction, session: &UserSession) -> Result<(), StatsError> {
        self.total += 1;
        self.action_stats
            .update(PropertyValue::String(i.action.clone().unwrap_or_default()))?;
        update_optional_string(&mut self.entity_type_stats, &i.entity_type)?;
        update_optional_string(&mut self.user_type_stats, &i.user_type)?;
        update_optional_string(&mut self.device_type_stats, &i.device_type)?;
        update_optional_string(&mut self.session_type_stats, &i.session_type)?;
        for (name, value) in i.properties.iter() {
            self.property_stats.update(name, value.clone())?;
        }
        self.visit_stats.update(session, false)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityProfile {
    pub total: u64,
    pub action_stats: SimpleStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_type_stats: Option<SimpleStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type_stats: Option<SimpleStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_type_stats: Option<SimpleStats>,
    pub property_stats: NamedSimpleStatsList,
}

impl EntityProfile {
    pub fn new(i: &Interaction) -> Self {
        let mut profile = Self {
            total: 1,
            action_stats: SimpleStats::new(PropertyValue::String(i.action.clone().unwrap_or_default())),
            user_type_stats: i.user_type.clone().map(|v| SimpleStats::new(PropertyValue::String(v))),
            device_type_stats: i
                .device_type
                .clone()
                .map(|v| SimpleStats::new(PropertyValue::String(v))),
            session_type_stats: i
                .session_type
                .clone()
                .map(|v| SimpleStats::new(PropertyValue::String(v))),
            property_stats: NamedSimpleStatsList::new(),
        };
        for (name, value) in i.properties.iter() {
            let _ = profile.property_stats.update(name, value.clone());
        }
        profile
    }

    pub fn update(&mut self, i: &Interaction) -> Result<(), StatsError> {
        self.total += 1;
        self.action_stats
            .update(PropertyValue::String(i.action.clone().unwrap_or_default()))?;
        update_optional_string(&mut self.user_type_stats, &i.user_type)?;
        update_optional_string(&mut self.device_type_stats, &i.device_type)?;
        update_optional_string(&mut self.session_type_stats, &i.session_type)?;
        for (name, value) in i.properties.iter() {
            self.property_stats.update(name, value.clone())?;
        }
        Ok(())
    }
}

fn update_optional_string(
    slot: &mut Option<SimpleStats>,
    value: &Option<String>,
) -> Result<(), StatsError> {
    let Some(value) = value else { return Ok(()) };
    match slot {
        Some(stats) => stats.update(PropertyValue::String(value.clone())),
        None => {
            *slot = Some(SimpleStats::new(PropertyValue::String(value.clone())));
            Ok(())
        }
    }
}

pub type EndpointIntervalStats = IntervalStatsStore<Uuid, EndpointProfile>;
pub type OriginIntervalStats = IntervalStatsStore<Uuid, OriginProfile>;
pub type EntityIntervalStats = IntervalStatsStore<Uuid, EntityProfile>;
pub type PropertyIntervalStats = IntervalStatsStore<String, SimpleStats>;

/// Applies a property value update against every enabled interval's bucket
/// for `name`, grounded on `PropertyStatsList.Apply`.
pub fn apply_property_interval_stats(
    store: &PropertyIntervalStats,
    name: &str,
    value: &PropertyValue,
    created_at: chrono::DateTime<Tz>,
    intervals: &[super::interval::Interval],
) {
    for &interval in intervals {
        store.apply(
            &name.to_string(),
            interval,
            created_at,
            || SimpleStats::new(value.clone()),
            |stats| {
                let _ = stats.update(value.clone());
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn interaction() -> Interaction {
        Interaction {
            action: Some("view".into()),
            entity_type: Some("post".into()),
            entity_id: Some("p1".into()),
            origin_type: Some("page".into()),
            origin_id: Some("/home".into()),
            user_type: Some("u".into()),
            user_id: Some("u1".into()),
            device_type: None,
            device_id: None,
            session_type: None,
            session_id: None,
            timestamp: None,
            created_at: Some(chrono::Utc::now()),
            received_at: None,
            properties: HashMap::new(),
        }
    }

    #[test]
    fn origin_profile_tracks_action_stats_and_total() {
        let i = interaction();
        let profile = OriginProfile::new(&i);
        assert_eq!(profile.total, 1);
        assert_eq!(profile.action_stats.total(), 1);
    }

    #[test]
    fn entity_profile_update_increments_total_and_action_stats() {
        let i = interaction();
        let mut profile = EntityProfile::new(&i);
        profile.update(&i).unwrap();
        assert_eq!(profile.total, 2);
        assert_eq!(profile.action_stats.total(), 2);
    }

    #[test]
    fn endpoint_profile_has_no_action_stats_field() {
        let i = interaction();
        let profile = EndpointProfile::new(&i);
        assert_eq!(profile.total, 1);
        assert!(profile.user_type_stats.is_some());
    }

    #[test]
    fn entity_profile_round_trips_through_json() {
        let i = interaction();
        let profile = EntityProfile::new(&i);
        let json = serde_json::to_value(&profile).unwrap();
        let back: EntityProfile = serde_json::from_value(json).unwrap();
        assert_eq!(back.total, profile.total);
    }
}
