//! User sessions: per-user session state tracked across interactions,
//! cached with a variable per-entry TTL and folded into every enabled
//! summary on expiry.
//!
//! Grounded on `original_source/types/session.go` for the state machine and
//! on `data/cache/memory.rs` (`VariableTtlExpiry`) for the moka cache shape.
//! The fold-into-summaries callback is wired in `pipeline.rs` via
//! `SessionCache::with_listener`, extending that `Expiry` idiom with a
//! post-eviction callback (see DESIGN.md).

use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::Expiry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::dimensions::Origin;
use super::interaction::{Interaction, AUTOMATED_SESSION_TYPE};

/// One `(originType, originID)` seen by a session, with visit/occurrence
/// counters. Grounded on `OriginCounts`/`OriginCount`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginCount {
    pub origin: Origin,
    pub count: u64,
    pub visits: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OriginCounts {
    pub list: Vec<OriginCount>,
}

impl OriginCounts {
    pub fn get(&self, origin: &Origin) -> Option<&OriginCount> {
        self.list.iter().find(|oc| oc.origin.eq_natural(origin))
    }

    /// Adds `origin` if not already present; returns whether it was newly added.
    pub fn add_unique(&mut self, origin: Origin) -> bool {
        if self.list.iter().any(|oc| oc.origin.eq_natural(&origin)) {
            return false;
        }
        self.list.push(OriginCount {
            origin,
            count: 1,
            visits: 1,
        });
        true
    }

    /// Bumps `count` on every matching entry (matches the original's
    /// continue-the-loop quirk rather than stopping at the first hit).
    pub fn increment(&mut self, origin: &Origin) {
        for oc in self.list.iter_mut() {
            if oc.origin.eq_natural(origin) {
                oc.count += 1;
            }
        }
    }

    /// Bumps `visits` on the first matching entry only.
    pub fn increment_visit(&mut self, origin: &Origin) {
        if let Some(oc) = self.list.iter_mut().find(|oc| oc.origin.eq_natural(origin)) {
            oc.visits += 1;
        }
    }

    pub fn contains(&self, origin: &Origin) -> bool {
        self.get(origin).is_some()
    }
}

/// Per-user session state. Grounded on `UserSession`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSession {
    pub session_type: String,
    pub session_id: String,
    pub user_type: Option<String>,
    pub user_id: Option<String>,
    pub device_type: Option<String>,
    pub device_id: Option<String>,
    pub total: u64,
    pub conversions: u64,
    pub value: f64,
    pub origin_counts: OriginCounts,
    pub prev_endpoint: Option<Uuid>,
    pub visit_total: u64,
    pub origin_duration_secs: f64,
    pub current_origin: Option<Origin>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserSession {
    /// Seeds a brand-new session from the interaction that created it.
    /// Grounded on `NewSession`: session type defaults to `"asd"`, origin
    /// counts seeded with a single unique visit.
    pub fn new(i: &Interaction) -> Self {
        let created_at = i.created_at();
        let origin = Origin {
            id: Uuid::nil(),
            origin_type: i.origin_type.clone(),
            origin_id: i.origin_id.clone(),
        };
        let mut origin_counts = OriginCounts::default();
        origin_counts.add_unique(origin.clone());
        Self {
            session_type: i
                .session_type
                .clone()
                .unwrap_or_else(|| AUTOMATED_SESSION_TYPE.to_string()),
            session_id: i.session_id.clone().unwrap_or_default(),
            user_type: i.user_type.clone(),
            user_id: i.user_id.clone(),
            device_type: i.device_type.clone(),
            device_id: i.device_id.clone(),
            total: 0,
            conversions: 0,
            value: 0.0,
            origin_counts,
            prev_endpoint: None,
            visit_total: 1,
            origin_duration_secs: 0.0,
            current_origin: Some(origin),
            created_at,
            updated_at: created_at,
        }
    }

    /// Resets session state for a new visit using a fresh interaction,
    /// without bumping `total`. Grounded on `Renew`.
    pub fn renew(&mut self, i: &Interaction) {
        *self = Self::new(i);
    }

    pub fn expired(&self, ttl: StdDuration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(d) => now > self.updated_at + d,
            Err(_) => false,
        }
    }

    /// `len(OriginCounts.List) == 1` or the session never advanced past its
    /// creating interaction.
    pub fn bounced(&self) -> bool {
        self.updated_at == self.created_at || self.origin_counts.list.len() == 1
    }

    /// Minutes elapsed: `updatedAt - createdAt` once expired, else
    /// `now - createdAt`.
    pub fn duration_minutes(&self, expired: bool) -> f64 {
        let end = if expired { self.updated_at } else { Utc::now() };
        (end - self.created_at).num_seconds() as f64 / 60.0
    }

    /// Applies one interaction to the session state. Grounded on
    /// `UserSession.Update`; the `value` accumulation on conversions is a
    /// grounded addition (see DESIGN.md) — the original never increments
    /// `Value` inside `Update`.
    pub fn update(&mut self, i: &Interaction, endpoint: Uuid) {
        self.total += 1;
        let prev_updated_at = self.updated_at;
        if i.is_conversion() {
            self.conversions += 1;
            if let Some(amount) = i.amount() {
                self.value += amount;
            }
        }
        self.prev_endpoint = Some(endpoint);

        let new_origin = Origin {
            id: Uuid::nil(),
            origin_type: i.origin_type.clone(),
            origin_id: i.origin_id.clone(),
        };

        let same_origin = self
            .current_origin
            .as_ref()
            .map(|o| o.eq_natural(&new_origin))
            .unwrap_or(false);

        if same_origin {
            self.origin_duration_secs += (i.created_at() - prev_updated_at).num_seconds() as f64;
            self.visit_total += 1;
        } else {
            self.origin_counts.increment_visit(&new_origin);
            if !self.origin_counts.add_unique(new_origin.clone()) {
                self.origin_counts.increment(&new_origin);
            }
            self.current_origin = Some(new_origin);
            self.origin_duration_secs = 0.0;
            self.visit_total = 1;
        }

        self.updated_at = i.created_at();
    }
}

/// Custom per-entry TTL: every session is created with `ttl` and refreshed
/// back to the full `ttl` on every read/update, matching
/// `VariableTtlExpiry`'s refresh-on-read idiom.
struct SessionExpiry {
    ttl: StdDuration,
}

impl Expiry<String, Arc<Mutex<UserSession>>> for SessionExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        _value: &Arc<Mutex<UserSession>>,
        _created_at: Instant,
    ) -> Option<StdDuration> {
        Some(self.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        _value: &Arc<Mutex<UserSession>>,
        _updated_at: Instant,
        _duration_until_expiry: Option<StdDuration>,
    ) -> Option<StdDuration> {
        Some(self.ttl)
    }
}

/// Result of `get_or_create`: whether the session already existed.
pub struct SessionLookup {
    pub session: Arc<Mutex<UserSession>>,
    pub is_new: bool,
}

/// Sessions keyed by `userType,userID`. Grounded on `UserSessions.GetSession`
/// / `SetSession`, implemented with a moka future cache.
pub struct SessionCache {
    cache: Cache<String, Arc<Mutex<UserSession>>>,
}

impl SessionCache {
    pub fn new(ttl_minutes: u64) -> Self {
        Self::with_listener(ttl_minutes, |_key, _session, _cause| {})
    }

    /// Builds a cache whose eviction listener fires on every removal,
    /// expired or not — callers branch on `RemovalCause` themselves. This
    /// is where the fold into summaries (flagged as missing in the module
    /// docs) gets wired up, by `EngineContext::new` in `pipeline.rs`.
    pub fn with_listener<F>(ttl_minutes: u64, listener: F) -> Self
    where
        F: Fn(Arc<String>, Arc<Mutex<UserSession>>, moka::notification::RemovalCause)
            + Send
            + Sync
            + 'static,
    {
        let ttl = StdDuration::from_secs(ttl_minutes.max(1) * 60);
        let cache = Cache::builder()
            .expire_after(SessionExpiry { ttl })
            .eviction_listener(listener)
            .build();
        Self { cache }
    }

    /// Looks up the session for this interaction's user, creating one if
    /// absent. Moka evicts on access once a session's TTL has lapsed, so a
    /// cache hit here is always live.
    pub async fn get_or_create(&self, i: &Interaction) -> SessionLookup {
        let key = i.user_key();
        if let Some(existing) = self.cache.get(&key).await {
            return SessionLookup {
                session: existing,
                is_new: false,
            };
        }
        let session = Arc::new(Mutex::new(UserSession::new(i)));
        self.cache.insert(key, session.clone()).await;
        SessionLookup {
            session,
            is_new: true,
        }
    }

    pub async fn len(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

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
            created_at: Some(Utc::now()),
            received_at: None,
            properties: HashMap::new(),
        }
    }

    #[test]
    fn new_session_defaults_session_type_to_asd() {
        let session = UserSession::new(&interaction("view", "/home"));
        assert_eq!(session.session_type, "asd");
        assert_eq!(session.origin_counts.list.len(), 1);
        assert_eq!(session.visit_total, 1);
    }

    #[test]
    fn same_origin_accumulates_duration_without_new_visit() {
        let i1 = interaction("view", "/home");
        let mut session = UserSession::new(&i1);
        let endpoint = Uuid::new_v4();

        let mut i2 = interaction("view", "/home");
        i2.created_at = Some(i1.created_at() + chrono::Duration::seconds(30));
        session.update(&i2, endpoint);

        assert_eq!(session.total, 1);
        assert_eq!(session.origin_counts.list.len(), 1);
        assert_eq!(session.visit_total, 2);
        assert!((session.origin_duration_secs - 30.0).abs() < 1e-6);
    }

    #[test]
    fn origin_change_adds_new_origin_count() {
        let i1 = interaction("view", "/home");
        let mut session = UserSession::new(&i1);
        let endpoint = Uuid::new_v4();

        let mut i2 = interaction("view", "/pricing");
        i2.created_at = Some(i1.created_at() + chrono::Duration::seconds(5));
        session.update(&i2, endpoint);

        assert_eq!(session.origin_counts.list.len(), 2);
        assert_eq!(session.visit_total, 1);
        assert_eq!(session.origin_duration_secs, 0.0);
    }

    #[test]
    fn conversion_increments_counters_and_value() {
        let i1 = interaction("view", "/home");
        let mut session = UserSession::new(&i1);
        let endpoint = Uuid::new_v4();

        let mut i2 = interaction("conversion", "/home");
        i2.created_at = Some(i1.created_at() + chrono::Duration::seconds(1));
        i2.properties
            .insert("amount".to_string(), super::super::stats::PropertyValue::Number(42.0));
        session.update(&i2, endpoint);

        assert_eq!(session.conversions, 1);
        assert!((session.value - 42.0).abs() < 1e-9);
    }

    #[test]
    fn bounced_true_for_single_origin_session() {
        let session = UserSession::new(&interaction("view", "/home"));
        assert!(session.bounced());
    }

    #[tokio::test]
    async fn get_or_create_returns_same_session_for_same_user() {
        let cache = SessionCache::new(30);
        let i = interaction("view", "/home");
        let first = cache.get_or_create(&i).await;
        assert!(first.is_new);
        let second = cache.get_or_create(&i).await;
        assert!(!second.is_new);
        assert!(Arc::ptr_eq(&first.session, &second.session));
    }
}
