//! Global per-interval roll-ups: totals, distribution stats, session
//! statistics, conversion statistics, and unit metrics.
//!
//! Grounded on `original_source/types/summary.go`, `stats_session.go`, and
//! `stats_conversions.go`. The original's `Summary.Apply` unconditionally
//! touches `ActionStats` before checking `SpanType == AllTime`, which would
//! nil-deref in Go since `NewSummary`'s `AllTime` branch never allocates
//! `ActionStats` — not reproduced here; `Summary::apply` branches on the
//! `AllTime` case first, the same early-exit style already used by
//! `SessionExpirationUpdate`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::interaction::Interaction;
use super::interval::{window, Interval};
use super::session::UserSession;
use super::stats::{PropertyValue, SimpleStats, StatsError};

/// One `(userType, sessionType, deviceType)` bucket of session statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub user_type: Option<String>,
    pub device_type: Option<String>,
    pub session_type: String,
    pub count: u64,
    pub percentage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<SimpleStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interactions: Option<SimpleStats>,
    pub conversions: u64,
    pub conversion_rate: f64,
    pub bounced_sessions: u64,
    pub bounce_rate: f64,
}

impl SessionStats {
    fn matches(&self, session: &UserSession) -> bool {
        self.user_type == session.user_type
            && self.device_type == session.device_type
            && self.session_type == session.session_type
    }

    fn new_full(session: &UserSession, expired: bool) -> Self {
        let bounced = session.bounced();
        Self {
            user_type: session.user_type.clone(),
            device_type: session.device_type.clone(),
            session_type: session.session_type.clone(),
            count: 1,
            percentage: 0.0,
            duration: Some(SimpleStats::new(PropertyValue::Duration(
                session.duration_minutes(expired),
            ))),
            interactions: Some(SimpleStats::new(PropertyValue::Number(
                session.total as f64,
            ))),
            conversions: session.conversions,
            conversion_rate: 0.0,
            bounced_sessions: if bounced { 1 } else { 0 },
            bounce_rate: if bounced { 1.0 } else { 0.0 },
        }
    }

    fn new_simple(session: &UserSession) -> Self {
        let bounced = session.bounced();
        Self {
            user_type: session.user_type.clone(),
            device_type: session.device_type.clone(),
            session_type: session.session_type.clone(),
            count: 1,
            percentage: 0.0,
            duration: None,
            interactions: None,
            conversions: session.conversions,
            conversion_rate: 0.0,
            bounced_sessions: if bounced { 1 } else { 0 },
            bounce_rate: if bounced { 1.0 } else { 0.0 },
        }
    }

    fn update_full(&mut self, session: &UserSession, expired: bool) -> Result<(), StatsError> {
        self.count += 1;
        match &mut self.duration {
            Some(d) => d.update(PropertyValue::Duration(session.duration_minutes(expired)))?,
            None => {
                self.duration = Some(SimpleStats::new(PropertyValue::Duration(
                    session.duration_minutes(expired),
                )))
            }
        }
        match &mut self.interactions {
            Some(i) => i.update(PropertyValue::Number(session.total as f64))?,
            None => self.interactions = Some(SimpleStats::new(PropertyValue::Number(session.total as f64))),
        }
        self.conversions += session.conversions;
        if session.bounced() {
            self.bounced_sessions += 1;
        }
        Ok(())
    }

    fn update_simple(&mut self, session: &UserSession) {
        self.count += 1;
        self.conversions += session.conversions;
        if session.bounced() {
            self.bounced_sessions += 1;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStatsList {
    pub list: Vec<SessionStats>,
}

impl SessionStatsList {
    pub fn new() -> Self {
        Self::default()
    }

    fn recompute_rates(&mut self) {
        let total: u64 = self.list.iter().map(|s| s.count).sum();
        for s in self.list.iter_mut() {
            s.percentage = if total == 0 { 0.0 } else { s.count as f64 / total as f64 };
            s.conversion_rate = if s.count == 0 {
                0.0
            } else {
                s.conversions as f64 / s.count as f64
            };
            s.bounce_rate = if s.count == 0 {
                0.0
            } else {
                s.bounced_sessions as f64 / s.count as f64
            };
        }
    }

    /// Full update path (non-`allTime` summaries): tracks duration and
    /// interaction-count distributions.
    pub fn update(&mut self, session: &UserSession, expired: bool) -> Result<(), StatsError> {
        match self.list.iter_mut().find(|s| s.matches(session)) {
            Some(existing) => existing.update_full(session, expired)?,
            None => self.list.push(SessionStats::new_full(session, expired)),
        }
        self.recompute_rates();
        Ok(())
    }

    /// Light update path (`allTime` summary): counters and bounce rate only.
    pub fn simple_update(&mut self, session: &UserSession) {
        match self.list.iter_mut().find(|s| s.matches(session)) {
            Some(existing) => existing.update_simple(session),
            None => self.list.push(SessionStats::new_simple(session)),
        }
        self.recompute_rates();
    }
}

/// Per-endpoint conversion totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionStats {
    pub endpoint: Uuid,
    pub total_value: f64,
    pub amount_stats: SimpleStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStatsList {
    pub list: Vec<ConversionStats>,
}

impl ConversionStatsList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only fires for conversion actions carrying a numeric `amount`
    /// property, grounded on `ConversionStatsList.Update`.
    pub fn apply(&mut self, i: &Interaction, endpoint: Uuid) -> Result<(), StatsError> {
        if !i.is_conversion() {
            return Ok(());
        }
        let Some(amount) = i.amount() else {
            return Ok(());
        };
        match self.list.iter_mut().find(|c| c.endpoint == endpoint) {
            Some(existing) => {
                existing.total_value += amount;
                existing.amount_stats.update(PropertyValue::Number(amount))?;
            }
            None => self.list.push(ConversionStats {
                endpoint,
                total_value: amount,
                amount_stats: SimpleStats::new(PropertyValue::Number(amount)),
            }),
        }
        Ok(())
    }
}

/// `totalConversions`, `totalRevenue`, `averageRevenuePerUser = totalRevenue
/// / |users|`, and an amount distribution. Grounded on `UnitMetrics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitMetrics {
    pub total_conversions: u64,
    pub total_revenue: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_revenue_per_user: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_stats: Option<SimpleStats>,
}

impl UnitMetrics {
    fn zero() -> Self {
        Self {
            total_conversions: 0,
            total_revenue: 0.0,
            average_revenue_per_user: None,
            amount_stats: None,
        }
    }

    /// Folds one conversion interaction in, recomputing ARPU against the
    /// current distinct-user count.
    fn update(&mut self, i: &Interaction, users: u64) -> Result<(), StatsError> {
        let Some(amount) = i.amount() else { return Ok(()) };
        self.total_conversions += 1;
        self.total_revenue += amount;
        if users > 0 {
            self.average_revenue_per_user = Some(self.total_revenue / users as f64);
        }
        match &mut self.amount_stats {
            Some(s) => s.update(PropertyValue::Number(amount))?,
            None => self.amount_stats = Some(SimpleStats::new(PropertyValue::Number(amount))),
        }
        Ok(())
    }

    /// `allTime` variant: same counters, no ARPU (no bounded user set).
    fn simple_update(&mut self, i: &Interaction) -> Result<(), StatsError> {
        let Some(amount) = i.amount() else { return Ok(()) };
        self.total_conversions += 1;
        self.total_revenue += amount;
        match &mut self.amount_stats {
            Some(s) => s.update(PropertyValue::Number(amount))?,
            None => self.amount_stats = Some(SimpleStats::new(PropertyValue::Number(amount))),
        }
        Ok(())
    }

    /// Folds a just-expired session's conversion revenue in at session
    /// expiry time, grounded on `UnitMetrics.SessionUpdate`.
    fn session_update(&mut self, session: &UserSession) {
        if session.conversions == 0 {
            return;
        }
        self.total_conversions += session.conversions;
        self.total_revenue += session.value;
    }
}

/// A global per-interval roll-up. Non-`allTime` summaries carry the full
/// distribution set; `allTime` carries only totals, session stats, and a
/// light `UnitMetrics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub interval: Interval,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_stats: Option<SimpleStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_type_stats: Option<SimpleStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type_stats: Option<SimpleStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_type_stats: Option<SimpleStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type_stats: Option<SimpleStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_type_stats: Option<SimpleStats>,
    pub users: HashSet<String>,
    pub session_stats: SessionStatsList,
    pub conversion_stats: ConversionStatsList,
    pub unit_metrics: UnitMetrics,
}

impl Summary {
    /// Grounded on `NewSummary`. `allTime` summaries skip every distribution
    /// stat; other intervals build the full set from the seeding event.
    pub fn new(interval: Interval, i: &Interaction, tz: chrono_tz::Tz) -> Result<Self, StatsError> {
        if interval == Interval::AllTime {
            let mut unit_metrics = UnitMetrics::zero();
            unit_metrics.simple_update(i)?;
            // session_stats is seeded on first session expiry, not here.
            let session_stats = SessionStatsList::new();
            return Ok(Self {
                interval,
                start: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
                end: DateTime::<Utc>::MAX_UTC,
                total: 1,
                action_stats: None,
                origin_type_stats: None,
                entity_type_stats: None,
                user_type_stats: None,
                device_type_stats: None,
                session_type_stats: None,
                users: HashSet::new(),
                session_stats,
                conversion_stats: ConversionStatsList::new(),
                unit_metrics,
            });
        }

        let created_at = i.created_at().with_timezone(&tz);
        let (start, end) = window(interval, created_at);
        let mut users = HashSet::new();
        users.insert(i.user_key());

        let mut unit_metrics = UnitMetrics::zero();
        unit_metrics.update(i, users.len() as u64)?;

        // Conversion-per-endpoint rows are seeded via `apply`, not here: the
        // endpoint id is resolved by the pipeline, not carried on Interaction.
        let conversion_stats = ConversionStatsList::new();

        Ok(Self {
            interval,
            start: start.with_timezone(&Utc),
            end: end.with_timezone(&Utc),
            total: 1,
            action_stats: Some(SimpleStats::new(PropertyValue::String(
                i.action.clone().unwrap_or_default(),
            ))),
            origin_type_stats: i
                .origin_type
                .clone()
                .map(|v| SimpleStats::new(PropertyValue::String(v))),
            entity_type_stats: i
                .entity_type
                .clone()
                .map(|v| SimpleStats::new(PropertyValue::String(v))),
            user_type_stats: i
                .user_type
                .clone()
                .map(|v| SimpleStats::new(PropertyValue::String(v))),
            device_type_stats: i
                .device_type
                .clone()
                .map(|v| SimpleStats::new(PropertyValue::String(v))),
            session_type_stats: i
                .session_type
                .clone()
                .map(|v| SimpleStats::new(PropertyValue::String(v))),
            users,
            session_stats: SessionStatsList::new(),
            conversion_stats,
            unit_metrics,
        })
    }

    pub fn expired(&self, i: &Interaction) -> bool {
        i.created_at() > self.end
    }

    /// Folds one interaction in. `allTime` summaries skip every distribution
    /// stat (see module docs for why the original's unconditional
    /// `ActionStats.Update` is not reproduced), incrementing only `total`
    /// and `unit_metrics`.
    pub fn apply(&mut self, i: &Interaction, endpoint: Uuid) -> Result<(), StatsError> {
        self.total += 1;
        if self.interval == Interval::AllTime {
            self.unit_metrics.simple_update(i)?;
            return Ok(());
        }

        if let Some(stats) = &mut self.action_stats {
            stats.update(PropertyValue::String(i.action.clone().unwrap_or_default()))?;
        } else if let Some(action) = &i.action {
            self.action_stats = Some(SimpleStats::new(PropertyValue::String(action.clone())));
        }
        update_optional_string(&mut self.origin_type_stats, &i.origin_type)?;
        update_optional_string(&mut self.entity_type_stats, &i.entity_type)?;
        update_optional_string(&mut self.user_type_stats, &i.user_type)?;
        update_optional_string(&mut self.device_type_stats, &i.device_type)?;
        update_optional_string(&mut self.session_type_stats, &i.session_type)?;

        self.users.insert(i.user_key());
        self.conversion_stats.apply(i, endpoint)?;
        self.unit_metrics.update(i, self.users.len() as u64)?;
        Ok(())
    }

    /// `SessionExpirationUpdate`: folds a just-expired session in, branching
    /// on `allTime` for the session-stats update variant and always folding
    /// revenue via `UnitMetrics.SessionUpdate`.
    pub fn session_expiration_update(&mut self, session: &UserSession) -> Result<(), StatsError> {
        if self.interval == Interval::AllTime {
            self.session_stats.simple_update(session);
        } else {
            self.session_stats.update(session, true)?;
        }
        self.unit_metrics.session_update(session);
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

/// Global summaries keyed by interval, lock-striped per key rather than one
/// mutex guarding a whole `HashMap` — the same dashmap usage
/// `data/cache/memory.rs` applies to rate-limit counters.
pub struct SummaryStore {
    map: DashMap<Interval, std::sync::Arc<Mutex<Summary>>>,
}

impl SummaryStore {
    pub fn new() -> Self {
        Self { map: DashMap::new() }
    }

    pub fn get(&self, interval: Interval) -> Option<std::sync::Arc<Mutex<Summary>>> {
        self.map.get(&interval).map(|e| e.value().clone())
    }

    pub fn insert(&self, interval: Interval, summary: Summary) -> std::sync::Arc<Mutex<Summary>> {
        let handle = std::sync::Arc::new(Mutex::new(summary));
        self.map.insert(interval, handle.clone());
        handle
    }

    pub fn iter(&self) -> Vec<(Interval, std::sync::Arc<Mutex<Summary>>)> {
        self.map.iter().map(|e| (*e.key(), e.value().clone())).collect()
    }
}

impl Default for SummaryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn interaction(action: &str) -> Interaction {
        Interaction {
            action: Some(action.to_string()),
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
            created_at: Some(Utc::now()),
            received_at: None,
            properties: HashMap::new(),
        }
    }

    #[test]
    fn all_time_summary_skips_distribution_stats() {
        let i = interaction("view");
        let summary = Summary::new(Interval::AllTime, &i, chrono_tz::Tz::UTC).unwrap();
        assert!(summary.action_stats.is_none());
        assert_eq!(summary.total, 1);
    }

    #[test]
    fn hourly_summary_builds_action_stats() {
        let i = interaction("view");
        let summary = Summary::new(Interval::Hourly, &i, chrono_tz::Tz::UTC).unwrap();
        assert!(summary.action_stats.is_some());
        assert_eq!(summary.total, 1);
        assert_eq!(summary.users.len(), 1);
    }

    #[test]
    fn apply_on_all_time_never_touches_action_stats() {
        let i = interaction("view");
        let mut summary = Summary::new(Interval::AllTime, &i, chrono_tz::Tz::UTC).unwrap();
        summary.apply(&i, Uuid::new_v4()).unwrap();
        assert!(summary.action_stats.is_none());
        assert_eq!(summary.total, 2);
    }

    #[test]
    fn session_stats_list_tags_duration_as_duration() {
        let mut session = UserSession::new(&interaction("view"));
        session.updated_at = session.created_at + chrono::Duration::seconds(90);

        let mut list = SessionStatsList::new();
        list.update(&session, true).unwrap();

        let duration = list.list[0].duration.as_ref().unwrap();
        assert_eq!(duration.type_tag(), "duration");
        let interactions = list.list[0].interactions.as_ref().unwrap();
        assert_eq!(interactions.type_tag(), "number");
    }

    #[test]
    fn conversion_updates_unit_metrics_and_conversion_stats() {
        let mut i = interaction("conversion");
        i.properties
            .insert("amount".to_string(), PropertyValue::Number(10.0));
        let endpoint = Uuid::new_v4();
        let mut summary = Summary::new(Interval::Hourly, &i, chrono_tz::Tz::UTC).unwrap();
        assert_eq!(summary.unit_metrics.total_revenue, 10.0);
        assert_eq!(summary.conversion_stats.list.len(), 0);

        summary.apply(&i, endpoint).unwrap();
        assert_eq!(summary.conversion_stats.list.len(), 1);
        assert_eq!(summary.conversion_stats.list[0].total_value, 10.0);
        assert_eq!(summary.unit_metrics.total_revenue, 20.0);
    }
}
