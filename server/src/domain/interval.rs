//! Calendar intervals and the generic composite-key bucket store.
//!
//! The store key is the tuple `(K, Interval)` used directly as a `HashMap` key —
//! not the original's 32-bit FNV-1a hash of `"{id}-{interval}"` — eliminating
//! the collision risk flagged as an open question. The rollover dead-store
//! bug (`original_source/types/origin_stats.go`'s `o = newStats; return nil`,
//! never reinstalled into the index) is fixed here: `apply` always writes the
//! rolled bucket back into the primary map under the same key.

use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike};
use chrono_tz::Tz;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Interval {
    AllTime,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl Interval {
    pub const ALL: [Interval; 7] = [
        Interval::AllTime,
        Interval::Hourly,
        Interval::Daily,
        Interval::Weekly,
        Interval::Monthly,
        Interval::Quarterly,
        Interval::Yearly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::AllTime => "allTime",
            Interval::Hourly => "hourly",
            Interval::Daily => "daily",
            Interval::Weekly => "weekly",
            Interval::Monthly => "monthly",
            Interval::Quarterly => "quarterly",
            Interval::Yearly => "yearly",
        }
    }

    pub fn from_str(s: &str) -> Option<Interval> {
        Interval::ALL.into_iter().find(|i| i.as_str() == s)
    }
}

/// `[start, end)` window containing `t`, per the bucket-assignment table.
/// `allTime` uses `start = epoch zero`, `end = chrono's max representable
/// time`, and is never rolled over.
pub fn window(interval: Interval, t: DateTime<Tz>) -> (DateTime<Tz>, DateTime<Tz>) {
    let tz = t.timezone();
    match interval {
        Interval::AllTime => (
            tz.timestamp_opt(0, 0).single().expect("epoch is representable"),
            DateTime::<chrono::Utc>::MAX_UTC.with_timezone(&tz),
        ),
        Interval::Hourly => {
            let start = t
                .with_minute(0)
                .and_then(|d| d.with_second(0))
                .and_then(|d| d.with_nanosecond(0))
                .expect("valid hour truncation");
            (start, start + Duration::hours(1) - Duration::nanoseconds(1))
        }
        Interval::Daily => {
            let start = t
                .with_hour(0)
                .and_then(|d| d.with_minute(0))
                .and_then(|d| d.with_second(0))
                .and_then(|d| d.with_nanosecond(0))
                .expect("valid day truncation");
            (start, start + Duration::days(1) - Duration::nanoseconds(1))
        }
        Interval::Weekly => {
            let day_start = t
                .with_hour(0)
                .and_then(|d| d.with_minute(0))
                .and_then(|d| d.with_second(0))
                .and_then(|d| d.with_nanosecond(0))
                .expect("valid day truncation");
            let days_since_monday = day_start.weekday().num_days_from_monday() as i64;
            let start = day_start - Duration::days(days_since_monday);
            (start, start + Duration::weeks(1) - Duration::nanoseconds(1))
        }
        Interval::Monthly => {
            let (year, month) = (t.year(), t.month());
            let start = tz
                .with_ymd_and_hms(year, month, 1, 0, 0, 0)
                .single()
                .expect("valid month start");
            let (next_year, next_month) = if month == 12 {
                (year + 1, 1)
            } else {
                (year, month + 1)
            };
            let end = tz
                .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
                .single()
                .expect("valid next month start")
                - Duration::nanoseconds(1);
            (start, end)
        }
        Interval::Quarterly => {
            let year = t.year();
            let quarter_start_month = ((t.month() - 1) / 3) * 3 + 1;
            let start = tz
                .with_ymd_and_hms(year, quarter_start_month, 1, 0, 0, 0)
                .single()
                .expect("valid quarter start");
            let (next_year, next_month) = if quarter_start_month >= 10 {
                (year + 1, 1)
            } else {
                (year, quarter_start_month + 3)
            };
            let end = tz
                .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
                .single()
                .expect("valid next quarter start")
                - Duration::nanoseconds(1);
            (start, end)
        }
        Interval::Yearly => {
            let year = t.year();
            let start = tz
                .with_ymd_and_hms(year, 1, 1, 0, 0, 0)
                .single()
                .expect("valid year start");
            let end = tz
                .with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0)
                .single()
                .expect("valid next year start")
                - Duration::nanoseconds(1);
            (start, end)
        }
    }
}

/// One `(start, end, profile)` bucket, generic over the dimension-specific
/// payload `P` (an `EndpointProfile`/`OriginProfile`/`EntityProfile`/
/// `SimpleStats`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket<P> {
    pub interval: Interval,
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
    pub profile: P,
}

/// A dimension-keyed, interval-keyed store of `Bucket<P>`, plus a parallel
/// dirty set drained by the post-batch write-behind. `K` is `uuid::Uuid` for
/// the Endpoint/Origin/Entity stores, `String` for the property store.
pub struct IntervalStatsStore<K, P> {
    inner: Mutex<StoreInner<K, P>>,
}

struct StoreInner<K, P> {
    index: HashMap<(K, Interval), Bucket<P>>,
    dirty: HashMap<(K, Interval), Bucket<P>>,
}

impl<K, P> IntervalStatsStore<K, P>
where
    K: Eq + Hash + Clone,
    P: Clone,
{
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                index: HashMap::new(),
                dirty: HashMap::new(),
            }),
        }
    }

    pub fn get(&self, id: &K, interval: Interval) -> Option<Bucket<P>> {
        self.inner.lock().index.get(&(id.clone(), interval)).cloned()
    }

    /// `apply`: create-or-roll-or-update the bucket for `(id, interval)` at
    /// time `t`. `new_profile` builds a fresh payload for bucket creation or
    /// rollover; `apply_profile` mutates an existing, still-current bucket.
    pub fn apply(
        &self,
        id: &K,
        interval: Interval,
        t: DateTime<Tz>,
        new_profile: impl FnOnce() -> P,
        apply_profile: impl FnOnce(&mut P),
    ) {
        let mut inner = self.inner.lock();
        let key = (id.clone(), interval);
        match inner.index.get_mut(&key) {
            None => {
                let (start, end) = window(interval, t);
                let bucket = Bucket {
                    interval,
                    start,
                    end,
                    profile: new_profile(),
                };
                inner.index.insert(key.clone(), bucket.clone());
                inner.dirty.insert(key, bucket);
            }
            Some(existing) => {
                if t > existing.end && interval != Interval::AllTime {
                    let (start, end) = window(interval, t);
                    let bucket = Bucket {
                        interval,
                        start,
                        end,
                        profile: new_profile(),
                    };
                    // Rollover fix: reinstall under the same key rather than
                    // discarding the replacement in a local variable.
                    inner.index.insert(key.clone(), bucket.clone());
                    inner.dirty.insert(key, bucket);
                } else {
                    apply_profile(&mut existing.profile);
                    let updated = existing.clone();
                    inner.dirty.insert(key, updated);
                }
            }
        }
    }

    /// Rehydrate without marking dirty.
    pub fn load(&self, id: K, interval: Interval, bucket: Bucket<P>) {
        self.inner.lock().index.insert((id, interval), bucket);
    }

    pub fn drain_dirty(&self, mut visitor: impl FnMut(&K, &Bucket<P>)) {
        let dirty: Vec<((K, Interval), Bucket<P>)> = {
            let mut inner = self.inner.lock();
            inner.dirty.drain().collect()
        };
        for ((id, _interval), bucket) in dirty {
            visitor(&id, &bucket);
        }
    }

    /// All buckets for `id`, one per `Interval::ALL`. Any non-`allTime`
    /// bucket whose `end < now` is reported as `None` (stale placeholder)
    /// without mutating the stored bucket — rollover happens lazily, only
    /// when the next event for that dimension arrives.
    pub fn all_interval_stats(&self, id: &K, now: DateTime<Tz>) -> Vec<(Interval, Option<Bucket<P>>)> {
        let inner = self.inner.lock();
        Interval::ALL
            .into_iter()
            .map(|interval| {
                let bucket = inner.index.get(&(id.clone(), interval)).cloned();
                let bucket = match &bucket {
                    Some(b) if interval != Interval::AllTime && b.end < now => None,
                    other => other.clone(),
                };
                (interval, bucket)
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }
}

impl<K, P> Default for IntervalStatsStore<K, P>
where
    K: Eq + Hash + Clone,
    P: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn dt(s: &str) -> DateTime<Tz> {
        chrono::DateTime::parse_from_rfc3339(s)
            .unwrap()
            .with_timezone(&Tz::UTC)
    }

    #[test]
    fn bucket_assignment_matches_table() {
        let t = dt("2024-03-15T10:42:00Z");
        assert_eq!(window(Interval::Hourly, t).0, dt("2024-03-15T10:00:00Z"));
        assert_eq!(window(Interval::Daily, t).0, dt("2024-03-15T00:00:00Z"));
        assert_eq!(window(Interval::Weekly, t).0, dt("2024-03-11T00:00:00Z"));
        assert_eq!(window(Interval::Monthly, t).0, dt("2024-03-01T00:00:00Z"));
        assert_eq!(window(Interval::Quarterly, t).0, dt("2024-01-01T00:00:00Z"));
        assert_eq!(window(Interval::Yearly, t).0, dt("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn apply_creates_then_updates_same_bucket() {
        let store: IntervalStatsStore<Uuid, u64> = IntervalStatsStore::new();
        let id = Uuid::new_v4();
        let t1 = dt("2024-03-15T10:10:00Z");
        store.apply(&id, Interval::Hourly, t1, || 1u64, |p| *p += 1);
        assert_eq!(store.get(&id, Interval::Hourly).unwrap().profile, 1);

        let t2 = dt("2024-03-15T10:40:00Z");
        store.apply(&id, Interval::Hourly, t2, || 1u64, |p| *p += 1);
        assert_eq!(store.get(&id, Interval::Hourly).unwrap().profile, 2);
    }

    #[test]
    fn apply_rolls_over_and_reinstalls_under_same_key() {
        let store: IntervalStatsStore<Uuid, u64> = IntervalStatsStore::new();
        let id = Uuid::new_v4();
        let t1 = dt("2024-03-15T10:10:00Z");
        store.apply(&id, Interval::Hourly, t1, || 1u64, |p| *p += 1);

        let t2 = dt("2024-03-15T11:05:00Z");
        store.apply(&id, Interval::Hourly, t2, || 1u64, |p| *p += 1);

        let bucket = store.get(&id, Interval::Hourly).unwrap();
        assert_eq!(bucket.profile, 1, "rollover resets to a fresh profile");
        assert_eq!(bucket.start, dt("2024-03-15T11:00:00Z"));
    }

    #[test]
    fn all_time_never_rolls_over() {
        let store: IntervalStatsStore<Uuid, u64> = IntervalStatsStore::new();
        let id = Uuid::new_v4();
        store.apply(&id, Interval::AllTime, dt("2024-03-15T10:10:00Z"), || 1u64, |p| *p += 1);
        store.apply(&id, Interval::AllTime, dt("2025-01-01T00:00:00Z"), || 1u64, |p| *p += 1);
        assert_eq!(store.get(&id, Interval::AllTime).unwrap().profile, 2);
    }

    #[test]
    fn all_interval_stats_reports_stale_bucket_as_placeholder_without_mutating() {
        let store: IntervalStatsStore<Uuid, u64> = IntervalStatsStore::new();
        let id = Uuid::new_v4();
        store.apply(&id, Interval::Hourly, dt("2024-03-15T10:10:00Z"), || 1u64, |p| *p += 1);

        let now = dt("2024-03-15T12:00:00Z");
        let all = store.all_interval_stats(&id, now);
        let hourly = all.iter().find(|(i, _)| *i == Interval::Hourly).unwrap();
        assert!(hourly.1.is_none());

        // Stored bucket is untouched; a same-window apply still sees total==1.
        assert_eq!(store.get(&id, Interval::Hourly).unwrap().profile, 1);
    }
}
