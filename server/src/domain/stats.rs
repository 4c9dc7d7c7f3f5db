//! Stat primitives: running count/mean/variance over scalar, categorical,
//! array, and duration samples.
//!
//! Grounded on `original_source/types/stats_simple.go`'s `SimpleStats` /
//! `SimpleValueStats`. The Welford-style numeric recurrence and the
//! binomial-per-category variance formula are reproduced exactly; the
//! original's side-effecting `sort.Sort(s)` (which permanently reorders
//! `Values` every update) is replaced with a stable sort over a throwaway
//! copy so insertion order — and therefore tie-breaking — stays observable.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StatsError {
    #[error("incorrect data type: stats are {expected} but update value is {actual}")]
    IncorrectDataType {
        expected: &'static str,
        actual: &'static str,
    },
}

/// A single property value as accepted by validation: string, number, or a
/// homogeneous array of either. Any other JSON shape is rejected upstream.
/// `Duration` is never produced by validation — it is the runtime type
/// `SessionStats` seeds a session's duration samples with, so the
/// resulting `SimpleStats` is tagged `"duration"` on the wire instead of
/// `"number"`. It sorts last so untagged deserialization of a plain JSON
/// number still resolves to `Number`, matching prior behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    String(String),
    Number(f64),
    StringArray(Vec<String>),
    NumberArray(Vec<f64>),
    Duration(f64),
}

impl PropertyValue {
    pub fn type_tag(&self) -> &'static str {
        match self {
            PropertyValue::String(_) => "string",
            PropertyValue::Number(_) => "number",
            PropertyValue::StringArray(_) => "string-array",
            PropertyValue::NumberArray(_) => "number-array",
            PropertyValue::Duration(_) => "duration",
        }
    }
}

/// `(value, count, percentage)` for one unique value seen by a `SimpleStats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleValueStats {
    pub value: PropertyValue,
    pub count: u64,
    pub percentage: f64,
}

impl SimpleValueStats {
    fn new(value: PropertyValue) -> Self {
        Self {
            value,
            count: 1,
            percentage: 0.0,
        }
    }
}

/// Categorical side: every unique value seen, its count, percentage, and a
/// per-value variance/stddev (binomial per-category).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoricalState {
    pub values: Vec<SimpleValueStats>,
    pub variance: Vec<f64>,
    pub std_dev: Vec<f64>,
    /// Index into `values` of the current mode (max count, first-seen on ties).
    pub mode_index: usize,
    /// Index into a count-ascending-sorted view of `values` representing the
    /// "mean" category, per `meanIndex()`.
    pub mean_index: usize,
}

/// Running mean/variance for numeric samples (Welford recurrence).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumericState {
    pub mean: f64,
    pub variance: f64,
    pub std_dev: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SimpleStats {
    String {
        total: u64,
        #[serde(flatten)]
        state: CategoricalState,
    },
    Number {
        total: u64,
        #[serde(flatten)]
        state: NumericState,
        /// Value-frequency table is still tracked for numeric samples so
        /// `mode`/distribution queries work the same as categorical types.
        #[serde(flatten)]
        freq: CategoricalState,
    },
    Duration {
        total: u64,
        #[serde(flatten)]
        state: NumericState,
        #[serde(flatten)]
        freq: CategoricalState,
    },
    StringArray {
        total: u64,
        #[serde(flatten)]
        state: CategoricalState,
    },
    NumberArray {
        total: u64,
        #[serde(flatten)]
        state: CategoricalState,
    },
}

fn new_categorical(initial: PropertyValue) -> CategoricalState {
    CategoricalState {
        values: vec![SimpleValueStats::new(initial)],
        variance: vec![0.0],
        std_dev: vec![0.0],
        mode_index: 0,
        mean_index: 0,
    }
}

fn recompute_categorical(state: &mut CategoricalState) {
    let sum: u64 = state.values.iter().map(|v| v.count).sum();
    let sum_f = sum as f64;
    for v in state.values.iter_mut() {
        v.percentage = v.count as f64 / sum_f;
    }
    state.variance = state
        .values
        .iter()
        .map(|v| {
            let p = v.count as f64 / sum_f;
            v.count as f64 * (1.0 - p)
        })
        .collect();
    state.std_dev = state.variance.iter().map(|v| v.sqrt()).collect();

    // mode: first value with strictly-greatest count wins ties.
    let mut mode_index = 0;
    let mut max_count = 0u64;
    for (i, v) in state.values.iter().enumerate() {
        if v.count > max_count {
            max_count = v.count;
            mode_index = i;
        }
    }
    state.mode_index = mode_index;

    // meanIndex: stable sort a copy ascending by count, weighted-average index.
    let mut order: Vec<usize> = (0..state.values.len()).collect();
    order.sort_by_key(|&i| state.values[i].count);
    let mut weighted = 0.0;
    for (rank, &idx) in order.iter().enumerate() {
        weighted += rank as f64 * state.values[idx].count as f64;
    }
    let mean_rank = (weighted / sum_f).round() as usize;
    let mean_rank = mean_rank.min(order.len().saturating_sub(1));
    state.mean_index = order[mean_rank];
}

fn categorical_update(state: &mut CategoricalState, value: PropertyValue) {
    match state.values.iter_mut().find(|v| v.value == value) {
        Some(existing) => existing.count += 1,
        None => state.values.push(SimpleValueStats::new(value)),
    }
    recompute_categorical(state);
}

impl SimpleStats {
    /// Construct from the first observed sample, dispatching on its runtime type.
    pub fn new(value: PropertyValue) -> Self {
        match value {
            PropertyValue::String(_) => SimpleStats::String {
                total: 1,
                state: new_categorical_recomputed(value),
            },
            PropertyValue::Number(v) => SimpleStats::Number {
                total: 1,
                state: NumericState {
                    mean: v,
                    variance: 0.0,
                    std_dev: 0.0,
                },
                freq: new_categorical_recomputed(PropertyValue::Number(v)),
            },
            PropertyValue::StringArray(ref items) => {
                let mut state = CategoricalState {
                    values: Vec::new(),
                    variance: Vec::new(),
                    std_dev: Vec::new(),
                    mode_index: 0,
                    mean_index: 0,
                };
                for item in items {
                    categorical_update(&mut state, PropertyValue::String(item.clone()));
                }
                SimpleStats::StringArray { total: 1, state }
            }
            PropertyValue::NumberArray(ref items) => {
                let mut state = CategoricalState {
                    values: Vec::new(),
                    variance: Vec::new(),
                    std_dev: Vec::new(),
                    mode_index: 0,
                    mean_index: 0,
                };
                for item in items {
                    categorical_update(&mut state, PropertyValue::Number(*item));
                }
                SimpleStats::NumberArray { total: 1, state }
            }
            PropertyValue::Duration(v) => SimpleStats::Duration {
                total: 1,
                state: NumericState {
                    mean: v,
                    variance: 0.0,
                    std_dev: 0.0,
                },
                freq: new_categorical_recomputed(PropertyValue::Duration(v)),
            },
        }
    }

    pub fn type_tag(&self) -> &'static str {
        match self {
            SimpleStats::String { .. } => "string",
            SimpleStats::Number { .. } => "number",
            SimpleStats::Duration { .. } => "duration",
            SimpleStats::StringArray { .. } => "string-array",
            SimpleStats::NumberArray { .. } => "number-array",
        }
    }

    pub fn total(&self) -> u64 {
        match self {
            SimpleStats::String { total, .. }
            | SimpleStats::Number { total, .. }
            | SimpleStats::Duration { total, .. }
            | SimpleStats::StringArray { total, .. }
            | SimpleStats::NumberArray { total, .. } => *total,
        }
    }

    pub fn mode(&self) -> Option<PropertyValue> {
        match self {
            SimpleStats::String { state, .. }
            | SimpleStats::StringArray { state, .. }
            | SimpleStats::NumberArray { state, .. } => {
                state.values.get(state.mode_index).map(|v| v.value.clone())
            }
            SimpleStats::Number { freq, .. } | SimpleStats::Duration { freq, .. } => {
                freq.values.get(freq.mode_index).map(|v| v.value.clone())
            }
        }
    }

    pub fn mean_value(&self) -> Option<PropertyValue> {
        match self {
            SimpleStats::Number { state, .. } => Some(PropertyValue::Number(state.mean)),
            SimpleStats::Duration { state, .. } => Some(PropertyValue::Duration(state.mean)),
            SimpleStats::String { state, .. }
            | SimpleStats::StringArray { state, .. }
            | SimpleStats::NumberArray { state, .. } => {
                state.values.get(state.mean_index).map(|v| v.value.clone())
            }
        }
    }

    /// Update with a new sample; fails if `value`'s type tag differs from
    /// the type this `SimpleStats` was constructed with.
    pub fn update(&mut self, value: PropertyValue) -> Result<(), StatsError> {
        let actual = value.type_tag();
        match self {
            SimpleStats::String { total, state } => {
                let PropertyValue::String(_) = &value else {
                    return Err(StatsError::IncorrectDataType {
                        expected: "string",
                        actual,
                    });
                };
                categorical_update(state, value);
                *total += 1;
            }
            SimpleStats::Number { total, state, freq } => {
                let PropertyValue::Number(v) = value else {
                    return Err(StatsError::IncorrectDataType {
                        expected: "number",
                        actual,
                    });
                };
                let n = *total as f64;
                let old_mean = state.mean;
                let new_mean = (n * old_mean + v) / (n + 1.0);
                state.mean = new_mean;
                *total += 1;
                if *total >= 2 {
                    let nn = *total as f64;
                    state.variance =
                        ((nn - 2.0) * state.variance + (v - new_mean) * (v - old_mean)) / (nn - 1.0);
                    state.std_dev = state.variance.max(0.0).sqrt();
                }
                categorical_update(freq, PropertyValue::Number(v));
            }
            SimpleStats::Duration { total, state, freq } => {
                let PropertyValue::Duration(v) = value else {
                    return Err(StatsError::IncorrectDataType {
                        expected: "duration",
                        actual,
                    });
                };
                let n = *total as f64;
                let old_mean = state.mean;
                let new_mean = (n * old_mean + v) / (n + 1.0);
                state.mean = new_mean;
                *total += 1;
                if *total >= 2 {
                    let nn = *total as f64;
                    state.variance =
                        ((nn - 2.0) * state.variance + (v - new_mean) * (v - old_mean)) / (nn - 1.0);
                    state.std_dev = state.variance.max(0.0).sqrt();
                }
                categorical_update(freq, PropertyValue::Duration(v));
            }
            SimpleStats::StringArray { total, state } => {
                let PropertyValue::StringArray(items) = &value else {
                    return Err(StatsError::IncorrectDataType {
                        expected: "string-array",
                        actual,
                    });
                };
                for item in items.clone() {
                    categorical_update(state, PropertyValue::String(item));
                }
                *total += 1;
            }
            SimpleStats::NumberArray { total, state } => {
                let PropertyValue::NumberArray(items) = &value else {
                    return Err(StatsError::IncorrectDataType {
                        expected: "number-array",
                        actual,
                    });
                };
                for item in items.clone() {
                    categorical_update(state, PropertyValue::Number(item));
                }
                *total += 1;
            }
        }
        Ok(())
    }
}

fn new_categorical_recomputed(value: PropertyValue) -> CategoricalState {
    let mut state = new_categorical(value);
    recompute_categorical(&mut state);
    state
}

/// List of `(name, SimpleStats)` pairs, append-on-first-sight, each name
/// typed by its first observed value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamedSimpleStatsList {
    entries: Vec<(String, SimpleStats)>,
}

impl NamedSimpleStatsList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, name: &str, value: PropertyValue) -> Result<(), StatsError> {
        match self.entries.iter_mut().find(|(n, _)| n == name) {
            Some((_, stats)) => stats.update(value),
            None => {
                self.entries.push((name.to_string(), SimpleStats::new(value)));
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&SimpleStats> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, SimpleStats)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_mean_and_variance_match_sample_stats() {
        let samples = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut stats = SimpleStats::new(PropertyValue::Number(samples[0]));
        for &v in &samples[1..] {
            stats.update(PropertyValue::Number(v)).unwrap();
        }
        assert_eq!(stats.total(), samples.len() as u64);

        let mean: f64 = samples.iter().sum::<f64>() / samples.len() as f64;
        let variance: f64 = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
            / (samples.len() as f64 - 1.0);

        let SimpleStats::Number { state, .. } = &stats else {
            panic!("expected Number variant");
        };
        assert!((state.mean - mean).abs() < 1e-9);
        assert!((state.variance - variance).abs() < 1e-9);
    }

    #[test]
    fn categorical_invariants_hold() {
        let mut stats = SimpleStats::new(PropertyValue::String("a".into()));
        stats.update(PropertyValue::String("b".into())).unwrap();
        stats.update(PropertyValue::String("a".into())).unwrap();
        stats.update(PropertyValue::String("a".into())).unwrap();

        let SimpleStats::String { total, state } = &stats else {
            panic!("expected String variant");
        };
        assert_eq!(*total, 4);
        let sum: u64 = state.values.iter().map(|v| v.count).sum();
        assert_eq!(sum, *total);
        let pct_sum: f64 = state.values.iter().map(|v| v.percentage).sum();
        assert!((pct_sum - 1.0).abs() < 1e-9);

        // "a" has count 3 out of 4 -> variance = 3 * (1 - 3/4) = 0.75
        let a = state.values.iter().find(|v| v.value == PropertyValue::String("a".into())).unwrap();
        assert_eq!(a.count, 3);
        let idx = state.values.iter().position(|v| v.value == a.value).unwrap();
        assert!((state.variance[idx] - 0.75).abs() < 1e-9);

        assert_eq!(stats.mode(), Some(PropertyValue::String("a".into())));
    }

    #[test]
    fn mismatched_type_update_errors() {
        let mut stats = SimpleStats::new(PropertyValue::Number(1.0));
        let err = stats.update(PropertyValue::String("x".into())).unwrap_err();
        assert_eq!(
            err,
            StatsError::IncorrectDataType {
                expected: "number",
                actual: "string",
            }
        );
    }

    #[test]
    fn duration_samples_tag_as_duration_not_number() {
        let mut stats = SimpleStats::new(PropertyValue::Duration(5.0));
        stats.update(PropertyValue::Duration(15.0)).unwrap();

        assert_eq!(stats.type_tag(), "duration");
        assert_eq!(stats.total(), 2);
        let SimpleStats::Duration { state, .. } = &stats else {
            panic!("expected Duration variant");
        };
        assert!((state.mean - 10.0).abs() < 1e-9);

        let err = stats.update(PropertyValue::Number(1.0)).unwrap_err();
        assert_eq!(
            err,
            StatsError::IncorrectDataType {
                expected: "duration",
                actual: "number",
            }
        );
    }

    #[test]
    fn mode_ties_break_by_insertion_order() {
        let mut stats = SimpleStats::new(PropertyValue::String("first".into()));
        stats.update(PropertyValue::String("second".into())).unwrap();
        // both now have count 1; "first" was inserted first and must remain mode.
        assert_eq!(stats.mode(), Some(PropertyValue::String("first".into())));
    }
}
