//! The `Interaction` input record plus validation, fingerprinting, and
//! the client-timestamp probing behaviour.
//!
//! Grounded on `original_source/types/interaction.go` (fields, validation
//! rules) and `original_source/ingest/*` (timestamp format probe list).

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::stats::PropertyValue;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: action")]
    MissingAction,
    #[error("missing required field: userID")]
    MissingUser,
}

/// Wire/storage shape of an interaction. `properties` accepts arbitrary
/// JSON on the way in; anything that isn't string/number/string-array/
/// number-array is silently dropped during validation, matching the
/// original's lenient property-typing behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub action: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub origin_type: Option<String>,
    pub origin_id: Option<String>,
    pub user_type: Option<String>,
    pub user_id: Option<String>,
    pub device_type: Option<String>,
    pub device_id: Option<String>,
    pub session_type: Option<String>,
    pub session_id: Option<String>,
    pub timestamp: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub received_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_properties")]
    pub properties: HashMap<String, PropertyValue>,
}

/// Properties accept arbitrary JSON on the wire; anything that isn't a
/// string, a number, or a homogeneous array of either is silently dropped
/// rather than failing the whole request.
fn deserialize_properties<'de, D>(deserializer: D) -> Result<HashMap<String, PropertyValue>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: HashMap<String, serde_json::Value> = serde::Deserialize::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(k, v)| property_value_from_json(v).map(|pv| (k, pv)))
        .collect())
}

fn property_value_from_json(value: serde_json::Value) -> Option<PropertyValue> {
    match value {
        serde_json::Value::String(s) => Some(PropertyValue::String(s)),
        serde_json::Value::Number(n) => n.as_f64().map(PropertyValue::Number),
        serde_json::Value::Array(items) => {
            if items.is_empty() {
                return None;
            }
            if items.iter().all(|v| v.is_string()) {
                Some(PropertyValue::StringArray(
                    items.into_iter().map(|v| v.as_str().unwrap().to_string()).collect(),
                ))
            } else if items.iter().all(|v| v.is_number()) {
                Some(PropertyValue::NumberArray(
                    items.into_iter().filter_map(|v| v.as_f64()).collect(),
                ))
            } else {
                None
            }
        }
        _ => None,
    }
}

pub const CONVERSION_ACTION: &str = "conversion";
/// Session type assigned by automated session detection when the client
/// omits one, matching the original's `AutomatedSessionDetectionType`.
pub const AUTOMATED_SESSION_TYPE: &str = "asd";

impl Interaction {
    /// Validate required fields and drop unsupported property shapes.
    /// Called once, at the HTTP boundary, before the interaction enters the
    /// ordering buffer.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.action.as_deref().unwrap_or("").is_empty() {
            return Err(ValidationError::MissingAction);
        }
        if self.user_id.as_deref().unwrap_or("").is_empty() {
            return Err(ValidationError::MissingUser);
        }
        Ok(())
    }

    pub fn is_conversion(&self) -> bool {
        self.action.as_deref() == Some(CONVERSION_ACTION)
    }

    /// `amount` property, if present and numeric.
    pub fn amount(&self) -> Option<f64> {
        match self.properties.get("amount") {
            Some(PropertyValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    /// Resolve `createdAt`: parse `timestamp` against the format probe
    /// list, falling back to `receivedAt` on a missing field or parse
    /// failure.
    pub fn resolve_created_at(&mut self) {
        if self.created_at.is_some() {
            return;
        }
        let received = self.received_at.unwrap_or_else(Utc::now);
        self.created_at = self
            .timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .or(Some(received));
        if self.received_at.is_none() {
            self.received_at = Some(received);
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at.unwrap_or_else(Utc::now)
    }

    /// Dash-joined natural key: `action, entityType, entityID, originType,
    /// originID` (absent fields become empty strings).
    pub fn endpoint_key(&self) -> String {
        [
            self.action.as_deref().unwrap_or(""),
            self.entity_type.as_deref().unwrap_or(""),
            self.entity_id.as_deref().unwrap_or(""),
            self.origin_type.as_deref().unwrap_or(""),
            self.origin_id.as_deref().unwrap_or(""),
        ]
        .join("-")
    }

    pub fn origin_key(&self) -> String {
        [
            self.origin_type.as_deref().unwrap_or(""),
            self.origin_id.as_deref().unwrap_or(""),
        ]
        .join("-")
    }

    pub fn entity_key(&self) -> String {
        [
            self.entity_type.as_deref().unwrap_or(""),
            self.entity_id.as_deref().unwrap_or(""),
        ]
        .join("-")
    }

    pub fn session_key(&self) -> String {
        format!(
            "{},{}",
            self.session_type.as_deref().unwrap_or(""),
            self.session_id.as_deref().unwrap_or("")
        )
    }

    /// User-natural-key used to index the session cache: `userType,userID`.
    pub fn user_key(&self) -> String {
        format!(
            "{},{}",
            self.user_type.as_deref().unwrap_or(""),
            self.user_id.as_deref().unwrap_or("")
        )
    }

    /// Dash-joined fingerprint used as the ordering buffer's key.
    pub fn fingerprint(&self) -> String {
        [
            self.action.as_deref().unwrap_or(""),
            self.entity_type.as_deref().unwrap_or(""),
            self.entity_id.as_deref().unwrap_or(""),
            self.origin_type.as_deref().unwrap_or(""),
            self.origin_id.as_deref().unwrap_or(""),
            self.user_type.as_deref().unwrap_or(""),
            self.user_id.as_deref().unwrap_or(""),
            self.device_type.as_deref().unwrap_or(""),
            self.device_id.as_deref().unwrap_or(""),
            &self.created_at().to_rfc3339(),
        ]
        .join("-")
    }

    /// CSV row persisted when `Settings.interactions_storage` is enabled.
    pub fn to_csv_row(&self) -> String {
        let properties_json = serde_json::to_string(&self.properties).unwrap_or_default();
        let fields = [
            self.action.clone().unwrap_or_default(),
            self.entity_type.clone().unwrap_or_default(),
            self.entity_id.clone().unwrap_or_default(),
            self.origin_type.clone().unwrap_or_default(),
            self.origin_id.clone().unwrap_or_default(),
            self.user_type.clone().unwrap_or_default(),
            self.user_id.clone().unwrap_or_default(),
            self.device_type.clone().unwrap_or_default(),
            self.device_id.clone().unwrap_or_default(),
            self.session_type.clone().unwrap_or_default(),
            self.session_id.clone().unwrap_or_default(),
            self.timestamp.clone().unwrap_or_default(),
            self.created_at().to_rfc3339(),
            self.received_at.unwrap_or_else(Utc::now).to_rfc3339(),
            properties_json,
        ];
        fields
            .iter()
            .map(|f| csv_escape(f))
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Growing list of timestamp formats tried, in order, against the client's
/// `timestamp` string, ordered by the formats most likely to be seen
/// first. On a successful match the winning format is moved to the front
/// of the list so subsequent calls (almost always from the same client
/// library, using the same format) try it first.
static TIMESTAMP_FORMATS: LazyLock<Mutex<Vec<&'static str>>> = LazyLock::new(|| {
    Mutex::new(vec![
        "%Y-%m-%dT%H:%M:%S%.f%:z",
        "%Y-%m-%dT%H:%M:%S%:z",
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d",
        "%a, %d %b %Y %H:%M:%S %z",
        "%A, %d-%b-%y %H:%M:%S %Z",
        "%a %b %_d %H:%M:%S %Y",
        "%b %d %Y %H:%M:%S",
        "%d/%b/%Y:%H:%M:%S %z",
        "%H:%M:%S",
        "%Y",
    ])
});

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(secs) = raw.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }

    let formats = TIMESTAMP_FORMATS.lock().clone();
    for (idx, &fmt) in formats.iter().enumerate() {
        let parsed = chrono::NaiveDateTime::parse_from_str(raw, fmt)
            .map(|naive| naive.and_utc())
            .or_else(|_| {
                chrono::NaiveDate::parse_from_str(raw, fmt)
                    .map(|date| date.and_hms_opt(0, 0, 0).unwrap().and_utc())
            });
        if let Ok(dt) = parsed {
            if idx > 0 {
                memoize_format(fmt);
            }
            return Some(dt);
        }
    }
    None
}

/// Moves a matched format to the front of the probe list.
fn memoize_format(fmt: &'static str) {
    let mut formats = TIMESTAMP_FORMATS.lock();
    if let Some(pos) = formats.iter().position(|f| *f == fmt) {
        let matched = formats.remove(pos);
        formats.insert(0, matched);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Interaction {
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
            created_at: None,
            received_at: None,
            properties: HashMap::new(),
        }
    }

    #[test]
    fn validation_requires_action_and_user() {
        let mut i = base();
        i.action = None;
        assert_eq!(i.validate(), Err(ValidationError::MissingAction));

        let mut i = base();
        i.user_id = None;
        assert_eq!(i.validate(), Err(ValidationError::MissingUser));

        assert!(base().validate().is_ok());
    }

    #[test]
    fn created_at_falls_back_to_received_at_without_timestamp() {
        let mut i = base();
        i.resolve_created_at();
        assert!(i.created_at.is_some());
    }

    #[test]
    fn created_at_parses_rfc3339() {
        let mut i = base();
        i.timestamp = Some("2024-03-15T10:42:00Z".to_string());
        i.resolve_created_at();
        assert_eq!(
            i.created_at.unwrap().to_rfc3339(),
            "2024-03-15T10:42:00+00:00"
        );
    }

    #[test]
    fn endpoint_key_joins_five_fields() {
        assert_eq!(base().endpoint_key(), "view-post-p1-page-/home");
    }

    #[test]
    fn matched_timestamp_format_is_memoized_to_the_front() {
        // "%b %d %Y %H:%M:%S" sits in the middle of the probe list; once it
        // matches, it should move to the front for the next lookup.
        assert!(parse_timestamp("Mar 15 2024 10:42:00").is_some());
        assert_eq!(
            *TIMESTAMP_FORMATS.lock().first().unwrap(),
            "%b %d %Y %H:%M:%S"
        );
    }

    #[test]
    fn unsupported_property_shapes_are_dropped_not_rejected() {
        let json = serde_json::json!({
            "action": "view",
            "userId": "u1",
            "properties": {
                "amount": 12.5,
                "tag": "vip",
                "flags": true,
                "meta": {"nested": "object"},
                "mixed": ["a", 1],
                "empty": [],
            }
        });
        let i: Interaction = serde_json::from_value(json).unwrap();
        assert_eq!(i.properties.len(), 2);
        assert!(i.properties.contains_key("amount"));
        assert!(i.properties.contains_key("tag"));
        assert!(!i.properties.contains_key("flags"));
        assert!(!i.properties.contains_key("meta"));
        assert!(!i.properties.contains_key("mixed"));
        assert!(!i.properties.contains_key("empty"));
    }
}
