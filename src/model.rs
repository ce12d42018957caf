// src/model.rs
//! Core data types shared by the fetcher, transform pipeline and loader.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;

/// Identifier of a contact (and of the transcript belonging to it).
pub type ContactId = i64;

/// A nested record as produced by the remote service and consumed by record transforms.
pub type Record = serde_json::Map<String, Value>;

/// A flattened, load-ready row. Keys are column names.
pub type Row = BTreeMap<String, Scalar>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InteractionType {
    #[serde(rename = "IM")]
    Im,
    Voice,
    Email,
}

impl InteractionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionType::Im => "IM",
            InteractionType::Voice => "Voice",
            InteractionType::Email => "Email",
        }
    }

    /// Only IM contacts carry chat transcripts.
    pub fn has_transcripts(&self) -> bool {
        matches!(self, InteractionType::Im)
    }
}

impl fmt::Display for InteractionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InteractionType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "im" => Ok(InteractionType::Im),
            "voice" => Ok(InteractionType::Voice),
            "email" => Ok(InteractionType::Email),
            other => Err(SyncError::UsageError(format!(
                "unknown interaction type `{other}` (expected IM, Voice or Email)"
            ))),
        }
    }
}

/// One raw unit fetched from the interaction service.
#[derive(Debug, Clone, PartialEq)]
pub struct InteractionRecord {
    pub interaction_id: Option<ContactId>,
    pub interaction_type: InteractionType,
    pub payload: Value,
}

impl InteractionRecord {
    pub fn new(interaction_type: InteractionType, payload: Value) -> Self {
        Self {
            interaction_id: contact_id_of(&payload),
            interaction_type,
            payload,
        }
    }
}

/// Pull the contact id out of a raw payload: `Value.ContactID`, then `ContactID`.
/// Accepts numbers and numeric strings.
pub fn contact_id_of(payload: &Value) -> Option<ContactId> {
    let raw = payload
        .get("Value")
        .and_then(|v| v.get("ContactID"))
        .or_else(|| payload.get("ContactID"))?;
    match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A single load-ready cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Explicit missing value; loads as SQL NULL.
    Absent,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Non-finite floats never reach the store.
    pub fn float(f: f64) -> Self {
        if f.is_finite() {
            Scalar::Float(f)
        } else {
            Scalar::Absent
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Scalar::Absent)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&Value> for Scalar {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => Scalar::Absent,
            Value::Bool(b) => Scalar::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Scalar::Int(i),
                None => n.as_f64().map(Scalar::float).unwrap_or(Scalar::Absent),
            },
            Value::String(s) => Scalar::Text(s.clone()),
            nested => Scalar::Text(nested.to_string()),
        }
    }
}

impl From<&Scalar> for Value {
    fn from(s: &Scalar) -> Self {
        match s {
            Scalar::Absent => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Int(i) => Value::from(*i),
            Scalar::Float(f) => Value::from(*f),
            Scalar::Text(t) => Value::String(t.clone()),
        }
    }
}

/// Flatten a transformed record into a load-ready row.
pub fn row_from_record(record: &Record) -> Row {
    record
        .iter()
        .map(|(k, v)| (k.clone(), Scalar::from(v)))
        .collect()
}

/// Inclusive day range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// Remote timestamp format, microsecond precision.
pub const SERVICE_TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";
pub const DAY_FORMAT: &str = "%Y-%m-%d";

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, SyncError> {
        if end < start {
            return Err(SyncError::UsageError(format!(
                "end date {end} is before start date {start}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn single(day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    /// Both bounds or neither. Neither means "no explicit range".
    pub fn resolve(start: Option<&str>, end: Option<&str>) -> Result<Option<Self>, SyncError> {
        match (start, end) {
            (None, None) => Ok(None),
            (Some(s), Some(e)) => Ok(Some(Self::new(parse_day(s)?, parse_day(e)?)?)),
            _ => Err(SyncError::UsageError(
                "provide both start and end dates, or neither".into(),
            )),
        }
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    pub fn len_days(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }
}

pub fn parse_day(s: &str) -> Result<NaiveDate, SyncError> {
    NaiveDate::parse_from_str(s.trim(), DAY_FORMAT)
        .map_err(|e| SyncError::UsageError(format!("invalid date `{s}`: {e}")))
}

/// `[00:00:00.000000, 23:59:59.999000]` for one calendar day, in the service format.
pub fn day_window(day: NaiveDate) -> (String, String) {
    let start = day.and_time(NaiveTime::MIN);
    let end = start + Duration::days(1) - Duration::milliseconds(1);
    (
        start.format(SERVICE_TS_FORMAT).to_string(),
        end.format(SERVICE_TS_FORMAT).to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn interaction_type_parses_case_insensitively() {
        assert_eq!("im".parse::<InteractionType>().unwrap(), InteractionType::Im);
        assert_eq!(
            " VOICE ".parse::<InteractionType>().unwrap(),
            InteractionType::Voice
        );
        assert!("fax".parse::<InteractionType>().is_err());
        assert_eq!(InteractionType::Im.to_string(), "IM");
    }

    #[test]
    fn contact_id_from_nested_or_flat_payload() {
        assert_eq!(contact_id_of(&json!({"Value": {"ContactID": 42}})), Some(42));
        assert_eq!(contact_id_of(&json!({"ContactID": "17"})), Some(17));
        assert_eq!(contact_id_of(&json!({"Other": 1})), None);
    }

    #[test]
    fn day_window_spans_one_day() {
        let d = NaiveDate::from_ymd_opt(2019, 3, 1).unwrap();
        let (s, e) = day_window(d);
        assert_eq!(s, "2019-03-01T00:00:00.000000");
        assert_eq!(e, "2019-03-01T23:59:59.999000");
    }

    #[test]
    fn resolve_requires_both_bounds() {
        assert!(DateRange::resolve(None, None).unwrap().is_none());
        assert!(DateRange::resolve(Some("2019-01-01"), None).is_err());
        assert!(DateRange::resolve(Some("2019-01-02"), Some("2019-01-01")).is_err());
        let r = DateRange::resolve(Some("2019-01-30"), Some("2019-02-02"))
            .unwrap()
            .unwrap();
        assert_eq!(r.len_days(), 4);
        assert_eq!(r.days().count(), 4);
    }

    #[test]
    fn non_finite_floats_become_absent() {
        assert_eq!(Scalar::float(f64::NAN), Scalar::Absent);
        assert_eq!(Scalar::float(1.5), Scalar::Float(1.5));
        assert_eq!(Scalar::from(&json!([1, 2])), Scalar::Text("[1,2]".into()));
    }
}
