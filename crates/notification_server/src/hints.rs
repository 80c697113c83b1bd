//! Typed hint values and the well-known hint keys.
//!
//! The freedesktop.org notification protocol transports hints as `a{sv}`. Inside the server every hint is
//! normalized into a [`HintValue`], which is what gets stored, compared and handed to observers.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use zbus::zvariant::{OwnedValue, Value};

pub type Hints = BTreeMap<String, HintValue>;

/// Well-known hint keys.
pub mod keys {
    pub const URGENCY: &str = "urgency";
    pub const CATEGORY: &str = "category";
    pub const TRANSIENT: &str = "transient";
    pub const RESIDENT: &str = "resident";
    pub const DESKTOP_ENTRY: &str = "desktop-entry";
    pub const IMAGE_PATH: &str = "image-path";
    pub const IMAGE_DATA: &str = "image-data";
    /// Deprecated spellings of `image-data` that some clients still send.
    pub const IMAGE_DATA_LEGACY: [&str; 2] = ["image_data", "icon_data"];

    pub const PRIORITY: &str = "x-priority";
    pub const TIMESTAMP: &str = "x-timestamp";
    pub const USER_REMOVABLE: &str = "x-user-removable";
    pub const OWNER: &str = "x-owner";
    pub const ICON: &str = "x-icon";
    pub const PREVIEW_SUMMARY: &str = "x-preview-summary";
    pub const PREVIEW_BODY: &str = "x-preview-body";
    pub const ITEM_COUNT: &str = "x-item-count";
    pub const FEEDBACK: &str = "x-feedback";
    pub const REMOTE_ACTION_PREFIX: &str = "x-remote-action-";

    /// Keys mirrored into typed accessors on [`crate::Notification`].
    pub const STRUCTURAL: [&str; 14] = [
        URGENCY,
        CATEGORY,
        TRANSIENT,
        RESIDENT,
        IMAGE_PATH,
        PRIORITY,
        TIMESTAMP,
        USER_REMOVABLE,
        OWNER,
        ICON,
        PREVIEW_SUMMARY,
        PREVIEW_BODY,
        ITEM_COUNT,
        FEEDBACK,
    ];

    pub fn is_structural(key: &str) -> bool {
        STRUCTURAL.contains(&key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum HintValue {
    String(String),
    Int(i64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    Binary(Vec<u8>),
}

impl HintValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HintValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            HintValue::Int(i) => Some(*i),
            HintValue::Bool(b) => Some(*b as i64),
            HintValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HintValue::Bool(b) => Some(*b),
            HintValue::Int(i) => Some(*i != 0),
            HintValue::String(s) => match s.trim() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            HintValue::Timestamp(t) => Some(*t),
            HintValue::String(s) => parse_timestamp(s),
            _ => None,
        }
    }

    /// Interpret a plain string coming from a key/value definition file.
    pub fn from_definition(value: &str) -> HintValue {
        match value {
            "true" => HintValue::Bool(true),
            "false" => HintValue::Bool(false),
            _ => match value.parse::<i64>() {
                Ok(i) => HintValue::Int(i),
                Err(_) => HintValue::String(value.to_owned()),
            },
        }
    }

    /// Convert an incoming bus value. Returns `None` for types that have no hint representation.
    pub fn from_value(value: &Value<'_>) -> Option<HintValue> {
        match value {
            Value::Str(s) => Some(HintValue::String(s.to_string())),
            Value::ObjectPath(p) => Some(HintValue::String(p.to_string())),
            Value::Bool(b) => Some(HintValue::Bool(*b)),
            Value::U8(v) => Some(HintValue::Int(*v as i64)),
            Value::I16(v) => Some(HintValue::Int(*v as i64)),
            Value::U16(v) => Some(HintValue::Int(*v as i64)),
            Value::I32(v) => Some(HintValue::Int(*v as i64)),
            Value::U32(v) => Some(HintValue::Int(*v as i64)),
            Value::I64(v) => Some(HintValue::Int(*v)),
            Value::U64(v) => i64::try_from(*v).ok().map(HintValue::Int),
            Value::F64(v) => Some(HintValue::String(v.to_string())),
            Value::Value(inner) => HintValue::from_value(inner),
            Value::Array(array) => {
                let bytes: Option<Vec<u8>> = array
                    .get()
                    .iter()
                    .map(|v| match v {
                        Value::U8(b) => Some(*b),
                        _ => None,
                    })
                    .collect();
                bytes.map(HintValue::Binary)
            }
            _ => None,
        }
    }

    /// Convert into a bus value for the given hint key.
    pub fn to_value(&self, key: &str) -> OwnedValue {
        match self {
            HintValue::String(s) => Value::from(s.clone()).into(),
            HintValue::Int(i) if key == keys::URGENCY => Value::U8((*i).clamp(0, u8::MAX as i64) as u8).into(),
            HintValue::Int(i) => match i32::try_from(*i) {
                Ok(small) => Value::I32(small).into(),
                Err(_) => Value::I64(*i).into(),
            },
            HintValue::Bool(b) => Value::Bool(*b).into(),
            HintValue::Timestamp(t) => Value::from(format_timestamp(t)).into(),
            HintValue::Binary(bytes) => Value::from(bytes.clone()).into(),
        }
    }
}

impl From<&str> for HintValue {
    fn from(s: &str) -> Self {
        HintValue::String(s.to_owned())
    }
}

impl From<String> for HintValue {
    fn from(s: String) -> Self {
        HintValue::String(s)
    }
}

impl From<i64> for HintValue {
    fn from(i: i64) -> Self {
        HintValue::Int(i)
    }
}

impl From<bool> for HintValue {
    fn from(b: bool) -> Self {
        HintValue::Bool(b)
    }
}

impl From<DateTime<Utc>> for HintValue {
    fn from(t: DateTime<Utc>) -> Self {
        HintValue::Timestamp(t)
    }
}

/// Parse an ISO-8601 timestamp, converting it to UTC.
///
/// Timestamps without an offset are taken to already be in UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| chrono::NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

pub fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
