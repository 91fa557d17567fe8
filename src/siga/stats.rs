//! Normalization of the tracking statistics payload.
//!
//! The statistics endpoint has shipped several shapes over time; the active
//! count and the quota appear under different keys and sometimes as strings.

use serde_json::{Map, Value};

const ACTIVE_KEYS: &[&str] = &[
    "activos",
    "aprendices_activos",
    "total_activos",
    "active",
    "activeCount",
    "current",
];

const QUOTA_KEYS: &[&str] = &["cuota", "cuota_maxima", "cupo", "max", "quota", "maxQuota"];

/// Active apprentice count and program quota, as far as the backend reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackingStats {
    pub active: Option<i64>,
    pub quota: Option<i64>,
}

impl TrackingStats {
    /// Normalize a raw statistics payload. Non-object payloads yield empty stats.
    pub fn from_value(payload: &Value) -> Self {
        let Some(map) = payload.as_object() else {
            return Self::default();
        };
        let map = match map.get("data") {
            Some(Value::Object(inner)) => inner,
            _ => map,
        };

        Self {
            active: first_number(map, ACTIVE_KEYS),
            quota: first_number(map, QUOTA_KEYS),
        }
    }
}

fn first_number(map: &Map<String, Value>, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|key| map.get(*key).and_then(as_count))
}

fn as_count(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    }
}
