//! SIGA backend integration.
//!
//! Record types for the four endpoints the notification aggregator reads,
//! the `NotificationSource` seam, and the concurrent fetch that tolerates
//! partial failure.

pub mod client;
pub mod stats;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::NotifyError;
pub use stats::TrackingStats;

/// An apprentice in the tracking (Seguimiento) stage.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrackingRecord {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default, alias = "nombre", alias = "nombre_completo", deserialize_with = "de_text")]
    pub name: Option<String>,
    #[serde(default, alias = "estado", deserialize_with = "de_text")]
    pub status: Option<String>,
    /// Transition from the lectiva (classroom) stage to the productive stage
    #[serde(
        default,
        alias = "fecha_inicio_productiva",
        alias = "fechaInicioProductiva",
        deserialize_with = "de_date"
    )]
    pub productive_start: Option<NaiveDate>,
    #[serde(
        default,
        alias = "tiene_reemplazo",
        alias = "tieneReemplazo",
        deserialize_with = "de_flag"
    )]
    pub has_replacement: bool,
    #[serde(
        default,
        alias = "fecha_fin_contrato",
        alias = "fechaFinContrato",
        deserialize_with = "de_date"
    )]
    pub contract_end: Option<NaiveDate>,
}

impl TrackingRecord {
    pub fn is_active(&self) -> bool {
        self.status
            .as_deref()
            .map(|s| s.trim().eq_ignore_ascii_case("activo") || s.trim().eq_ignore_ascii_case("active"))
            .unwrap_or(true)
    }

    pub fn display_name(&self) -> String {
        display_name(&self.name, &self.id)
    }
}

/// A tracking record the backend flags as missing required fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncompleteRecord {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default, alias = "nombre", alias = "nombre_completo", deserialize_with = "de_text")]
    pub name: Option<String>,
    #[serde(
        default,
        alias = "campos_faltantes",
        alias = "camposFaltantes",
        deserialize_with = "de_string_list"
    )]
    pub missing_fields: Vec<String>,
    #[serde(default, alias = "incompleto", deserialize_with = "de_optional_flag")]
    pub incomplete: Option<bool>,
}

impl IncompleteRecord {
    pub fn is_flagged(&self) -> bool {
        self.incomplete == Some(true) || !self.missing_fields.is_empty()
    }

    pub fn display_name(&self) -> String {
        display_name(&self.name, &self.id)
    }
}

/// Outcome of one selection test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Pending,
    Approved,
    Rejected,
}

impl TestStatus {
    fn parse(raw: &str) -> Option<TestStatus> {
        match raw.trim().to_lowercase().as_str() {
            "pendiente" | "pending" => Some(TestStatus::Pending),
            "aprobado" | "aprobada" | "approved" => Some(TestStatus::Approved),
            "rechazado" | "rechazada" | "rejected" => Some(TestStatus::Rejected),
            _ => None,
        }
    }
}

/// A candidate in screening (Seleccion) with its three test outcomes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectionTestRecord {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    #[serde(default, alias = "nombre", alias = "nombre_completo", deserialize_with = "de_text")]
    pub name: Option<String>,
    #[serde(
        default,
        alias = "prueba_psicologica",
        alias = "pruebaPsicologica",
        deserialize_with = "de_test_status"
    )]
    pub psychological: Option<TestStatus>,
    #[serde(
        default,
        alias = "prueba_tecnica",
        alias = "pruebaTecnica",
        deserialize_with = "de_test_status"
    )]
    pub technical: Option<TestStatus>,
    #[serde(
        default,
        alias = "examen_medico",
        alias = "examenMedico",
        deserialize_with = "de_test_status"
    )]
    pub medical: Option<TestStatus>,
}

impl SelectionTestRecord {
    /// Display labels of the tests still pending, in fixed order.
    pub fn pending_tests(&self) -> Vec<&'static str> {
        [
            (self.psychological, "psicológica"),
            (self.technical, "técnica"),
            (self.medical, "médica"),
        ]
        .into_iter()
        .filter(|(status, _)| *status == Some(TestStatus::Pending))
        .map(|(_, label)| label)
        .collect()
    }

    pub fn display_name(&self) -> String {
        display_name(&self.name, &self.id)
    }
}

fn display_name(name: &Option<String>, id: &str) -> String {
    match name.as_deref().map(str::trim) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => format!("Registro {}", id),
    }
}

// ---------------------------------------------------------------------------
// Source seam
// ---------------------------------------------------------------------------

/// The four reads the aggregator performs each cycle.
#[async_trait]
pub trait NotificationSource: Send + Sync {
    async fn fetch_tracking(&self) -> Result<Vec<TrackingRecord>, NotifyError>;
    async fn fetch_stats(&self) -> Result<TrackingStats, NotifyError>;
    async fn fetch_incomplete(&self) -> Result<Vec<IncompleteRecord>, NotifyError>;
    async fn fetch_selection_tests(&self) -> Result<Vec<SelectionTestRecord>, NotifyError>;
}

/// Results of one fetch round. `None` marks a source that failed.
#[derive(Debug, Clone, Default)]
pub struct SourceSnapshot {
    pub tracking: Option<Vec<TrackingRecord>>,
    pub stats: Option<TrackingStats>,
    pub incomplete: Option<Vec<IncompleteRecord>>,
    pub selection_tests: Option<Vec<SelectionTestRecord>>,
}

impl SourceSnapshot {
    pub fn all_failed(&self) -> bool {
        self.tracking.is_none()
            && self.stats.is_none()
            && self.incomplete.is_none()
            && self.selection_tests.is_none()
    }
}

/// Issue all four reads concurrently and wait for every one to settle.
pub async fn fetch_all(source: &dyn NotificationSource) -> SourceSnapshot {
    let (tracking, stats, incomplete, selection_tests) = tokio::join!(
        source.fetch_tracking(),
        source.fetch_stats(),
        source.fetch_incomplete(),
        source.fetch_selection_tests(),
    );

    SourceSnapshot {
        tracking: settle("tracking", tracking),
        stats: settle("stats", stats),
        incomplete: settle("incomplete", incomplete),
        selection_tests: settle("selection tests", selection_tests),
    }
}

fn settle<T>(name: &str, result: Result<T, NotifyError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("Notification source '{}' failed: {}", name, e);
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

/// Accept a bare array or an object wrapping it in `data`, `items` or `results`.
/// Elements that do not match `T` are skipped.
pub fn parse_list<T: DeserializeOwned>(payload: Value) -> Result<Vec<T>, NotifyError> {
    let items = match payload {
        Value::Array(items) => items,
        Value::Object(mut map) => {
            let inner = ["data", "items", "results"]
                .iter()
                .find_map(|key| match map.remove(*key) {
                    Some(Value::Array(items)) => Some(items),
                    _ => None,
                });
            inner.ok_or_else(|| {
                NotifyError::Parse("Expected a list or an object with a list field".to_string())
            })?
        }
        other => {
            return Err(NotifyError::Parse(format!(
                "Expected a list, got {}",
                json_kind(&other)
            )))
        }
    };

    let total = items.len();
    let parsed: Vec<T> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();
    if parsed.len() < total {
        log::debug!("Skipped {} malformed records", total - parsed.len());
    }
    Ok(parsed)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "invalid record id: {}",
            other
        ))),
    }
}

fn de_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn de_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveDate>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => crate::util::parse_date(&s),
        _ => None,
    })
}

fn flag_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "si" | "sí" | "1" | "yes" => Some(true),
            "false" | "no" | "0" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn de_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?
        .as_ref()
        .and_then(flag_value)
        .unwrap_or(false))
}

fn de_optional_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?
        .as_ref()
        .and_then(flag_value))
}

fn de_string_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let list = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        Some(Value::String(s)) => s.split(',').map(|part| part.to_string()).collect(),
        _ => Vec::new(),
    };
    Ok(list
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

fn de_test_status<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<TestStatus>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => TestStatus::parse(&s),
        _ => None,
    })
}
