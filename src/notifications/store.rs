//! Persistent dedup state: dismissed notifications and sent push slots.
//!
//! Both maps are plain values with pure prune functions. `load`/`save`
//! bridge them to a `KeyValueStore` and swallow storage failures, which
//! degrade to an empty map for that cycle.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::storage::KeyValueStore;

pub const DISMISSED_KEY: &str = "siga.notifications.dismissed";
pub const SENT_SLOTS_KEY: &str = "siga.notifications.sent_slots";

/// Dismissals expire after 30 days
pub const DISMISSAL_TTL_MS: i64 = 30 * 24 * 60 * 60 * 1000;
pub const MAX_DISMISSED: usize = 500;
pub const MAX_SENT_SLOTS: usize = 1000;

fn slot_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4}-\d{2}-\d{2}):(08|16)$").unwrap())
}

/// Whether `value` is a well-formed `"<yyyy-mm-dd>:<08|16>"` slot key.
pub fn is_valid_slot_key(value: &str) -> bool {
    slot_key_re()
        .captures(value)
        .and_then(|caps| caps.get(1))
        .map(|date| NaiveDate::parse_from_str(date.as_str(), "%Y-%m-%d").is_ok())
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Dismissal map
// ---------------------------------------------------------------------------

/// Notification id -> dismissal time (ms since epoch).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DismissalMap {
    entries: HashMap<String, i64>,
}

/// Drop entries older than the TTL, then keep the most recent `MAX_DISMISSED`.
pub fn prune_dismissed(entries: &mut HashMap<String, i64>, now_ms: i64) {
    let cutoff = now_ms - DISMISSAL_TTL_MS;
    entries.retain(|id, ts| !id.is_empty() && *ts >= cutoff);

    if entries.len() > MAX_DISMISSED {
        let mut ranked: Vec<(String, i64)> = entries.drain().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(MAX_DISMISSED);
        entries.extend(ranked);
    }
}

impl DismissalMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a persisted map and prune it. Malformed input yields an empty map.
    pub fn from_json(raw: &str, now_ms: i64) -> Self {
        let entries: HashMap<String, serde_json::Value> = match serde_json::from_str(raw) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Dismissal map unreadable, starting empty: {}", e);
                return Self::new();
            }
        };

        let mut entries: HashMap<String, i64> = entries
            .into_iter()
            .filter_map(|(id, ts)| {
                ts.as_i64()
                    .or_else(|| ts.as_f64().map(|f| f as i64))
                    .map(|ts| (id, ts))
            })
            .collect();
        prune_dismissed(&mut entries, now_ms);
        Self { entries }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.entries).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn load(store: &dyn KeyValueStore, now_ms: i64) -> Self {
        match store.get(DISMISSED_KEY) {
            Ok(Some(raw)) => Self::from_json(&raw, now_ms),
            Ok(None) => Self::new(),
            Err(e) => {
                log::warn!("Failed to read dismissal map: {}", e);
                Self::new()
            }
        }
    }

    pub fn save(&self, store: &dyn KeyValueStore) {
        if let Err(e) = store.set(DISMISSED_KEY, &self.to_json()) {
            log::warn!("Failed to persist dismissal map: {}", e);
        }
    }

    /// Record a dismissal and prune immediately.
    pub fn dismiss(&mut self, id: &str, now_ms: i64) {
        self.entries.insert(id.to_string(), now_ms);
        prune_dismissed(&mut self.entries, now_ms);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Sent-slot map
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SentSlotEntry {
    id: String,
    slot: String,
}

/// Notification id -> slot key it was last pushed in, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SentSlotMap {
    entries: Vec<(String, String)>,
}

impl SentSlotMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a persisted map, dropping malformed slots and trimming to the cap.
    pub fn from_json(raw: &str) -> Self {
        let items: Vec<serde_json::Value> = match serde_json::from_str(raw) {
            Ok(items) => items,
            Err(e) => {
                log::warn!("Sent-slot map unreadable, starting empty: {}", e);
                return Self::new();
            }
        };

        let mut map = Self::new();
        for item in items {
            let Ok(entry) = serde_json::from_value::<SentSlotEntry>(item) else {
                continue;
            };
            if entry.id.is_empty() || !is_valid_slot_key(&entry.slot) {
                continue;
            }
            map.upsert(entry.id, entry.slot);
        }
        map.trim();
        map
    }

    pub fn to_json(&self) -> String {
        let entries: Vec<SentSlotEntry> = self
            .entries
            .iter()
            .map(|(id, slot)| SentSlotEntry {
                id: id.clone(),
                slot: slot.clone(),
            })
            .collect();
        serde_json::to_string(&entries).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn load(store: &dyn KeyValueStore) -> Self {
        match store.get(SENT_SLOTS_KEY) {
            Ok(Some(raw)) => Self::from_json(&raw),
            Ok(None) => Self::new(),
            Err(e) => {
                log::warn!("Failed to read sent-slot map: {}", e);
                Self::new()
            }
        }
    }

    pub fn save(&self, store: &dyn KeyValueStore) {
        if let Err(e) = store.set(SENT_SLOTS_KEY, &self.to_json()) {
            log::warn!("Failed to persist sent-slot map: {}", e);
        }
    }

    /// Whether `id` was already pushed in exactly this slot.
    pub fn was_sent(&self, id: &str, slot_key: &str) -> bool {
        self.entries
            .iter()
            .any(|(entry_id, slot)| entry_id == id && slot == slot_key)
    }

    /// Record a push. Existing ids keep their position.
    pub fn mark_sent(&mut self, id: &str, slot_key: &str) {
        self.upsert(id.to_string(), slot_key.to_string());
        self.trim();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn upsert(&mut self, id: String, slot: String) {
        match self.entries.iter_mut().find(|(entry_id, _)| *entry_id == id) {
            Some(entry) => entry.1 = slot,
            None => self.entries.push((id, slot)),
        }
    }

    fn trim(&mut self) {
        if self.entries.len() > MAX_SENT_SLOTS {
            let excess = self.entries.len() - MAX_SENT_SLOTS;
            self.entries.drain(..excess);
        }
    }
}
