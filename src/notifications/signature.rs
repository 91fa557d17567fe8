//! In-memory change detection between consecutive load cycles.

use std::collections::HashMap;

use crate::types::Notification;

/// How a notification compares to the previous cycle's snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    New,
    Changed,
    Unchanged,
}

/// Id -> content signature from the last load. Not persisted.
#[derive(Debug, Default)]
pub struct SignatureCache {
    signatures: HashMap<String, String>,
}

impl SignatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&self, notification: &Notification) -> Change {
        match self.signatures.get(&notification.id) {
            None => Change::New,
            Some(previous) if *previous != notification.signature() => Change::Changed,
            Some(_) => Change::Unchanged,
        }
    }

    /// Classify `current`, then replace the cache with its signatures.
    /// Returns the new-or-changed notifications in input order.
    pub fn diff_and_replace<'a>(&mut self, current: &'a [Notification]) -> Vec<&'a Notification> {
        let fresh: Vec<&Notification> = current
            .iter()
            .filter(|n| self.classify(n) != Change::Unchanged)
            .collect();

        self.signatures = current
            .iter()
            .map(|n| (n.id.clone(), n.signature()))
            .collect();

        fresh
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}
