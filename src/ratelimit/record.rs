//! Attempt keys and the per-key attempt record.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// A key that identifies the attempt state of one caller for one action.
///
/// Different actions are kept apart so that a caller blocked on `login` is
/// not blocked on `password-reset`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttemptKey {
    /// Caller identifier, usually an email or a client fingerprint
    pub identifier: String,
    /// The protected action
    pub action: String,
}

impl AttemptKey {
    /// Create a new attempt key.
    pub fn new(identifier: &str, action: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            action: action.to_string(),
        }
    }

    /// The composite `identifier:action` form.
    pub fn to_string_key(&self) -> String {
        format!("{}:{}", self.identifier, self.action)
    }
}

impl std::fmt::Display for AttemptKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.identifier, self.action)
    }
}

/// Persisted attempt history for a single key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Instants of counted attempts, oldest first
    #[serde(default)]
    pub timestamps: Vec<DateTime<Utc>>,
    /// While in the future, every attempt for the key is denied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lockout_until: Option<DateTime<Utc>>,
}

impl AttemptRecord {
    /// Whether the record carries no state worth storing.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty() && self.lockout_until.is_none()
    }

    /// The active lockout deadline, if the key is locked at `now`.
    pub fn active_lockout(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.lockout_until.filter(|until| now < *until)
    }

    /// Drop an expired lockout together with the attempts that caused it.
    ///
    /// Returns `true` when a lockout was cleared.
    pub fn clear_expired_lockout(&mut self, now: DateTime<Utc>) -> bool {
        match self.lockout_until {
            Some(until) if now >= until => {
                self.lockout_until = None;
                self.timestamps.clear();
                true
            }
            _ => false,
        }
    }

    /// Remove attempts older than `window` and return how many remain.
    pub fn prune(&mut self, now: DateTime<Utc>, window: TimeDelta) -> usize {
        let cutoff = now - window;
        self.timestamps.retain(|t| *t >= cutoff && *t <= now);
        self.timestamps.len()
    }

    /// The oldest attempt still on record.
    pub fn oldest(&self) -> Option<DateTime<Utc>> {
        self.timestamps.first().copied()
    }
}
