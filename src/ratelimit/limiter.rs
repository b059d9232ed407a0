//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::clock::Clock;
use super::policy::{validate_limiter_name, LimiterConfig, STORAGE_SEPARATOR};
use super::record::{AttemptKey, AttemptRecord};
use super::store::AttemptStore;
use crate::error::{self, StoreError};

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptDecision {
    /// Whether the attempt may proceed
    pub allowed: bool,
    /// Attempts left in the current window after this one
    pub remaining_attempts: u32,
}

impl AttemptDecision {
    fn denied() -> Self {
        Self {
            allowed: false,
            remaining_attempts: 0,
        }
    }
}

/// Read-only view of a key's attempt state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptStatus {
    /// Attempts counted in the current window
    pub attempts: u32,
    /// Attempts left before a lockout
    pub remaining_attempts: u32,
    /// When the key next frees up: the lockout end while locked, otherwise
    /// the moment the oldest counted attempt leaves the window
    pub reset_time: Option<DateTime<Utc>>,
}

/// Status of one live key, as reported to operator tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStatus {
    /// Limiter family owning the key
    pub limiter: String,
    /// Composite `identifier:action` key
    pub key: String,
    /// Attempts counted in the current window
    pub attempts: u32,
    /// Attempts left before a lockout
    pub remaining_attempts: u32,
    /// See [`AttemptStatus::reset_time`]
    pub reset_time: Option<DateTime<Utc>>,
}

/// Windowed attempt limiter with lockout.
///
/// Attempts are counted per `(identifier, action)` over a sliding window.
/// Once `max_attempts` have been counted, the next attempt locks the key
/// for the configured lockout; when the lockout expires the key starts over
/// from zero.
///
/// The read-modify-write cycle on the store is serialized per limiter, so
/// the threshold is exact within one process. Separate processes sharing a
/// store are not coordinated and may admit one extra attempt under a race.
pub struct RateLimiter {
    name: String,
    config: LimiterConfig,
    store: Arc<dyn AttemptStore>,
    clock: Arc<dyn Clock>,
    guard: Mutex<()>,
}

impl RateLimiter {
    /// Create a limiter for the `name` family.
    ///
    /// Fails when `name` is blank or contains the store key separator `|`.
    pub fn new(
        name: &str,
        config: LimiterConfig,
        store: Arc<dyn AttemptStore>,
        clock: Arc<dyn Clock>,
    ) -> error::Result<Self> {
        validate_limiter_name(name)?;
        Ok(Self {
            name: name.to_string(),
            config,
            store,
            clock,
            guard: Mutex::new(()),
        })
    }

    /// The family name of this limiter.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The thresholds this limiter enforces.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Decide whether an attempt may proceed, counting it when it does.
    ///
    /// Checks made while a key is locked out are not counted and never move
    /// the lockout deadline. A store failure denies the attempt.
    pub fn is_allowed(&self, identifier: &str, action: &str) -> AttemptDecision {
        let key = AttemptKey::new(identifier, action);
        let storage_key = self.storage_key(&key);

        let _guard = self.guard.lock();
        let now = self.clock.now();

        trace!(limiter = %self.name, key = %key, "Checking attempt");

        let mut record = match self.store.get(&storage_key) {
            Ok(record) => record.unwrap_or_default(),
            Err(e) => {
                warn!(limiter = %self.name, key = %key, error = %e, "Attempt store read failed, denying");
                return AttemptDecision::denied();
            }
        };

        if let Some(until) = record.active_lockout(now) {
            debug!(limiter = %self.name, key = %key, lockout_until = %until, "Attempt denied, key locked out");
            return AttemptDecision::denied();
        }

        if record.clear_expired_lockout(now) {
            debug!(limiter = %self.name, key = %key, "Lockout expired, attempts reset");
        }

        let max_attempts = self.config.max_attempts();
        let counted = record.prune(now, self.config.window());

        if counted >= max_attempts as usize {
            let until = now + self.config.lockout();
            record.lockout_until = Some(until);
            if let Err(e) = self.store.set(&storage_key, &record) {
                warn!(limiter = %self.name, key = %key, error = %e, "Failed to persist lockout");
            }
            debug!(
                limiter = %self.name,
                key = %key,
                attempts = counted,
                lockout_until = %until,
                "Attempt threshold reached, key locked out"
            );
            return AttemptDecision::denied();
        }

        record.timestamps.push(now);
        if let Err(e) = self.store.set(&storage_key, &record) {
            warn!(limiter = %self.name, key = %key, error = %e, "Attempt store write failed, denying");
            return AttemptDecision::denied();
        }

        let remaining_attempts = max_attempts - (counted as u32 + 1);
        trace!(
            limiter = %self.name,
            key = %key,
            remaining = remaining_attempts,
            "Attempt allowed"
        );

        AttemptDecision {
            allowed: true,
            remaining_attempts,
        }
    }

    /// Report a key's state without counting an attempt.
    ///
    /// A key whose attempts and lockout have all expired is removed from the
    /// store as a side effect. Partially expired records are not rewritten,
    /// so a status read costs no store write in the common case.
    pub fn get_status(&self, identifier: &str, action: &str) -> AttemptStatus {
        let key = AttemptKey::new(identifier, action);
        let storage_key = self.storage_key(&key);

        let _guard = self.guard.lock();
        let now = self.clock.now();

        let mut record = match self.store.get(&storage_key) {
            Ok(record) => record.unwrap_or_default(),
            Err(e) => {
                warn!(limiter = %self.name, key = %key, error = %e, "Attempt store read failed");
                return AttemptStatus {
                    attempts: self.config.max_attempts(),
                    remaining_attempts: 0,
                    reset_time: None,
                };
            }
        };

        let was_empty = record.is_empty();
        let status = self.evaluate(&mut record, now);

        // Partial prunes are left for the next write; only fully expired keys are dropped.
        if record.is_empty() && !was_empty {
            if let Err(e) = self.store.remove(&storage_key) {
                warn!(limiter = %self.name, key = %key, error = %e, "Failed to drop expired record");
            }
        }

        status
    }

    /// Time left on the key's lockout, or `None` when it is not locked.
    pub fn get_remaining_time(&self, identifier: &str, action: &str) -> Option<Duration> {
        let key = AttemptKey::new(identifier, action);
        let now = self.clock.now();

        let record = match self.store.get(&self.storage_key(&key)) {
            Ok(record) => record?,
            Err(e) => {
                warn!(limiter = %self.name, key = %key, error = %e, "Attempt store read failed");
                return None;
            }
        };

        record
            .active_lockout(now)
            .and_then(|until| (until - now).to_std().ok())
    }

    /// Clear all state for a key, lifting any lockout.
    pub fn reset(&self, identifier: &str, action: &str) -> Result<(), StoreError> {
        let key = AttemptKey::new(identifier, action);
        let _guard = self.guard.lock();
        self.store.remove(&self.storage_key(&key))?;
        debug!(limiter = %self.name, key = %key, "Attempt state reset");
        Ok(())
    }

    /// Status of every live key owned by this limiter.
    pub fn statuses(&self) -> Result<Vec<KeyStatus>, StoreError> {
        let now = self.clock.now();
        let prefix = format!("{}{}", self.name, STORAGE_SEPARATOR);

        let mut statuses = Vec::new();
        for (storage_key, mut record) in self.store.list_all()? {
            let Some(key) = storage_key.strip_prefix(&prefix) else {
                continue;
            };

            let status = self.evaluate(&mut record, now);
            if record.is_empty() {
                continue;
            }

            statuses.push(KeyStatus {
                limiter: self.name.clone(),
                key: key.to_string(),
                attempts: status.attempts,
                remaining_attempts: status.remaining_attempts,
                reset_time: status.reset_time,
            });
        }

        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(statuses)
    }

    /// Prune `record` as of `now` and compute its status. Never counts an
    /// attempt and never arms a lockout.
    fn evaluate(&self, record: &mut AttemptRecord, now: DateTime<Utc>) -> AttemptStatus {
        let max_attempts = self.config.max_attempts();
        let window = self.config.window();

        if let Some(until) = record.active_lockout(now) {
            record.prune(now, window);
            return AttemptStatus {
                attempts: max_attempts,
                remaining_attempts: 0,
                reset_time: Some(until),
            };
        }

        record.clear_expired_lockout(now);
        let counted = record.prune(now, window);
        let attempts = u32::try_from(counted).unwrap_or(u32::MAX);

        AttemptStatus {
            attempts,
            remaining_attempts: max_attempts.saturating_sub(attempts),
            reset_time: record.oldest().map(|oldest| oldest + window),
        }
    }

    fn storage_key(&self, key: &AttemptKey) -> String {
        format!("{}{}{}", self.name, STORAGE_SEPARATOR, key.to_string_key())
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
