//! Limiter policies and their configuration format.
//!
//! Each protected action family gets its own policy:
//!
//! ```yaml
//! login:
//!   max_attempts: 3
//!   window_secs: 900
//!   lockout_secs: 1800
//! password-reset:
//!   max_attempts: 4
//!   window_secs: 3600
//!   lockout_secs: 3600
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::error::{GatekeeperError, Result};

/// Name of the login limiter family.
pub const LOGIN: &str = "login";
/// Name of the password reset limiter family.
pub const PASSWORD_RESET: &str = "password-reset";
/// Name of the verification resend limiter family.
pub const RESEND_VERIFICATION: &str = "resend-verification";

/// Longest window or lockout accepted by configuration (one year).
const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Separates the owning limiter's name from the composite key in the store.
/// Limiter names may not contain it.
pub(crate) const STORAGE_SEPARATOR: char = '|';

/// Check that `name` can prefix store keys without colliding with another
/// family's keys.
pub fn validate_limiter_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name.contains(STORAGE_SEPARATOR) {
        return Err(GatekeeperError::Config(format!(
            "invalid limiter name {:?}: must be non-blank and must not contain {:?}",
            name, STORAGE_SEPARATOR
        )));
    }
    Ok(())
}

/// Thresholds for one limiter instance.
///
/// Immutable once built; construction validates every field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LimiterSpec", into = "LimiterSpec")]
pub struct LimiterConfig {
    max_attempts: u32,
    window: TimeDelta,
    lockout: TimeDelta,
}

/// Wire form of [`LimiterConfig`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct LimiterSpec {
    max_attempts: u32,
    window_secs: u64,
    lockout_secs: u64,
}

impl LimiterConfig {
    /// Build a validated configuration.
    pub fn new(max_attempts: u32, window: Duration, lockout: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(GatekeeperError::Config(
                "max_attempts must be a positive integer".to_string(),
            ));
        }
        let window = to_delta("window", window)?;
        let lockout = to_delta("lockout", lockout)?;

        Ok(Self {
            max_attempts,
            window,
            lockout,
        })
    }

    /// Build from whole seconds.
    pub fn from_secs(max_attempts: u32, window_secs: u64, lockout_secs: u64) -> Result<Self> {
        Self::new(
            max_attempts,
            Duration::from_secs(window_secs),
            Duration::from_secs(lockout_secs),
        )
    }

    /// Attempts allowed within one window.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Trailing span over which attempts are counted.
    pub fn window(&self) -> TimeDelta {
        self.window
    }

    /// How long a key stays locked once the threshold is hit.
    pub fn lockout(&self) -> TimeDelta {
        self.lockout
    }
}

fn to_delta(field: &str, duration: Duration) -> Result<TimeDelta> {
    if duration.is_zero() {
        return Err(GatekeeperError::Config(format!("{} must be non-zero", field)));
    }
    if duration.as_secs() > MAX_DURATION_SECS {
        return Err(GatekeeperError::Config(format!(
            "{} must not exceed {} seconds",
            field, MAX_DURATION_SECS
        )));
    }
    TimeDelta::from_std(duration)
        .map_err(|e| GatekeeperError::Config(format!("{} out of range: {}", field, e)))
}

impl TryFrom<LimiterSpec> for LimiterConfig {
    type Error = GatekeeperError;

    fn try_from(spec: LimiterSpec) -> Result<Self> {
        Self::from_secs(spec.max_attempts, spec.window_secs, spec.lockout_secs)
    }
}

impl From<LimiterConfig> for LimiterSpec {
    fn from(config: LimiterConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            window_secs: config.window.num_seconds().unsigned_abs(),
            lockout_secs: config.lockout.num_seconds().unsigned_abs(),
        }
    }
}

/// The set of named limiter policies, keyed by family name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LimiterPolicies {
    policies: BTreeMap<String, LimiterConfig>,
}

impl Default for LimiterPolicies {
    fn default() -> Self {
        let mut policies = BTreeMap::new();
        policies.insert(
            LOGIN.to_string(),
            LimiterConfig {
                max_attempts: 3,
                window: TimeDelta::minutes(15),
                lockout: TimeDelta::minutes(30),
            },
        );
        policies.insert(
            PASSWORD_RESET.to_string(),
            LimiterConfig {
                max_attempts: 4,
                window: TimeDelta::hours(1),
                lockout: TimeDelta::hours(1),
            },
        );
        policies.insert(
            RESEND_VERIFICATION.to_string(),
            LimiterConfig {
                max_attempts: 6,
                window: TimeDelta::minutes(10),
                lockout: TimeDelta::minutes(5),
            },
        );
        Self { policies }
    }
}

impl LimiterPolicies {
    /// An empty policy set.
    pub fn new() -> Self {
        Self {
            policies: BTreeMap::new(),
        }
    }

    /// Load policies from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let policies: Self = serde_yaml::from_str(yaml).map_err(|e| {
            GatekeeperError::Config(format!("Failed to parse limiter policies: {}", e))
        })?;
        policies.validate()?;
        Ok(policies)
    }

    /// Reject policy sets no limiter could be built from.
    pub fn validate(&self) -> Result<()> {
        if self.policies.is_empty() {
            return Err(GatekeeperError::Config(
                "at least one limiter policy is required".to_string(),
            ));
        }
        self.policies
            .keys()
            .try_for_each(|name| validate_limiter_name(name))
    }

    /// Add or replace a policy.
    pub fn insert(&mut self, name: &str, config: LimiterConfig) {
        self.policies.insert(name.to_string(), config);
    }

    /// The policy for a family.
    pub fn get(&self, name: &str) -> Option<&LimiterConfig> {
        self.policies.get(name)
    }

    /// Iterate policies in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &LimiterConfig)> {
        self.policies.iter().map(|(name, config)| (name.as_str(), config))
    }

    /// Number of policies.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether there are no policies.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
