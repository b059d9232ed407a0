//! Named limiter instances and the administrative surface.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::clock::Clock;
use super::limiter::{KeyStatus, RateLimiter};
use super::policy::LimiterPolicies;
use super::store::AttemptStore;
use crate::error::{GatekeeperError, Result};

/// The set of limiter families an application enforces.
///
/// Built once at startup and shared by reference. Administrative operations
/// are only available when the registry was built with `admin_enabled`.
pub struct LimiterRegistry {
    limiters: BTreeMap<String, RateLimiter>,
    store: Arc<dyn AttemptStore>,
    admin_enabled: bool,
}

impl LimiterRegistry {
    /// Build one limiter per policy, all sharing `store` and `clock`.
    pub fn from_policies(
        policies: &LimiterPolicies,
        store: Arc<dyn AttemptStore>,
        clock: Arc<dyn Clock>,
        admin_enabled: bool,
    ) -> Result<Self> {
        policies.validate()?;

        let limiters = policies
            .iter()
            .map(|(name, config)| {
                debug!(
                    limiter = name,
                    max_attempts = config.max_attempts(),
                    window_secs = config.window().num_seconds(),
                    lockout_secs = config.lockout().num_seconds(),
                    "Registering limiter"
                );
                let limiter = RateLimiter::new(name, *config, store.clone(), clock.clone())?;
                Ok((name.to_string(), limiter))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        if admin_enabled {
            warn!("Administrative rate limit operations are enabled");
        }

        Ok(Self {
            limiters,
            store,
            admin_enabled,
        })
    }

    /// The limiter registered under `name`.
    pub fn limiter(&self, name: &str) -> Result<&RateLimiter> {
        self.limiters
            .get(name)
            .ok_or_else(|| GatekeeperError::UnknownLimiter(name.to_string()))
    }

    /// Names of all registered limiters.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.limiters.keys().map(String::as_str)
    }

    /// Whether administrative operations are available.
    pub fn admin_enabled(&self) -> bool {
        self.admin_enabled
    }

    /// Administrative: clear the state of one key.
    pub fn reset_key(&self, limiter: &str, identifier: &str, action: &str) -> Result<()> {
        self.ensure_admin()?;
        self.limiter(limiter)?.reset(identifier, action)?;
        Ok(())
    }

    /// Administrative: clear every limiter's state.
    pub fn clear_all_rate_limits(&self) -> Result<()> {
        self.ensure_admin()?;
        self.store.clear_all()?;
        info!("Cleared all rate limit state");
        Ok(())
    }

    /// Administrative: status of every live key across all limiters.
    pub fn get_all_rate_limit_statuses(&self) -> Result<Vec<KeyStatus>> {
        self.ensure_admin()?;

        let mut statuses = Vec::new();
        for limiter in self.limiters.values() {
            statuses.extend(limiter.statuses()?);
        }
        Ok(statuses)
    }

    fn ensure_admin(&self) -> Result<()> {
        if self.admin_enabled {
            Ok(())
        } else {
            Err(GatekeeperError::AdminDisabled)
        }
    }
}

impl std::fmt::Debug for LimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterRegistry")
            .field("limiters", &self.limiters)
            .field("admin_enabled", &self.admin_enabled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::policy::{LimiterConfig, LOGIN, PASSWORD_RESET, RESEND_VERIFICATION};
    use crate::ratelimit::store::MemoryStore;

    fn create_registry(admin_enabled: bool) -> (LimiterRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = LimiterRegistry::from_policies(
            &LimiterPolicies::default(),
            store.clone(),
            Arc::new(ManualClock::default()),
            admin_enabled,
        )
        .unwrap();
        (registry, store)
    }

    #[test]
    fn test_registry_has_default_families() {
        let (registry, _) = create_registry(false);
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec![LOGIN, PASSWORD_RESET, RESEND_VERIFICATION]);
    }

    #[test]
    fn test_unknown_limiter() {
        let (registry, _) = create_registry(false);
        assert!(matches!(
            registry.limiter("signup"),
            Err(GatekeeperError::UnknownLimiter(name)) if name == "signup"
        ));
    }

    #[test]
    fn test_families_are_independent() {
        let (registry, _) = create_registry(false);
        let login = registry.limiter(LOGIN).unwrap();
        let reset = registry.limiter(PASSWORD_RESET).unwrap();

        for _ in 0..login.config().max_attempts() {
            assert!(login.is_allowed("u@x.com", LOGIN).allowed);
        }
        assert!(!login.is_allowed("u@x.com", LOGIN).allowed);
        assert!(reset.is_allowed("u@x.com", PASSWORD_RESET).allowed);
    }

    #[test]
    fn test_admin_disabled() {
        let (registry, _) = create_registry(false);
        assert!(!registry.admin_enabled());

        assert!(matches!(
            registry.clear_all_rate_limits(),
            Err(GatekeeperError::AdminDisabled)
        ));
        assert!(matches!(
            registry.get_all_rate_limit_statuses(),
            Err(GatekeeperError::AdminDisabled)
        ));
        assert!(matches!(
            registry.reset_key(LOGIN, "a", LOGIN),
            Err(GatekeeperError::AdminDisabled)
        ));
    }

    #[test]
    fn test_admin_statuses_and_clear() {
        let (registry, store) = create_registry(true);
        assert!(registry.admin_enabled());

        registry.limiter(LOGIN).unwrap().is_allowed("a", LOGIN);
        registry
            .limiter(PASSWORD_RESET)
            .unwrap()
            .is_allowed("a", PASSWORD_RESET);

        let statuses = registry.get_all_rate_limit_statuses().unwrap();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].limiter, LOGIN);
        assert_eq!(statuses[0].key, "a:login");
        assert_eq!(statuses[1].limiter, PASSWORD_RESET);

        registry.clear_all_rate_limits().unwrap();
        assert!(store.is_empty());
        assert!(registry.get_all_rate_limit_statuses().unwrap().is_empty());
    }

    #[test]
    fn test_admin_reset_key() {
        let (registry, _) = create_registry(true);
        let login = registry.limiter(LOGIN).unwrap();

        for _ in 0..=login.config().max_attempts() {
            login.is_allowed("a", LOGIN);
        }
        assert!(login.get_remaining_time("a", LOGIN).is_some());

        registry.reset_key(LOGIN, "a", LOGIN).unwrap();
        assert!(login.get_remaining_time("a", LOGIN).is_none());
        assert!(login.is_allowed("a", LOGIN).allowed);
    }

    #[test]
    fn test_empty_policies_rejected() {
        let result = LimiterRegistry::from_policies(
            &LimiterPolicies::new(),
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::default()),
            false,
        );
        assert!(matches!(result, Err(GatekeeperError::Config(_))));
    }

    #[test]
    fn test_prefix_colliding_family_rejected() {
        let mut policies = LimiterPolicies::new();
        policies.insert(LOGIN, LimiterConfig::from_secs(1, 60, 60).unwrap());
        policies.insert("login|a", LimiterConfig::from_secs(5, 60, 60).unwrap());

        let result = LimiterRegistry::from_policies(
            &policies,
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::default()),
            false,
        );
        assert!(matches!(result, Err(GatekeeperError::Config(_))));
    }
}
