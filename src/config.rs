//! Configuration management for Gatekeeper.
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! `GATEKEEPER_*` environment variables. A single `_` follows the prefix and
//! `__` separates nested keys (for example `GATEKEEPER_SERVER__ADMIN_ENABLED=true`).

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::{AttemptStore, FileStore, LimiterPolicies, MemoryStore, DEFAULT_NAMESPACE};

/// Environment variable prefix for overrides.
const ENV_PREFIX: &str = "GATEKEEPER";

/// Main configuration for the Gatekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Attempt store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Limiter policies, keyed by family name
    #[serde(default)]
    pub limiters: LimiterPolicies,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// gRPC server address
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: SocketAddr,

    /// Expose administrative operations (clear all, list statuses)
    #[serde(default)]
    pub admin_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
            admin_enabled: false,
        }
    }
}

fn default_grpc_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8082))
}

/// Which attempt store backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-process map; state is lost on restart
    #[default]
    Memory,
    /// JSON document on disk
    File,
}

/// Attempt store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store backend
    #[serde(default)]
    pub backend: StoreBackend,

    /// Path of the document for the file backend
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Key prefix separating limiter state from other data
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: None,
            namespace: default_namespace(),
        }
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl StoreConfig {
    /// Open the configured store.
    pub fn open(&self) -> Result<Arc<dyn AttemptStore>> {
        match self.backend {
            StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
            StoreBackend::File => {
                let path = self.path.as_ref().ok_or_else(|| {
                    GatekeeperError::Config("store.path is required for the file backend".to_string())
                })?;
                Ok(Arc::new(FileStore::open(path, &self.namespace)?))
            }
        }
    }
}

impl GatekeeperConfig {
    /// Load configuration from defaults, an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Yaml));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: GatekeeperConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GatekeeperError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatekeeperConfig =
            serde_yaml::from_str(yaml).map_err(|e| GatekeeperError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        self.limiters.validate()?;
        if self.store.backend == StoreBackend::File && self.store.path.is_none() {
            return Err(GatekeeperError::Config(
                "store.path is required for the file backend".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::LOGIN;

    #[test]
    fn test_default_config() {
        let config = GatekeeperConfig::default();
        assert_eq!(config.server.grpc_addr.port(), 8082);
        assert!(!config.server.admin_enabled);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.namespace, DEFAULT_NAMESPACE);
        assert_eq!(config.limiters.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let yaml = r#"
server:
  grpc_addr: 0.0.0.0:9000
  admin_enabled: true
store:
  backend: file
  path: /var/lib/gatekeeper/attempts.json
limiters:
  login:
    max_attempts: 5
    window_secs: 600
    lockout_secs: 900
"#;
        let config = GatekeeperConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.grpc_addr.port(), 9000);
        assert!(config.server.admin_enabled);
        assert_eq!(config.store.backend, StoreBackend::File);
        assert_eq!(config.store.namespace, DEFAULT_NAMESPACE);
        assert_eq!(config.limiters.len(), 1);
        assert_eq!(config.limiters.get(LOGIN).unwrap().max_attempts(), 5);
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = GatekeeperConfig::from_yaml("server:\n  admin_enabled: true\n").unwrap();
        assert!(config.server.admin_enabled);
        assert_eq!(config.server.grpc_addr, default_grpc_addr());
        assert_eq!(config.limiters, LimiterPolicies::default());
    }

    #[test]
    fn test_file_backend_requires_path() {
        let result = GatekeeperConfig::from_yaml("store:\n  backend: file\n");
        assert!(matches!(result, Err(GatekeeperError::Config(_))));
    }

    #[test]
    fn test_invalid_limiter_rejected() {
        let yaml = r#"
limiters:
  login:
    max_attempts: 0
    window_secs: 60
    lockout_secs: 60
"#;
        assert!(GatekeeperConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!("gatekeeper-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gatekeeper.yaml");
        std::fs::write(
            &path,
            "server:\n  grpc_addr: 127.0.0.1:9100\nlimiters:\n  login:\n    max_attempts: 2\n    window_secs: 60\n    lockout_secs: 120\n",
        )
        .unwrap();

        let config = GatekeeperConfig::load(Some(&path)).unwrap();
        assert_eq!(config.server.grpc_addr.port(), 9100);
        assert_eq!(config.limiters.get(LOGIN).unwrap().max_attempts(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_environment_overrides_file() {
        let dir = std::env::temp_dir().join(format!("gatekeeper-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("gatekeeper.yaml");
        std::fs::write(&path, "server:\n  admin_enabled: false\n").unwrap();

        std::env::set_var("GATEKEEPER_SERVER__ADMIN_ENABLED", "true");
        let config = GatekeeperConfig::load(Some(&path));
        std::env::remove_var("GATEKEEPER_SERVER__ADMIN_ENABLED");

        let config = config.unwrap();
        assert!(config.server.admin_enabled);
        assert_eq!(config.server.grpc_addr, default_grpc_addr());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_memory_store_opens() {
        let store = StoreConfig::default().open().unwrap();
        assert!(store.list_all().unwrap().is_empty());
    }
}
