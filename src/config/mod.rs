//! Configuration management for stakesign
//!
//! Supports loading configuration from:
//! - Built-in defaults
//! - Config file (config.toml, config.yaml, ...)
//! - Environment variables (STAKESIGN_*)

use crate::errors::{Result, StakeSignError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Policy state storage
    pub storage: StorageConfig,

    /// Wallet stores holding account key material
    pub wallets: WalletsConfig,

    /// Rule engine configuration and rule definitions
    pub ruler: RulerConfig,

    /// Per-client access permissions
    pub permissions: Vec<CertificateConfig>,

    /// Passphrases tried when an account must be unlocked
    pub unlocker: UnlockerConfig,

    /// Security configuration
    pub security: SecurityConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server (gRPC) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub listen_addr: String,

    /// Port number
    pub port: u16,

    /// Enable TLS
    pub tls_enabled: bool,

    /// TLS certificate path
    pub tls_cert: Option<PathBuf>,

    /// TLS key path
    pub tls_key: Option<PathBuf>,

    /// CA used to verify client certificates
    pub tls_client_ca: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1".to_string(),
            port: 12346,
            tls_enabled: false,
            tls_cert: None,
            tls_key: None,
            tls_client_ca: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Redb,
}

/// Policy state storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,

    /// Database file for the redb backend
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Redb,
            path: PathBuf::from("./data/state.redb"),
        }
    }
}

/// A directory of wallets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletStoreConfig {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletsConfig {
    /// Stores are searched in order
    pub stores: Vec<WalletStoreConfig>,
}

impl Default for WalletsConfig {
    fn default() -> Self {
        Self {
            stores: vec![WalletStoreConfig {
                name: "default".to_string(),
                path: PathBuf::from("./data/wallets"),
            }],
        }
    }
}

/// A single policy rule definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    pub name: String,

    /// Action the rule applies to, e.g. "Sign beacon attestation"
    pub request: String,

    /// Account path pattern; all accounts when absent
    #[serde(default)]
    pub account: Option<String>,

    /// Script file, relative to `ruler.scripts_dir` unless absolute
    pub script: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulerConfig {
    pub scripts_dir: PathBuf,

    /// Fuel granted to a single rule evaluation
    pub max_fuel: u64,

    /// Linear memory cap for a single rule evaluation
    pub max_memory_bytes: usize,

    pub rules: Vec<RuleConfig>,
}

impl Default for RulerConfig {
    fn default() -> Self {
        Self {
            scripts_dir: PathBuf::from("./scripts"),
            max_fuel: 10_000_000,
            max_memory_bytes: 1 << 20,
            rules: vec![],
        }
    }
}

/// Operations a client may perform on matching accounts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionConfig {
    /// `wallet/account` pattern; the account part is optional
    pub path: String,
    pub operations: Vec<String>,
}

/// Permissions for one client certificate name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateConfig {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<PermissionConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UnlockerConfig {
    pub passphrases: Vec<String>,
}

/// Security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Disable core dumps
    pub disable_core_dumps: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            disable_core_dumps: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let defaults = config::Config::try_from(&Config::default())
            .map_err(|e| StakeSignError::ConfigError(e.to_string()))?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        } else {
            builder = builder
                .add_source(config::File::with_name("config").required(false))
                .add_source(config::File::with_name("/etc/stakesign/config").required(false));
        }

        // STAKESIGN_SERVER__PORT, STAKESIGN_STORAGE__BACKEND, ...
        builder = builder.add_source(
            config::Environment::with_prefix("STAKESIGN")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| StakeSignError::ConfigError(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| StakeSignError::ConfigError(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.tls_enabled
            && (self.server.tls_cert.is_none() || self.server.tls_key.is_none())
        {
            return Err(StakeSignError::ConfigError(
                "TLS enabled but cert/key not specified".to_string(),
            ));
        }

        if self.storage.backend == StorageBackend::Redb && self.storage.path.as_os_str().is_empty()
        {
            return Err(StakeSignError::ConfigError(
                "storage path is required for the redb backend".to_string(),
            ));
        }

        if self.ruler.max_fuel == 0 {
            return Err(StakeSignError::ConfigError(
                "ruler.max_fuel must be greater than zero".to_string(),
            ));
        }

        for rule in &self.ruler.rules {
            if rule.name.is_empty() {
                return Err(StakeSignError::ConfigError("rule requires a name".to_string()));
            }
            if rule.script.as_os_str().is_empty() {
                return Err(StakeSignError::ConfigError(format!(
                    "rule {} requires a script",
                    rule.name
                )));
            }
        }

        if self.wallets.stores.is_empty() {
            info!("No wallet stores configured; no accounts will be available");
        }

        Ok(())
    }

    /// Get the server address string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.listen_addr, self.server.port)
    }

    /// Resolve a rule's script path against the scripts directory
    pub fn script_path(&self, rule: &RuleConfig) -> PathBuf {
        if rule.script.is_absolute() {
            rule.script.clone()
        } else {
            self.ruler.scripts_dir.join(&rule.script)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 12346);
        assert_eq!(config.storage.backend, StorageBackend::Redb);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_addr() {
        let config = Config::default();
        assert_eq!(config.server_addr(), "127.0.0.1:12346");
    }

    #[test]
    fn test_tls_requires_cert() {
        let mut config = Config::default();
        config.server.tls_enabled = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[storage]
backend = "memory"

[ruler]
scripts_dir = "/opt/rules"

[[ruler.rules]]
name = "no double attest"
request = "Sign beacon attestation"
script = "attest.wat"

[[permissions]]
name = "client1"

[[permissions.permissions]]
path = "Validators"
operations = ["All"]
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.ruler.rules.len(), 1);
        assert_eq!(
            config.script_path(&config.ruler.rules[0]),
            PathBuf::from("/opt/rules/attest.wat")
        );
        assert_eq!(config.permissions[0].name, "client1");
        assert_eq!(config.permissions[0].permissions[0].operations, vec!["All"]);
    }
}
