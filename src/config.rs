//! Configuration management for throttled.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{Result, ThrottleError};
use crate::store::StorageBackend;
use crate::throttle::{AdmissionMode, ScopeMode};

/// Prefix for environment overrides, e.g. `THROTTLED__STORAGE__BACKEND=sqlite`.
pub const ENV_PREFIX: &str = "THROTTLED";

/// Main configuration for the throttle service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThrottledConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Throttle engine configuration
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Record storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Remote method configuration
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// gRPC server address
    #[serde(default = "default_grpc_addr")]
    pub grpc_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_addr: default_grpc_addr(),
        }
    }
}

fn default_grpc_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8081))
}

/// Throttle engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Whether keys are split per caller identity
    #[serde(default)]
    pub scope: ScopeMode,

    /// How attempts are admitted
    #[serde(default)]
    pub admission: AdmissionMode,
}

/// Record storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Which backend holds the records
    #[serde(default)]
    pub backend: StorageBackend,

    /// Database file for the sqlite backend
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Table holding the records
    #[serde(default = "default_table")]
    pub table: String,

    /// Connection pool size for the sqlite backend
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_db_path(),
            table: default_table(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("throttles.db")
}

fn default_table() -> String {
    "throttles".to_string()
}

fn default_max_connections() -> u32 {
    5
}

/// Remote method configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Serve the throttle methods at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Let remote callers record attempts directly
    #[serde(default)]
    pub allow_record: bool,

    /// Metadata header carrying the caller identity
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_record: false,
            identity_header: default_identity_header(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_identity_header() -> String {
    "x-throttle-identity".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ThrottledConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ThrottledConfig = serde_yaml::from_str(yaml)
            .map_err(|e| ThrottleError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Layer an optional config file and `THROTTLED__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }

        let config: ThrottledConfig = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| ThrottleError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !crate::store::is_valid_table_name(&self.storage.table) {
            return Err(ThrottleError::Config(format!(
                "storage.table '{}' must contain only letters, digits and underscores",
                self.storage.table
            )));
        }

        if self.storage.max_connections == 0 {
            return Err(ThrottleError::Config(
                "storage.max_connections must be at least 1".to_string(),
            ));
        }

        if self.remote.identity_header.is_empty()
            || tonic::metadata::MetadataKey::<tonic::metadata::Ascii>::from_bytes(
                self.remote.identity_header.as_bytes(),
            )
            .is_err()
        {
            return Err(ThrottleError::Config(format!(
                "remote.identity_header '{}' is not a valid metadata key",
                self.remote.identity_header
            )));
        }

        Ok(())
    }
}
