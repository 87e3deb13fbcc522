//! Node configuration loaded from `config.yml`.
//!
//! Every section falls back to its defaults, so a file only needs the keys it
//! changes. A missing file is replaced by the default configuration written
//! to the same path.

use crate::cli::CliArgs;
use infra_api::{DatabaseConfig, InfraContext, ServerKind};
use infra_core::realtime::{RealtimeOptions, RealtimeRole, RealtimeSettings};
use infra_core::{BusSettings, RedisSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to render default configuration: {0}")]
    Render(#[source] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Root of `config.yml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AppConfig {
    pub infra: InfraSection,
    pub redis: RedisSection,
    pub database: DatabaseConfig,
    pub realtime: RealtimeSection,
    pub heartbeat: HeartbeatSection,
    pub logging: LoggingSettings,
}

/// Identity of this node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct InfraSection {
    pub environment: String,
    pub server_id: String,
    pub kind: ServerKind,
}

impl Default for InfraSection {
    fn default() -> Self {
        Self {
            environment: "dev".to_string(),
            server_id: "paper-1".to_string(),
            kind: ServerKind::Paper,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RedisSection {
    pub host: String,
    pub port: u16,
    pub ssl: bool,
    /// Empty means no authentication.
    pub password: String,
    pub timeout_ms: u64,
    pub database: i64,
    pub bus: BusSection,
}

impl Default for RedisSection {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            ssl: false,
            password: String::new(),
            timeout_ms: 5000,
            database: 0,
            bus: BusSection::default(),
        }
    }
}

/// Handler workers and subscription retries of the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BusSection {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub subscribe_retry_attempts: u32,
    pub subscribe_retry_delay_ms: i64,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 256,
            subscribe_retry_attempts: 3,
            subscribe_retry_delay_ms: 200,
        }
    }
}

/// Realtime relay. Velocity nodes host it, Paper nodes connect to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RealtimeSection {
    pub enabled: bool,
    /// Bind address on the proxy, relay address on game servers.
    pub host: String,
    pub port: u16,
    pub token: String,
    /// Server ids allowed to connect. Empty admits every peer.
    pub allowed_peers: Vec<String>,
    pub outbound_queue_capacity: usize,
    pub max_reconnect_attempts: u32,
    pub initial_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub drop_warn_threshold: u64,
    pub idle_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 25580,
            token: String::new(),
            allowed_peers: Vec::new(),
            outbound_queue_capacity: 512,
            max_reconnect_attempts: 10,
            initial_reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 30_000,
            drop_warn_threshold: 10,
            idle_timeout_secs: 120,
            handshake_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct HeartbeatSection {
    /// Seconds between heartbeats, 0 disables them.
    pub interval_secs: u64,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a YAML file.
    ///
    /// If the file doesn't exist, writes the default configuration to `path`
    /// and returns it.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    pub async fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if path.exists() {
            let content = tokio::fs::read_to_string(path).await.map_err(io_err)?;
            Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
        } else {
            let default_config = AppConfig::default();
            let yaml = serde_yaml::to_string(&default_config).map_err(ConfigError::Render)?;
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
            }
            tokio::fs::write(path, yaml).await.map_err(io_err)?;
            info!("📝 Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        // An empty document deserializes to unit, not to an empty mapping.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Applies command line overrides on top of the file values.
    pub fn apply_cli(&mut self, args: &CliArgs) -> Result<(), ConfigError> {
        if let Some(kind) = &args.kind {
            self.infra.kind = kind
                .parse()
                .map_err(|e: infra_api::ContractError| ConfigError::Invalid(e.to_string()))?;
        }
        if let Some(server_id) = &args.server_id {
            self.infra.server_id = server_id.clone();
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
        Ok(())
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or [`ConfigError::Invalid`]
    /// describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("infra.environment", &self.infra.environment),
            ("infra.server-id", &self.infra.server_id),
            ("redis.host", &self.redis.host),
            ("database.host", &self.database.host),
            ("database.database", &self.database.database),
            ("database.username", &self.database.username),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{key} must not be blank")));
            }
        }

        if self.redis.port == 0 {
            return Err(ConfigError::Invalid("redis.port must be positive".to_string()));
        }
        if self.redis.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "redis.timeout-ms must be positive".to_string(),
            ));
        }
        if self.realtime.enabled && self.realtime.token.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "realtime.token must not be blank when realtime is enabled".to_string(),
            ));
        }
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level: {}. Must be one of: {VALID_LOG_LEVELS:?}",
                self.logging.level
            )));
        }

        Ok(())
    }

    pub fn to_context(&self) -> Result<InfraContext, infra_api::ContractError> {
        InfraContext::new(
            self.infra.environment.trim(),
            self.infra.server_id.trim(),
            self.infra.kind,
        )
    }

    pub fn to_redis_settings(&self) -> RedisSettings {
        let redis = &self.redis;
        RedisSettings {
            host: redis.host.clone(),
            port: redis.port,
            ssl: redis.ssl,
            password: Some(redis.password.clone()).filter(|p| !p.is_empty()),
            timeout: Duration::from_millis(redis.timeout_ms),
            database: redis.database,
        }
    }

    pub fn to_bus_settings(&self) -> BusSettings {
        let bus = &self.redis.bus;
        BusSettings::new(
            bus.worker_count,
            bus.queue_capacity,
            bus.subscribe_retry_attempts,
            BusSettings::delay_from_millis(bus.subscribe_retry_delay_ms),
        )
    }

    /// The proxy hosts the relay; game servers connect to it.
    pub fn to_realtime_options(&self) -> RealtimeOptions {
        let role = match self.infra.kind {
            ServerKind::Velocity => RealtimeRole::Server,
            ServerKind::Paper => RealtimeRole::Client,
        };
        RealtimeOptions {
            role,
            host: self.realtime.host.clone(),
            port: self.realtime.port,
            token: self.realtime.token.clone(),
        }
    }

    pub fn to_realtime_settings(&self) -> RealtimeSettings {
        let rt = &self.realtime;
        RealtimeSettings::new(
            rt.allowed_peers.iter().map(|p| p.trim().to_string()),
            rt.outbound_queue_capacity,
            rt.max_reconnect_attempts,
            Duration::from_millis(rt.initial_reconnect_delay_ms),
            Duration::from_millis(rt.max_reconnect_delay_ms),
            rt.drop_warn_threshold,
            Duration::from_secs(rt.idle_timeout_secs),
            Duration::from_secs(rt.handshake_timeout_secs),
        )
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat.interval_secs > 0).then(|| Duration::from_secs(self.heartbeat.interval_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.redis.timeout_ms, 5000);
        assert_eq!(config.database.port, 3306);
        assert_eq!(config.database.pool_size, 10);
        assert!(!config.realtime.enabled);
        assert_eq!(config.heartbeat_interval(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
infra:
  environment: prod
  server-id: proxy-1
  kind: velocity
redis:
  host: cache.internal
  password: hunter2
  bus:
    worker-count: 8
database:
  host: db.internal
  pool-size: 4
  properties:
    useSSL: "false"
realtime:
  enabled: true
  token: relay-secret
  allowed-peers: [village-1, mines-1]
heartbeat:
  interval-secs: 0
logging:
  level: debug
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.infra.kind, ServerKind::Velocity);
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.redis.bus.worker_count, 8);
        assert_eq!(config.redis.bus.queue_capacity, 256);
        assert_eq!(config.database.pool_size, 4);
        assert_eq!(config.database.properties.get("useSSL").map(String::as_str), Some("false"));
        assert_eq!(config.heartbeat_interval(), None);

        let redis = config.to_redis_settings();
        assert_eq!(redis.password.as_deref(), Some("hunter2"));
        assert_eq!(redis.timeout, Duration::from_millis(5000));

        let options = config.to_realtime_options();
        assert_eq!(options.role, RealtimeRole::Server);
        assert!(config.to_realtime_settings().is_allowed_peer("mines-1"));
        assert!(!config.to_realtime_settings().is_allowed_peer("nether-1"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.infra.server_id = "  ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(m)) if m.contains("server-id")));

        let mut config = AppConfig::default();
        config.redis.timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.database.username = String::new();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.realtime.enabled = true;
        assert!(config.validate().is_err());
        config.realtime.token = "secret".to_string();
        assert!(config.validate().is_ok());

        let mut config = AppConfig::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = AppConfig::default();
        let args = CliArgs {
            config_path: PathBuf::from("config.yml"),
            kind: Some("Velocity".to_string()),
            server_id: Some("proxy-2".to_string()),
            log_level: Some("warn".to_string()),
            json_logs: true,
        };
        config.apply_cli(&args).unwrap();
        assert_eq!(config.infra.kind, ServerKind::Velocity);
        assert_eq!(config.infra.server_id, "proxy-2");
        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.json_format);

        let bad = CliArgs {
            kind: Some("bungee".to_string()),
            ..args
        };
        assert!(config.apply_cli(&bad).is_err());
    }

    #[tokio::test]
    async fn test_missing_file_writes_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.yml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(path.exists());

        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded, config);
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yml");
        tokio::fs::write(&path, "infra: [not, a, mapping]").await.unwrap();

        let result = AppConfig::load_from_file(&path).await;
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
