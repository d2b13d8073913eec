//! Configuration module for stowage.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use crate::{Result, StowageError};

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origins.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Size of the connection pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> String {
    "data/stowage.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Blob storage and upload session configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the blob storage directory.
    #[serde(default = "default_storage_path")]
    pub path: String,
    /// Maximum size of a single chunk in megabytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size_mb: u64,
    /// Seconds without a chunk before an incomplete upload is reaped.
    #[serde(default = "default_upload_idle_timeout")]
    pub upload_idle_timeout_secs: u64,
    /// Seconds between reaper sweeps.
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_secs: u64,
}

fn default_storage_path() -> String {
    "data/blobs".to_string()
}

fn default_max_chunk_size() -> u64 {
    64
}

fn default_upload_idle_timeout() -> u64 {
    86400 // 24 hours
}

fn default_reaper_interval() -> u64 {
    600 // 10 minutes
}

impl StorageConfig {
    /// Maximum chunk size in bytes.
    pub fn max_chunk_size_bytes(&self) -> u64 {
        self.max_chunk_size_mb * 1024 * 1024
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            max_chunk_size_mb: default_max_chunk_size(),
            upload_idle_timeout_secs: default_upload_idle_timeout(),
            reaper_interval_secs: default_reaper_interval(),
        }
    }
}

/// Bearer token verification configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Shared secret used to verify HS256 bearer tokens.
    #[serde(default)]
    pub jwt_secret: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file.
    #[serde(default = "default_log_file")]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> String {
    "logs/stowage.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
        }
    }
}

/// A storage account seeded at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountSeed {
    /// Owner the account belongs to.
    pub owner_id: i64,
    /// Account name, unique per owner.
    pub name: String,
    /// Total capacity in bytes.
    pub capacity_bytes: u64,
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Auth configuration.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Accounts to seed.
    #[serde(default)]
    pub accounts: Vec<AccountSeed>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(StowageError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| StowageError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `STOWAGE_JWT_SECRET`: Override the JWT secret key
    pub fn apply_env_overrides(&mut self) {
        if let Ok(jwt_secret) = std::env::var("STOWAGE_JWT_SECRET") {
            if !jwt_secret.is_empty() {
                self.auth.jwt_secret = jwt_secret;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.is_empty() {
            return Err(StowageError::Config(
                "jwt_secret is not set. \
                 Set it in config.toml or via STOWAGE_JWT_SECRET environment variable."
                    .to_string(),
            ));
        }

        if self.storage.upload_idle_timeout_secs == 0 {
            return Err(StowageError::Config(
                "upload_idle_timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.storage.max_chunk_size_mb == 0 {
            return Err(StowageError::Config(
                "max_chunk_size_mb must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            if account.capacity_bytes == 0 {
                return Err(StowageError::Config(format!(
                    "account '{}' has zero capacity",
                    account.name
                )));
            }
            if !seen.insert((account.owner_id, account.name.as_str())) {
                return Err(StowageError::Config(format!(
                    "account '{}' is declared twice for owner {}",
                    account.name, account.owner_id
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert!(config.server.cors_origins.is_empty());

        assert_eq!(config.database.path, "data/stowage.db");
        assert_eq!(config.database.max_connections, 5);

        assert_eq!(config.storage.path, "data/blobs");
        assert_eq!(config.storage.max_chunk_size_mb, 64);
        assert_eq!(config.storage.upload_idle_timeout_secs, 86400);
        assert_eq!(config.storage.reaper_interval_secs, 600);

        assert!(config.auth.jwt_secret.is_empty());

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.file, "logs/stowage.log");

        assert!(config.accounts.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 3000
cors_origins = ["http://localhost:5173"]

[database]
path = "custom/db.sqlite"
max_connections = 2

[storage]
path = "custom/blobs"
max_chunk_size_mb = 8
upload_idle_timeout_secs = 3600
reaper_interval_secs = 60

[auth]
jwt_secret = "test-secret-key"

[logging]
level = "debug"
file = "custom/logs/app.log"

[[accounts]]
owner_id = 1
name = "primary"
capacity_bytes = 1000

[[accounts]]
owner_id = 1
name = "overflow"
capacity_bytes = 500
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.cors_origins, vec!["http://localhost:5173"]);

        assert_eq!(config.database.path, "custom/db.sqlite");
        assert_eq!(config.database.max_connections, 2);

        assert_eq!(config.storage.path, "custom/blobs");
        assert_eq!(config.storage.max_chunk_size_bytes(), 8 * 1024 * 1024);
        assert_eq!(config.storage.upload_idle_timeout_secs, 3600);
        assert_eq!(config.storage.reaper_interval_secs, 60);

        assert_eq!(config.auth.jwt_secret, "test-secret-key");

        assert_eq!(config.logging.level, "debug");

        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.accounts[1].name, "overflow");
        assert_eq!(config.accounts[1].capacity_bytes, 500);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[server]
port = 9000
"#;

        let config = Config::parse(toml).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.storage.path, "data/blobs");
    }

    #[test]
    fn test_parse_invalid_config() {
        let result = Config::parse("this is not valid toml [[[");

        if let Err(StowageError::Config(msg)) = result {
            assert!(msg.contains("config parse error"));
        } else {
            panic!("Expected Config error");
        }
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load("nonexistent.toml");
        assert!(matches!(result, Err(StowageError::Io(_))));
    }

    #[test]
    fn test_apply_env_overrides_jwt_secret() {
        let original = std::env::var("STOWAGE_JWT_SECRET").ok();

        std::env::set_var("STOWAGE_JWT_SECRET", "env-secret-key");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.auth.jwt_secret, "env-secret-key");

        if let Some(val) = original {
            std::env::set_var("STOWAGE_JWT_SECRET", val);
        } else {
            std::env::remove_var("STOWAGE_JWT_SECRET");
        }
    }

    #[test]
    fn test_validate_missing_secret() {
        let config = Config::default();

        let result = config.validate();
        if let Err(StowageError::Config(msg)) = result {
            assert!(msg.contains("jwt_secret"));
        } else {
            panic!("Expected Config error");
        }
    }

    #[test]
    fn test_validate_zero_idle_timeout() {
        let mut config = Config::default();
        config.auth.jwt_secret = "secret".to_string();
        config.storage.upload_idle_timeout_secs = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_duplicate_accounts() {
        let mut config = Config::default();
        config.auth.jwt_secret = "secret".to_string();
        config.accounts = vec![
            AccountSeed {
                owner_id: 1,
                name: "a".to_string(),
                capacity_bytes: 10,
            },
            AccountSeed {
                owner_id: 1,
                name: "a".to_string(),
                capacity_bytes: 20,
            },
        ];

        assert!(config.validate().is_err());

        config.accounts[1].owner_id = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_capacity_account() {
        let mut config = Config::default();
        config.auth.jwt_secret = "secret".to_string();
        config.accounts = vec![AccountSeed {
            owner_id: 1,
            name: "empty".to_string(),
            capacity_bytes: 0,
        }];

        assert!(config.validate().is_err());
    }
}
