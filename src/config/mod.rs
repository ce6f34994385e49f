//! Configuration management for jarboot-auth
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::auth::cluster::DEFAULT_CREDENTIAL_TTL_SECS;
use crate::auth::ratelimit::RateLimitConfig;
use crate::auth::token::DEFAULT_TOKEN_EXPIRE_SECS;

/// Prefix of every environment variable read by [`Config::from_env`]
pub const ENV_PREFIX: &str = "JARBOOT_";

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Token and login configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Inter-node trust configuration
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // First, expand environment variables in the YAML string
        let expanded = expand_env_vars(yaml);
        serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))
    }

    /// Load configuration from environment variables with prefix JARBOOT_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // Server config from env
        if let Some(host) = env_var("SERVER_HOST") {
            config.server.host = host;
        }
        if let Some(port) = env_var("SERVER_PORT") {
            config.server.port = port
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid port number".to_string()))?;
        }

        // Database config from env
        if let Some(path) = env_var("DATABASE_PATH") {
            config.database.path = path;
        }

        // Auth config from env
        if let Some(secret) = env_var("AUTH_TOKEN_SECRET") {
            config.auth.token_secret = Some(secret);
        }
        if let Some(expire) = env_var("AUTH_TOKEN_EXPIRE_SECS") {
            config.auth.token_expire_secs = expire
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid token expiry".to_string()))?;
        }

        // Cluster config from env
        if let Some(host) = env_var("CLUSTER_NODE_HOST") {
            config.cluster.node_host = host;
        }
        if let Some(peers) = env_var("CLUSTER_PEERS") {
            config.cluster.peers = peers
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(secret) = env_var("CLUSTER_SECRET") {
            config.cluster.secret = Some(secret);
        }

        // Logging config from env
        if let Some(level) = env_var("LOGGING_LEVEL") {
            config.logging.level = level;
        }
        if let Some(format) = env_var("LOGGING_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Check values serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.token_expire_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "auth.token_expire_secs must be positive".to_string(),
            ));
        }

        if self.cluster.secret.is_some() && self.cluster.node_host.trim().is_empty() {
            return Err(ConfigError::MissingRequired(
                "cluster.node_host is required when cluster.secret is set".to_string(),
            ));
        }

        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidValue(format!(
                "logging.format must be json or pretty, got {}",
                self.logging.format
            )));
        }

        Ok(())
    }
}

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{}{}", ENV_PREFIX, suffix)).ok()
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9899
}

/// Token and login configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthConfig {
    /// HS256 signing secret; a random one is generated when absent
    #[serde(default)]
    pub token_secret: Option<String>,

    /// Token lifetime in seconds
    #[serde(default = "default_token_expire")]
    pub token_expire_secs: u64,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: AuthRateLimitConfig,
}

impl AuthConfig {
    pub fn token_lifetime(&self) -> Duration {
        Duration::from_secs(self.token_expire_secs)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: None,
            token_expire_secs: default_token_expire(),
            rate_limit: AuthRateLimitConfig::default(),
        }
    }
}

fn default_token_expire() -> u64 {
    DEFAULT_TOKEN_EXPIRE_SECS
}

/// Rate limiting configuration for login failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthRateLimitConfig {
    /// Maximum number of failed attempts before blocking
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Duration to block after max failures (in seconds)
    #[serde(default = "default_block_duration")]
    pub block_duration_secs: u64,

    /// Window after which the failure count resets (in seconds)
    #[serde(default = "default_window_duration")]
    pub window_duration_secs: u64,
}

impl Default for AuthRateLimitConfig {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            block_duration_secs: default_block_duration(),
            window_duration_secs: default_window_duration(),
        }
    }
}

impl From<&AuthRateLimitConfig> for RateLimitConfig {
    fn from(config: &AuthRateLimitConfig) -> Self {
        Self {
            max_failures: config.max_failures,
            block_duration: Duration::from_secs(config.block_duration_secs),
            window_duration: Duration::from_secs(config.window_duration_secs),
        }
    }
}

fn default_max_failures() -> u32 {
    10
}

fn default_block_duration() -> u64 {
    300
}

fn default_window_duration() -> u64 {
    600
}

/// Inter-node trust configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterConfig {
    /// This node's host identifier as its peers address it
    #[serde(default)]
    pub node_host: String,

    /// Host identifiers of the trusted peer nodes
    #[serde(default)]
    pub peers: Vec<String>,

    /// Secret shared by every node; inter-node trust is off when absent
    #[serde(default)]
    pub secret: Option<String>,

    /// Lifetime of minted credentials in seconds
    #[serde(default = "default_credential_ttl")]
    pub credential_ttl_secs: u64,
}

impl ClusterConfig {
    pub fn credential_ttl(&self) -> Duration {
        Duration::from_secs(self.credential_ttl_secs)
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_host: String::new(),
            peers: Vec::new(),
            secret: None,
            credential_ttl_secs: default_credential_ttl(),
        }
    }
}

fn default_credential_ttl() -> u64 {
    DEFAULT_CREDENTIAL_TTL_SECS
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "data/jarboot-auth.db".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (`json` or `pretty`)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// Missing required configuration
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax
fn expand_env_vars(input: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .expect("Invalid regex pattern for environment variable expansion");

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
