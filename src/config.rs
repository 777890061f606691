//! # Configuration Management
//!
//! Centralized configuration for the launch server.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()`
//!
//! Relative paths in the `state` and `launcher` sections are resolved against
//! the server directory by [`LaunchServerConfig::resolve`].

use crate::error::{Result, ServerError};
use crate::state::digest_tree::DigestAlgorithm;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Current supported protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Magic number sent by clients in the HELLO request ("LNCH")
pub const PROTOCOL_MAGIC: u32 = 0x4C4E_4348;

/// Max allowed frame size, opcode included (16 MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Name of the server configuration file inside the server directory
pub const CONFIG_FILE_NAME: &str = "LaunchServer.toml";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LaunchServerConfig {
    /// Listener and public address
    #[serde(default)]
    pub server: ServerConfig,

    /// Authentication, rate limiting and session expiry
    #[serde(default)]
    pub auth: AuthConfig,

    /// Update and profile directories, key files, digest algorithm
    #[serde(default)]
    pub state: StateConfig,

    /// Launcher artifact build inputs
    #[serde(default)]
    pub launcher: LauncherConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl LaunchServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ServerError::ConfigError(format!("Failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ServerError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load the config file, writing the defaults first if it does not exist.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            tracing::info!(path = %path.display(), "Creating default server config");
            Self::default().save_to_file(path)?;
        }
        Self::from_file(path)
    }

    /// Start from defaults and apply `LAUNCH_SERVER_*` environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Apply `LAUNCH_SERVER_*` environment overrides in place
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("LAUNCH_SERVER_ADDRESS") {
            self.server.address = addr;
        }

        if let Ok(bind) = std::env::var("LAUNCH_SERVER_BIND_ADDRESS") {
            self.server.bind_address = Some(bind);
        }

        if let Ok(port) = std::env::var("LAUNCH_SERVER_PORT") {
            if let Ok(val) = port.parse::<u16>() {
                self.server.port = val;
            }
        }

        if let Ok(limit) = std::env::var("LAUNCH_SERVER_AUTH_RATE_LIMIT") {
            if let Ok(val) = limit.parse::<u32>() {
                self.auth.rate_limit = val;
            }
        }

        if let Ok(window) = std::env::var("LAUNCH_SERVER_AUTH_RATE_LIMIT_MS") {
            if let Ok(val) = window.parse::<u64>() {
                self.auth.rate_limit_window = Duration::from_millis(val);
            }
        }
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ServerError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ServerError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Resolve every relative path against `dir`.
    pub fn resolve(mut self, dir: &Path) -> Self {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = dir.join(&*p);
            }
        };
        join(&mut self.state.updates_dir);
        join(&mut self.state.profiles_dir);
        join(&mut self.state.public_key_file);
        join(&mut self.state.private_key_file);
        join(&mut self.launcher.base_archive);
        join(&mut self.launcher.runtime_dir);
        join(&mut self.launcher.output);
        self
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.auth.validate());
        errors.extend(self.state.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ServerError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address clients use to reach the server; baked into the launcher
    pub address: String,

    /// Address to bind; defaults to `address`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// TCP port
    pub port: u16,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("localhost"),
            bind_address: None,
            port: 7240,
            max_connections: 1000,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Host part used for binding
    pub fn bind_host(&self) -> &str {
        self.bind_address.as_deref().unwrap_or(&self.address)
    }

    /// `host:port` string suitable for `TcpListener::bind`
    pub fn bind_target(&self) -> String {
        format!("{}:{}", self.bind_host(), self.port)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.trim().is_empty() {
            errors.push("LaunchServer address can't be empty".to_string());
        }

        if let Some(bind) = &self.bind_address {
            if bind.trim().is_empty() {
                errors.push("Bind address cannot be empty when set".to_string());
            }
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Authentication and abuse protection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Maximum auth attempts per identity inside one window
    pub rate_limit: u32,

    /// Length of the sliding rate-limit window
    #[serde(with = "duration_serde")]
    pub rate_limit_window: Duration,

    /// Reason sent to rate-limited clients
    pub reject_message: String,

    /// Usernames allowed to log in; `None` allows everyone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowlist: Option<Vec<String>>,

    /// Reason sent to users missing from the allowlist
    pub allowlist_reject_message: String,

    /// Sessions idle longer than this are removed by the sweep
    #[serde(with = "duration_serde")]
    pub session_idle_timeout: Duration,

    /// Period of the maintenance sweeps
    #[serde(with = "duration_serde")]
    pub sweep_interval: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            rate_limit: 2,
            rate_limit_window: Duration::from_millis(5000),
            reject_message: String::from(
                "Too many login attempts, wait a while before trying again",
            ),
            allowlist: None,
            allowlist_reject_message: String::from("You are not on the allowlist"),
            session_idle_timeout: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl AuthConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.rate_limit == 0 {
            errors.push("Auth rate limit must be greater than 0".to_string());
        } else if self.rate_limit > 1_000_000 {
            errors.push(format!(
                "Auth rate limit too large: {} (maximum: 1,000,000)",
                self.rate_limit
            ));
        }

        if self.rate_limit_window.is_zero() {
            errors.push("Auth rate limit window must be greater than 0".to_string());
        }

        if self.reject_message.is_empty() {
            errors.push("Rate limit reject message cannot be empty".to_string());
        }

        if self.session_idle_timeout.as_millis() < 100 {
            errors.push("Session idle timeout too short (minimum: 100ms)".to_string());
        }

        if self.sweep_interval.as_millis() < 10 {
            errors.push("Sweep interval too short (minimum: 10ms)".to_string());
        }

        errors
    }
}

/// Published state inputs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StateConfig {
    pub updates_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub public_key_file: PathBuf,
    pub private_key_file: PathBuf,
    #[serde(default)]
    pub digest_algorithm: DigestAlgorithm,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            updates_dir: PathBuf::from("updates"),
            profiles_dir: PathBuf::from("profiles"),
            public_key_file: PathBuf::from("public.key"),
            private_key_file: PathBuf::from("private.key"),
            digest_algorithm: DigestAlgorithm::default(),
        }
    }
}

impl StateConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.public_key_file == self.private_key_file {
            errors.push("Public and private key files must differ".to_string());
        }
        if self.updates_dir.as_os_str().is_empty() || self.profiles_dir.as_os_str().is_empty() {
            errors.push("Updates and profiles directories must be set".to_string());
        }
        errors
    }
}

/// Launcher artifact inputs and output
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LauncherConfig {
    /// Base client archive the artifact starts from
    pub base_archive: PathBuf,

    /// Runtime files bundled into the artifact
    pub runtime_dir: PathBuf,

    /// Where the built artifact is written
    pub output: PathBuf,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            base_archive: PathBuf::from("Launcher-base.bin"),
            runtime_dir: PathBuf::from("runtime"),
            output: PathBuf::from("Launcher.bin"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("launch-server"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
