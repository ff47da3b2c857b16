//! Configuration system for always-active
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (`SLACK_*`, `WORK_*`, `GMT_OFFSET`, `ALWAYS_ACTIVE_*`),
//!    including a `.env` file in the working directory
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::schedule::{self, ScheduleWindow};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Slack session credentials
    pub credentials: CredentialSettings,

    /// Active window
    pub schedule: ScheduleSettings,

    /// Gateway connection tuning
    pub connection: ConnectionSettings,

    /// Startup session check
    pub auth: AuthSettings,

    /// Reconnect endpoint cache
    pub cache: CacheSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Session credentials, normally supplied through the environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialSettings {
    /// `xoxc-` client token
    pub token: String,

    /// Browser session cookie (`d=xoxd-...`)
    pub cookie: String,
}

/// Working hours
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    /// Comma-separated weekday names (empty = monday..friday)
    pub work_days: String,

    /// Local start time, HH:MM
    pub work_start: String,

    /// Local end time, HH:MM
    pub work_end: String,

    /// Whole-hour offset from GMT used for the local wall clock
    pub gmt_offset: i32,
}

/// Gateway connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Base URL of the real-time gateway
    pub endpoint_base: String,

    /// Team-specific gateway shard (`gateway_server` query parameter)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_server: Option<String>,

    /// Origin header sent with the handshake
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,

    /// Dial the last `reconnect_url` hint before the default endpoint
    pub use_reconnect_hint: bool,

    /// Handshake timeout in seconds
    pub handshake_timeout_secs: u64,

    /// Keepalive ping interval in seconds
    pub keepalive_interval_secs: u64,

    /// Forced session refresh interval in seconds
    pub refresh_interval_secs: u64,

    /// Maximum silence on the connection before it is considered dead
    pub read_timeout_secs: u64,

    /// Delay before retrying after a failed connect or a dropped session
    pub retry_backoff_secs: u64,

    /// Schedule polling interval while outside working hours
    pub idle_poll_secs: u64,
}

/// Startup session check (`client.userBoot`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Run the check before connecting
    pub enabled: bool,

    /// Full endpoint URL, e.g. https://myteam.slack.com/api/client.userBoot
    pub url: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

/// Endpoint cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Path of the JSON record holding the last reconnect URL
    pub path: String,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            work_days: String::new(),
            work_start: "09:00".to_string(),
            work_end: "17:00".to_string(),
            gmt_offset: 0,
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            endpoint_base: "wss://wss-primary.slack.com/".to_string(),
            gateway_server: None,
            origin: Some("https://app.slack.com".to_string()),
            use_reconnect_hint: true,
            handshake_timeout_secs: 10,
            keepalive_interval_secs: 5,
            refresh_interval_secs: 300,
            read_timeout_secs: 30,
            retry_backoff_secs: 5,
            idle_poll_secs: 60,
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            timeout_secs: 15,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            path: "cache/websocket_cache.json".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("logs/always-active.log".to_string()),
            max_files: 7,
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path).map_err(|e| Error::IoRead {
                path: path.clone(),
                source: e,
            })?;
            config = toml::from_str(&content).map_err(|e| Error::ConfigParse {
                message: e.message().to_string(),
                source: Some(e),
            })?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides()?;

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::ConfigNotFound { path });
        }

        let search_paths = [
            PathBuf::from("always-active.toml"),
            dirs::config_dir()
                .map(|p| p.join("always-active").join("config.toml"))
                .unwrap_or_default(),
            PathBuf::from("/etc/always-active/config.toml"),
        ];

        for path in &search_paths {
            if !path.as_os_str().is_empty() && path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path.clone()));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply overrides from the process environment
    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup
    ///
    /// Malformed numeric values are rejected rather than ignored, because a
    /// silently dropped `GMT_OFFSET` would shift the whole schedule.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        // Credentials
        if let Some(val) = lookup("SLACK_TOKEN") {
            self.credentials.token = val;
        }
        if let Some(val) = lookup("SLACK_COOKIE") {
            self.credentials.cookie = val;
        }

        // Schedule
        if let Some(val) = lookup("WORK_DAYS") {
            self.schedule.work_days = val;
        }
        if let Some(val) = lookup("WORK_START").filter(|v| !v.trim().is_empty()) {
            self.schedule.work_start = val;
        }
        if let Some(val) = lookup("WORK_END").filter(|v| !v.trim().is_empty()) {
            self.schedule.work_end = val;
        }
        if let Some(val) = lookup("GMT_OFFSET") {
            self.schedule.gmt_offset = schedule::parse_offset(&val)?;
        }

        // Connection
        if let Some(val) = lookup("ALWAYS_ACTIVE_ENDPOINT") {
            self.connection.endpoint_base = val;
        }
        if let Some(val) = lookup("ALWAYS_ACTIVE_GATEWAY_SERVER") {
            self.connection.gateway_server = Some(val).filter(|v| !v.is_empty());
        }
        if let Some(val) = lookup("ALWAYS_ACTIVE_USE_RECONNECT_HINT") {
            self.connection.use_reconnect_hint = parse_bool(&val);
        }

        // Auth check
        if let Some(val) = lookup("ALWAYS_ACTIVE_AUTH_URL") {
            self.auth.enabled = !val.is_empty();
            self.auth.url = val;
        }

        // Cache
        if let Some(val) = lookup("ALWAYS_ACTIVE_CACHE_PATH") {
            self.cache.path = val;
        }

        // Logging
        if let Some(val) = lookup("ALWAYS_ACTIVE_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = lookup("ALWAYS_ACTIVE_LOG_FILE") {
            self.logging.file = Some(val).filter(|v| !v.is_empty());
        }
        if let Some(val) = lookup("ALWAYS_ACTIVE_LOG_JSON") {
            self.logging.json_format = parse_bool(&val);
        }

        Ok(())
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        self.cache.path = expand_path(&self.cache.path);

        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate everything except credentials
    fn validate(&self) -> Result<()> {
        // Parsing the window surfaces bad weekday names, times and offsets
        self.schedule_window()?;

        let base = &self.connection.endpoint_base;
        if !base.starts_with("ws://") && !base.starts_with("wss://") {
            return Err(Error::config_field_invalid(
                "connection.endpoint_base",
                "endpoint_base must start with ws:// or wss://",
            ));
        }

        let intervals = [
            ("connection.handshake_timeout_secs", self.connection.handshake_timeout_secs),
            ("connection.keepalive_interval_secs", self.connection.keepalive_interval_secs),
            ("connection.refresh_interval_secs", self.connection.refresh_interval_secs),
            ("connection.read_timeout_secs", self.connection.read_timeout_secs),
            ("connection.retry_backoff_secs", self.connection.retry_backoff_secs),
            ("connection.idle_poll_secs", self.connection.idle_poll_secs),
        ];
        for (field, value) in intervals {
            if value == 0 {
                return Err(Error::config_field_invalid(field, format!("{} must be greater than 0", field)));
            }
        }

        if self.auth.enabled && self.auth.url.is_empty() {
            return Err(Error::config_field_invalid(
                "auth.url",
                "auth.url is required when the startup check is enabled",
            ));
        }

        if self.cache.path.is_empty() {
            return Err(Error::config_field_invalid("cache.path", "cache.path cannot be empty"));
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Token and cookie are only needed by commands that talk to Slack
    pub fn require_credentials(&self) -> Result<()> {
        if self.credentials.token.trim().is_empty() || self.credentials.cookie.trim().is_empty() {
            return Err(Error::config_validation(
                "SLACK_TOKEN and SLACK_COOKIE must both be set",
            ));
        }
        Ok(())
    }

    /// Parse the schedule section into a window
    pub fn schedule_window(&self) -> Result<ScheduleWindow> {
        let days = schedule::parse_work_days(&self.schedule.work_days)?;
        let start = schedule::parse_time(&self.schedule.work_start)?;
        let end = schedule::parse_time(&self.schedule.work_end)?;
        ScheduleWindow::new(days, start, end, self.schedule.gmt_offset)
    }

    /// Copy safe to print: credentials are masked
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        copy.credentials.token = mask(&copy.credentials.token);
        copy.credentials.cookie = mask(&copy.credentials.cookie);
        copy
    }

    pub fn cache_path(&self) -> &Path {
        Path::new(&self.cache.path)
    }
}

/// Load a `.env` file from the working directory if there is one
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

fn parse_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        return String::new();
    }
    let prefix: String = secret.chars().take(5).collect();
    format!("{}…", prefix)
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<()> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(|| PathBuf::from("always-active.toml"));

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    println!("Configuration file created: {}", config_path.display());
    Ok(())
}

/// Generate default configuration content with comments
fn generate_default_config() -> String {
    r#"# always-active configuration

[credentials]
# Prefer SLACK_TOKEN / SLACK_COOKIE in the environment or a .env file
# token = "xoxc-..."
# cookie = "d=xoxd-..."

[schedule]
# Comma-separated weekday names (empty = monday to friday)
work_days = "monday,tuesday,wednesday,thursday,friday"

# Local working hours, HH:MM (same-day window)
work_start = "09:00"
work_end = "17:00"

# Whole-hour offset from GMT
gmt_offset = 0

[connection]
# Real-time gateway
endpoint_base = "wss://wss-primary.slack.com/"

# Team-specific gateway shard, copied from a browser session
# gateway_server = "T00000000-4"

# Reuse the last reconnect_url handed out by the gateway
use_reconnect_hint = true

handshake_timeout_secs = 10
keepalive_interval_secs = 5
refresh_interval_secs = 300
read_timeout_secs = 30
retry_backoff_secs = 5
idle_poll_secs = 60

[auth]
# Check the session against client.userBoot before connecting
enabled = false
# url = "https://myteam.slack.com/api/client.userBoot"
timeout_secs = 15

[cache]
path = "cache/websocket_cache.json"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
file = "logs/always-active.log"

# Number of rotated log files to keep
max_files = 7

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}
