//! Stack configuration.
//!
//! TOML-based, immutable at runtime. This is the *stack* namespace of the
//! configuration: transport endpoints, database path, retry tuning, cache
//! bounds. The standardized OCPP key/value namespace that the Central System
//! can read and change lives in [`crate::chargepoint::ocpp_config`].

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root stack configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    /// Charge point identity and hardware description
    #[serde(default)]
    pub station: StationConfig,

    /// Central System connection
    #[serde(default)]
    pub central_system: CentralSystemConfig,

    /// Persistent storage
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Authorization subsystem bounds
    #[serde(default)]
    pub authent: AuthentConfig,

    /// Smart charging tuning
    #[serde(default)]
    pub smart_charging: SmartChargingConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Identity reported in BootNotification and used in the connection URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default = "default_chargepoint_id")]
    pub chargepoint_id: String,

    #[serde(default = "default_vendor")]
    pub vendor: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub serial_number: Option<String>,

    #[serde(default)]
    pub firmware_version: Option<String>,

    /// Number of physical connectors (id 0 is the station itself).
    #[serde(default = "default_connector_count")]
    pub connector_count: u32,
}

/// Central System endpoint and transport tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentralSystemConfig {
    /// Base URL; the charge point id is appended as the last path segment.
    #[serde(default = "default_central_system_url")]
    pub url: String,

    /// HTTP Basic user (defaults to the charge point id when password set).
    #[serde(default)]
    pub basic_auth_user: Option<String>,

    #[serde(default)]
    pub basic_auth_password: Option<String>,

    /// WebSocket PING interval in seconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Default timeout for outbound calls in seconds.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// First reconnect delay in seconds; doubled per failed attempt.
    #[serde(default = "default_reconnect_min")]
    pub reconnect_backoff_min_secs: u64,

    /// Reconnect delay cap in seconds.
    #[serde(default = "default_reconnect_max")]
    pub reconnect_backoff_max_secs: u64,

    /// BootNotification retry interval in seconds, used until the Central
    /// System supplies one.
    #[serde(default = "default_boot_retry")]
    pub boot_retry_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl DatabaseConfig {
    /// SeaORM connection URL.
    pub fn connection_url(&self) -> String {
        if self.path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}?mode=rwc", self.path)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthentConfig {
    /// Maximum number of authorization cache rows; the oldest row is evicted
    /// once an insert exceeds this bound.
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartChargingConfig {
    /// Nominal phase voltage used for W ⇄ A conversion.
    #[serde(default = "default_nominal_voltage")]
    pub nominal_voltage: f64,

    /// Interval of the expired-profile cleanup timer in seconds.
    #[serde(default = "default_profile_cleanup_interval")]
    pub profile_cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default value helpers ──────────────────────────────────────

fn default_chargepoint_id() -> String {
    "CP-0001".into()
}
fn default_vendor() -> String {
    "OcppStation".into()
}
fn default_model() -> String {
    "Station".into()
}
fn default_connector_count() -> u32 {
    2
}
fn default_central_system_url() -> String {
    "ws://localhost:9000/ocpp".into()
}
fn default_ping_interval() -> u64 {
    60
}
fn default_call_timeout() -> u64 {
    30
}
fn default_reconnect_min() -> u64 {
    1
}
fn default_reconnect_max() -> u64 {
    60
}
fn default_boot_retry() -> u64 {
    30
}
fn default_database_path() -> String {
    "./ocpp-station.db".into()
}
fn default_cache_max_entries() -> u32 {
    1000
}
fn default_nominal_voltage() -> f64 {
    230.0
}
fn default_profile_cleanup_interval() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".into()
}

// ── Trait implementations ──────────────────────────────────────

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            station: StationConfig::default(),
            central_system: CentralSystemConfig::default(),
            database: DatabaseConfig::default(),
            authent: AuthentConfig::default(),
            smart_charging: SmartChargingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            chargepoint_id: default_chargepoint_id(),
            vendor: default_vendor(),
            model: default_model(),
            serial_number: None,
            firmware_version: None,
            connector_count: default_connector_count(),
        }
    }
}

impl Default for CentralSystemConfig {
    fn default() -> Self {
        Self {
            url: default_central_system_url(),
            basic_auth_user: None,
            basic_auth_password: None,
            ping_interval_secs: default_ping_interval(),
            call_timeout_secs: default_call_timeout(),
            reconnect_backoff_min_secs: default_reconnect_min(),
            reconnect_backoff_max_secs: default_reconnect_max(),
            boot_retry_interval_secs: default_boot_retry(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for AuthentConfig {
    fn default() -> Self {
        Self {
            cache_max_entries: default_cache_max_entries(),
        }
    }
}

impl Default for SmartChargingConfig {
    fn default() -> Self {
        Self {
            nominal_voltage: default_nominal_voltage(),
            profile_cleanup_interval_secs: default_profile_cleanup_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Conversions ────────────────────────────────────────────────

impl CentralSystemConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Resolved Basic credentials; a password without a user falls back to
    /// the charge point id as user name.
    pub fn credentials(&self, chargepoint_id: &str) -> Option<(String, String)> {
        let password = self.basic_auth_password.clone()?;
        let user = self
            .basic_auth_user
            .clone()
            .unwrap_or_else(|| chargepoint_id.to_string());
        Some((user, password))
    }
}

// ── File I/O ───────────────────────────────────────────────────

impl StackConfig {
    /// Load configuration from a TOML file; missing file yields defaults
    /// written back to the given path. Environment variables override file
    /// values.
    pub fn load(path: &Path) -> Result<Self, String> {
        let mut cfg: StackConfig = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
            toml::from_str(&content)
                .map_err(|e| format!("Invalid TOML in {}: {}", path.display(), e))?
        } else {
            let cfg = StackConfig::default();
            cfg.save(path)?;
            cfg
        };

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Environment overrides for deployment-sensitive values.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("OCPP_STATION_ID") {
            self.station.chargepoint_id = v;
        }
        if let Ok(v) = std::env::var("OCPP_CS_URL") {
            self.central_system.url = v;
        }
        if let Ok(v) = std::env::var("OCPP_CS_PASSWORD") {
            self.central_system.basic_auth_password = Some(v);
        }
        if let Ok(v) = std::env::var("OCPP_DB_PATH") {
            self.database.path = v;
        }
        if let Ok(v) = std::env::var("OCPP_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    /// Validate for common mistakes.
    pub fn validate(&self) -> Result<(), String> {
        let mut errors = Vec::new();

        if self.station.chargepoint_id.is_empty() {
            errors.push("chargepoint_id must not be empty".to_string());
        }
        if self.station.connector_count == 0 {
            errors.push("connector_count must be at least 1".to_string());
        }
        if !self.central_system.url.starts_with("ws://")
            && !self.central_system.url.starts_with("wss://")
        {
            errors.push(format!(
                "central_system.url must be a ws:// or wss:// URL (got '{}')",
                self.central_system.url
            ));
        }
        if self.central_system.call_timeout_secs == 0 {
            errors.push("call_timeout_secs must be at least 1".to_string());
        }
        if self.central_system.reconnect_backoff_min_secs
            > self.central_system.reconnect_backoff_max_secs
        {
            errors.push(format!(
                "reconnect back-off min ({}) exceeds max ({})",
                self.central_system.reconnect_backoff_min_secs,
                self.central_system.reconnect_backoff_max_secs
            ));
        }
        if self.authent.cache_max_entries == 0 {
            errors.push("authent.cache_max_entries must be at least 1".to_string());
        }
        if self.smart_charging.nominal_voltage <= 0.0 {
            errors.push("nominal_voltage must be positive".to_string());
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            errors.push(format!(
                "Invalid log level '{}'. Valid: {:?}",
                self.logging.level, valid_levels
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(format!(
                "Configuration validation failed:\n  • {}",
                errors.join("\n  • ")
            ))
        }
    }

    /// Persist to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Cannot create dirs {}: {}", parent.display(), e))?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| format!("Serialization error: {}", e))?;
        std::fs::write(path, content)
            .map_err(|e| format!("Cannot write {}: {}", path.display(), e))?;
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(StackConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_chargepoint_id_is_error() {
        let mut cfg = StackConfig::default();
        cfg.station.chargepoint_id = String::new();
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("chargepoint_id"));
    }

    #[test]
    fn zero_connectors_is_error() {
        let mut cfg = StackConfig::default();
        cfg.station.connector_count = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("connector_count"));
    }

    #[test]
    fn http_url_is_error() {
        let mut cfg = StackConfig::default();
        cfg.central_system.url = "http://example.com".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("ws://"));
    }

    #[test]
    fn inverted_backoff_is_error() {
        let mut cfg = StackConfig::default();
        cfg.central_system.reconnect_backoff_min_secs = 100;
        cfg.central_system.reconnect_backoff_max_secs = 10;
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("back-off"));
    }

    #[test]
    fn invalid_log_level_is_error() {
        let mut cfg = StackConfig::default();
        cfg.logging.level = "loud".into();
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("Invalid log level"));
    }

    #[test]
    fn multiple_errors_are_collected() {
        let mut cfg = StackConfig::default();
        cfg.station.chargepoint_id = String::new();
        cfg.authent.cache_max_entries = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("•"));
        assert!(err.contains("chargepoint_id"));
        assert!(err.contains("cache_max_entries"));
    }

    #[test]
    fn memory_database_url() {
        let cfg = DatabaseConfig {
            path: ":memory:".into(),
        };
        assert_eq!(cfg.connection_url(), "sqlite::memory:");

        let cfg = DatabaseConfig::default();
        assert!(cfg.connection_url().starts_with("sqlite://"));
        assert!(cfg.connection_url().ends_with("?mode=rwc"));
    }

    #[test]
    fn credentials_fall_back_to_station_id() {
        let mut cfg = CentralSystemConfig::default();
        assert_eq!(cfg.credentials("CP42"), None);

        cfg.basic_auth_password = Some("hunter2".into());
        assert_eq!(
            cfg.credentials("CP42"),
            Some(("CP42".to_string(), "hunter2".to_string()))
        );

        cfg.basic_auth_user = Some("station".into());
        assert_eq!(
            cfg.credentials("CP42"),
            Some(("station".to_string(), "hunter2".to_string()))
        );
    }

    #[test]
    fn save_and_reload() {
        let dir = std::env::temp_dir().join("ocpp_station_test_config");
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("config.toml");

        let cfg = StackConfig::default();
        cfg.save(&path).unwrap();
        let loaded = StackConfig::load(&path).unwrap();
        assert_eq!(loaded.station.chargepoint_id, cfg.station.chargepoint_id);
        assert_eq!(loaded.central_system.url, cfg.central_system.url);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
