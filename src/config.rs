//! Configuration module for the kiosk service.
//!
//! This module provides environment-based configuration: the API location,
//! where the pending queue is persisted, and the delivery timings.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default API URL for the feedback backend
const DEFAULT_API_URL: &str = "http://localhost:5000";

/// Default directory for persisted slots
const DEFAULT_DATA_DIR: &str = "./kiosk-data";

/// Default seconds between periodic drain attempts
const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 10;

/// Default seconds between public summary refreshes
const DEFAULT_SUMMARY_INTERVAL_SECS: u64 = 30;

/// Default seconds between connectivity probes
const DEFAULT_PROBE_INTERVAL_SECS: u64 = 5;

/// Default per-submission deadline in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default lock after a tap, matching the kiosk button lock
const DEFAULT_TAP_COOLDOWN_MS: u64 = 3_000;

const MIN_FLUSH_INTERVAL_SECS: u64 = 1;
const MAX_FLUSH_INTERVAL_SECS: u64 = 300;
const MIN_SUMMARY_INTERVAL_SECS: u64 = 1;
const MAX_SUMMARY_INTERVAL_SECS: u64 = 3_600;
const MIN_PROBE_INTERVAL_SECS: u64 = 1;
const MAX_PROBE_INTERVAL_SECS: u64 = 300;
const MIN_REQUEST_TIMEOUT_SECS: u64 = 1;
const MAX_REQUEST_TIMEOUT_SECS: u64 = 120;
const MAX_TAP_COOLDOWN_MS: u64 = 60_000;

/// Configuration for the kiosk service.
///
/// All settings can be configured via environment variables:
/// - `KIOSK_API_URL`: feedback API base URL (default: http://localhost:5000)
/// - `KIOSK_DATA_DIR`: directory for the persisted queue (default: ./kiosk-data)
/// - `KIOSK_FLUSH_INTERVAL_SECS`: seconds between periodic drains (default: 10)
/// - `KIOSK_SUMMARY_INTERVAL_SECS`: seconds between summary refreshes (default: 30)
/// - `KIOSK_PROBE_INTERVAL_SECS`: seconds between connectivity probes (default: 5)
/// - `KIOSK_REQUEST_TIMEOUT_SECS`: deadline for one submission (default: 10)
/// - `KIOSK_TAP_COOLDOWN_MS`: ignore taps this soon after the last one, 0 disables (default: 3000)
/// - `KIOSK_REFRESH_SUMMARY_ON_DELIVERY`: refresh the summary after each delivery (default: true)
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the feedback API
    pub api_url: String,

    /// Directory holding the persisted slots
    pub data_dir: PathBuf,

    /// Interval between periodic drain attempts
    pub flush_interval: Duration,

    /// Interval between public summary refreshes
    pub summary_interval: Duration,

    /// Interval between connectivity probes
    pub probe_interval: Duration,

    /// Deadline for a single submission
    pub request_timeout: Duration,

    /// Minimum time between two accepted taps
    pub tap_cooldown: Duration,

    /// Refresh the summary after each delivered event
    pub refresh_summary_on_delivery: bool,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a variable is set but is not a valid number
    /// or boolean, or lies outside its allowed range.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use kiosk_feedback::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("API URL: {}", config.api_url);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = env::var("KIOSK_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let api_url = api_url.trim_end_matches('/').to_string();

        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(ConfigError {
                message: format!("'{}' is not an http(s) URL", api_url),
                env_var: Some("KIOSK_API_URL".to_string()),
            });
        }

        let data_dir = env::var("KIOSK_DATA_DIR")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let flush_interval = Duration::from_secs(parse_bounded(
            "KIOSK_FLUSH_INTERVAL_SECS",
            DEFAULT_FLUSH_INTERVAL_SECS,
            MIN_FLUSH_INTERVAL_SECS,
            MAX_FLUSH_INTERVAL_SECS,
        )?);

        let summary_interval = Duration::from_secs(parse_bounded(
            "KIOSK_SUMMARY_INTERVAL_SECS",
            DEFAULT_SUMMARY_INTERVAL_SECS,
            MIN_SUMMARY_INTERVAL_SECS,
            MAX_SUMMARY_INTERVAL_SECS,
        )?);

        let probe_interval = Duration::from_secs(parse_bounded(
            "KIOSK_PROBE_INTERVAL_SECS",
            DEFAULT_PROBE_INTERVAL_SECS,
            MIN_PROBE_INTERVAL_SECS,
            MAX_PROBE_INTERVAL_SECS,
        )?);

        let request_timeout = Duration::from_secs(parse_bounded(
            "KIOSK_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
            MIN_REQUEST_TIMEOUT_SECS,
            MAX_REQUEST_TIMEOUT_SECS,
        )?);

        let tap_cooldown = Duration::from_millis(parse_bounded(
            "KIOSK_TAP_COOLDOWN_MS",
            DEFAULT_TAP_COOLDOWN_MS,
            0,
            MAX_TAP_COOLDOWN_MS,
        )?);

        let refresh_summary_on_delivery = parse_bool("KIOSK_REFRESH_SUMMARY_ON_DELIVERY", true)?;

        Ok(Self {
            api_url,
            data_dir,
            flush_interval,
            summary_interval,
            probe_interval,
            request_timeout,
            tap_cooldown,
            refresh_summary_on_delivery,
        })
    }
}

/// Parse an unsigned integer variable, enforcing `min..=max`.
fn parse_bounded(env_var: &str, default: u64, min: u64, max: u64) -> Result<u64, ConfigError> {
    let value = match env::var(env_var) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };

    let parsed: u64 = value.trim().parse().map_err(|_| ConfigError {
        message: format!("'{}' is not a valid number", value),
        env_var: Some(env_var.to_string()),
    })?;

    if parsed < min {
        return Err(ConfigError {
            message: format!("value {} is below minimum ({})", parsed, min),
            env_var: Some(env_var.to_string()),
        });
    }

    if parsed > max {
        return Err(ConfigError {
            message: format!("value {} exceeds maximum ({})", parsed, max),
            env_var: Some(env_var.to_string()),
        });
    }

    Ok(parsed)
}

fn parse_bool(env_var: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(env_var) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError {
                message: format!("'{}' is not a valid boolean", value),
                env_var: Some(env_var.to_string()),
            }),
        },
        Err(_) => Ok(default),
    }
}

impl Default for Config {
    /// Default configuration, useful for tests or when no variables are set.
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            flush_interval: Duration::from_secs(DEFAULT_FLUSH_INTERVAL_SECS),
            summary_interval: Duration::from_secs(DEFAULT_SUMMARY_INTERVAL_SECS),
            probe_interval: Duration::from_secs(DEFAULT_PROBE_INTERVAL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            tap_cooldown: Duration::from_millis(DEFAULT_TAP_COOLDOWN_MS),
            refresh_summary_on_delivery: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests in this module mutate process-wide environment variables.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // Helper to temporarily set environment variables for testing
    struct EnvGuard {
        key: String,
        previous: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let previous = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                previous,
            }
        }

        fn remove(key: &str) -> Self {
            let previous = env::var(key).ok();
            env::remove_var(key);
            Self {
                key: key.to_string(),
                previous,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.previous {
                Some(val) => env::set_var(&self.key, val),
                None => env::remove_var(&self.key),
            }
        }
    }

    const ALL_VARS: &[&str] = &[
        "KIOSK_API_URL",
        "KIOSK_DATA_DIR",
        "KIOSK_FLUSH_INTERVAL_SECS",
        "KIOSK_SUMMARY_INTERVAL_SECS",
        "KIOSK_PROBE_INTERVAL_SECS",
        "KIOSK_REQUEST_TIMEOUT_SECS",
        "KIOSK_TAP_COOLDOWN_MS",
        "KIOSK_REFRESH_SUMMARY_ON_DELIVERY",
    ];

    fn clear_all() -> Vec<EnvGuard> {
        ALL_VARS.iter().map(|var| EnvGuard::remove(var)).collect()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api_url, "http://localhost:5000");
        assert_eq!(config.data_dir, PathBuf::from("./kiosk-data"));
        assert_eq!(config.flush_interval, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.tap_cooldown, Duration::from_millis(3000));
        assert!(config.refresh_summary_on_delivery);
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guards = clear_all();

        let config = Config::from_env().expect("Should load with defaults");
        assert_eq!(config.api_url, "http://localhost:5000");
        assert_eq!(config.summary_interval, Duration::from_secs(30));
        assert_eq!(config.probe_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_config_from_env_custom_values() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guards = clear_all();
        let _g1 = EnvGuard::set("KIOSK_API_URL", "https://kiosk.example.com/");
        let _g2 = EnvGuard::set("KIOSK_DATA_DIR", "/var/lib/kiosk");
        let _g3 = EnvGuard::set("KIOSK_FLUSH_INTERVAL_SECS", "20");
        let _g4 = EnvGuard::set("KIOSK_TAP_COOLDOWN_MS", "0");
        let _g5 = EnvGuard::set("KIOSK_REFRESH_SUMMARY_ON_DELIVERY", "off");

        let config = Config::from_env().expect("Should load custom values");
        assert_eq!(config.api_url, "https://kiosk.example.com"); // Trailing slash removed
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/kiosk"));
        assert_eq!(config.flush_interval, Duration::from_secs(20));
        assert_eq!(config.tap_cooldown, Duration::ZERO);
        assert!(!config.refresh_summary_on_delivery);
    }

    #[test]
    fn test_invalid_number() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guards = clear_all();
        let _guard = EnvGuard::set("KIOSK_FLUSH_INTERVAL_SECS", "soon");

        let err = Config::from_env().unwrap_err();
        assert!(err.message.contains("not a valid number"));
        assert_eq!(err.env_var.as_deref(), Some("KIOSK_FLUSH_INTERVAL_SECS"));
    }

    #[test]
    fn test_flush_interval_below_min() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guards = clear_all();
        let _guard = EnvGuard::set("KIOSK_FLUSH_INTERVAL_SECS", "0");

        let err = Config::from_env().unwrap_err();
        assert!(err.message.contains("below minimum"));
    }

    #[test]
    fn test_request_timeout_exceeds_max() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guards = clear_all();
        let _guard = EnvGuard::set("KIOSK_REQUEST_TIMEOUT_SECS", "999");

        let err = Config::from_env().unwrap_err();
        assert!(err.message.contains("exceeds maximum"));
    }

    #[test]
    fn test_invalid_api_url() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guards = clear_all();
        let _guard = EnvGuard::set("KIOSK_API_URL", "localhost:5000");

        let err = Config::from_env().unwrap_err();
        assert_eq!(err.env_var.as_deref(), Some("KIOSK_API_URL"));
    }

    #[test]
    fn test_invalid_bool() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _guards = clear_all();
        let _guard = EnvGuard::set("KIOSK_REFRESH_SUMMARY_ON_DELIVERY", "maybe");

        let err = Config::from_env().unwrap_err();
        assert!(err.message.contains("not a valid boolean"));
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError {
            message: "test error".to_string(),
            env_var: Some("TEST_VAR".to_string()),
        };
        assert_eq!(
            format!("{}", error),
            "Configuration error for TEST_VAR: test error"
        );

        let error_no_var = ConfigError {
            message: "general error".to_string(),
            env_var: None,
        };
        assert_eq!(
            format!("{}", error_no_var),
            "Configuration error: general error"
        );
    }
}
