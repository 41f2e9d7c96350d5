//! Configuration management for Trailguard.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::info;

use crate::error::{Result, TrailguardError};
use crate::ratelimit::WindowConfig;

/// Environment prefix used by [`TrailguardConfig::load`].
pub const ENV_PREFIX: &str = "TRAILGUARD";

/// Main configuration for Trailguard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrailguardConfig {
    /// Rate limiter configuration
    #[serde(default)]
    pub limiter: LimiterSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// A numeric setting as it appears in a configuration source.
///
/// Values are kept loosely typed until [`LimiterSettings::validate`] so that
/// negative, fractional and non-numeric input is reported as an invalid
/// configuration rather than a parse failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigNumber {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ConfigNumber {
    /// Interpret the value as a strictly positive integer.
    fn positive(&self, field: &str) -> Result<u64> {
        let value = match self {
            ConfigNumber::Integer(n) => *n,
            // i64::MAX as f64 rounds up to 2^63, hence the strict bound
            ConfigNumber::Float(f) if f.is_finite() && f.abs() >= i64::MAX as f64 => {
                return Err(TrailguardError::InvalidConfiguration(format!(
                    "{} is out of range, got {}",
                    field, f
                )))
            }
            ConfigNumber::Float(f) if f.fract() == 0.0 => *f as i64,
            ConfigNumber::Float(f) => {
                return Err(TrailguardError::InvalidConfiguration(format!(
                    "{} must be a whole number, got {}",
                    field, f
                )))
            }
            ConfigNumber::Text(s) => s.trim().parse::<i64>().map_err(|_| {
                TrailguardError::InvalidConfiguration(format!(
                    "{} must be a number, got {:?}",
                    field, s
                ))
            })?,
        };

        if value <= 0 {
            return Err(TrailguardError::InvalidConfiguration(format!(
                "{} must be positive, got {}",
                field, value
            )));
        }
        Ok(value as u64)
    }
}

impl From<u64> for ConfigNumber {
    fn from(n: u64) -> Self {
        ConfigNumber::Integer(n.min(i64::MAX as u64) as i64)
    }
}

impl fmt::Display for ConfigNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigNumber::Integer(n) => write!(f, "{}", n),
            ConfigNumber::Float(n) => write!(f, "{}", n),
            ConfigNumber::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Rate limiter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSettings {
    /// Length of the trailing window in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: ConfigNumber,

    /// Maximum admitted requests per window
    #[serde(default = "default_max_requests")]
    pub max_requests: ConfigNumber,

    /// Upper bound on tracked client keys; `None` disables eviction
    #[serde(default = "default_max_tracked_keys")]
    pub max_tracked_keys: Option<usize>,

    /// Background sweep interval in milliseconds; `None` disables the sweeper
    #[serde(default)]
    pub sweep_interval_ms: Option<u64>,

    /// Header consulted first for the client address
    #[serde(default = "default_forwarded_header")]
    pub forwarded_header: String,

    /// Header consulted when the forwarded header is absent
    #[serde(default = "default_real_ip_header")]
    pub real_ip_header: String,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_requests: default_max_requests(),
            max_tracked_keys: default_max_tracked_keys(),
            sweep_interval_ms: None,
            forwarded_header: default_forwarded_header(),
            real_ip_header: default_real_ip_header(),
        }
    }
}

fn default_window_ms() -> ConfigNumber {
    ConfigNumber::Integer(60_000)
}

fn default_max_requests() -> ConfigNumber {
    ConfigNumber::Integer(100)
}

fn default_max_tracked_keys() -> Option<usize> {
    Some(10_000)
}

fn default_forwarded_header() -> String {
    "x-forwarded-for".to_string()
}

fn default_real_ip_header() -> String {
    "x-real-ip".to_string()
}

impl LimiterSettings {
    /// Validate the raw settings into a window configuration.
    pub fn validate(&self) -> Result<WindowConfig> {
        let window_ms = self.window_ms.positive("window_ms")?;
        let max_requests = self.max_requests.positive("max_requests")?;
        if self.max_tracked_keys == Some(0) {
            return Err(TrailguardError::InvalidConfiguration(
                "max_tracked_keys must be positive when set".to_string(),
            ));
        }
        if self.sweep_interval_ms == Some(0) {
            return Err(TrailguardError::InvalidConfiguration(
                "sweep_interval_ms must be positive when set".to_string(),
            ));
        }
        WindowConfig::new(window_ms, max_requests)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
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

impl TrailguardConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TrailguardError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from an optional file, overridden by
    /// `TRAILGUARD__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    /// Layered load with a custom environment prefix.
    pub fn load_with_prefix(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading layered configuration");
            builder = builder.add_source(File::from(path));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrailguardConfig::default();
        let window = config.limiter.validate().unwrap();
        assert_eq!(window.window_ms(), 60_000);
        assert_eq!(window.max_requests(), 100);
        assert_eq!(config.limiter.max_tracked_keys, Some(10_000));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
limiter:
  window_ms: 1000
  max_requests: 3
  sweep_interval_ms: 250
logging:
  json: true
"#;
        let config = TrailguardConfig::from_yaml(yaml).unwrap();
        let window = config.limiter.validate().unwrap();
        assert_eq!(window.window_ms(), 1000);
        assert_eq!(window.max_requests(), 3);
        assert_eq!(config.limiter.sweep_interval_ms, Some(250));
        assert_eq!(config.limiter.forwarded_header, "x-forwarded-for");
        assert!(config.logging.json);
    }

    #[test]
    fn test_zero_and_negative_rejected() {
        let config = TrailguardConfig::from_yaml("limiter:\n  max_requests: 0\n").unwrap();
        assert!(matches!(
            config.limiter.validate(),
            Err(TrailguardError::InvalidConfiguration(_))
        ));

        let config = TrailguardConfig::from_yaml("limiter:\n  window_ms: -5\n").unwrap();
        assert!(matches!(
            config.limiter.validate(),
            Err(TrailguardError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_non_numeric_rejected() {
        let config = TrailguardConfig::from_yaml("limiter:\n  window_ms: soon\n").unwrap();
        let err = config.limiter.validate().unwrap_err();
        assert!(matches!(err, TrailguardError::InvalidConfiguration(_)));
        assert!(err.to_string().contains("window_ms"));

        let config = TrailguardConfig::from_yaml("limiter:\n  max_requests: 2.5\n").unwrap();
        assert!(config.limiter.validate().is_err());
    }

    #[test]
    fn test_out_of_range_float_rejected() {
        let config = TrailguardConfig::from_yaml("limiter:\n  window_ms: 1e30\n").unwrap();
        let err = config.limiter.validate().unwrap_err();
        assert!(matches!(err, TrailguardError::InvalidConfiguration(_)));
        assert!(err.to_string().contains("out of range"));

        let config = TrailguardConfig::from_yaml("limiter:\n  max_requests: .inf\n").unwrap();
        assert!(matches!(
            config.limiter.validate(),
            Err(TrailguardError::InvalidConfiguration(_))
        ));

        let config =
            TrailguardConfig::from_yaml("limiter:\n  max_requests: 9223372036854775808.0\n")
                .unwrap();
        assert!(config.limiter.validate().is_err());
    }

    #[test]
    fn test_numeric_strings_accepted() {
        let config =
            TrailguardConfig::from_yaml("limiter:\n  window_ms: \"1500\"\n  max_requests: 4.0\n")
                .unwrap();
        let window = config.limiter.validate().unwrap();
        assert_eq!(window.window_ms(), 1500);
        assert_eq!(window.max_requests(), 4);
    }

    #[test]
    fn test_zero_tracked_keys_rejected() {
        let config = TrailguardConfig::from_yaml("limiter:\n  max_tracked_keys: 0\n").unwrap();
        assert!(config.limiter.validate().is_err());
    }

    #[test]
    fn test_malformed_yaml_is_config_error() {
        let err = TrailguardConfig::from_yaml("limiter: [unclosed").unwrap_err();
        assert!(matches!(err, TrailguardError::Config(_)));
    }

    #[test]
    fn test_layered_load_with_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trailguard.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "limiter:\n  window_ms: 2000\n  max_requests: 10").unwrap();

        std::env::set_var("TGLAYERTEST__LIMITER__MAX_REQUESTS", "7");
        let config = TrailguardConfig::load_with_prefix(Some(&path), "TGLAYERTEST").unwrap();
        std::env::remove_var("TGLAYERTEST__LIMITER__MAX_REQUESTS");

        let window = config.limiter.validate().unwrap();
        assert_eq!(window.window_ms(), 2000);
        assert_eq!(window.max_requests(), 7);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("limits.yaml");
        std::fs::write(&path, "limiter:\n  real_ip_header: cf-connecting-ip\n").unwrap();

        let config = TrailguardConfig::from_file(&path).unwrap();
        assert_eq!(config.limiter.real_ip_header, "cf-connecting-ip");
    }
}
