//! Render configuration.
//!
//! Configuration is layered: per-environment defaults, then an optional TOML
//! file, then environment variable overrides. The result is validated before
//! use.
//!
//! # Environment Variables
//!
//! | Variable | Field |
//! |---|---|
//! | `PAGEKIT_ENV` | `environment` (selects the defaults) |
//! | `PAGEKIT_FAILURE_POLICY` | `failure_policy` (`blank`, `literal`, `comment`) |
//! | `PAGEKIT_WRAP_MODULES` | `wrap_modules` |
//! | `PAGEKIT_CONCURRENCY` | `concurrency` |
//! | `PAGEKIT_SHORTCODE_TIMEOUT_MS` | `shortcode_timeout_ms` (`0` disables) |
//! | `ENABLE_CACHE` | `cache.enabled` |
//! | `PAGEKIT_CACHE_TTL_SECS` | `cache.ttl_secs` |
//! | `PAGEKIT_LOG_LEVEL` | `observability.log_level` |
//!
//! # Example
//!
//! ```
//! use pagekit_runtime::config::{FailurePolicy, RenderConfig};
//!
//! let config = RenderConfig::from_toml_str(
//!     r#"
//!     failure_policy = "comment"
//!     concurrency = 4
//!
//!     [cache]
//!     enabled = true
//!     ttl_secs = 30
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(config.failure_policy, FailurePolicy::Comment);
//! assert_eq!(config.concurrency, 4);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Unknown deployment environment
    #[error("Invalid environment: {0}")]
    InvalidEnvironment(String),

    /// An override could not be parsed
    #[error("Invalid value for {key}: {value}")]
    InvalidValue {
        /// Variable name
        key: String,
        /// Rejected value
        value: String,
    },

    /// The configuration is inconsistent
    #[error("Configuration validation failed: {0}")]
    Validation(String),

    /// The TOML document is malformed
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development
    #[default]
    Development,
    /// Pre-production
    Staging,
    /// Production
    Production,
}

impl Environment {
    /// Whether this is production.
    #[must_use]
    pub const fn is_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Development),
            "staging" | "stage" => Ok(Self::Staging),
            "prod" | "production" => Ok(Self::Production),
            _ => Err(ConfigError::InvalidEnvironment(s.to_string())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Staging => write!(f, "staging"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// What replaces a shortcode whose module failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Remove the token
    #[default]
    Blank,
    /// Keep the token text
    Literal,
    /// Replace the token with an HTML comment naming the shortcode
    Comment,
}

impl FailurePolicy {
    /// Replacement text for a failed shortcode.
    #[must_use]
    pub fn placeholder(self, name: &str, code_text: &str) -> String {
        match self {
            Self::Blank => String::new(),
            Self::Literal => code_text.to_string(),
            Self::Comment => format!("<!-- shortcode {name} failed -->"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "blank" | "empty" => Ok(Self::Blank),
            "literal" | "keep" => Ok(Self::Literal),
            "comment" => Ok(Self::Comment),
            _ => Err(ConfigError::InvalidValue {
                key: "failure_policy".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Rendered-page cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache pages rendered by URL
    pub enabled: bool,
    /// Entry lifetime in seconds
    pub ttl_secs: u64,
    /// Maximum number of cached pages
    pub max_entries: usize,
}

impl CacheConfig {
    /// Entry lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: 300,
            max_entries: 1024,
        }
    }
}

/// Logging and metrics settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit JSON lines instead of human-readable logs
    pub json_logs: bool,
    /// Install the Prometheus recorder
    pub metrics_enabled: bool,
    /// Port the metrics endpoint is served on by the host
    pub metrics_port: u16,
}

impl ObservabilityConfig {
    /// Address the metrics endpoint listens on: every interface, `metrics_port`.
    #[must_use]
    pub fn metrics_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.metrics_port))
    }

    /// Validate the log level.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for unknown levels.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "invalid log_level: {}. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }
        Ok(())
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_port: 9090,
        }
    }
}

/// Configuration of the render pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Deployment environment
    pub environment: Environment,
    /// Replacement for failed shortcodes
    pub failure_policy: FailurePolicy,
    /// Wrap rendered modules in a `<div class="module">`
    pub wrap_modules: bool,
    /// Shortcodes dispatched concurrently within one pass; `1` is sequential
    pub concurrency: usize,
    /// Per-shortcode time limit
    pub shortcode_timeout_ms: Option<u64>,
    /// Rendered-page cache
    pub cache: CacheConfig,
    /// Logging and metrics
    pub observability: ObservabilityConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            failure_policy: FailurePolicy::Blank,
            wrap_modules: false,
            concurrency: 1,
            shortcode_timeout_ms: None,
            cache: CacheConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl RenderConfig {
    /// Defaults for `environment`.
    #[must_use]
    pub fn for_environment(environment: Environment) -> Self {
        let mut config = Self {
            environment,
            ..Self::default()
        };

        match environment {
            Environment::Development => {
                config.observability.log_level = "debug".to_string();
            }
            Environment::Staging => {
                config.cache.enabled = true;
                config.cache.ttl_secs = 60;
            }
            Environment::Production => {
                config.observability.log_level = "warn".to_string();
                config.observability.metrics_enabled = true;
                config.cache.enabled = true;
                config.shortcode_timeout_ms = Some(5_000);
            }
        }

        config
    }

    /// Parse a TOML document; absent fields keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or
    /// [`ConfigError::Validation`] for inconsistent values.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Load from the process environment.
    ///
    /// `PAGEKIT_ENV` selects the defaults (development when unset),
    /// `PAGEKIT_CONFIG` optionally names a TOML file, and the remaining
    /// variables override individual fields.
    ///
    /// # Errors
    ///
    /// Returns an error if any source is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let lookup = |key: &str| std::env::var(key).ok();

        let mut config = match lookup("PAGEKIT_CONFIG") {
            Some(path) => Self::from_file(path)?,
            None => {
                let environment = lookup("PAGEKIT_ENV")
                    .map(|value| value.parse())
                    .transpose()?
                    .unwrap_or_default();
                Self::for_environment(environment)
            }
        };

        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for values that do not parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("PAGEKIT_ENV") {
            self.environment = value.parse()?;
        }
        if let Some(value) = lookup("PAGEKIT_FAILURE_POLICY") {
            self.failure_policy = value.parse()?;
        }
        if let Some(value) = lookup("PAGEKIT_WRAP_MODULES") {
            self.wrap_modules = parse_flag("PAGEKIT_WRAP_MODULES", &value)?;
        }
        if let Some(value) = lookup("PAGEKIT_CONCURRENCY") {
            self.concurrency = parse_number("PAGEKIT_CONCURRENCY", &value)?;
        }
        if let Some(value) = lookup("PAGEKIT_SHORTCODE_TIMEOUT_MS") {
            let millis: u64 = parse_number("PAGEKIT_SHORTCODE_TIMEOUT_MS", &value)?;
            self.shortcode_timeout_ms = (millis > 0).then_some(millis);
        }
        if let Some(value) = lookup("ENABLE_CACHE") {
            self.cache.enabled = parse_flag("ENABLE_CACHE", &value)?;
        }
        if let Some(value) = lookup("PAGEKIT_CACHE_TTL_SECS") {
            self.cache.ttl_secs = parse_number("PAGEKIT_CACHE_TTL_SECS", &value)?;
        }
        if let Some(value) = lookup("PAGEKIT_LOG_LEVEL") {
            self.observability.log_level = value;
        }
        Ok(())
    }

    /// Validate the whole configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Validation("concurrency must be > 0".to_string()));
        }
        if self.shortcode_timeout_ms == Some(0) {
            return Err(ConfigError::Validation(
                "shortcode_timeout_ms must be > 0 when set".to_string(),
            ));
        }
        if self.cache.enabled && self.cache.ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "cache.ttl_secs must be > 0 when the cache is enabled".to_string(),
            ));
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return Err(ConfigError::Validation(
                "cache.max_entries must be > 0 when the cache is enabled".to_string(),
            ));
        }
        self.observability.validate()
    }

    /// Per-shortcode time limit.
    #[must_use]
    pub fn shortcode_timeout(&self) -> Option<Duration> {
        self.shortcode_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_sequential_and_blank() {
        let config = RenderConfig::default();

        assert_eq!(config.concurrency, 1);
        assert_eq!(config.failure_policy, FailurePolicy::Blank);
        assert!(!config.cache.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn environment_defaults_differ() {
        let dev = RenderConfig::for_environment(Environment::Development);
        let prod = RenderConfig::for_environment(Environment::Production);

        assert_eq!(dev.observability.log_level, "debug");
        assert_eq!(prod.observability.log_level, "warn");
        assert!(prod.cache.enabled);
        assert_eq!(prod.shortcode_timeout(), Some(Duration::from_secs(5)));
        assert!(prod.observability.metrics_enabled);
        assert_eq!(prod.observability.metrics_addr().port(), 9090);
    }

    #[test]
    fn environment_parses_aliases() {
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("Stage".parse::<Environment>().unwrap(), Environment::Staging);
        assert!("qa".parse::<Environment>().is_err());
    }

    #[test]
    fn overrides_replace_fields() {
        let mut config = RenderConfig::default();

        config
            .apply_overrides(lookup_from(&[
                ("PAGEKIT_FAILURE_POLICY", "literal"),
                ("PAGEKIT_WRAP_MODULES", "true"),
                ("PAGEKIT_CONCURRENCY", "8"),
                ("PAGEKIT_SHORTCODE_TIMEOUT_MS", "250"),
                ("ENABLE_CACHE", "1"),
                ("PAGEKIT_CACHE_TTL_SECS", "10"),
                ("PAGEKIT_LOG_LEVEL", "trace"),
            ]))
            .unwrap();

        assert_eq!(config.failure_policy, FailurePolicy::Literal);
        assert!(config.wrap_modules);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.shortcode_timeout(), Some(Duration::from_millis(250)));
        assert!(config.cache.enabled);
        assert_eq!(config.cache.ttl(), Duration::from_secs(10));
        assert_eq!(config.observability.log_level, "trace");
    }

    #[test]
    fn zero_timeout_override_disables_timeout() {
        let mut config = RenderConfig::for_environment(Environment::Production);

        config
            .apply_overrides(lookup_from(&[("PAGEKIT_SHORTCODE_TIMEOUT_MS", "0")]))
            .unwrap();

        assert_eq!(config.shortcode_timeout(), None);
    }

    #[test]
    fn invalid_override_names_the_variable() {
        let mut config = RenderConfig::default();

        let err = config
            .apply_overrides(lookup_from(&[("PAGEKIT_CONCURRENCY", "many")]))
            .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "PAGEKIT_CONCURRENCY"));
    }

    #[test]
    fn toml_keeps_defaults_for_missing_fields() {
        let config = RenderConfig::from_toml_str("wrap_modules = true\n").unwrap();

        assert!(config.wrap_modules);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.cache, CacheConfig::default());
    }

    #[test]
    fn validation_rejects_zero_concurrency_and_bad_log_level() {
        assert!(matches!(
            RenderConfig::from_toml_str("concurrency = 0"),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            RenderConfig::from_toml_str("[observability]\nlog_level = \"loud\""),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(RenderConfig::from_toml_str("concurrency = ["), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn failure_policy_placeholders() {
        assert_eq!(FailurePolicy::Blank.placeholder("FAQ", "[FAQ]"), "");
        assert_eq!(FailurePolicy::Literal.placeholder("FAQ", "[FAQ]"), "[FAQ]");
        assert_eq!(
            FailurePolicy::Comment.placeholder("FAQ", "[FAQ]"),
            "<!-- shortcode FAQ failed -->"
        );
    }
}
