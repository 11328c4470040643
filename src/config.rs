//! Runtime configuration.
//!
//! Long-running lifecycle variants consume a "maximum requests per worker"
//! ceiling and a memory limit string such as `"256M"`. Values are layered over
//! defaults from a [`ConfigSource`] (environment variables in production, a map
//! in tests) or read from a JSON document.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Memory ceiling for a worker, in bytes.
///
/// Parsed from `"<n>[K|M|G]"` with an optional trailing `B`; suffixes are
/// powers of 1024. `"-1"` means unlimited.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::MemoryLimit;
///
/// let limit: MemoryLimit = "256M".parse().unwrap();
/// assert_eq!(limit.bytes(), Some(256 * 1024 * 1024));
/// assert_eq!("-1".parse::<MemoryLimit>().unwrap(), MemoryLimit::Unlimited);
/// assert!("lots".parse::<MemoryLimit>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MemoryLimit {
    /// No ceiling
    Unlimited,
    /// Ceiling in bytes
    Bytes(u64),
}

impl MemoryLimit {
    /// Ceiling in bytes, `None` when unlimited.
    pub fn bytes(self) -> Option<u64> {
        match self {
            MemoryLimit::Unlimited => None,
            MemoryLimit::Bytes(b) => Some(b),
        }
    }

    /// Health threshold: 80% of the ceiling.
    pub fn threshold(self) -> Option<u64> {
        self.bytes().map(|b| (u128::from(b) * 8 / 10) as u64)
    }
}

impl FromStr for MemoryLimit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw == "-1" {
            return Ok(MemoryLimit::Unlimited);
        }
        let invalid = || ConfigError::InvalidMemoryLimit(s.to_string());

        let upper = raw.to_ascii_uppercase();
        let trimmed = upper.strip_suffix('B').unwrap_or(&upper);
        let (digits, multiplier) = match trimmed.chars().last() {
            Some('K') => (&trimmed[..trimmed.len() - 1], 1024u64),
            Some('M') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
            Some('G') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
            Some(c) if c.is_ascii_digit() => (trimmed, 1),
            _ => return Err(invalid()),
        };
        let digits = digits.trim();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let value: u64 = digits.parse().map_err(|_| invalid())?;
        value
            .checked_mul(multiplier)
            .map(MemoryLimit::Bytes)
            .ok_or_else(invalid)
    }
}

impl TryFrom<String> for MemoryLimit {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MemoryLimit> for String {
    fn from(limit: MemoryLimit) -> Self {
        limit.to_string()
    }
}

impl fmt::Display for MemoryLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const K: u64 = 1024;
        match *self {
            MemoryLimit::Unlimited => f.write_str("-1"),
            MemoryLimit::Bytes(b) if b != 0 && b % (K * K * K) == 0 => write!(f, "{}G", b / (K * K * K)),
            MemoryLimit::Bytes(b) if b != 0 && b % (K * K) == 0 => write!(f, "{}M", b / (K * K)),
            MemoryLimit::Bytes(b) if b != 0 && b % K == 0 => write!(f, "{}K", b / K),
            MemoryLimit::Bytes(b) => write!(f, "{}", b),
        }
    }
}

/// Settings consumed by the lifecycle managers and the stateful state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Requests a worker serves before it signals that it wants recycling
    pub max_requests: u64,
    /// Memory ceiling; warnings fire at 80% of it
    pub memory_limit: MemoryLimit,
    /// Persistent entry count above which the oldest entries are evicted
    pub persistent_ceiling: usize,
    /// Entry count eviction trims the persistent namespace down to
    pub persistent_watermark: usize,
    /// Number of recent requests kept for average timing
    pub metrics_window: usize,
    /// Abstracts resolved at boot so their shared instances outlive requests
    pub warm: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_requests: 500,
            memory_limit: MemoryLimit::Bytes(128 * 1024 * 1024),
            persistent_ceiling: 1000,
            persistent_watermark: 800,
            metrics_window: 100,
            warm: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    /// Overlays every setting present in `source` onto the defaults.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ferrous_lifecycle::{MapConfigSource, RuntimeConfig};
    ///
    /// let source = MapConfigSource::new()
    ///     .with("max_requests", "250")
    ///     .with("memory_limit", "512M");
    /// let config = RuntimeConfig::from_source(&source).unwrap();
    /// assert_eq!(config.max_requests, 250);
    /// assert_eq!(config.memory_limit.bytes(), Some(512 * 1024 * 1024));
    /// assert_eq!(config.persistent_ceiling, 1000);
    /// ```
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(v) = source.get("max_requests") {
            config.max_requests = parse_number("max_requests", &v)?;
        }
        if let Some(v) = source.get("memory_limit") {
            config.memory_limit = v.parse()?;
        }
        if let Some(v) = source.get("persistent_ceiling") {
            config.persistent_ceiling = parse_number("persistent_ceiling", &v)?;
        }
        if let Some(v) = source.get("persistent_watermark") {
            config.persistent_watermark = parse_number("persistent_watermark", &v)?;
        }
        if let Some(v) = source.get("metrics_window") {
            config.metrics_window = parse_number("metrics_window", &v)?;
        }
        if let Some(v) = source.get("warm") {
            config.warm = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        config.validate()?;
        Ok(config)
    }

    /// Reads settings from `APP_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&EnvironmentConfigSource::with_prefix("APP"))
    }

    /// Deserializes a JSON document; missing fields take their defaults.
    pub fn from_json(document: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(document).map_err(|e| ConfigError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects inconsistent settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests == 0 {
            return Err(ConfigError::Invalid("max_requests must be > 0".into()));
        }
        if self.metrics_window == 0 {
            return Err(ConfigError::Invalid("metrics_window must be > 0".into()));
        }
        if self.persistent_watermark > self.persistent_ceiling {
            return Err(ConfigError::Invalid(format!(
                "persistent_watermark ({}) exceeds persistent_ceiling ({})",
                self.persistent_watermark, self.persistent_ceiling
            )));
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Trait for configuration sources
pub trait ConfigSource: Send + Sync + fmt::Debug {
    /// Raw value for a setting, by its lowercase name
    fn get(&self, key: &str) -> Option<String>;
}

/// Environment variable configuration source
///
/// `max_requests` with prefix `APP` reads `APP_MAX_REQUESTS`.
#[derive(Debug, Default)]
pub struct EnvironmentConfigSource {
    prefix: Option<String>,
}

impl EnvironmentConfigSource {
    pub fn new() -> Self {
        Self { prefix: None }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: Some(prefix.into()) }
    }
}

impl ConfigSource for EnvironmentConfigSource {
    fn get(&self, key: &str) -> Option<String> {
        let env_key = match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix.to_uppercase(), key.to_uppercase()),
            None => key.to_uppercase(),
        };
        env::var(env_key).ok()
    }
}

/// In-memory configuration source
#[derive(Debug, Default, Clone)]
pub struct MapConfigSource {
    values: HashMap<String, String>,
}

impl MapConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl ConfigSource for MapConfigSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_limit_suffixes() {
        assert_eq!("512".parse::<MemoryLimit>().unwrap(), MemoryLimit::Bytes(512));
        assert_eq!("1k".parse::<MemoryLimit>().unwrap(), MemoryLimit::Bytes(1024));
        assert_eq!(" 2G ".parse::<MemoryLimit>().unwrap(), MemoryLimit::Bytes(2 * 1024 * 1024 * 1024));
        assert_eq!("64MB".parse::<MemoryLimit>().unwrap(), MemoryLimit::Bytes(64 * 1024 * 1024));
    }

    #[test]
    fn test_memory_limit_rejects_garbage() {
        for bad in ["", "M", "12X", "-5M", "1.5G", "99999999999999999999G"] {
            assert!(bad.parse::<MemoryLimit>().is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_memory_limit_display_round_trips() {
        let limit: MemoryLimit = "256M".parse().unwrap();
        assert_eq!(limit.to_string(), "256M");
        assert_eq!(MemoryLimit::Bytes(1000).to_string(), "1000");
        assert_eq!(MemoryLimit::Unlimited.to_string(), "-1");
    }

    #[test]
    fn test_threshold_is_eighty_percent() {
        assert_eq!(MemoryLimit::Bytes(1000).threshold(), Some(800));
        assert_eq!(MemoryLimit::Bytes(256 * 1024 * 1024).threshold(), Some(214_748_364));
        assert_eq!(MemoryLimit::Unlimited.threshold(), None);
    }

    #[test]
    fn test_from_source_rejects_bad_numbers() {
        let source = MapConfigSource::new().with("max_requests", "many");
        let err = RuntimeConfig::from_source(&source).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "max_requests"));
    }

    #[test]
    fn test_validate_watermark_above_ceiling() {
        let source = MapConfigSource::new()
            .with("persistent_ceiling", "10")
            .with("persistent_watermark", "20");
        assert!(matches!(
            RuntimeConfig::from_source(&source),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_from_json_uses_defaults() {
        let config = RuntimeConfig::from_json(r#"{"memory_limit": "1G", "warm": ["db"]}"#).unwrap();
        assert_eq!(config.memory_limit, MemoryLimit::Bytes(1024 * 1024 * 1024));
        assert_eq!(config.warm, vec!["db".to_string()]);
        assert_eq!(config.max_requests, 500);
    }
}
