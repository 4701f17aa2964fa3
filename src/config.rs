use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::eviction::{EvictionConfig, EvictionPolicyType};

/// Complete Encore configuration (loaded from TOML file)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EncoreConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub rerun: RerunConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Memo cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of entries (unset = unbounded)
    #[serde(default)]
    pub max_entries: Option<usize>,

    /// Eviction policy when `max_entries` is exceeded: lru, lfu
    #[serde(default = "default_eviction_policy")]
    pub eviction_policy: String,

    /// Maximum entry age, e.g. "10m" (unset = never expires)
    #[serde(default)]
    pub ttl: Option<String>,

    /// How often expired entries are swept
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: None,
            eviction_policy: default_eviction_policy(),
            ttl: None,
            sweep_interval: default_sweep_interval(),
        }
    }
}

/// Session registry configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SessionConfig {
    /// Maximum concurrent sessions (unset = unlimited)
    #[serde(default)]
    pub max_sessions: Option<usize>,
}

/// Rerun driver configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RerunConfig {
    /// How many times a script may request an immediate rerun in a row
    #[serde(default = "default_max_consecutive_reruns")]
    pub max_consecutive_reruns: u32,
}

impl Default for RerunConfig {
    fn default() -> Self {
        Self {
            max_consecutive_reruns: default_max_consecutive_reruns(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservabilityConfig {
    /// Log level (used when RUST_LOG is unset)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// Default value functions
fn default_eviction_policy() -> String {
    "lru".to_string()
}

fn default_sweep_interval() -> String {
    "30s".to_string()
}

fn default_max_consecutive_reruns() -> u32 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl EncoreConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: EncoreConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Example configuration with every bound switched on
    pub fn example() -> String {
        let config = EncoreConfig {
            cache: CacheConfig {
                max_entries: Some(1000),
                eviction_policy: "lru".to_string(),
                ttl: Some("10m".to_string()),
                sweep_interval: "30s".to_string(),
            },
            session: SessionConfig {
                max_sessions: Some(500),
            },
            ..Default::default()
        };

        toml::to_string_pretty(&config).unwrap_or_default()
    }

    /// Eviction settings for the memo cache
    pub fn eviction_config(&self) -> Result<EvictionConfig> {
        EvictionConfig::from_cache_config(
            self.cache.max_entries,
            &self.cache.eviction_policy,
            self.cache.ttl.as_deref(),
            &self.cache.sweep_interval,
        )
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache.max_entries == Some(0) {
            anyhow::bail!("cache.max_entries must be greater than 0 (omit it for unbounded)");
        }

        if self
            .cache
            .eviction_policy
            .parse::<EvictionPolicyType>()
            .is_err()
        {
            anyhow::bail!("cache.eviction_policy must be one of: lru, lfu");
        }

        if let Some(ttl) = &self.cache.ttl {
            EvictionConfig::parse_duration(ttl)
                .with_context(|| format!("cache.ttl is not a valid duration: {}", ttl))?;
        }

        let sweep = EvictionConfig::parse_duration(&self.cache.sweep_interval).with_context(
            || {
                format!(
                    "cache.sweep_interval is not a valid duration: {}",
                    self.cache.sweep_interval
                )
            },
        )?;
        if sweep.is_zero() {
            anyhow::bail!("cache.sweep_interval must be greater than 0");
        }

        if self.session.max_sessions == Some(0) {
            anyhow::bail!("session.max_sessions must be greater than 0 (omit it for unlimited)");
        }

        if !["trace", "debug", "info", "warn", "error"]
            .contains(&self.observability.log_level.as_str())
        {
            anyhow::bail!("observability.log_level must be one of: trace, debug, info, warn, error");
        }

        if !["pretty", "compact", "json"].contains(&self.observability.log_format.as_str()) {
            anyhow::bail!("observability.log_format must be one of: pretty, compact, json");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = EncoreConfig::default();
        assert_eq!(config.cache.max_entries, None);
        assert_eq!(config.cache.eviction_policy, "lru");
        assert_eq!(config.rerun.max_consecutive_reruns, 10);
    }

    #[test]
    fn test_validate_config() {
        let config = EncoreConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_eviction_policy() {
        let mut config = EncoreConfig::default();
        config.cache.eviction_policy = "ttl".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_ttl() {
        let mut config = EncoreConfig::default();
        config.cache.ttl = Some("forever".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_bounds_rejected() {
        let mut config = EncoreConfig::default();
        config.cache.max_entries = Some(0);
        assert!(config.validate().is_err());

        let mut config = EncoreConfig::default();
        config.session.max_sessions = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_example_round_trips_and_validates() {
        let example = EncoreConfig::example();
        let parsed: EncoreConfig = toml::from_str(&example).unwrap();

        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.cache.max_entries, Some(1000));
        assert_eq!(parsed.session.max_sessions, Some(500));
    }

    #[test]
    fn test_from_file_partial_sections() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("encore.toml");
        fs::write(
            &path,
            r#"
[cache]
max_entries = 64
eviction_policy = "lfu"
ttl = "90s"
"#,
        )
        .unwrap();

        let config = EncoreConfig::from_file(&path).unwrap();
        let eviction = config.eviction_config().unwrap();

        assert_eq!(eviction.max_entries, Some(64));
        assert_eq!(eviction.policy, EvictionPolicyType::Lfu);
        assert_eq!(eviction.ttl, Some(Duration::from_secs(90)));
        assert_eq!(eviction.sweep_interval, Duration::from_secs(30));
        assert_eq!(config.observability.log_format, "pretty");
    }

    #[test]
    fn test_from_file_missing() {
        let temp = TempDir::new().unwrap();
        let err = EncoreConfig::from_file(temp.path().join("nope.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
