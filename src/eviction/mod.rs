//! Cache eviction module
//!
//! The memo cache is unbounded unless configured otherwise. Two opt-in bounds
//! are supported:
//! - **max_entries**: once exceeded, entries are evicted by policy
//!   (**LRU** or **LFU**) until the cache is back at the bound
//! - **ttl**: entries older than the TTL are treated as misses on lookup and
//!   purged by a background sweeper task
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! max_entries = 1000        # omit for unbounded
//! eviction_policy = "lru"   # lru or lfu
//! ttl = "10m"               # omit to never expire
//! sweep_interval = "30s"
//! ```

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, info};

use crate::logging::services;

mod background;
mod policy;

pub use background::{spawn_expiry_sweeper, SweeperHandle};
pub use policy::{EvictionCandidate, EvictionPolicy, LfuPolicy, LruPolicy};

/// Eviction configuration for the memo cache
#[derive(Debug, Clone, PartialEq)]
pub struct EvictionConfig {
    /// Maximum number of stored entries (None = unbounded)
    pub max_entries: Option<usize>,
    /// Policy used when `max_entries` is exceeded
    pub policy: EvictionPolicyType,
    /// Maximum entry age (None = never expires)
    pub ttl: Option<Duration>,
    /// How often the background sweeper purges expired entries
    pub sweep_interval: Duration,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            max_entries: None,
            policy: EvictionPolicyType::Lru,
            ttl: None,
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl EvictionConfig {
    /// Parse duration string (e.g., "7d", "24h", "30m", "10s", "250ms")
    pub fn parse_duration(duration_str: &str) -> Result<Duration> {
        let duration_str = duration_str.trim().to_lowercase();

        if let Some(num) = duration_str.strip_suffix("ms") {
            let num: u64 = num.trim().parse().context("Invalid duration number")?;
            return Ok(Duration::from_millis(num));
        }

        let (num, unit_secs) = if let Some(num) = duration_str.strip_suffix('d') {
            (num, 24 * 60 * 60)
        } else if let Some(num) = duration_str.strip_suffix('h') {
            (num, 60 * 60)
        } else if let Some(num) = duration_str.strip_suffix('m') {
            (num, 60)
        } else if let Some(num) = duration_str.strip_suffix('s') {
            (num, 1)
        } else {
            // Assume seconds
            let num: u64 = duration_str.parse().context("Invalid duration format")?;
            return Ok(Duration::from_secs(num));
        };

        let num: u64 = num.trim().parse().context("Invalid duration number")?;
        let secs = num
            .checked_mul(unit_secs)
            .with_context(|| format!("Duration overflows: {}", duration_str))?;
        Ok(Duration::from_secs(secs))
    }

    /// Create config from the `[cache]` section strings
    pub fn from_cache_config(
        max_entries: Option<usize>,
        eviction_policy: &str,
        ttl: Option<&str>,
        sweep_interval: &str,
    ) -> Result<Self> {
        let policy = eviction_policy.parse()?;
        let ttl = ttl.map(Self::parse_duration).transpose()?;
        let sweep_interval = Self::parse_duration(sweep_interval)?;

        Ok(Self {
            max_entries,
            policy,
            ttl,
            sweep_interval,
        })
    }
}

/// Eviction policy type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicyType {
    /// Least Recently Used
    Lru,
    /// Least Frequently Used
    Lfu,
}

impl std::str::FromStr for EvictionPolicyType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "lru" => Ok(Self::Lru),
            "lfu" => Ok(Self::Lfu),
            _ => anyhow::bail!("Invalid eviction policy: {}. Must be lru or lfu", s),
        }
    }
}

impl EvictionPolicyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lru => "lru",
            Self::Lfu => "lfu",
        }
    }
}

/// Eviction manager
///
/// Decides when the entry bound is exceeded and which entries go.
pub struct EvictionManager {
    config: EvictionConfig,
    policy: Box<dyn EvictionPolicy>,
}

impl EvictionManager {
    pub fn new(config: EvictionConfig) -> Self {
        debug!(
            "Eviction manager initialized: policy={}, max_entries={:?}, ttl={:?}",
            config.policy.as_str(),
            config.max_entries,
            config.ttl
        );

        let policy: Box<dyn EvictionPolicy> = match config.policy {
            EvictionPolicyType::Lru => Box::new(LruPolicy),
            EvictionPolicyType::Lfu => Box::new(LfuPolicy),
        };

        Self { config, policy }
    }

    pub fn config(&self) -> &EvictionConfig {
        &self.config
    }

    /// Check if the entry bound is exceeded
    pub fn needs_eviction(&self, entry_count: usize) -> bool {
        self.config
            .max_entries
            .is_some_and(|max| entry_count > max)
    }

    /// Whether an entry of the given age has outlived the TTL
    pub fn is_expired(&self, age: Duration) -> bool {
        self.config.ttl.is_some_and(|ttl| age > ttl)
    }

    /// Select candidates to evict so that `entry_count` drops to the bound
    pub fn select_candidates(
        &self,
        candidates: &[EvictionCandidate],
        entry_count: usize,
    ) -> Vec<EvictionCandidate> {
        let Some(max) = self.config.max_entries else {
            return Vec::new();
        };
        let excess = entry_count.saturating_sub(max);
        if excess == 0 {
            return Vec::new();
        }

        let mut sorted_candidates = candidates.to_vec();
        self.policy.sort_candidates(&mut sorted_candidates);
        sorted_candidates.truncate(excess);

        debug!(
            "Selected {} candidates for eviction (policy={})",
            sorted_candidates.len(),
            self.config.policy.as_str()
        );

        sorted_candidates
    }

    /// Log eviction summary
    pub fn log_summary(&self, evicted_count: usize, operation: &str, reason: &str) {
        if evicted_count > 0 {
            info!(
                service = services::MEMO,
                operation,
                reason,
                entry_count = evicted_count,
                "evicted cache entries"
            );
        }
    }
}
