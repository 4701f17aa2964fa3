pub mod config;
pub mod demo;
pub mod fingerprint;

use anyhow::Result;

use crate::cli::CommonConfigArgs;
use encore::config::EncoreConfig;
use encore::config_discovery::load_config_with_discovery;

/// Load config (explicit path or discovered) and apply CLI/env overrides
pub fn load_config(common: &CommonConfigArgs) -> Result<EncoreConfig> {
    let mut config = load_config_with_discovery(common.config.as_deref())?;

    if let Some(max_entries) = common.config_max_entries {
        config.cache.max_entries = Some(max_entries);
    }
    if let Some(policy) = &common.config_eviction_policy {
        config.cache.eviction_policy = policy.clone();
    }
    if let Some(ttl) = &common.config_ttl {
        config.cache.ttl = Some(ttl.clone());
    }
    if let Some(max_sessions) = common.config_max_sessions {
        config.session.max_sessions = Some(max_sessions);
    }
    if let Some(level) = &common.config_log_level {
        config.observability.log_level = level.clone();
    }

    config.validate()?;
    Ok(config)
}
