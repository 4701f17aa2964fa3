use anyhow::Result;
use tracing::info;

use crate::cli::ConfigCommands;
use encore::config::EncoreConfig;
use encore::config_discovery::load_config_with_discovery;

pub fn run(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Validate { path } => validate(&path),
        ConfigCommands::Generate => generate(),
        ConfigCommands::Show { config } => show(config),
    }
}

fn validate(path: &str) -> Result<()> {
    info!("Validating config file: {}", path);

    let config = EncoreConfig::from_file(path)?;
    config.validate()?;

    let or_unbounded = |value: Option<usize>| {
        value
            .map(|v| v.to_string())
            .unwrap_or_else(|| "unbounded".to_string())
    };

    println!("✓ Configuration file is valid: {}", path);
    println!("\nSummary:");
    println!(
        "  - Max cache entries: {}",
        or_unbounded(config.cache.max_entries)
    );
    println!("  - Eviction policy: {}", config.cache.eviction_policy);
    println!(
        "  - Entry TTL: {}",
        config.cache.ttl.as_deref().unwrap_or("none")
    );
    println!(
        "  - Max sessions: {}",
        or_unbounded(config.session.max_sessions)
    );
    println!(
        "  - Max consecutive reruns: {}",
        config.rerun.max_consecutive_reruns
    );

    Ok(())
}

fn generate() -> Result<()> {
    info!("Generating example config");
    println!("{}", EncoreConfig::example());
    Ok(())
}

fn show(config_path: Option<String>) -> Result<()> {
    info!("Showing effective configuration");

    let config = load_config_with_discovery(config_path.as_deref())?;

    println!("Effective Configuration:\n");
    println!("{}", toml::to_string_pretty(&config)?);

    Ok(())
}
