use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::cli::DemoArgs;
use encore::cli_utils::encore_prefix;
use encore::demo::{tutorial_app, INCREMENT_KEY};
use encore::eviction::{spawn_expiry_sweeper, EvictionConfig};
use encore::logging;
use encore::memo::MemoCache;
use encore::rerun::{InteractionEvent, RerunDriver, UiDescription, UiElement};
use encore::session::{SessionId, SessionRegistry};

pub async fn run(args: DemoArgs) -> Result<()> {
    let config = super::load_config(&args.common)?;
    logging::init_with(
        &config.observability.log_level,
        Some(&config.observability.log_format),
    );

    let compute_delay = EvictionConfig::parse_duration(&args.compute_delay)
        .with_context(|| format!("Invalid --compute-delay: {}", args.compute_delay))?;

    let cache = Arc::new(MemoCache::new(config.eviction_config()?));
    let registry = Arc::new(SessionRegistry::new(config.session.max_sessions));
    let driver = Arc::new(RerunDriver::new(
        tutorial_app(compute_delay),
        Arc::clone(&registry),
        Arc::clone(&cache),
        config.rerun.max_consecutive_reruns,
    ));

    let sweeper = config
        .cache
        .ttl
        .is_some()
        .then(|| spawn_expiry_sweeper(Arc::clone(&cache)));

    info!(
        sessions = args.sessions,
        clicks = args.clicks,
        "Running tutorial app"
    );
    let started = Instant::now();

    let handles: Vec<_> = (0..args.sessions)
        .map(|i| {
            let driver = Arc::clone(&driver);
            let clicks = args.clicks;
            tokio::spawn(async move {
                let id = SessionId::from(format!("viewer-{}", i + 1));
                simulate_viewer(&driver, &id, clicks).await
            })
        })
        .collect();

    let mut descriptions = Vec::with_capacity(handles.len());
    for handle in handles {
        descriptions.push(handle.await.context("viewer task panicked")??);
    }
    let elapsed = started.elapsed();

    let stats = cache.stats();
    registry.destroy_all();
    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await;
    }

    if args.json {
        let report = serde_json::json!({
            "sessions": descriptions,
            "cache": stats,
            "elapsed_ms": elapsed.as_millis() as u64,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for description in &descriptions {
        print_description(description);
    }
    println!(
        "{} cache: {} entries, {} hits, {} misses, {} computations ({:.0?})",
        encore_prefix(),
        stats.entries,
        stats.hits,
        stats.misses,
        stats.computations,
        elapsed
    );

    Ok(())
}

/// Open a view, then click the increment button `clicks` times
async fn simulate_viewer(
    driver: &RerunDriver,
    id: &SessionId,
    clicks: usize,
) -> Result<UiDescription> {
    let mut description = driver
        .trigger_rerun(id, InteractionEvent::InitialView)
        .await?;

    for _ in 0..clicks {
        description = driver
            .trigger_rerun(
                id,
                InteractionEvent::WidgetChanged {
                    key: INCREMENT_KEY.to_string(),
                    value: serde_json::Value::Bool(true),
                },
            )
            .await?;
    }

    Ok(description)
}

fn print_description(description: &UiDescription) {
    println!(
        "{} session {} (run {}, {:?})",
        encore_prefix(),
        description.session_id,
        description.run,
        description.status
    );
    for element in &description.elements {
        match element {
            UiElement::Text { body } => println!("  {}", body),
            UiElement::Json { value } => println!("  {}", value),
            UiElement::Widget {
                key, kind, value, ..
            } => println!("  [{:?} {}] = {}", kind, key, value),
        }
    }
    if let Some(error) = &description.error {
        println!("  error: {}", error);
    }
}
