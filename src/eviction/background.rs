//! Background expiry sweeper
//!
//! Runs in a tokio task and periodically purges memo cache entries that have
//! outlived the configured TTL. Lookups already treat expired entries as
//! misses; the sweeper only reclaims memory for entries nobody asks for.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::memo::MemoCache;

/// Handle to control the background sweeper task
pub struct SweeperHandle {
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
    join_handle: Option<tokio::task::JoinHandle<()>>,
}

impl SweeperHandle {
    /// Trigger an immediate sweep (non-blocking)
    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    /// Stop the sweeper task
    pub async fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_one();

        if let Some(handle) = self.join_handle.take() {
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(Ok(())) => {
                    debug!("Expiry sweeper stopped");
                }
                Ok(Err(e)) => {
                    warn!("Expiry sweeper panicked: {}", e);
                }
                Err(_) => {
                    warn!("Expiry sweeper did not stop in time");
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::SeqCst)
    }
}

/// Spawn the expiry sweeper for `cache`
///
/// Uses the cache's configured `sweep_interval`. Must be called from within a
/// tokio runtime.
pub fn spawn_expiry_sweeper(cache: Arc<MemoCache>) -> SweeperHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let notify = Arc::new(Notify::new());

    let shutdown_clone = Arc::clone(&shutdown);
    let notify_clone = Arc::clone(&notify);
    let interval = cache.config().sweep_interval;

    let join_handle = tokio::spawn(async move {
        run_sweep_loop(cache, interval, shutdown_clone, notify_clone).await;
    });

    info!("Expiry sweeper started (interval: {:?})", interval);

    SweeperHandle {
        shutdown,
        notify,
        join_handle: Some(join_handle),
    }
}

async fn run_sweep_loop(
    cache: Arc<MemoCache>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = notify.notified() => {
                if shutdown.load(Ordering::SeqCst) {
                    debug!("Expiry sweeper received shutdown signal");
                    break;
                }
                debug!("Expiry sweep triggered manually");
            }
        }

        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let purged = cache.purge_expired();
        if purged > 0 {
            debug!("Expiry sweep purged {} entries", purged);
        }
    }

    info!("Expiry sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eviction::EvictionConfig;
    use crate::fingerprint::{Args, Fingerprint, FunctionIdentity};

    fn fill(cache: &MemoCache, count: u32) {
        let identity = FunctionIdentity::versioned("sweep", "v1");
        for i in 0..count {
            let fp = Fingerprint::compute(&identity, &Args::new().arg(&i).unwrap()).unwrap();
            cache.get_or_compute_data(&fp, || Ok(i)).unwrap();
        }
    }

    #[tokio::test]
    async fn test_sweeper_purges_expired_entries() {
        let cache = Arc::new(MemoCache::new(EvictionConfig {
            ttl: Some(Duration::from_millis(20)),
            sweep_interval: Duration::from_millis(30),
            ..Default::default()
        }));
        fill(&cache, 5);
        assert_eq!(cache.len(), 5);

        let handle = spawn_expiry_sweeper(Arc::clone(&cache));
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(cache.is_empty());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweeper_manual_trigger() {
        let cache = Arc::new(MemoCache::new(EvictionConfig {
            ttl: Some(Duration::from_millis(10)),
            sweep_interval: Duration::from_secs(3600),
            ..Default::default()
        }));
        fill(&cache, 3);

        let handle = spawn_expiry_sweeper(Arc::clone(&cache));
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(cache.is_empty());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweeper_shutdown() {
        let cache = Arc::new(MemoCache::unbounded());
        let handle = spawn_expiry_sweeper(cache);

        assert!(handle.is_running());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweeper_keeps_entries_without_ttl() {
        let cache = Arc::new(MemoCache::new(EvictionConfig {
            sweep_interval: Duration::from_millis(10),
            ..Default::default()
        }));
        fill(&cache, 2);

        let handle = spawn_expiry_sweeper(Arc::clone(&cache));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(cache.len(), 2);
        handle.shutdown().await;
    }
}
