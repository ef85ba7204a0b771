use super::eviction::{AgeEvictionStrategy, EvictionConfig, EvictionStrategy, SpaceEvictionStrategy};
use super::store::BeaconCache;
use crate::domain::now_millis;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct EvictorWorker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Background worker keeping the beacon cache within its configured bounds.
///
/// The worker blocks on the store's wake signal instead of polling, so idle
/// CPU stays at zero while both strategies still run promptly after growth.
pub struct CacheEvictor {
    cache: Arc<BeaconCache>,
    config: EvictionConfig,
    worker: Mutex<Option<EvictorWorker>>,
}

impl CacheEvictor {
    pub fn new(cache: Arc<BeaconCache>, config: EvictionConfig) -> Self {
        Self {
            cache,
            config,
            worker: Mutex::new(None),
        }
    }

    /// Spawns the eviction loop. Returns `false` if it is already running.
    pub fn start(&self) -> bool {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return false;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_eviction_loop(
            self.cache.clone(),
            self.config.clone(),
            cancel.clone(),
        ));
        *worker = Some(EvictorWorker { handle, cancel });
        info!("cache evictor started");
        true
    }

    /// Stops the eviction loop, waiting up to `timeout` for it to finish.
    ///
    /// Returns `false` when the worker was not running, or when it had to be
    /// aborted because it did not stop in time.
    pub async fn stop(&self, timeout: Duration) -> bool {
        let Some(worker) = self.worker.lock().take() else {
            return false;
        };
        worker.cancel.cancel();
        let mut handle = worker.handle;
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(_) => {
                info!("cache evictor stopped");
                true
            }
            Err(_) => {
                warn!("cache evictor did not stop within {:?}, aborting", timeout);
                handle.abort();
                false
            }
        }
    }

    pub fn is_alive(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }
}

async fn run_eviction_loop(cache: Arc<BeaconCache>, config: EvictionConfig, cancel: CancellationToken) {
    let now = now_millis();
    let mut strategies = [
        EvictionStrategy::Age(AgeEvictionStrategy::new(cache.clone(), &config, now)),
        EvictionStrategy::Space(SpaceEvictionStrategy::new(cache.clone(), &config)),
    ];

    loop {
        tokio::select! {
            _ = cache.wait_for_data_changed() => {}
            _ = cancel.cancelled() => break,
        }
        let now = now_millis();
        for strategy in &mut strategies {
            strategy.execute(now, &cancel);
        }
    }
    debug!("eviction loop exited");
}
