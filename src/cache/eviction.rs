use super::store::BeaconCache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Bounds driving the two cache eviction policies.
///
/// A non-positive `max_record_age_ms` disables age eviction; non-positive
/// size bounds, or an upper bound below the lower one, disable space
/// eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    pub max_record_age_ms: i64,
    pub cache_size_lower_bound: i64,
    pub cache_size_upper_bound: i64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            max_record_age_ms: 105 * 60 * 1000,           // 105 minutes
            cache_size_lower_bound: 80 * 1024 * 1024,     // 80 MiB
            cache_size_upper_bound: 100 * 1024 * 1024,    // 100 MiB
        }
    }
}

/// The closed set of eviction policies the evictor worker drives.
pub(crate) enum EvictionStrategy {
    Age(AgeEvictionStrategy),
    Space(SpaceEvictionStrategy),
}

impl EvictionStrategy {
    pub(crate) fn execute(&mut self, now: i64, cancel: &CancellationToken) {
        match self {
            EvictionStrategy::Age(strategy) => strategy.execute(now, cancel),
            EvictionStrategy::Space(strategy) => strategy.execute(cancel),
        }
    }
}

/// Evicts every active record older than the configured maximum age.
///
/// Stateless aside from the last-run bookkeeping: a pass runs only once the
/// maximum age has elapsed since the previous one.
pub(crate) struct AgeEvictionStrategy {
    cache: Arc<BeaconCache>,
    max_record_age_ms: i64,
    last_run_time: i64,
    disabled_logged: bool,
}

impl AgeEvictionStrategy {
    pub(crate) fn new(cache: Arc<BeaconCache>, config: &EvictionConfig, now: i64) -> Self {
        Self {
            cache,
            max_record_age_ms: config.max_record_age_ms,
            last_run_time: now,
            disabled_logged: false,
        }
    }

    fn is_disabled(&self) -> bool {
        self.max_record_age_ms <= 0
    }

    fn should_run(&self, now: i64) -> bool {
        now - self.last_run_time >= self.max_record_age_ms
    }

    fn execute(&mut self, now: i64, cancel: &CancellationToken) {
        if self.is_disabled() {
            if !self.disabled_logged {
                info!("age eviction is disabled (max record age <= 0)");
                self.disabled_logged = true;
            }
            return;
        }
        if !self.should_run(now) {
            return;
        }
        self.do_execute(now, cancel);
        // The pass ran against this snapshot time, whether or not any keys
        // existed.
        self.last_run_time = now;
    }

    fn do_execute(&self, now: i64, cancel: &CancellationToken) {
        let min_timestamp = now - self.max_record_age_ms;
        for key in self.cache.keys() {
            if cancel.is_cancelled() {
                return;
            }
            let evicted = self.cache.evict_records_by_age(key, min_timestamp);
            if evicted > 0 {
                debug!(key = %key, evicted, "evicted records by age");
            }
        }
    }
}

/// Keeps the cache's total active size within the configured bounds.
///
/// While the total exceeds the upper bound, one oldest record is evicted from
/// every known key in turn, re-checking the total after each removal and
/// stopping as soon as it reaches the lower bound. Rotating the pressure
/// across sessions keeps any single session from losing all of its recent
/// data under global memory pressure.
pub(crate) struct SpaceEvictionStrategy {
    cache: Arc<BeaconCache>,
    lower_bound: i64,
    upper_bound: i64,
    disabled_logged: bool,
}

impl SpaceEvictionStrategy {
    pub(crate) fn new(cache: Arc<BeaconCache>, config: &EvictionConfig) -> Self {
        Self {
            cache,
            lower_bound: config.cache_size_lower_bound,
            upper_bound: config.cache_size_upper_bound,
            disabled_logged: false,
        }
    }

    fn is_disabled(&self) -> bool {
        self.lower_bound <= 0 || self.upper_bound <= 0 || self.upper_bound < self.lower_bound
    }

    fn should_run(&self) -> bool {
        self.cache.num_bytes_in_cache() > self.upper_bound
    }

    fn execute(&mut self, cancel: &CancellationToken) {
        if self.is_disabled() {
            if !self.disabled_logged {
                info!(
                    lower = self.lower_bound,
                    upper = self.upper_bound,
                    "space eviction is disabled (invalid bounds)"
                );
                self.disabled_logged = true;
            }
            return;
        }
        if !self.should_run() {
            return;
        }
        self.do_execute(cancel);
    }

    fn do_execute(&self, cancel: &CancellationToken) {
        while !cancel.is_cancelled() && self.cache.num_bytes_in_cache() > self.lower_bound {
            let keys = self.cache.keys();
            if keys.is_empty() {
                return;
            }
            for key in keys {
                if cancel.is_cancelled() || self.cache.num_bytes_in_cache() <= self.lower_bound {
                    return;
                }
                let evicted = self.cache.evict_records_by_count(key, 1);
                if evicted > 0 {
                    debug!(key = %key, "evicted oldest record under space pressure");
                }
            }
        }
    }
}
