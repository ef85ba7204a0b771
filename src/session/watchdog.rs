use super::proxy::SessionProxy;
use super::session::Session;
use crate::domain::now_millis;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Upper bound on one housekeeping sleep when nothing is queued.
    #[serde(with = "crate::app::config::duration_millis")]
    pub default_sleep: Duration,
    /// Grace period granted to sessions whose normal close path failed.
    #[serde(with = "crate::app::config::duration_millis")]
    pub close_grace_period: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            default_sleep: Duration::from_secs(5),
            close_grace_period: Duration::from_secs(5),
        }
    }
}

struct PendingClose {
    session: Arc<Session>,
    deadline: i64,
}

/// Queues of time-deferred session housekeeping.
///
/// Entries are added and removed only by session lifecycle code and the
/// sending pipeline; the watchdog loop never invents work on its own.
pub struct SessionWatchdogContext {
    config: WatchdogConfig,
    close_queue: Mutex<Vec<PendingClose>>,
    split_queue: Mutex<Vec<Arc<SessionProxy>>>,
    changed: Notify,
}

impl SessionWatchdogContext {
    pub fn new(config: WatchdogConfig) -> Self {
        Self {
            config,
            close_queue: Mutex::new(Vec::new()),
            split_queue: Mutex::new(Vec::new()),
            changed: Notify::new(),
        }
    }

    /// Tries the normal close path; only when that fails is the session
    /// queued for a forced close once the grace period expires.
    pub fn close_or_enqueue_for_closing(&self, session: Arc<Session>, grace: Duration) {
        if session.try_end() {
            return;
        }
        let deadline = now_millis() + grace.as_millis() as i64;
        debug!(key = %session.key(), deadline, "session queued for forced close");
        self.close_queue.lock().push(PendingClose { session, deadline });
        self.changed.notify_one();
    }

    pub fn dequeue_from_closing(&self, session: &Arc<Session>) {
        self.close_queue
            .lock()
            .retain(|pending| !Arc::ptr_eq(&pending.session, session));
    }

    /// No-op when the proxy already reports itself finished.
    pub fn add_to_split_by_timeout(&self, proxy: Arc<SessionProxy>) {
        if proxy.is_finished() {
            return;
        }
        self.split_queue.lock().push(proxy);
        self.changed.notify_one();
    }

    pub fn remove_from_split_by_timeout(&self, proxy: &Arc<SessionProxy>) {
        self.split_queue
            .lock()
            .retain(|queued| !Arc::ptr_eq(queued, proxy));
    }

    /// One housekeeping pass; returns how long the loop may sleep before the
    /// next one.
    pub fn execute(&self, now: i64) -> Duration {
        let mut next_wakeup = now + self.config.default_sleep.as_millis() as i64;

        let expired: Vec<Arc<Session>> = {
            let mut queue = self.close_queue.lock();
            let mut expired = Vec::new();
            queue.retain(|pending| {
                if pending.deadline <= now {
                    expired.push(pending.session.clone());
                    false
                } else {
                    true
                }
            });
            if let Some(nearest) = queue.iter().map(|pending| pending.deadline).min() {
                next_wakeup = next_wakeup.min(nearest);
            }
            expired
        };
        for session in expired {
            warn!(key = %session.key(), "grace period expired, force-ending session");
            session.end();
        }

        let proxies: Vec<Arc<SessionProxy>> = self.split_queue.lock().clone();
        for proxy in proxies {
            let next_split = proxy.split_if_needed(now);
            if next_split < 0 {
                self.remove_from_split_by_timeout(&proxy);
            } else {
                next_wakeup = next_wakeup.min(next_split);
            }
        }

        Duration::from_millis(next_wakeup.saturating_sub(now).max(0) as u64)
    }

    #[cfg(test)]
    pub(crate) fn queued_for_closing(&self) -> usize {
        self.close_queue.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn queued_for_splitting(&self) -> usize {
        self.split_queue.lock().len()
    }
}

struct WatchdogWorker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Background worker force-closing sessions whose normal close path failed
/// and splitting long-lived sessions on their schedule.
pub struct SessionWatchdog {
    context: Arc<SessionWatchdogContext>,
    worker: Mutex<Option<WatchdogWorker>>,
}

impl SessionWatchdog {
    pub fn new(context: Arc<SessionWatchdogContext>) -> Self {
        Self {
            context,
            worker: Mutex::new(None),
        }
    }

    pub fn context(&self) -> Arc<SessionWatchdogContext> {
        self.context.clone()
    }

    /// Spawns the housekeeping loop. Returns `false` if already running.
    pub fn start(&self) -> bool {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return false;
        }
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_watchdog_loop(self.context.clone(), cancel.clone()));
        *worker = Some(WatchdogWorker { handle, cancel });
        info!("session watchdog started");
        true
    }

    /// Stops the housekeeping loop, waiting up to `timeout`.
    pub async fn stop(&self, timeout: Duration) -> bool {
        let Some(worker) = self.worker.lock().take() else {
            return false;
        };
        worker.cancel.cancel();
        let mut handle = worker.handle;
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(_) => {
                info!("session watchdog stopped");
                true
            }
            Err(_) => {
                warn!("session watchdog did not stop within {:?}, aborting", timeout);
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

async fn run_watchdog_loop(context: Arc<SessionWatchdogContext>, cancel: CancellationToken) {
    loop {
        let sleep = context.execute(now_millis());
        tokio::select! {
            _ = tokio::time::sleep(sleep) => {}
            _ = context.changed.notified() => {}
            _ = cancel.cancelled() => break,
        }
    }
    debug!("watchdog loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BeaconCache, BeaconKey};

    fn test_context() -> SessionWatchdogContext {
        SessionWatchdogContext::new(WatchdogConfig::default())
    }

    fn blocked_session() -> Arc<Session> {
        let cache = Arc::new(BeaconCache::new());
        let session = Arc::new(Session::new(
            cache,
            BeaconKey::new(1, 0),
            "app",
            "127.0.0.1",
            now_millis(),
        ));
        session.child_started();
        session
    }

    #[test]
    fn enqueues_only_when_the_normal_close_fails() {
        let context = test_context();
        let cache = Arc::new(BeaconCache::new());
        let closeable = Arc::new(Session::new(
            cache,
            BeaconKey::new(1, 0),
            "app",
            "127.0.0.1",
            now_millis(),
        ));

        context.close_or_enqueue_for_closing(closeable.clone(), Duration::from_secs(5));
        assert!(closeable.is_finished());
        assert_eq!(context.queued_for_closing(), 0);

        let blocked = blocked_session();
        context.close_or_enqueue_for_closing(blocked.clone(), Duration::from_secs(5));
        assert!(!blocked.is_finished());
        assert_eq!(context.queued_for_closing(), 1);
    }

    #[test]
    fn execute_force_ends_only_expired_entries() {
        let context = test_context();
        let session = blocked_session();
        context.close_or_enqueue_for_closing(session.clone(), Duration::from_secs(5));

        let now = now_millis();
        // Before the deadline: still queued, sleep bounded by the deadline.
        let sleep = context.execute(now);
        assert!(!session.is_finished());
        assert_eq!(context.queued_for_closing(), 1);
        assert!(sleep <= Duration::from_secs(5));

        // Past the deadline: force-ended and dropped from the queue.
        context.execute(now + 6_000);
        assert!(session.is_finished());
        assert_eq!(context.queued_for_closing(), 0);
    }

    #[test]
    fn sleep_is_clipped_to_the_default_ceiling_when_idle() {
        let context = test_context();
        let sleep = context.execute(now_millis());
        assert_eq!(sleep, WatchdogConfig::default().default_sleep);
    }

    #[test]
    fn dequeue_removes_the_matching_session_only() {
        let context = test_context();
        let first = blocked_session();
        let second = blocked_session();
        context.close_or_enqueue_for_closing(first.clone(), Duration::from_secs(5));
        context.close_or_enqueue_for_closing(second.clone(), Duration::from_secs(5));
        assert_eq!(context.queued_for_closing(), 2);

        context.dequeue_from_closing(&first);
        assert_eq!(context.queued_for_closing(), 1);
        assert_eq!(context.queued_for_splitting(), 0);
    }
}
