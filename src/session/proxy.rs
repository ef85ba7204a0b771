use super::session::Session;
use super::SessionRegistry;
use crate::cache::{BeaconCache, BeaconKey};
use crate::domain::now_millis;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use tracing::{debug, info};

/// Stands in for one logical session across all of its split instances.
///
/// Recording calls go to the current split instance; when the instance
/// exceeds the server-configured maximum duration, idle timeout or event
/// count, the proxy ends it, registers a successor under the next sequence
/// number, and telemetry continues seamlessly. The watchdog drives the two
/// time-based splits through `split_if_needed`; the event-count split
/// happens inline at recording time.
pub struct SessionProxy {
    registry: Arc<dyn SessionRegistry>,
    cache: Arc<BeaconCache>,
    application_id: String,
    client_ip: String,
    current: Mutex<Arc<Session>>,
    last_interaction_time: AtomicI64,
    top_level_event_count: AtomicI32,
    finished: AtomicBool,
}

impl SessionProxy {
    pub fn new(
        registry: Arc<dyn SessionRegistry>,
        cache: Arc<BeaconCache>,
        application_id: &str,
        client_ip: &str,
        session_id: i32,
    ) -> Arc<Self> {
        let now = now_millis();
        let session = Arc::new(Session::new(
            cache.clone(),
            BeaconKey::new(session_id, 0),
            application_id,
            client_ip,
            now,
        ));
        registry.start_session(session.clone());

        Arc::new(Self {
            registry,
            cache,
            application_id: application_id.to_string(),
            client_ip: client_ip.to_string(),
            current: Mutex::new(session),
            last_interaction_time: AtomicI64::new(now),
            top_level_event_count: AtomicI32::new(0),
            finished: AtomicBool::new(false),
        })
    }

    pub fn current_session(&self) -> Arc<Session> {
        self.current.lock().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }

    /// Records a serialized top-level event, splitting first when the event
    /// count for the current instance is exhausted.
    pub fn record_event(&self, payload: String) {
        if self.is_finished() {
            return;
        }
        let now = now_millis();
        self.last_interaction_time.store(now, Ordering::Relaxed);

        let max_events = self.registry.current_attributes().max_events_per_session();
        let count = self.top_level_event_count.fetch_add(1, Ordering::Relaxed) + 1;
        if max_events > 0 && count > max_events {
            self.split_session(now);
        }
        self.current_session().record_event(now, payload);
    }

    /// Records a serialized action. Actions do not count against the
    /// event-count split window.
    pub fn record_action(&self, payload: String) {
        if self.is_finished() {
            return;
        }
        let now = now_millis();
        self.last_interaction_time.store(now, Ordering::Relaxed);
        self.current_session().record_action(now, payload);
    }

    /// Performs any split that is due and reports when the next one is.
    ///
    /// Returns the earliest future split time in epoch milliseconds, or a
    /// negative value when the proxy is finished and no longer needs
    /// watching.
    pub fn split_if_needed(&self, now: i64) -> i64 {
        if self.is_finished() {
            return -1;
        }
        let attributes = self.registry.current_attributes();
        let max_duration = attributes.max_session_duration().as_millis() as i64;
        let idle_timeout = attributes.session_timeout().as_millis() as i64;

        let session = self.current_session();
        let duration_deadline = session.start_time() + max_duration;
        let idle_deadline = self.last_interaction_time.load(Ordering::Relaxed) + idle_timeout;

        if now >= duration_deadline || now >= idle_deadline {
            self.split_session(now);
            let session = self.current_session();
            let next_duration = session.start_time() + max_duration;
            let next_idle = self.last_interaction_time.load(Ordering::Relaxed) + idle_timeout;
            return next_duration.min(next_idle);
        }
        duration_deadline.min(idle_deadline)
    }

    /// Ends the current instance and continues under the next sequence
    /// number.
    fn split_session(&self, now: i64) {
        let mut current = self.current.lock();
        let old = current.clone();
        let next_key = old.key().next_sequence();

        old.end();
        self.registry.finish_session(old);

        let replacement = Arc::new(Session::new(
            self.cache.clone(),
            next_key,
            &self.application_id,
            &self.client_ip,
            now,
        ));
        self.registry.start_session(replacement.clone());
        *current = replacement;

        self.top_level_event_count.store(0, Ordering::Relaxed);
        self.last_interaction_time.store(now, Ordering::Relaxed);
        info!(key = %next_key, "session split, continuing under new sequence");
    }

    /// Stops recording and splitting without touching the current split
    /// instance, whose close path is owned by the caller (e.g. the
    /// watchdog's grace handling).
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::Relaxed);
    }

    /// Ends the proxy and its current split instance.
    pub fn end(&self) {
        if self.finished.swap(true, Ordering::Relaxed) {
            return;
        }
        let current = self.current.lock().clone();
        current.end();
        self.registry.finish_session(current);
        debug!("session proxy finished");
    }
}
