use crate::session::{Session, SessionRegistry};
use crate::transport::{CollectorClient, ResponseAttributes};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Protocol pacing and retry constants of the sending pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Sleep between two capture-on iterations.
    #[serde(with = "crate::app::config::duration_millis")]
    pub default_sleep: Duration,
    /// Interval between status checks while capturing is off.
    #[serde(with = "crate::app::config::duration_millis")]
    pub status_check_interval: Duration,
    /// Interval after which the clock offset is re-estimated.
    #[serde(with = "crate::app::config::duration_millis")]
    pub time_sync_interval: Duration,
    /// First back-off delay of every retry ladder; doubles per attempt.
    #[serde(with = "crate::app::config::duration_millis")]
    pub initial_retry_delay: Duration,
    pub max_status_request_retries: u32,
    pub time_sync_probe_count: usize,
    pub max_time_sync_retries: u32,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            default_sleep: Duration::from_secs(1),
            status_check_interval: Duration::from_secs(2 * 60 * 60),
            time_sync_interval: Duration::from_secs(2 * 60 * 60),
            initial_retry_delay: Duration::from_secs(1),
            max_status_request_retries: 5,
            time_sync_probe_count: 5,
            max_time_sync_retries: 5,
        }
    }
}

/// One-shot broadcast gate for the "initialization completed" signal.
///
/// Exactly one state fires it, exactly once; any number of callers may block
/// on it concurrently and are released together, and a caller arriving after
/// the fact gets the latched result immediately.
pub struct InitLatch {
    result: watch::Sender<Option<bool>>,
}

impl Default for InitLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl InitLatch {
    pub fn new() -> Self {
        let (result, _) = watch::channel(None);
        Self { result }
    }

    /// Latches the result; every call after the first is ignored.
    pub fn complete(&self, success: bool) {
        self.result.send_if_modified(|value| {
            if value.is_none() {
                *value = Some(success);
                true
            } else {
                false
            }
        });
    }

    pub fn is_completed(&self) -> bool {
        self.result.borrow().is_some()
    }

    /// Waits until the latch fires and returns the latched result.
    pub async fn wait(&self) -> bool {
        let mut receiver = self.result.subscribe();
        match receiver.wait_for(Option::is_some).await {
            Ok(value) => (*value).unwrap_or(false),
            // The sender lives as long as the latch itself.
            Err(_) => false,
        }
    }

    /// Waits up to `timeout`; `None` when the latch has not fired in time.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<bool> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }
}

/// Shared state of the sending pipeline.
///
/// The state-machine fields (attributes, bookkeeping timestamps) are
/// single-writer: only the sender worker mutates them. The session queues
/// are the genuinely multi-writer part, fed by recording code and drained by
/// the worker.
pub struct SendingContext<C: CollectorClient> {
    client: Arc<C>,
    config: SenderConfig,
    shutdown: CancellationToken,
    init_latch: InitLatch,
    attributes: RwLock<ResponseAttributes>,
    open_sessions: Mutex<VecDeque<Arc<Session>>>,
    finished_sessions: Mutex<VecDeque<Arc<Session>>>,
    last_open_session_send_time: AtomicI64,
    last_status_check_time: AtomicI64,
    last_time_sync_time: AtomicI64,
    time_sync_supported: AtomicBool,
    cluster_time_offset: AtomicI64,
}

impl<C: CollectorClient> SendingContext<C> {
    pub fn new(client: Arc<C>, config: SenderConfig) -> Self {
        Self {
            client,
            config,
            shutdown: CancellationToken::new(),
            init_latch: InitLatch::new(),
            attributes: RwLock::new(ResponseAttributes::default()),
            open_sessions: Mutex::new(VecDeque::new()),
            finished_sessions: Mutex::new(VecDeque::new()),
            last_open_session_send_time: AtomicI64::new(0),
            last_status_check_time: AtomicI64::new(0),
            last_time_sync_time: AtomicI64::new(-1),
            time_sync_supported: AtomicBool::new(true),
            cluster_time_offset: AtomicI64::new(0),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    // --- shutdown -----------------------------------------------------

    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Sleeps for `duration`, waking early when shutdown is requested.
    pub async fn sleep(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.shutdown.cancelled() => {}
        }
    }

    pub async fn sleep_default(&self) {
        self.sleep(self.config.default_sleep).await;
    }

    // --- init signal --------------------------------------------------

    pub fn init_completed(&self, success: bool) {
        if success {
            info!("agent initialization completed");
        } else {
            info!("agent initialization failed");
        }
        self.init_latch.complete(success);
    }

    pub fn init_latch(&self) -> &InitLatch {
        &self.init_latch
    }

    // --- server-directed settings --------------------------------------

    pub fn attributes(&self) -> ResponseAttributes {
        self.attributes.read().clone()
    }

    pub fn is_capture_on(&self) -> bool {
        let attributes = self.attributes.read();
        attributes.is_capture() && attributes.multiplicity() > 0
    }

    /// Merges a collector response into the shared settings.
    ///
    /// When the merged settings no longer allow capturing, all queued
    /// sessions are dropped and their buffered data deleted; retaining
    /// stale telemetry for a later capture-on would misreport that period.
    pub fn handle_status_response(&self, response: &ResponseAttributes) {
        {
            let mut attributes = self.attributes.write();
            *attributes = attributes.merge(response);
        }
        if !self.is_capture_on() {
            debug!("capturing disabled by collector");
            self.clear_all_session_data();
        }
    }

    pub fn clear_all_session_data(&self) {
        let open: Vec<_> = self.open_sessions.lock().drain(..).collect();
        let finished: Vec<_> = self.finished_sessions.lock().drain(..).collect();
        for session in open.iter().chain(finished.iter()) {
            session.clear_captured_data();
        }
        if !open.is_empty() || !finished.is_empty() {
            debug!(
                open = open.len(),
                finished = finished.len(),
                "dropped queued sessions"
            );
        }
    }

    // --- bookkeeping timestamps ----------------------------------------

    pub fn last_open_session_send_time(&self) -> i64 {
        self.last_open_session_send_time.load(Ordering::Relaxed)
    }

    pub fn set_last_open_session_send_time(&self, time: i64) {
        self.last_open_session_send_time.store(time, Ordering::Relaxed);
    }

    pub fn last_status_check_time(&self) -> i64 {
        self.last_status_check_time.load(Ordering::Relaxed)
    }

    pub fn set_last_status_check_time(&self, time: i64) {
        self.last_status_check_time.store(time, Ordering::Relaxed);
    }

    pub fn last_time_sync_time(&self) -> i64 {
        self.last_time_sync_time.load(Ordering::Relaxed)
    }

    pub fn set_last_time_sync_time(&self, time: i64) {
        self.last_time_sync_time.store(time, Ordering::Relaxed);
    }

    pub fn is_time_sync_supported(&self) -> bool {
        self.time_sync_supported.load(Ordering::Relaxed)
    }

    pub fn disable_time_sync_support(&self) {
        self.time_sync_supported.store(false, Ordering::Relaxed);
    }

    /// A sync is due when it is supported and either never ran or ran longer
    /// than the re-sync interval ago.
    pub fn is_time_sync_required(&self, now: i64) -> bool {
        if !self.is_time_sync_supported() {
            return false;
        }
        let last = self.last_time_sync_time();
        last < 0 || now - last >= self.config.time_sync_interval.as_millis() as i64
    }

    pub fn cluster_time_offset(&self) -> i64 {
        self.cluster_time_offset.load(Ordering::Relaxed)
    }

    pub fn set_cluster_time_offset(&self, offset: i64) {
        self.cluster_time_offset.store(offset, Ordering::Relaxed);
    }

    /// Converts a local timestamp into collector time.
    pub fn to_cluster_time(&self, timestamp: i64) -> i64 {
        timestamp + self.cluster_time_offset()
    }

    // --- session queues ------------------------------------------------

    /// Moves open sessions that have since finished (session end, watchdog
    /// force-close) over to the finished queue, preserving order.
    pub fn sweep_finished_sessions(&self) {
        let mut open = self.open_sessions.lock();
        let mut finished = self.finished_sessions.lock();
        let mut still_open = VecDeque::with_capacity(open.len());
        for session in open.drain(..) {
            if session.is_finished() {
                finished.push_back(session);
            } else {
                still_open.push_back(session);
            }
        }
        *open = still_open;
    }

    pub fn next_finished_session(&self) -> Option<Arc<Session>> {
        self.finished_sessions.lock().pop_front()
    }

    pub fn drain_finished_sessions(&self) -> Vec<Arc<Session>> {
        self.finished_sessions.lock().drain(..).collect()
    }

    /// Puts a finished session back at the end of the queue, e.g. after a
    /// failed delivery that should be retried next iteration.
    pub fn enqueue_finished_session(&self, session: Arc<Session>) {
        self.finished_sessions.lock().push_back(session);
    }

    pub fn all_open_sessions(&self) -> Vec<Arc<Session>> {
        self.open_sessions.lock().iter().cloned().collect()
    }

    pub fn drain_open_sessions(&self) -> Vec<Arc<Session>> {
        self.open_sessions.lock().drain(..).collect()
    }

    pub fn open_session_count(&self) -> usize {
        self.open_sessions.lock().len()
    }

    pub fn finished_session_count(&self) -> usize {
        self.finished_sessions.lock().len()
    }
}

impl<C: CollectorClient> SessionRegistry for SendingContext<C> {
    fn start_session(&self, session: Arc<Session>) {
        self.open_sessions.lock().push_back(session);
    }

    fn finish_session(&self, session: Arc<Session>) {
        session.end();
        let mut open = self.open_sessions.lock();
        open.retain(|queued| !Arc::ptr_eq(queued, &session));
        drop(open);
        self.finished_sessions.lock().push_back(session);
    }

    fn current_attributes(&self) -> ResponseAttributes {
        self.attributes.read().clone()
    }
}
