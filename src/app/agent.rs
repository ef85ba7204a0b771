use super::config::AgentConfig;
use crate::cache::{BeaconCache, CacheEvictor};
use crate::domain::AgentError;
use crate::sender::{SenderWorker, SendingContext};
use crate::session::{SessionProxy, SessionRegistry, SessionWatchdog, SessionWatchdogContext};
use crate::transport::{CollectorClient, HttpCollectorClient};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// The assembled agent runtime: beacon cache, evictor, sender and watchdog.
///
/// Recording code talks to sessions created through `create_session`; the
/// three background workers run independently until `shutdown`, which bounds
/// each worker's stop by the configured timeout and proceeds regardless.
pub struct Agent<C: CollectorClient + 'static = HttpCollectorClient> {
    config: AgentConfig,
    cache: Arc<BeaconCache>,
    context: Arc<SendingContext<C>>,
    evictor: CacheEvictor,
    sender: SenderWorker<C>,
    watchdog: SessionWatchdog,
    next_session_id: AtomicI32,
}

impl Agent<HttpCollectorClient> {
    /// Builds an agent against the real HTTP collector client.
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        config.validate()?;
        let client = HttpCollectorClient::new(config.transport_config())?;
        Ok(Self::with_client(config, client))
    }
}

impl<C: CollectorClient + 'static> Agent<C> {
    /// Builds an agent on top of an arbitrary collector client.
    pub fn with_client(config: AgentConfig, client: C) -> Self {
        let cache = Arc::new(BeaconCache::new());
        let context = Arc::new(SendingContext::new(Arc::new(client), config.sender.clone()));
        let evictor = CacheEvictor::new(cache.clone(), config.cache.clone());
        let sender = SenderWorker::new(context.clone());
        let watchdog = SessionWatchdog::new(Arc::new(SessionWatchdogContext::new(
            config.watchdog.clone(),
        )));

        Self {
            config,
            cache,
            context,
            evictor,
            sender,
            watchdog,
            next_session_id: AtomicI32::new(1),
        }
    }

    /// Starts the three background workers.
    pub fn start(&self) -> Result<(), AgentError> {
        if !self.sender.start() {
            return Err(AgentError::AlreadyRunning);
        }
        self.evictor.start();
        self.watchdog.start();
        info!("agent started");
        Ok(())
    }

    /// Waits for the one-shot init signal; `None` when it has not fired
    /// within `timeout`.
    pub async fn wait_for_init(&self, timeout: Duration) -> Option<bool> {
        self.context.init_latch().wait_timeout(timeout).await
    }

    /// Starts a new logical session.
    ///
    /// The returned proxy is registered for scheduled splitting; telemetry
    /// recorded through it lands in the cache under the proxy's current
    /// beacon key.
    pub fn create_session(&self, client_ip: &str) -> Arc<SessionProxy> {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let registry: Arc<dyn SessionRegistry> = self.context.clone();
        let proxy = SessionProxy::new(
            registry,
            self.cache.clone(),
            &self.config.application_id,
            client_ip,
            session_id,
        );
        self.watchdog.context().add_to_split_by_timeout(proxy.clone());
        proxy
    }

    /// Ends a session through its normal close path, deferring to the
    /// watchdog's grace handling when children are still open.
    pub fn close_session(&self, proxy: &Arc<SessionProxy>) {
        let watchdog = self.watchdog.context();
        watchdog.remove_from_split_by_timeout(proxy);
        let session = proxy.current_session();
        proxy.mark_finished();
        watchdog.close_or_enqueue_for_closing(session, self.config.watchdog.close_grace_period);
    }

    pub fn cache(&self) -> Arc<BeaconCache> {
        self.cache.clone()
    }

    pub fn sending_context(&self) -> Arc<SendingContext<C>> {
        self.context.clone()
    }

    pub fn watchdog_context(&self) -> Arc<SessionWatchdogContext> {
        self.watchdog.context()
    }

    pub fn is_alive(&self) -> bool {
        self.sender.is_alive()
    }

    /// Stops all workers, bounding each stop by the configured timeout.
    ///
    /// A worker that fails to stop in time is logged and abandoned; shutdown
    /// never blocks indefinitely.
    pub async fn shutdown(&self) -> Result<(), AgentError> {
        let timeout = self.config.shutdown_timeout;
        let sender_stopped = self.sender.shutdown(timeout).await;
        let evictor_stopped = self.evictor.stop(timeout).await;
        let watchdog_stopped = self.watchdog.stop(timeout).await;

        if sender_stopped && evictor_stopped && watchdog_stopped {
            info!("agent shut down");
            Ok(())
        } else {
            warn!(
                sender_stopped,
                evictor_stopped, watchdog_stopped, "agent shutdown was not fully graceful"
            );
            Err(AgentError::ShutdownTimeout)
        }
    }
}
