use super::context::SendingContext;
use super::states::SendingState;
use crate::transport::CollectorClient;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Background worker driving the sending state machine.
///
/// The loop has no pacing of its own; every sleep lives inside the states.
/// Once shutdown is requested, the current state's normal transition is
/// overridden by its shutdown path, which funnels through the final flush
/// into the terminal state.
pub struct SenderWorker<C: CollectorClient + 'static> {
    context: Arc<SendingContext<C>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<C: CollectorClient + 'static> SenderWorker<C> {
    pub fn new(context: Arc<SendingContext<C>>) -> Self {
        Self {
            context,
            worker: Mutex::new(None),
        }
    }

    pub fn context(&self) -> Arc<SendingContext<C>> {
        self.context.clone()
    }

    /// Spawns the state-machine loop. Returns `false` if already running.
    pub fn start(&self) -> bool {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }
        *worker = Some(tokio::spawn(run_sender_loop(self.context.clone())));
        info!("sender worker started");
        true
    }

    /// Requests shutdown and waits up to `timeout` for the machine to reach
    /// its terminal state.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.context.request_shutdown();
        let Some(handle) = self.worker.lock().take() else {
            return false;
        };
        let mut handle = handle;
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(_) => {
                info!("sender worker stopped");
                true
            }
            Err(_) => {
                warn!("sender worker did not stop within {:?}, aborting", timeout);
                handle.abort();
                false
            }
        }
    }

    pub fn is_alive(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

pub(crate) async fn run_sender_loop<C: CollectorClient>(context: Arc<SendingContext<C>>) {
    let mut state = SendingState::Init;
    while !state.is_terminal() {
        debug!(state = ?state, "executing sending state");
        let next = state.execute(&context).await;
        state = if context.is_shutdown_requested() && !next.is_terminal() {
            state.shutdown_state()
        } else {
            next
        };
    }
    // One terminal pass re-asserts the shutdown flag for outer supervisors.
    state.execute(&context).await;
    debug!("sender loop exited");
}
