use super::context::SendingContext;
use super::request::send_status_request_with_retry;
use super::timesync::{TimeSyncOutcome, collect_time_sync_offset};
use crate::domain::now_millis;
use crate::transport::CollectorClient;
use tracing::{debug, info, warn};

/// The states of the sending pipeline.
///
/// The set is closed; transitions are owned by the states themselves, and
/// the worker loop only drives `execute` until the terminal state. Shutdown
/// overrides the normal transition through `shutdown_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendingState {
    Init,
    TimeSync { initial: bool },
    CaptureOn,
    CaptureOff,
    FlushSessions,
    Terminal,
}

impl SendingState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SendingState::Terminal)
    }

    /// Where this state goes when shutdown preempts its normal transition.
    ///
    /// During init (and the initial sync) no sessions exist yet, so there is
    /// nothing to flush and the machine exits directly.
    pub fn shutdown_state(self) -> SendingState {
        match self {
            SendingState::Init | SendingState::TimeSync { initial: true } => SendingState::Terminal,
            SendingState::TimeSync { initial: false }
            | SendingState::CaptureOn
            | SendingState::CaptureOff => SendingState::FlushSessions,
            SendingState::FlushSessions | SendingState::Terminal => SendingState::Terminal,
        }
    }

    pub async fn execute<C: CollectorClient>(self, context: &SendingContext<C>) -> SendingState {
        match self {
            SendingState::Init => execute_init(context).await,
            SendingState::TimeSync { .. } => execute_time_sync(context).await,
            SendingState::CaptureOn => execute_capture_on(context).await,
            SendingState::CaptureOff => execute_capture_off(context).await,
            SendingState::FlushSessions => execute_flush_sessions(context).await,
            SendingState::Terminal => execute_terminal(context),
        }
    }
}

/// First contact with the collector.
///
/// Retries the status request with back-off; a response seeds the shared
/// settings and fires the init latch with success before time sync runs.
/// Exhausted retries or shutdown fire the latch with failure and exit.
async fn execute_init<C: CollectorClient>(context: &SendingContext<C>) -> SendingState {
    let config = context.config();
    let response = send_status_request_with_retry(
        context,
        config.max_status_request_retries,
        config.initial_retry_delay,
    )
    .await;

    match response {
        Some(response) if !context.is_shutdown_requested() => {
            context.handle_status_response(&response);
            context.init_completed(true);
            SendingState::TimeSync { initial: true }
        }
        _ => {
            context.init_completed(false);
            SendingState::Terminal
        }
    }
}

/// Estimates the collector clock offset when a sync is due.
async fn execute_time_sync<C: CollectorClient>(context: &SendingContext<C>) -> SendingState {
    let now = now_millis();
    if !context.is_time_sync_required(now) {
        return state_by_capture(context);
    }

    match collect_time_sync_offset(context).await {
        TimeSyncOutcome::Synced(offset) => {
            context.set_cluster_time_offset(offset);
            context.set_last_time_sync_time(now);
            info!(offset, "time sync completed");
            state_by_capture(context)
        }
        TimeSyncOutcome::Failed => {
            if context.is_time_sync_supported() {
                // The offset is stale or missing; stop sending until the
                // next scheduled sync attempt instead of anchoring beacons
                // to a wrong clock.
                warn!("time sync failed, falling back to capture off");
                SendingState::CaptureOff
            } else {
                state_by_capture(context)
            }
        }
    }
}

/// Regular delivery: finished sessions every iteration, open sessions on the
/// configured send interval, most recent response applied once at the end.
async fn execute_capture_on<C: CollectorClient>(context: &SendingContext<C>) -> SendingState {
    if context.is_time_sync_required(now_millis()) {
        return SendingState::TimeSync { initial: false };
    }

    context.sleep_default().await;
    if context.is_shutdown_requested() {
        return SendingState::FlushSessions;
    }

    context.sweep_finished_sessions();
    let max_beacon_size = context.attributes().max_beacon_size();
    let mut last_response = None;

    // Finished sessions go out before open ones; receivers rely on this
    // ordering.
    let mut finished = context.drain_finished_sessions().into_iter();
    while let Some(session) = finished.next() {
        if session.is_empty() {
            session.clear_captured_data();
            continue;
        }
        match session.send(context.client(), max_beacon_size).await {
            Some(response) => {
                session.clear_captured_data();
                last_response = Some(response);
            }
            None => {
                // Transient failure: the session stays queued and is
                // retried on the next iteration.
                context.enqueue_finished_session(session);
            }
        }
        if context.is_shutdown_requested() {
            // Hand the unprocessed remainder back so the final flush still
            // sees it.
            for remaining in finished {
                context.enqueue_finished_session(remaining);
            }
            return SendingState::FlushSessions;
        }
    }

    let now = now_millis();
    let send_interval = context.attributes().send_interval().as_millis() as i64;
    if now - context.last_open_session_send_time() >= send_interval {
        for session in context.all_open_sessions() {
            if let Some(response) = session.send(context.client(), max_beacon_size).await {
                last_response = Some(response);
            }
            if context.is_shutdown_requested() {
                return SendingState::FlushSessions;
            }
        }
        context.set_last_open_session_send_time(now);
    }

    if let Some(response) = last_response {
        context.handle_status_response(&response);
    }
    if context.is_capture_on() {
        SendingState::CaptureOn
    } else {
        debug!("collector turned capturing off");
        SendingState::CaptureOff
    }
}

/// Idle until the next status check, then see whether capturing resumed.
async fn execute_capture_off<C: CollectorClient>(context: &SendingContext<C>) -> SendingState {
    let config = context.config();
    let now = now_millis();
    let interval = config.status_check_interval.as_millis() as i64;
    let sleep_millis = interval - (now - context.last_status_check_time());
    if sleep_millis > 0 {
        context
            .sleep(std::time::Duration::from_millis(sleep_millis as u64))
            .await;
    }
    if context.is_shutdown_requested() {
        return SendingState::FlushSessions;
    }

    let response = send_status_request_with_retry(
        context,
        config.max_status_request_retries,
        config.initial_retry_delay,
    )
    .await;
    context.set_last_status_check_time(now_millis());
    if let Some(response) = &response {
        context.handle_status_response(response);
    }

    if context.is_time_sync_required(now_millis()) {
        SendingState::TimeSync { initial: false }
    } else if context.is_capture_on() {
        info!("collector turned capturing back on");
        SendingState::CaptureOn
    } else {
        SendingState::CaptureOff
    }
}

/// Final best-effort flush: end every open session, send each finished
/// session once, no retries.
async fn execute_flush_sessions<C: CollectorClient>(context: &SendingContext<C>) -> SendingState {
    for session in context.drain_open_sessions() {
        session.end();
        context.enqueue_finished_session(session);
    }

    let max_beacon_size = context.attributes().max_beacon_size();
    for session in context.drain_finished_sessions() {
        if !session.is_empty() {
            let _ = session.send(context.client(), max_beacon_size).await;
        }
        session.clear_captured_data();
    }
    SendingState::Terminal
}

/// Re-asserts the shutdown flag; idempotent, performs no further work.
fn execute_terminal<C: CollectorClient>(context: &SendingContext<C>) -> SendingState {
    context.request_shutdown();
    SendingState::Terminal
}

fn state_by_capture<C: CollectorClient>(context: &SendingContext<C>) -> SendingState {
    if context.is_capture_on() {
        SendingState::CaptureOn
    } else {
        SendingState::CaptureOff
    }
}
