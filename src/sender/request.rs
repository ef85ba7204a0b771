use super::context::SendingContext;
use crate::transport::{CollectorClient, ResponseAttributes};
use std::time::Duration;
use tracing::debug;

/// Fires a status request, retrying transient failures with exponential
/// back-off.
///
/// The delay starts at `initial_delay` and doubles per attempt. Gives up
/// after `max_retries` retries or as soon as shutdown is requested; back-off
/// sleeps wake early on shutdown.
pub(crate) async fn send_status_request_with_retry<C: CollectorClient>(
    context: &SendingContext<C>,
    max_retries: u32,
    initial_delay: Duration,
) -> Option<ResponseAttributes> {
    let mut retry = 0;
    let mut delay = initial_delay;

    loop {
        if let Some(response) = context.client().send_status_request().await {
            return Some(response);
        }
        if retry >= max_retries || context.is_shutdown_requested() {
            debug!(retries = retry, "status request retries exhausted");
            return None;
        }
        context.sleep(delay).await;
        delay *= 2;
        retry += 1;
    }
}
