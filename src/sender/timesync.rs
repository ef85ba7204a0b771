use super::context::SendingContext;
use crate::domain::now_millis;
use crate::transport::CollectorClient;
use tracing::{debug, warn};

/// Outcome of collecting the configured number of clock probes.
pub(crate) enum TimeSyncOutcome {
    /// All probes succeeded; the filtered offset in milliseconds.
    Synced(i64),
    /// Too few probes succeeded, or the server does not support sync.
    Failed,
}

/// Collects round-trip probes and derives the cluster clock offset.
///
/// Each probe gets a bounded retry ladder with exponential back-off; a
/// successful probe resets both the retry counter and the delay. A response
/// with zeroed server timestamps means the collector does not support time
/// sync at all, which is latched on the context and aborts the exchange.
pub(crate) async fn collect_time_sync_offset<C: CollectorClient>(
    context: &SendingContext<C>,
) -> TimeSyncOutcome {
    let config = context.config();
    let probe_count = config.time_sync_probe_count;
    let mut offsets = Vec::with_capacity(probe_count);
    let mut retry = 0;
    let mut delay = config.initial_retry_delay;

    while offsets.len() < probe_count && !context.is_shutdown_requested() {
        let request_time = now_millis();
        match context.client().send_time_sync_request().await {
            Some(response) if response.is_valid() => {
                let response_time = now_millis();
                let offset = ((response.receive_timestamp - request_time)
                    + (response.send_timestamp - response_time))
                    / 2;
                offsets.push(offset);
                retry = 0;
                delay = config.initial_retry_delay;
            }
            Some(_) => {
                warn!("collector does not support time sync");
                context.disable_time_sync_support();
                return TimeSyncOutcome::Failed;
            }
            None => {
                if retry >= config.max_time_sync_retries {
                    debug!(probes = offsets.len(), "time sync retries exhausted");
                    return TimeSyncOutcome::Failed;
                }
                context.sleep(delay).await;
                delay *= 2;
                retry += 1;
            }
        }
    }

    if offsets.len() < probe_count {
        return TimeSyncOutcome::Failed;
    }
    TimeSyncOutcome::Synced(compute_cluster_time_offset(&mut offsets))
}

/// Reduces the probe offsets to a single clock offset.
///
/// Asymmetric network latency produces outlier probes, so a plain mean is
/// not robust: sort, take the median, compute the variance of all offsets
/// about that median, keep only offsets whose squared deviation stays within
/// the variance, and average the survivors.
pub(crate) fn compute_cluster_time_offset(offsets: &mut [i64]) -> i64 {
    assert!(!offsets.is_empty(), "offset computation requires at least one probe");

    offsets.sort_unstable();
    let median = offsets[offsets.len() / 2];
    let variance = offsets
        .iter()
        .map(|offset| (offset - median).pow(2))
        .sum::<i64>()
        / offsets.len() as i64;

    let retained: Vec<i64> = offsets
        .iter()
        .copied()
        .filter(|offset| (offset - median).pow(2) <= variance)
        .collect();
    retained.iter().sum::<i64>() / retained.len() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outlier_is_discarded_by_the_median_variance_filter() {
        let mut offsets = vec![10, 12, 11, 1000, 9];
        // Median 11, the 1000 outlier inflates the variance but still falls
        // outside it; the remaining four average to 10.
        assert_eq!(compute_cluster_time_offset(&mut offsets), 10);
    }

    #[test]
    fn identical_offsets_survive_a_zero_variance() {
        let mut offsets = vec![42, 42, 42, 42, 42];
        assert_eq!(compute_cluster_time_offset(&mut offsets), 42);
    }

    #[test]
    fn filter_keeps_offsets_within_the_variance() {
        let mut offsets = vec![14, 10, 12, 13, 11];
        // Median 12, variance 2: 11..=13 survive, averaging to 12.
        assert_eq!(compute_cluster_time_offset(&mut offsets), 12);
    }

    #[test]
    fn negative_offsets_are_handled() {
        let mut offsets = vec![-10, -12, -11, -900, -9];
        assert_eq!(compute_cluster_time_offset(&mut offsets), -10);
    }
}
