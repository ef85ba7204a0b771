use chrono::Utc;

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// All cache timestamps, eviction cutoffs and protocol bookkeeping use this
/// single representation; conversion to collector time happens only through
/// the sending context's cluster offset.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
