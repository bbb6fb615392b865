//! Timestamp normalization.
//!
//! Every timestamp in the core is epoch milliseconds. Upstream sources
//! (Nightscout, broadcast intents) mix seconds and milliseconds, and
//! occasionally hand back future-skewed clocks from misconfigured
//! devices; this module is the single place that cleans both up.

const FUTURE_SKEW_MS: i64 = 24 * 60 * 60 * 1000;
const SECONDS_EPOCH_CUTOFF: i64 = 10_000_000_000;

/// Normalize a raw timestamp to epoch milliseconds relative to `now`.
///
/// Values under `1e10` are assumed to be epoch seconds and scaled up.
/// Values more than 24h ahead of `now` are clamped to `now` (clock skew
/// guard rather than a hard reject, since the sample itself may still
/// be usable).
pub fn normalize_ts(raw: i64, now_ms: i64) -> i64 {
    let ms = if raw.abs() < SECONDS_EPOCH_CUTOFF {
        raw * 1000
    } else {
        raw
    };
    if ms > now_ms + FUTURE_SKEW_MS {
        now_ms
    } else {
        ms
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Minutes between two epoch-ms timestamps (`b - a`, can be negative).
pub fn minutes_between(a_ms: i64, b_ms: i64) -> f64 {
    (b_ms - a_ms) as f64 / 60_000.0
}
