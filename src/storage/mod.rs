//! Repository-trait abstraction over persistence. The coordinator
//! owns transient cycle state (`predict::EngineState`); these traits
//! own the persisted entities (design note, spec.md §9 + ownership
//! split called out in `SPEC_FULL.md` §3.1).

pub mod sqlite;

use crate::model::{
    ActionCommand, Forecast, GlucosePoint, PatternWindow, ProfileSegmentEstimate, RuleDecision, TelemetrySample,
    TherapyEvent,
};
use anyhow::Result;

pub trait GlucoseRepository {
    fn insert_glucose(&self, points: &[GlucosePoint]) -> Result<()>;
    fn recent(&self, limit: u32) -> Result<Vec<GlucosePoint>>;
    fn glucose_since(&self, since_ts: i64) -> Result<Vec<GlucosePoint>>;
    fn latest(&self) -> Result<Option<GlucosePoint>>;
}

pub trait TherapyRepository {
    fn insert_therapy(&self, events: &[TherapyEvent]) -> Result<()>;
    fn therapy_since(&self, since_ts: i64) -> Result<Vec<TherapyEvent>>;
    fn last_sensor_blocked_within(&self, now_ts: i64, window_ms: i64) -> Result<bool>;
}

pub trait ForecastRepository {
    fn insert_forecasts(&self, forecasts: &[Forecast]) -> Result<()>;
    fn forecast_since(&self, since_ts: i64) -> Result<Vec<Forecast>>;
    /// Delete rows whose forecast `ts` is older than `now_ts - max_age_ms`
    /// (spec.md §4.8 step 15: drop forecasts older than 400 days).
    fn purge_older_than(&self, now_ts: i64, max_age_ms: i64) -> Result<u64>;
}

pub trait TelemetryRepository {
    fn insert_telemetry(&self, samples: &[TelemetrySample]) -> Result<()>;
    fn in_window(&self, now_ts: i64, window_ms: i64) -> Result<Vec<TelemetrySample>>;
    /// Delete rows with non-positive timestamps (spec.md §4.8 step 7).
    fn purge_invalid_timestamps(&self) -> Result<u64>;
}

pub trait ActionRepository {
    fn find_by_idempotency_key(&self, key: &str) -> Result<Option<ActionCommand>>;
    fn insert_pending(&self, command: &ActionCommand) -> Result<()>;
    fn mark_sent(&self, id: &str) -> Result<()>;
    fn mark_failed(&self, id: &str, reason: &str) -> Result<()>;
    fn count_sent_since(&self, since_ts: i64) -> Result<u32>;
    /// Timestamp of the most recently SENT command of `action_type`, if any
    /// (spec.md §4.8 step 22 keepalive gate).
    fn latest_sent_ts(&self, action_type: crate::model::ActionType) -> Result<Option<i64>>;
}

/// Blanket marker for a store backing every repository the coordinator
/// needs (spec.md §4.8).
pub trait Store:
    GlucoseRepository
    + TherapyRepository
    + ForecastRepository
    + TelemetryRepository
    + ActionRepository
    + RuleExecutionRepository
    + PatternRepository
    + ProfileEstimateRepository
{
}

impl<T> Store for T where
    T: GlucoseRepository
        + TherapyRepository
        + ForecastRepository
        + TelemetryRepository
        + ActionRepository
        + RuleExecutionRepository
        + PatternRepository
        + ProfileEstimateRepository
{
}

pub trait RuleExecutionRepository {
    fn record(&self, decision: &RuleDecision, ts: i64) -> Result<()>;
    /// Timestamp of the last `TRIGGERED` execution of `rule_id`, if any.
    fn last_triggered_ts(&self, rule_id: &str) -> Result<Option<i64>>;
}

pub trait PatternRepository {
    fn replace_all(&self, windows: &[PatternWindow]) -> Result<()>;
    fn all(&self) -> Result<Vec<PatternWindow>>;
}

pub trait ProfileEstimateRepository {
    fn replace_segments(&self, segments: &[ProfileSegmentEstimate]) -> Result<()>;
    fn all_segments(&self) -> Result<Vec<ProfileSegmentEstimate>>;
}
