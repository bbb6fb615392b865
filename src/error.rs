//! Domain error taxonomy (spec.md §7).
//!
//! `CoreError` names *kinds*, not exception hierarchies: most of these
//! are handled inline (skip the step, warn, continue) rather than
//! propagated. `audit::warn_kind` is the one call site that turns a
//! `CoreError` into a structured warning.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    MissingConfig(String),
    StaleData { age_minutes: i64, max_minutes: i64 },
    SensorBlocked,
    KillSwitchOn,
    InvalidPayload(String),
    RateLimited { actions_6h: u32, max: u32 },
    Cooldown { rule_id: String, remaining_minutes: u32 },
    IdempotentReplay(String),
    RemoteFailure(String),
    NoReceiver(String),
    OutOfRangeTelemetry { key: String, value: f64 },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::MissingConfig(what) => write!(f, "missing_config:{what}"),
            CoreError::StaleData { age_minutes, max_minutes } => {
                write!(f, "stale_data:{age_minutes}m>{max_minutes}m")
            }
            CoreError::SensorBlocked => write!(f, "sensor_blocked"),
            CoreError::KillSwitchOn => write!(f, "kill_switch"),
            CoreError::InvalidPayload(what) => write!(f, "invalid_payload:{what}"),
            CoreError::RateLimited { actions_6h, max } => {
                write!(f, "rate_limit_6h:{actions_6h}/{max}")
            }
            CoreError::Cooldown { rule_id, remaining_minutes } => {
                write!(f, "rule_cooldown_active:{rule_id}:{remaining_minutes}m")
            }
            CoreError::IdempotentReplay(key) => write!(f, "idempotent_replay:{key}"),
            CoreError::RemoteFailure(what) => write!(f, "remote_failure:{what}"),
            CoreError::NoReceiver(channel) => write!(f, "no_receiver:{channel}"),
            CoreError::OutOfRangeTelemetry { key, value } => {
                write!(f, "out_of_range_telemetry:{key}={value}")
            }
        }
    }
}

impl std::error::Error for CoreError {}

/// Whether this kind blocks downstream action proposals (spec.md §7:
/// "recoverable failures surface as audit warnings and continue").
impl CoreError {
    pub fn blocks_proposals(&self) -> bool {
        matches!(
            self,
            CoreError::StaleData { .. }
                | CoreError::SensorBlocked
                | CoreError::KillSwitchOn
                | CoreError::RateLimited { .. }
                | CoreError::Cooldown { .. }
        )
    }
}
