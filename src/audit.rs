//! Structured audit events (spec.md §6), emitted as `tracing` spans
//! rather than a bespoke log sink — this crate's ambient logging
//! mechanism.

use crate::error::CoreError;
use tracing::{info, warn};

pub fn automation_cycle_skipped(reason: &str) {
    info!(event = "automation_cycle_skipped", reason, "cycle skipped");
}

pub fn automation_cycle_completed(duration_ms: u64, actions_dispatched: u32) {
    info!(event = "automation_cycle_completed", duration_ms, actions_dispatched, "cycle completed");
}

pub fn automation_skipped(reason: &str) {
    info!(event = "automation_skipped", reason, "automation skipped");
}

pub fn forecast_calibration_bias_applied(horizon_minutes: u32, bias: f64) {
    info!(event = "forecast_calibration_bias_applied", horizon_minutes, bias, "calibration bias applied");
}

pub fn forecast_bias_applied(horizon_minutes: u32, bias: f64, kind: &str) {
    info!(event = "forecast_bias_applied", horizon_minutes, bias, kind, "forecast bias applied");
}

pub fn adaptive_controller_evaluated(rule_id: &str, state: &str) {
    info!(event = "adaptive_controller_evaluated", rule_id, state, "controller evaluated");
}

pub fn adaptive_controller_triggered(rule_id: &str, reasons: &[String]) {
    info!(event = "adaptive_controller_triggered", rule_id, reasons = ?reasons, "controller triggered");
}

pub fn adaptive_controller_blocked(rule_id: &str, reasons: &[String]) {
    warn!(event = "adaptive_controller_blocked", rule_id, reasons = ?reasons, "controller blocked");
}

pub fn adaptive_controller_fallback_to_rules() {
    info!(event = "adaptive_controller_fallback_to_rules", "falling back to rule engine");
}

pub fn adaptive_keepalive_sent(target_mmol: f64) {
    info!(event = "adaptive_keepalive_sent", target_mmol, "keepalive sent");
}

pub fn adaptive_keepalive_failed(reason: &str) {
    warn!(event = "adaptive_keepalive_failed", reason, "keepalive failed");
}

pub fn adaptive_keepalive_skipped(reason: &str) {
    info!(event = "adaptive_keepalive_skipped", reason, "keepalive skipped");
}

pub fn temp_target_sent(idempotency_key: &str, target_low: f64, target_high: f64) {
    info!(event = "temp_target_sent", idempotency_key, target_low, target_high, "temp target sent");
}

pub fn temp_target_sent_local_fallback(idempotency_key: &str, channel: &str) {
    info!(event = "temp_target_sent_local_fallback", idempotency_key, channel, "temp target sent via fallback");
}

pub fn action_delivery_failed(idempotency_key: &str, reason: &str) {
    warn!(event = "action_delivery_failed", idempotency_key, reason, "action delivery failed");
}

pub fn action_deduplicated(idempotency_key: &str) {
    info!(event = "action_deduplicated", idempotency_key, "action deduplicated");
}

/// Turn a recoverable `CoreError` into a structured warning (spec.md
/// §7: "recoverable failures surface as audit warnings and continue").
pub fn warn_kind(err: &CoreError, message: &str) {
    warn!(event = "core_error", kind = %err, message, "recoverable failure");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emitting_audit_events_does_not_panic() {
        automation_cycle_skipped("already_running");
        automation_cycle_completed(120, 1);
        warn_kind(&CoreError::KillSwitchOn, "blocked by kill switch");
    }
}
