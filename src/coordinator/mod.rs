//! Automation cycle coordinator (C11, spec.md §4.8).
//!
//! `run_cycle()` wires every module built elsewhere in this crate into
//! the 22-step pipeline: ingest, analyze, predict, calibrate, evaluate
//! rules, dispatch. A non-blocking try-lock enforces the "no
//! re-entrancy" rule from spec.md §5 — a concurrent trigger while a
//! cycle is in flight is dropped, never queued.

use crate::analyze::{clamp_lookback_days, PatternAnalyzer, ProfileEstimator};
use crate::calibration::{apply_calibration_bias, apply_cob_iob_bias, align_base_target, compute_calibration_errors};
use crate::config::Settings;
use crate::dispatch::{ActionDispatcher, Broadcaster, DispatchOutcome, NoopBroadcaster};
use crate::model::{
    ActionCommand, ActionType, DayType, ProfileSegmentEstimate, RuleState, TelemetrySample, TherapyEvent,
    TherapyKind, TimeSlot,
};
use crate::net::{CloudClient, NightscoutClient};
use crate::predict::enhanced_v3::EnhancedV3Engine;
use crate::predict::{EngineState, PredictionContext, PredictionEngine};
use crate::rules::{RuleContext, RuleEngine, SafetyPolicy, SafetyPolicyConfig};
use crate::sanitize::{sanitize_glucose, sanitize_therapy};
use crate::storage::Store;
use crate::units::mmol_to_mgdl;
use crate::{audit, time};
use anyhow::Result;
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

const RECENT_GLUCOSE_SAMPLES: u32 = 72;
const THERAPY_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;
const TELEMETRY_WINDOW_MS: i64 = 6 * 60 * 60 * 1000;
const FORECAST_MAX_AGE_MS: i64 = 400 * 24 * 60 * 60 * 1000;
const SENSOR_BLOCK_TTL_MS: i64 = 30 * 60 * 1000;
const KEEPALIVE_GAP_MS: i64 = 30 * 60 * 1000;
const KEEPALIVE_DURATION_MIN: u32 = 30;
const MIN_RETARGET_BUCKET_MIN: u32 = 5;
const DEFAULT_RETARGET_BUCKET_MIN: u32 = 30;

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Skipped { reason: &'static str },
    Completed { actions_dispatched: u32 },
}

pub struct AutomationCoordinator<R: Store + Send + Sync> {
    store: Arc<R>,
    nightscout: NightscoutClient,
    cloud: CloudClient,
    engine: Box<dyn PredictionEngine + Send + Sync>,
    engine_state: AsyncMutex<EngineState>,
    cycle_lock: AsyncMutex<()>,
    rule_engine: RuleEngine,
    dry_run: bool,
}

impl<R: Store + Send + Sync> AutomationCoordinator<R> {
    pub fn new(store: Arc<R>, nightscout_url: impl Into<String>, cloud_url: impl Into<String>) -> Self {
        Self {
            store,
            nightscout: NightscoutClient::new(nightscout_url),
            cloud: CloudClient::new(cloud_url),
            engine: Box::new(EnhancedV3Engine),
            engine_state: AsyncMutex::new(EngineState::default()),
            cycle_lock: AsyncMutex::new(()),
            rule_engine: RuleEngine::default(),
            dry_run: false,
        }
    }

    /// Evaluate the full pipeline but never submit an action to
    /// Nightscout or a fallback channel (spec.md §9 design note: a
    /// dry run must use its own transient engine state, never the
    /// live coordinator's — callers should build a fresh coordinator
    /// for this rather than flipping the flag on a live one).
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run one automation cycle. `broadcaster` backs the local
    /// fallback dispatch chain; production callers wire a real one,
    /// tests use `NoopBroadcaster`.
    pub async fn run_cycle(&self, broadcaster: &dyn Broadcaster) -> Result<CycleOutcome> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            audit::automation_cycle_skipped("already_running");
            return Ok(CycleOutcome::Skipped { reason: "already_running" });
        };

        let started = time::now_ms();
        let now_ts = started;
        let settings = Settings::load(); // step 2

        if let Err(err) = self.nightscout.fetch_entries(now_ts - 60_000, now_ts).await {
            tracing::warn!(event = "bootstrap_probe_failed", error = %err, "nightscout unreachable at cycle start");
        }

        // Step 4: incremental ingestion with a 5-min overlap window.
        let last_glucose_ts = self.store.latest()?.map(|p| p.ts).unwrap_or(0);
        let since_ts = (last_glucose_ts - 5 * 60_000).max(0);
        let fetched_glucose = self.nightscout.fetch_entries(since_ts, now_ts).await.unwrap_or_else(|err| {
            audit::warn_kind(&crate::error::CoreError::RemoteFailure("nightscout_entries".into()), &err.to_string());
            Vec::new()
        });
        let fetched_therapy = self.nightscout.fetch_treatments(since_ts, now_ts).await.unwrap_or_else(|err| {
            audit::warn_kind(&crate::error::CoreError::RemoteFailure("nightscout_treatments".into()), &err.to_string());
            Vec::new()
        });
        let sanitized_glucose = sanitize_glucose(fetched_glucose);
        let sanitized_therapy = sanitize_therapy(fetched_therapy);
        self.store.insert_glucose(&sanitized_glucose)?;
        self.store.insert_therapy(&sanitized_therapy)?;
        if let Err(err) = self.cloud.push_ingested(&sanitized_glucose, &sanitized_therapy).await {
            tracing::warn!(event = "cloud_push_failed", error = %err, "cloud ingest push failed");
        }

        // Step 5: baseline forecast import has no local export surface
        // in this deployment; the cloud merge in step 11 covers it.

        // Step 6: recompute patterns and profile estimates.
        let lookback_days = clamp_lookback_days(settings.lookback_days);
        let lookback_cutoff = now_ts - (lookback_days as i64) * 24 * 60 * 60 * 1000;
        let history_glucose = self.store.glucose_since(lookback_cutoff)?;
        let history_therapy = self.store.therapy_since(lookback_cutoff)?;
        let windows = PatternAnalyzer::recompute(&history_glucose, now_ts, lookback_days);
        self.store.replace_all(&windows)?;
        let segments = ProfileEstimator::estimate_segments(&history_glucose, &history_therapy, lookback_days);
        self.store.replace_segments(&segments)?;

        // Step 7.
        self.store.purge_invalid_timestamps()?;

        // Step 8. `recent` returns newest-first; flip to chronological
        // order for the prediction engine and the "latest" lookup below.
        let mut recent_glucose = self.store.recent(RECENT_GLUCOSE_SAMPLES)?;
        recent_glucose.reverse();
        if recent_glucose.is_empty() {
            audit::automation_skipped("no_glucose_data");
            return Ok(CycleOutcome::Skipped { reason: "no_glucose_data" });
        }
        let recent_therapy = self.store.therapy_since(now_ts - THERAPY_WINDOW_MS)?;

        // Step 9.
        let telemetry_rows = self.store.in_window(now_ts, TELEMETRY_WINDOW_MS)?;
        let telemetry = crate::telemetry::build_snapshot(&telemetry_rows, now_ts);

        // Step 10.
        let effective_base_target = settings.effective_base_target(telemetry.cob_grams);

        // Step 11: predict locally, merge cloud, ensure horizon 30.
        let segment_estimate = current_segment(&segments, now_ts).map(|s| s.estimate.clone());
        let (isf, cr) = segment_estimate.as_ref().map(|e| (e.isf, e.cr)).unwrap_or((settings.isf, settings.cr));
        let ctx = PredictionContext { now_ts, isf, cr, insulin_profile: settings.insulin_profile };
        let mut forecasts = {
            let mut state = self.engine_state.lock().await;
            self.engine.predict(&mut state, &recent_glucose, &recent_therapy, &ctx)
        };
        let cloud_forecasts = self.cloud.fetch_baseline_forecasts(now_ts).await.unwrap_or_default();
        if !cloud_forecasts.is_empty() {
            forecasts = crate::net::cloud::merge_forecasts(forecasts, cloud_forecasts);
        }
        crate::model::ensure_horizon_30(&mut forecasts, now_ts);
        crate::model::sort_by_horizon(&mut forecasts);

        // Steps 12-14: calibration and COB/IOB bias.
        let past_forecasts = self.store.forecast_since(now_ts - 13 * 60 * 60_000)?;
        let calibration_errors = compute_calibration_errors(&past_forecasts, &recent_glucose, now_ts);
        for forecast in &mut forecasts {
            let bias = apply_calibration_bias(forecast, &calibration_errors, now_ts);
            if bias != 0.0 {
                audit::forecast_calibration_bias_applied(forecast.horizon_minutes, bias);
            }
            let cob_iob_bias = apply_cob_iob_bias(forecast, telemetry.cob_grams, telemetry.iob_units);
            if cob_iob_bias != 0.0 {
                audit::forecast_bias_applied(forecast.horizon_minutes, cob_iob_bias, "cob_iob");
            }
        }

        // Step 15.
        self.store.insert_forecasts(&forecasts)?;
        self.store.purge_older_than(now_ts, FORECAST_MAX_AGE_MS)?;

        // Step 16: derived safety inputs.
        let latest = recent_glucose.last().unwrap();
        let stale_max_ms = settings.effective_stale_max_minutes() * 60_000;
        let data_fresh = now_ts - latest.ts <= stale_max_ms;
        let active_temp_target = active_temp_target(&recent_therapy, now_ts);
        let sensor_blocked = self.store.last_sensor_blocked_within(now_ts, SENSOR_BLOCK_TTL_MS)?;

        // Step 17.
        let now_dt: DateTime<Utc> = Utc.timestamp_millis_opt(now_ts).single().unwrap_or_else(Utc::now);
        let day_type = DayType::from_weekday(now_dt.weekday());
        let hour = now_dt.hour();
        let time_slot = TimeSlot::from_hour(hour);
        let pattern_window = PatternAnalyzer::for_now(&windows, day_type, hour).cloned();
        let profile_segment = segments.iter().find(|s| s.day_type == day_type && s.time_slot == time_slot).cloned();

        // Step 18: persist the uci0 computed during this cycle's predict() as telemetry.
        {
            let state = self.engine_state.lock().await;
            let uam_sample = TelemetrySample::numeric(now_ts, now_ts, "copilot", "uam_value", state.uam.latest_uci0());
            self.store.insert_telemetry(&[uam_sample])?;
        }

        // Step 19.
        let forecast_at = |minutes: u32| forecasts.iter().find(|f| f.horizon_minutes == minutes).map(|f| f.value_mmol).unwrap_or(latest.value_mmol);
        let rule_ctx = RuleContext {
            now_ts,
            current_glucose_mmol: latest.value_mmol,
            forecast_5_mmol: forecast_at(5),
            forecast_30_mmol: forecast_at(30),
            forecast_60_mmol: forecast_at(60),
            effective_base_target_mmol: effective_base_target,
            iob_units: telemetry.iob_units,
            cob_grams: telemetry.cob_grams,
            last_hypo_ts: recent_glucose.iter().rev().find(|p| p.value_mmol < 3.9).map(|p| p.ts),
            pattern_window,
            profile_segment,
            day_type,
            time_slot,
        };
        let decisions = self.rule_engine.evaluate_all(&rule_ctx);

        let safety_config = SafetyPolicyConfig {
            kill_switch: settings.kill_switch,
            max_actions_in_6h: settings.effective_max_actions_6h(),
            ..Default::default()
        };
        let actions_last_6h = self.store.count_sent_since(now_ts - 6 * 60 * 60_000)?;

        let mut actions_dispatched = 0u32;
        let mut adaptive_triggered = false;

        for mut decision in decisions {
            audit::adaptive_controller_evaluated(&decision.rule_id, state_name(decision.state));

            // Step 20: cooldown.
            if decision.state == RuleState::Triggered {
                let bucket_minutes = retarget_bucket_minutes(&decision.rule_id, settings.retarget_minutes);
                let cooldown_minutes = self
                    .rule_engine
                    .rule_by_id(&decision.rule_id)
                    .map(|r| r.cooldown_minutes())
                    .unwrap_or(bucket_minutes);
                if let Some(last_triggered) = self.store.last_triggered_ts(&decision.rule_id)? {
                    let elapsed_min = time::minutes_between(last_triggered, now_ts);
                    if elapsed_min < cooldown_minutes as f64 {
                        let remaining = (cooldown_minutes as f64 - elapsed_min).ceil() as u32;
                        let reason = if decision.rule_id == "AdaptiveTargetController.v1" {
                            format!("retarget_cooldown_{remaining}m")
                        } else {
                            format!("rule_cooldown_active:{remaining}m")
                        };
                        decision.block(reason);
                    }
                }
            }

            decision = SafetyPolicy::apply(decision, &safety_config, data_fresh, actions_last_6h);
            if sensor_blocked && decision.state == RuleState::Triggered {
                decision.block("sensor_blocked");
            }

            // Step 21.
            self.store.record(&decision, now_ts)?;

            if decision.state == RuleState::Blocked {
                audit::adaptive_controller_blocked(&decision.rule_id, &decision.reasons);
            }

            if decision.state != RuleState::Triggered {
                continue;
            }
            let Some(proposal) = decision.action_proposal.clone() else { continue };
            adaptive_triggered = true;
            audit::adaptive_controller_triggered(&decision.rule_id, &decision.reasons);

            let bucket_minutes = retarget_bucket_minutes(&decision.rule_id, settings.retarget_minutes);
            let bucket = now_ts / (bucket_minutes as i64 * 60_000);
            let idempotency_key = format!("{}:{}", decision.rule_id, bucket);

            let (target_low, target_high, reason_suffix) = if decision.rule_id != "AdaptiveTargetController.v1" {
                let low = proposal.target_low_mmol.unwrap_or(effective_base_target);
                let (aligned, suffix) = align_base_target(low, forecast_at(60), effective_base_target);
                let shift = aligned - low;
                (aligned, proposal.target_high_mmol.unwrap_or(aligned) + shift, suffix)
            } else {
                (proposal.target_low_mmol.unwrap_or(effective_base_target), proposal.target_high_mmol.unwrap_or(effective_base_target), None)
            };

            let mut params = serde_json::json!({
                "eventType": "Temporary Target",
                "createdAt": chrono::Utc.timestamp_millis_opt(now_ts).single().map(|d| d.to_rfc3339()).unwrap_or_default(),
                "duration": proposal.duration_min.unwrap_or(30),
                "targetTop": mmol_to_mgdl(target_high),
                "targetBottom": mmol_to_mgdl(target_low),
                "reason": reason_suffix.map(|s| format!("{}|{s}", decision.reasons.join(","))).unwrap_or_else(|| decision.reasons.join(",")),
                "notes": format!("copilot:{idempotency_key}"),
            });
            if let Some(extra) = params.as_object_mut() {
                extra.insert("carbs".to_string(), serde_json::json!(proposal.carbs_grams));
            }

            let command = ActionCommand::new(
                uuid::Uuid::new_v4().to_string(),
                idempotency_key.clone(),
                proposal.action_type,
                params,
                serde_json::json!({"dataFresh": data_fresh, "sensorBlocked": sensor_blocked, "actionsLast6h": actions_last_6h}),
                now_ts,
            );

            if self.dry_run {
                tracing::info!(event = "dry_run_skipped_dispatch", idempotency_key = %idempotency_key, "dry run: would submit action");
                continue;
            }
            let dispatcher = ActionDispatcher::new(&*self.store, &self.nightscout, settings.fallback_enabled);
            match dispatcher.submit(command, broadcaster).await {
                Ok(DispatchOutcome::Delivered { via }) => {
                    actions_dispatched += 1;
                    if via == "nightscout" {
                        audit::temp_target_sent(&idempotency_key, target_low, target_high);
                    } else {
                        audit::temp_target_sent_local_fallback(&idempotency_key, &via);
                    }
                }
                Ok(DispatchOutcome::Deduplicated) => audit::action_deduplicated(&idempotency_key),
                Ok(DispatchOutcome::Failed { reason }) => audit::action_delivery_failed(&idempotency_key, &reason),
                Err(err) => audit::action_delivery_failed(&idempotency_key, &err.to_string()),
            }
        }

        if !adaptive_triggered {
            audit::adaptive_controller_fallback_to_rules();
            self.run_keepalive(&settings, now_ts, effective_base_target, active_temp_target, data_fresh, sensor_blocked, broadcaster, &mut actions_dispatched).await?;
        }

        let duration_ms = (time::now_ms() - started).max(0) as u64;
        audit::automation_cycle_completed(duration_ms, actions_dispatched);
        Ok(CycleOutcome::Completed { actions_dispatched })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_keepalive(
        &self,
        settings: &Settings,
        now_ts: i64,
        effective_base_target: f64,
        active_temp_target: Option<(f64, f64, i64)>,
        data_fresh: bool,
        sensor_blocked: bool,
        broadcaster: &dyn Broadcaster,
        actions_dispatched: &mut u32,
    ) -> Result<()> {
        if settings.kill_switch {
            audit::adaptive_keepalive_skipped("kill_switch");
            return Ok(());
        }
        if !data_fresh {
            audit::adaptive_keepalive_skipped("stale_data");
            return Ok(());
        }
        if sensor_blocked {
            audit::adaptive_keepalive_skipped("sensor_blocked");
            return Ok(());
        }
        let last_sent = self.store.latest_sent_ts(ActionType::TempTarget)?;
        if let Some(last_sent) = last_sent {
            if now_ts - last_sent < KEEPALIVE_GAP_MS {
                audit::adaptive_keepalive_skipped("recent_temp_target");
                return Ok(());
            }
        }
        let active_target = active_temp_target.map(|(low, high, _)| (low + high) / 2.0).unwrap_or(effective_base_target);
        if (active_target - effective_base_target).abs() < 0.05 {
            audit::adaptive_keepalive_skipped("within_tolerance");
            return Ok(());
        }

        let bucket = now_ts / (KEEPALIVE_DURATION_MIN as i64 * 60_000);
        let idempotency_key = format!("{}{}", settings.keepalive_prefix, bucket);
        let params = serde_json::json!({
            "eventType": "Temporary Target",
            "createdAt": chrono::Utc.timestamp_millis_opt(now_ts).single().map(|d| d.to_rfc3339()).unwrap_or_default(),
            "duration": KEEPALIVE_DURATION_MIN,
            "targetTop": mmol_to_mgdl(effective_base_target),
            "targetBottom": mmol_to_mgdl(effective_base_target),
            "reason": "keepalive",
            "notes": format!("copilot:{idempotency_key}"),
        });
        let command = ActionCommand::new(
            uuid::Uuid::new_v4().to_string(),
            idempotency_key.clone(),
            ActionType::TempTarget,
            params,
            serde_json::json!({"dataFresh": data_fresh, "sensorBlocked": sensor_blocked}),
            now_ts,
        );
        if self.dry_run {
            tracing::info!(event = "dry_run_skipped_dispatch", idempotency_key = %idempotency_key, "dry run: would send keepalive");
            return Ok(());
        }
        let dispatcher = ActionDispatcher::new(&*self.store, &self.nightscout, settings.fallback_enabled);
        match dispatcher.submit(command, broadcaster).await {
            Ok(DispatchOutcome::Delivered { .. }) => {
                *actions_dispatched += 1;
                audit::adaptive_keepalive_sent(effective_base_target);
            }
            Ok(DispatchOutcome::Deduplicated) => audit::action_deduplicated(&idempotency_key),
            Ok(DispatchOutcome::Failed { reason }) => audit::adaptive_keepalive_failed(&reason),
            Err(err) => audit::adaptive_keepalive_failed(&err.to_string()),
        }
        Ok(())
    }
}

fn state_name(state: RuleState) -> &'static str {
    match state {
        RuleState::Triggered => "TRIGGERED",
        RuleState::Blocked => "BLOCKED",
        RuleState::NoMatch => "NO_MATCH",
    }
}

/// AdaptiveTargetController buckets by `retargetMinutes`; every other
/// rule buckets by the default 30-min window (spec.md §4.8 step 21).
fn retarget_bucket_minutes(rule_id: &str, retarget_minutes: u32) -> u32 {
    if rule_id == "AdaptiveTargetController.v1" {
        retarget_minutes.clamp(MIN_RETARGET_BUCKET_MIN, 30)
    } else {
        DEFAULT_RETARGET_BUCKET_MIN
    }
}

fn current_segment(segments: &[ProfileSegmentEstimate], now_ts: i64) -> Option<&ProfileSegmentEstimate> {
    let dt: DateTime<Utc> = Utc.timestamp_millis_opt(now_ts).single().unwrap_or_else(Utc::now);
    let day_type = DayType::from_weekday(dt.weekday());
    let time_slot = TimeSlot::from_hour(dt.hour());
    segments.iter().find(|s| s.day_type == day_type && s.time_slot == time_slot)
}

/// `(target_low, target_high, expires_ts)` of the most recent temp
/// target still within its declared duration (spec.md §4.8 step 16).
fn active_temp_target(therapy: &[TherapyEvent], now_ts: i64) -> Option<(f64, f64, i64)> {
    therapy.iter().rev().find_map(|e| match &e.kind {
        TherapyKind::TempTarget { target_low_mmol, target_high_mmol, duration_min } => {
            let expires = e.ts + *duration_min as i64 * 60_000;
            if now_ts <= expires {
                Some((*target_low_mmol, *target_high_mmol, expires))
            } else {
                None
            }
        }
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GlucosePoint, GlucoseQuality};
    use crate::storage::sqlite::SqliteStore;
    use crate::storage::GlucoseRepository;

    fn gp(ts: i64, mmol: f64) -> GlucosePoint {
        GlucosePoint::new(ts, ts, mmol, "nightscout", GlucoseQuality::Ok)
    }

    #[tokio::test]
    async fn cycle_skips_when_store_is_empty() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let coordinator = AutomationCoordinator::new(store, "", "");
        let outcome = coordinator.run_cycle(&NoopBroadcaster).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Skipped { reason: "no_glucose_data" });
    }

    #[tokio::test]
    async fn concurrent_trigger_is_dropped_not_queued() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let now = time::now_ms();
        store.insert_glucose(&[gp(now - 5 * 60_000, 6.0), gp(now, 6.2)]).unwrap();
        let coordinator = Arc::new(AutomationCoordinator::new(store, "", ""));

        let held = coordinator.cycle_lock.try_lock().unwrap();
        let outcome = coordinator.run_cycle(&NoopBroadcaster).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Skipped { reason: "already_running" });
        drop(held);
    }

    #[tokio::test]
    async fn cycle_completes_with_glucose_history() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let now = time::now_ms();
        let points: Vec<GlucosePoint> = (0..10).map(|i| gp(now - (10 - i) * 5 * 60_000, 6.0 + i as f64 * 0.05)).collect();
        store.insert_glucose(&points).unwrap();
        let coordinator = AutomationCoordinator::new(store.clone(), "", "");
        let outcome = coordinator.run_cycle(&NoopBroadcaster).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Completed { .. }));
        assert!(!store.glucose_since(0).unwrap().is_empty());
    }
}
