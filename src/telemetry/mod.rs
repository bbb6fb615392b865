//! Telemetry mapper: canonical key resolution, sanity ranges, and
//! aliasing (spec.md §4.9).

use crate::model::{TelemetryQuality, TelemetrySample};
use crate::units::{key_tokens, normalize_key};
use chrono::{Datelike, TimeZone, Utc};
use std::collections::HashMap;

const SENSITIVE_SUBSTRINGS: &[&str] =
    &["secret", "token", "password", "apikey", "api_key", "authorization", "bearer", "jwt"];

const CUMULATIVE_ACTIVITY_KEYS: &[&str] = &["steps_count", "distance_km", "active_minutes", "calories_active_kcal"];

/// `(min, max)` plausible ranges per canonical key; values outside are
/// dropped silently (`CoreError::OutOfRangeTelemetry`, spec.md §7).
fn sanity_range(key: &str) -> Option<(f64, f64)> {
    match key {
        "iob_units" => Some((0.0, 50.0)),
        "cob_grams" => Some((0.0, 300.0)),
        "carbs_grams" => Some((0.0, 300.0)),
        "insulin_units" => Some((0.0, 50.0)),
        "dia_hours" => Some((1.0, 12.0)),
        "steps_count" => Some((0.0, 100_000.0)),
        "activity_ratio" => Some((0.0, 5.0)),
        "heart_rate_bpm" => Some((20.0, 250.0)),
        "temp_target_low_mmol" | "temp_target_high_mmol" => Some((2.0, 16.0)),
        "temp_target_duration_min" => Some((0.0, 1440.0)),
        "profile_percent" => Some((10.0, 500.0)),
        "uam_value" => Some((0.0, 1.5)),
        "isf_value" => Some((0.1, 15.0)),
        "cr_value" => Some((1.0, 60.0)),
        "basal_rate_u_h" => Some((0.0, 10.0)),
        "insulin_req_units" => Some((-30.0, 30.0)),
        _ => None,
    }
}

fn is_sensitive(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_SUBSTRINGS.iter().any(|s| lower.contains(s))
}

/// Drop telemetry whose key carries a credential-shaped substring, or
/// whose numeric value falls outside the canonical key's sanity range.
pub fn filter_sample(sample: &TelemetrySample) -> bool {
    if is_sensitive(&sample.key) {
        return false;
    }
    if let Some(value) = sample.value_double {
        if let Some((min, max)) = sanity_range(&sample.key) {
            return (min..=max).contains(&value);
        }
    }
    true
}

/// Map a raw source field name to a canonical telemetry key, or a
/// `raw_`/`ns_`-prefixed fallback (spec.md §6).
pub fn canonicalize_key(source: &str, field: &str) -> String {
    let normalized = normalize_key(field);
    match normalized.as_str() {
        "iob" | "iobunits" | "iob_units" => "iob_units".to_string(),
        "cob" | "cobgrams" | "cob_grams" => "cob_grams".to_string(),
        "carbs" | "carbsgrams" => "carbs_grams".to_string(),
        "insulin" | "insulinunits" => "insulin_units".to_string(),
        "dia" | "diahours" => "dia_hours".to_string(),
        "steps" | "stepscount" => "steps_count".to_string(),
        "activityratio" => "activity_ratio".to_string(),
        "heartrate" | "hr" | "heartratebpm" => "heart_rate_bpm".to_string(),
        "targettop" | "temptargethigh" => "temp_target_high_mmol".to_string(),
        "targetbottom" | "temptargetlow" => "temp_target_low_mmol".to_string(),
        "duration" | "temptargetduration" => "temp_target_duration_min".to_string(),
        "percent" | "profilepercent" => "profile_percent".to_string(),
        "uam" | "uamvalue" => "uam_value".to_string(),
        "isf" | "isfvalue" => "isf_value".to_string(),
        "cr" | "crvalue" => "cr_value".to_string(),
        "basal" | "basalrate" => "basal_rate_u_h".to_string(),
        "insulinreq" | "insulinrequired" => "insulin_req_units".to_string(),
        _ if source == "nightscout" => format!("ns_{normalized}"),
        _ => format!("raw_{normalized}"),
    }
}

fn today_start_millis(now_ts: i64) -> i64 {
    let dt = Utc.timestamp_millis_opt(now_ts).single().unwrap_or_else(Utc::now);
    let start = Utc.with_ymd_and_hms(dt.year(), dt.month(), dt.day(), 0, 0, 0).unwrap();
    start.timestamp_millis()
}

/// Resolve the latest-6h telemetry rows into one value per canonical
/// key: newest wins, except the cumulative-activity keys which prefer
/// the daily max-by-value from local midnight (spec.md §4.9).
pub fn resolve_snapshot(samples: &[TelemetrySample], now_ts: i64) -> HashMap<String, TelemetrySample> {
    let window_start = now_ts - 6 * 60 * 60 * 1000;
    let today_start = today_start_millis(now_ts);

    let mut latest: HashMap<String, TelemetrySample> = HashMap::new();
    let mut daily_max: HashMap<String, TelemetrySample> = HashMap::new();

    let mut sorted: Vec<&TelemetrySample> = samples
        .iter()
        .filter(|s| s.ts >= window_start && s.ts <= now_ts && s.quality == TelemetryQuality::Ok && filter_sample(s))
        .collect();
    sorted.sort_by_key(|s| s.ts);

    for sample in sorted {
        latest.insert(sample.key.clone(), sample.clone());
        if CUMULATIVE_ACTIVITY_KEYS.contains(&sample.key.as_str()) && sample.ts >= today_start {
            if let Some(value) = sample.value_double {
                let replace = daily_max.get(&sample.key).and_then(|s| s.value_double).map(|v| value > v).unwrap_or(true);
                if replace {
                    daily_max.insert(sample.key.clone(), sample.clone());
                }
            }
        }
    }

    for (key, sample) in daily_max {
        latest.insert(key, sample);
    }
    latest
}

/// Search the resolved snapshot for a key whose normalized tokens
/// include `alias`, used for the `iob_units`/`cob_grams`/
/// `activity_ratio`/`uam_value` lookups (spec.md §4.9).
pub fn alias_lookup<'a>(snapshot: &'a HashMap<String, TelemetrySample>, alias: &str) -> Option<&'a TelemetrySample> {
    if let Some(exact) = snapshot.get(alias) {
        return Some(exact);
    }
    snapshot.values().find(|s| key_tokens(&s.key).iter().any(|t| t == alias))
}

/// The four alias-backed scalar reads the coordinator needs each
/// cycle. `uam_value` only accepts `[0.0, 1.5]` (spec.md §4.9).
#[derive(Debug, Clone, Default)]
pub struct TelemetrySnapshot {
    pub iob_units: f64,
    pub cob_grams: f64,
    pub activity_ratio: f64,
    pub uam_value: f64,
}

pub fn build_snapshot(samples: &[TelemetrySample], now_ts: i64) -> TelemetrySnapshot {
    let resolved = resolve_snapshot(samples, now_ts);
    let iob_units = alias_lookup(&resolved, "iob").and_then(|s| s.value_double).unwrap_or(0.0);
    let cob_grams = alias_lookup(&resolved, "cob").and_then(|s| s.value_double).unwrap_or(0.0);
    let activity_ratio = alias_lookup(&resolved, "activity").and_then(|s| s.value_double).unwrap_or(1.0);
    let uam_value = alias_lookup(&resolved, "uam")
        .and_then(|s| s.value_double)
        .filter(|v| (0.0..=1.5).contains(v))
        .unwrap_or(0.0);
    TelemetrySnapshot { iob_units, cob_grams, activity_ratio, uam_value }
}
