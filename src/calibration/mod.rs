//! Forecast calibration: recent-error bias correction, COB/IOB bias,
//! and base-target alignment (spec.md §4.8 steps 12–14, §4.10).

use crate::model::{Forecast, GlucosePoint};

pub struct HorizonConfig {
    pub min_samples: u32,
    pub gain: f64,
    pub max_up: f64,
    pub max_down: f64,
}

fn horizon_config(horizon_minutes: u32) -> HorizonConfig {
    match horizon_minutes {
        5 => HorizonConfig { min_samples: 24, gain: 0.35, max_up: 0.35, max_down: 0.25 },
        30 => HorizonConfig { min_samples: 18, gain: 0.45, max_up: 0.70, max_down: 0.45 },
        _ => HorizonConfig { min_samples: 12, gain: 0.55, max_up: 1.10, max_down: 0.65 },
    }
}

const BIAS_HALF_LIFE_MIN: f64 = 90.0;
const MIN_BIAS_MAGNITUDE: f64 = 0.02;

#[derive(Debug, Clone, Copy)]
pub struct CalibrationError {
    pub horizon_minutes: u32,
    pub forecast_ts: i64,
    pub error_mmol: f64, // actual - predicted
}

/// Join persisted forecasts to the nearest glucose sample within ±2
/// min, age in `[2 min, 12 h]` (spec.md §4.8 step 12).
pub fn compute_calibration_errors(forecasts: &[Forecast], glucose: &[GlucosePoint], now_ts: i64) -> Vec<CalibrationError> {
    let mut out = Vec::new();
    for forecast in forecasts {
        let target_ts = forecast.ts + forecast.horizon_minutes as i64 * 60_000;
        let age_ms = now_ts - target_ts;
        if age_ms < 2 * 60_000 || age_ms > 12 * 60 * 60_000 {
            continue;
        }
        let nearest = glucose.iter().filter(|p| (p.ts - target_ts).abs() <= 2 * 60_000).min_by_key(|p| (p.ts - target_ts).abs());
        if let Some(actual) = nearest {
            out.push(CalibrationError {
                horizon_minutes: forecast.horizon_minutes,
                forecast_ts: target_ts,
                error_mmol: actual.value_mmol - forecast.value_mmol,
            });
        }
    }
    out
}

/// Recency-weighted mean error for one horizon, `None` if fewer than
/// `min_samples` errors are present (spec.md §4.8 step 13).
fn weighted_mean_error(errors: &[CalibrationError], horizon_minutes: u32, now_ts: i64) -> Option<f64> {
    let matching: Vec<&CalibrationError> = errors.iter().filter(|e| e.horizon_minutes == horizon_minutes).collect();
    let config = horizon_config(horizon_minutes);
    if (matching.len() as u32) < config.min_samples {
        return None;
    }
    let lambda = std::f64::consts::LN_2 / BIAS_HALF_LIFE_MIN;
    let mut num = 0.0;
    let mut den = 0.0;
    for e in &matching {
        let age_min = (now_ts - e.forecast_ts) as f64 / 60_000.0;
        let weight = (-lambda * age_min.max(0.0)).exp();
        num += e.error_mmol * weight;
        den += weight;
    }
    if den > 1e-9 {
        Some(num / den)
    } else {
        None
    }
}

/// Apply recent-calibration bias to `forecast`, clamped per horizon
/// (spec.md §4.8 step 13). Returns the applied bias, `0.0` if skipped.
pub fn apply_calibration_bias(forecast: &mut Forecast, errors: &[CalibrationError], now_ts: i64) -> f64 {
    let config = horizon_config(forecast.horizon_minutes);
    let Some(raw_bias) = weighted_mean_error(errors, forecast.horizon_minutes, now_ts) else { return 0.0 };
    let bias = (raw_bias * config.gain).clamp(-config.max_down, config.max_up);
    if bias.abs() < MIN_BIAS_MAGNITUDE {
        return 0.0;
    }
    let value = (forecast.value_mmol + bias).clamp(Forecast::MIN_MMOL, Forecast::MAX_MMOL);
    let shift = value - forecast.value_mmol;
    forecast.value_mmol = value;
    forecast.ci_low = (forecast.ci_low + shift).clamp(Forecast::MIN_MMOL, forecast.value_mmol);
    forecast.ci_high = (forecast.ci_high + shift).clamp(forecast.value_mmol, Forecast::MAX_MMOL);
    bias
}

fn cob_iob_gains(horizon_minutes: u32) -> (f64, f64) {
    match horizon_minutes {
        5 => (0.006, 0.14),
        30 => (0.012, 0.28),
        _ => (0.018, 0.42),
    }
}

/// Apply the COB/IOB bias term (spec.md §4.8 step 14). Returns the
/// applied bias, `0.0` if skipped (`|bias| < 1e-6`).
pub fn apply_cob_iob_bias(forecast: &mut Forecast, cob_grams: f64, iob_units: f64) -> f64 {
    let (cob_gain, iob_gain) = cob_iob_gains(forecast.horizon_minutes);
    let cob_bias = (cob_grams * cob_gain).clamp(0.0, 2.5);
    let iob_bias = (iob_units * iob_gain).clamp(0.0, 4.0);
    let total_bias = (cob_bias - iob_bias).clamp(-4.0, 3.0);
    if total_bias.abs() < 1e-6 {
        return 0.0;
    }
    let value = (forecast.value_mmol + total_bias).clamp(Forecast::MIN_MMOL, Forecast::MAX_MMOL);
    let shift = value - forecast.value_mmol;
    forecast.value_mmol = value;
    forecast.ci_low = (forecast.ci_low + shift).clamp(Forecast::MIN_MMOL, forecast.value_mmol);
    forecast.ci_high = (forecast.ci_high + shift).clamp(forecast.value_mmol, Forecast::MAX_MMOL);
    total_bias
}

/// Base-target alignment for non-adaptive temp_target proposals
/// (spec.md §4.10). Returns `(aligned_target, reason_suffix)`.
pub fn align_base_target(proposed_target: f64, forecast_60m: f64, base_target: f64) -> (f64, Option<&'static str>) {
    let drift = forecast_60m - base_target;
    if drift.abs() < 0.15 {
        return (proposed_target.clamp(4.0, 10.0), None);
    }
    let correction = (-drift * 0.35).clamp(-1.20, 1.20);
    let raw = proposed_target + correction;
    let rounded = (raw / 0.05).round() * 0.05;
    (rounded.clamp(4.0, 10.0), Some("base_align_60m"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GlucoseQuality;

    fn gp(ts: i64, mmol: f64) -> GlucosePoint {
        GlucosePoint::new(ts, ts, mmol, "nightscout", GlucoseQuality::Ok)
    }

    fn forecast(ts: i64, horizon: u32, value: f64) -> Forecast {
        Forecast { ts, horizon_minutes: horizon, value_mmol: value, ci_low: value - 0.5, ci_high: value + 0.5, model_version: "t".into() }
    }

    #[test]
    fn calibration_errors_require_min_age() {
        let f = vec![forecast(0, 60, 6.0)];
        let g = vec![gp(60 * 60_000, 6.5)];
        let errors = compute_calibration_errors(&f, &g, 60 * 60_000 + 60_000);
        assert!(errors.is_empty());
        let errors2 = compute_calibration_errors(&f, &g, 60 * 60_000 + 3 * 60_000);
        assert_eq!(errors2.len(), 1);
        assert!((errors2[0].error_mmol - 0.5).abs() < 1e-9);
    }

    #[test]
    fn bias_skipped_below_min_samples() {
        let errors = vec![CalibrationError { horizon_minutes: 60, forecast_ts: 0, error_mmol: 1.0 }];
        let mut f = forecast(0, 60, 6.0);
        let applied = apply_calibration_bias(&mut f, &errors, 100_000);
        assert_eq!(applied, 0.0);
    }

    #[test]
    fn bias_applied_with_enough_samples() {
        let errors: Vec<CalibrationError> =
            (0..12).map(|i| CalibrationError { horizon_minutes: 60, forecast_ts: i * 60_000, error_mmol: 1.0 }).collect();
        let mut f = forecast(12 * 60_000, 60, 6.0);
        let applied = apply_calibration_bias(&mut f, &errors, 13 * 60_000);
        assert!(applied > 0.0);
        assert!(applied <= 1.10);
    }

    #[test]
    fn cob_iob_bias_nets_positive_with_more_cob_than_iob() {
        let mut f = forecast(0, 60, 6.0);
        let applied = apply_cob_iob_bias(&mut f, 22.0, 1.0);
        assert!(applied > 0.0);
    }

    #[test]
    fn align_keeps_within_bounds_and_step() {
        let (aligned, reason) = align_base_target(9.5, 8.0, 5.5);
        assert!((4.0..=10.0).contains(&aligned));
        assert!(reason.is_some());
        let steps = aligned / 0.05;
        assert!((steps - steps.round()).abs() < 1e-6);
    }

    #[test]
    fn align_noop_within_small_drift() {
        let (aligned, reason) = align_base_target(5.5, 5.6, 5.5);
        assert_eq!(aligned, 5.5);
        assert!(reason.is_none());
    }
}
