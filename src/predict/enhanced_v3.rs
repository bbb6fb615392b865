//! Enhanced per-5-minute-step prediction engine (v3), spec.md §4.6.

use super::residual_ar::Ar1Fit;
use super::uam::UamState;
use super::{EngineState, PredictionContext, PredictionEngine};
use crate::model::{Forecast, GlucosePoint, TherapyEvent};
use crate::pk::{classify_carb_event, CarbCatalog, InsulinProfile};

const STEPS: usize = 12;
const STEP_MIN: f64 = 5.0;
const THERAPY_CLAMP: f64 = 6.0;
const TREND_CUM60_BOUND: f64 = 0.55 * 12.0 + 0.7;

pub struct EnhancedV3Engine;

fn therapy_step_series(
    therapy: &[TherapyEvent],
    glucose: &[GlucosePoint],
    now_ts: i64,
    ctx: &PredictionContext,
) -> Vec<f64> {
    let insulin_profile = InsulinProfile::for_id(ctx.insulin_profile);
    let catalog = CarbCatalog::seed();
    let latest_bg = glucose.last().map(|p| p.value_mmol).unwrap_or(6.0);

    let mut per_step = vec![0.0; STEPS];
    for event in therapy {
        let minutes_since = (now_ts - event.ts) as f64 / 60_000.0;
        if minutes_since < 0.0 || minutes_since > 600.0 {
            continue;
        }
        if let Some(units) = event.insulin_units() {
            for j in 1..=STEPS {
                let t0 = minutes_since + (j as f64 - 1.0) * STEP_MIN;
                let t1 = minutes_since + j as f64 * STEP_MIN;
                let contrib = (insulin_profile.cumulative(t1) - insulin_profile.cumulative(t0)) * units * ctx.isf;
                per_step[j - 1] -= contrib;
            }
        }
        if event.carbs_grams().is_some() {
            let absorption_type = classify_carb_event(event, &catalog, latest_bg, glucose);
            let curve = absorption_type.curve();
            let grams = event.carbs_grams().unwrap();
            for j in 1..=STEPS {
                let t0 = minutes_since + (j as f64 - 1.0) * STEP_MIN;
                let t1 = minutes_since + j as f64 * STEP_MIN;
                let contrib = (curve.cumulative(t1) - curve.cumulative(t0)) * grams * ctx.csf();
                per_step[j - 1] += contrib;
            }
        }
    }

    let mut cumulative = 0.0;
    per_step
        .into_iter()
        .map(|step| {
            let next_cum = (cumulative + step).clamp(-THERAPY_CLAMP, THERAPY_CLAMP);
            let clamped_step = next_cum - cumulative;
            cumulative = next_cum;
            clamped_step
        })
        .collect()
}

fn scale_trend_to_bound(steps: &[f64]) -> Vec<f64> {
    let cum60: f64 = steps.iter().sum();
    if cum60.abs() <= TREND_CUM60_BOUND || cum60.abs() < 1e-9 {
        steps.to_vec()
    } else {
        let scale = TREND_CUM60_BOUND / cum60.abs();
        steps.iter().map(|s| s * scale).collect()
    }
}

impl PredictionEngine for EnhancedV3Engine {
    fn model_version(&self) -> &'static str {
        "copilot-enhanced-v3"
    }

    fn predict(
        &self,
        state: &mut EngineState,
        glucose: &[GlucosePoint],
        therapy: &[TherapyEvent],
        ctx: &PredictionContext,
    ) -> Vec<Forecast> {
        let mut sorted: Vec<GlucosePoint> = glucose.to_vec();
        sorted.sort_by_key(|p| p.ts);
        sorted.dedup_by_key(|p| p.ts);
        let Some(latest) = sorted.last().cloned() else {
            return Vec::new();
        };

        let mut last_ts = None;
        let mut kf_out = None;
        for p in &sorted {
            let dt = last_ts.map(|t| (p.ts - t) as f64 / 60_000.0).unwrap_or(5.0);
            kf_out = Some(state.kalman.update(p.value_mmol, dt.max(0.0), 0.015, 0.2));
            last_ts = Some(p.ts);
        }
        let kf_out = kf_out.unwrap();
        let (g_used, roc_per5_used) = if kf_out.warmed_up {
            (kf_out.glucose_mmol, kf_out.roc_per5)
        } else {
            let roc = if sorted.len() >= 2 {
                let a = &sorted[sorted.len() - 2];
                let b = &sorted[sorted.len() - 1];
                let dt = ((b.ts - a.ts) as f64 / 60_000.0).max(1.0);
                ((b.value_mmol - a.value_mmol) / dt * 5.0).clamp(-1.2, 1.2)
            } else {
                0.0
            };
            (latest.value_mmol, roc)
        };

        let therapy_steps = therapy_step_series(therapy, &sorted, ctx.now_ts, ctx);

        let csf = ctx.csf();
        let observed_rate5 = roc_per5_used.max(0.0);
        let uci0 = UamState::uci0(observed_rate5, therapy_steps.first().copied().unwrap_or(0.0), csf);
        let uam_snapshot = state.uam.snapshot(ctx.now_ts, uci0, csf);
        state.uam.push(ctx.now_ts, uci0);

        let mut residual_roc0 = (roc_per5_used - therapy_steps.first().copied().unwrap_or(0.0)
            - uam_snapshot.steps.first().copied().unwrap_or(0.0))
        .clamp(-1.2, 1.2);
        if uam_snapshot.active {
            residual_roc0 = residual_roc0.min(0.0);
        }

        state.ar.push(residual_roc0);
        let fit: Ar1Fit = state.ar.fit(uam_snapshot.active);
        let raw_trend_steps: Vec<f64> = (1..=STEPS as u32).map(|j| fit.forecast_step(j, residual_roc0)).collect();
        let trend_steps = scale_trend_to_bound(&raw_trend_steps);

        let mut path = vec![g_used];
        for j in 0..STEPS {
            let prev = *path.last().unwrap();
            let next = (prev + trend_steps[j] + therapy_steps[j] + uam_snapshot.steps[j])
                .clamp(Forecast::MIN_MMOL, Forecast::MAX_MMOL);
            path.push(next);
        }

        let sigma_g = kf_out.sigma_g;
        let sigma_e = fit.sigma_e;
        let n_therapy = therapy.len().max(1) as f64;

        let mut forecasts = Vec::new();
        for &(minutes, idx) in &[(5u32, 1usize), (30, 6), (60, 12)] {
            let value = path[idx];
            let sqrt_n = n_therapy.sqrt();
            let base = match minutes {
                5 => 0.30,
                30 => 0.55,
                _ => 0.80,
            };
            let half_width = (base
                + 0.25 * sqrt_n.min(3.0) * uam_snapshot.uci0
                + 0.20 * sqrt_n.min(3.0) * residual_roc0.abs()
                + 0.15 * sqrt_n.min(3.0) * sigma_g
                + 0.15 * sqrt_n.min(3.0) * sigma_e)
                .clamp(0.30, 3.2);
            forecasts.push(Forecast {
                ts: ctx.now_ts,
                horizon_minutes: minutes,
                value_mmol: value,
                ci_low: (value - half_width).max(Forecast::MIN_MMOL),
                ci_high: (value + half_width).min(Forecast::MAX_MMOL),
                model_version: self.model_version().to_string(),
            });
        }
        forecasts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GlucoseQuality, TherapyKind};

    fn gp(ts: i64, mmol: f64) -> GlucosePoint {
        GlucosePoint::new(ts, ts, mmol, "nightscout", GlucoseQuality::Ok)
    }

    fn flat_series(n: usize, value: f64) -> Vec<GlucosePoint> {
        (0..n).map(|i| gp(i as i64 * 5 * 60_000, value)).collect()
    }

    #[test]
    fn s3_fast_vs_slow_carbs_diverge() {
        let glucose = flat_series(8, 6.0);
        let now_ts = glucose.last().unwrap().ts;
        let ctx = PredictionContext { now_ts, ..Default::default() };

        let fast = vec![TherapyEvent::new(
            "1",
            now_ts,
            TherapyKind::Carbs { grams: 30.0, food: Some("honey and banana".to_string()), carb_type: None },
        )];
        let slow = vec![TherapyEvent::new(
            "1",
            now_ts,
            TherapyKind::Carbs { grams: 30.0, food: Some("chicken breast".to_string()), carb_type: None },
        )];

        let engine = EnhancedV3Engine;
        let mut fast_state = EngineState::default();
        let mut slow_state = EngineState::default();
        let fast_forecasts = engine.predict(&mut fast_state, &glucose, &fast, &ctx);
        let slow_forecasts = engine.predict(&mut slow_state, &glucose, &slow, &ctx);

        let fast30 = fast_forecasts.iter().find(|f| f.horizon_minutes == 30).unwrap().value_mmol;
        let slow30 = slow_forecasts.iter().find(|f| f.horizon_minutes == 30).unwrap().value_mmol;
        assert!(fast30 > slow30);
    }

    #[test]
    fn forecasts_are_valid_and_sorted() {
        let glucose = flat_series(10, 7.0);
        let now_ts = glucose.last().unwrap().ts;
        let ctx = PredictionContext { now_ts, ..Default::default() };
        let mut state = EngineState::default();
        let engine = EnhancedV3Engine;
        let forecasts = engine.predict(&mut state, &glucose, &[], &ctx);
        assert_eq!(forecasts.len(), 3);
        for f in &forecasts {
            assert!(f.is_valid());
        }
        assert_eq!(forecasts[0].horizon_minutes, 5);
        assert_eq!(forecasts[2].horizon_minutes, 60);
    }
}
