//! Legacy linear-trend prediction engine (v2), spec.md §4.6.

use super::{EngineState, PredictionContext, PredictionEngine};
use crate::model::{Forecast, GlucosePoint, TherapyEvent, TherapyKind};
use crate::pk::InsulinProfile;

const SHORT_HALF_LIFE_MIN: f64 = 14.0;
const LONG_HALF_LIFE_MIN: f64 = 40.0;

pub struct LegacyV2Engine;

fn weighted_trend(points: &[GlucosePoint], now_ts: i64, half_life_min: f64) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let lambda = std::f64::consts::LN_2 / half_life_min;
    let mut num = 0.0;
    let mut den = 0.0;
    for w in points.windows(2) {
        let (a, b) = (&w[0], &w[1]);
        let dt_min = (b.ts - a.ts) as f64 / 60_000.0;
        if dt_min <= 0.0 {
            continue;
        }
        let roc = (b.value_mmol - a.value_mmol) / dt_min; // mmol/min
        let age_min = (now_ts - b.ts) as f64 / 60_000.0;
        let weight = (-lambda * age_min.max(0.0)).exp();
        num += roc * weight;
        den += weight;
    }
    if den > 1e-9 {
        num / den
    } else {
        0.0
    }
}

/// Net mmol/L contribution of therapy events between `now_ts` and
/// `now_ts + horizon_min`, via PK-curve-weighted integration.
fn therapy_delta(therapy: &[TherapyEvent], now_ts: i64, horizon_min: f64, ctx: &PredictionContext) -> f64 {
    let insulin_profile = InsulinProfile::for_id(ctx.insulin_profile);
    let mut delta = 0.0;
    for event in therapy {
        let minutes_since = (now_ts - event.ts) as f64 / 60_000.0;
        if minutes_since < 0.0 || minutes_since > 600.0 {
            continue;
        }
        if let Some(units) = event.insulin_units() {
            let frac_now = insulin_profile.cumulative(minutes_since);
            let frac_future = insulin_profile.cumulative(minutes_since + horizon_min);
            delta -= (frac_future - frac_now) * units * ctx.isf;
        }
        if let TherapyKind::Carbs { grams, .. } = &event.kind {
            let curve = crate::pk::CarbAbsorptionType::Medium.curve();
            let frac_now = curve.cumulative(minutes_since);
            let frac_future = curve.cumulative(minutes_since + horizon_min);
            delta += (frac_future - frac_now) * grams * ctx.csf();
        }
    }
    delta
}

fn volatility(points: &[GlucosePoint]) -> f64 {
    if points.len() < 2 {
        return 0.1;
    }
    let deltas: Vec<f64> = points.windows(2).map(|w| (w[1].value_mmol - w[0].value_mmol).abs()).collect();
    deltas.iter().sum::<f64>() / deltas.len() as f64
}

fn sampling_interval_penalty(points: &[GlucosePoint]) -> f64 {
    if points.len() < 2 {
        return 0.2;
    }
    let avg_gap_min: f64 = points
        .windows(2)
        .map(|w| (w[1].ts - w[0].ts) as f64 / 60_000.0)
        .sum::<f64>()
        / (points.len() - 1) as f64;
    ((avg_gap_min - 5.0) / 20.0).clamp(0.0, 0.6)
}

impl PredictionEngine for LegacyV2Engine {
    fn model_version(&self) -> &'static str {
        "local-hybrid-v2"
    }

    fn predict(
        &self,
        _state: &mut EngineState,
        glucose: &[GlucosePoint],
        therapy: &[TherapyEvent],
        ctx: &PredictionContext,
    ) -> Vec<Forecast> {
        let mut sorted: Vec<GlucosePoint> = glucose.to_vec();
        sorted.sort_by_key(|p| p.ts);
        let Some(latest) = sorted.last().cloned() else {
            return Vec::new();
        };

        let short_trend = weighted_trend(&sorted, ctx.now_ts, SHORT_HALF_LIFE_MIN);
        let long_trend = weighted_trend(&sorted, ctx.now_ts, LONG_HALF_LIFE_MIN);
        let blended_trend = 0.6 * short_trend + 0.4 * long_trend; // mmol/min

        let vol = volatility(&sorted);
        let interval_penalty = sampling_interval_penalty(&sorted);

        let mut forecasts = Vec::new();
        for &minutes in &[5u32, 30, 60] {
            let trend_component = blended_trend * minutes as f64;
            let delta = therapy_delta(therapy, ctx.now_ts, minutes as f64, ctx);
            let value = (latest.value_mmol + trend_component + delta).clamp(Forecast::MIN_MMOL, Forecast::MAX_MMOL);
            let half_width = (0.10 + vol * (minutes as f64 / 5.0).sqrt() * 0.6 + interval_penalty).clamp(0.20, 3.0);
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
