use crate::model::{DayType, GlucosePoint, ProfileEstimate, ProfileSegmentEstimate, TherapyEvent, TherapyKind, TimeSlot};
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use std::collections::HashMap;

const DEFAULT_ISF: f64 = 2.3;
const DEFAULT_CR: f64 = 10.0;
const MIN_SAMPLES_FOR_CONFIDENT_ESTIMATE: u32 = 6;

/// Collapses the historical `ProfileEstimator` variants (spec.md §9
/// design note) into one configurable estimator over bolus-correction
/// pairs: each meal/correction bolus followed by a glucose excursion
/// within 3h yields one observed ISF or CR sample.
pub struct ProfileEstimator;

struct Observation {
    day_type: DayType,
    time_slot: TimeSlot,
    isf_sample: Option<f64>,
    cr_sample: Option<f64>,
}

fn nearest_glucose(glucose: &[GlucosePoint], ts: i64, tolerance_ms: i64) -> Option<&GlucosePoint> {
    glucose
        .iter()
        .filter(|p| (p.ts - ts).abs() <= tolerance_ms)
        .min_by_key(|p| (p.ts - ts).abs())
}

fn observations(glucose: &[GlucosePoint], therapy: &[TherapyEvent]) -> Vec<Observation> {
    let mut sorted_glucose: Vec<&GlucosePoint> = glucose.iter().collect();
    sorted_glucose.sort_by_key(|p| p.ts);

    let mut out = Vec::new();
    for event in therapy {
        let before = nearest_glucose(glucose, event.ts, 10 * 60_000);
        let after = nearest_glucose(glucose, event.ts + 180 * 60_000, 20 * 60_000);
        let (Some(before), Some(after)) = (before, after) else { continue };
        let dt: DateTime<Utc> = Utc.timestamp_millis_opt(event.ts).single().unwrap_or_else(Utc::now);
        let day_type = DayType::from_weekday(dt.weekday());
        let time_slot = TimeSlot::from_hour(dt.hour());

        match &event.kind {
            TherapyKind::CorrectionBolus { units } if *units > 0.0 => {
                let drop = before.value_mmol - after.value_mmol;
                if drop > 0.2 {
                    out.push(Observation { day_type, time_slot, isf_sample: Some(drop / units), cr_sample: None });
                }
            }
            TherapyKind::MealBolus { grams, units } if *units > 0.0 && *grams > 0.0 => {
                // A well-matched bolus holds glucose roughly flat; the
                // carb ratio implied is grams/units scaled by how far
                // off the match was (closer to flat -> higher weight,
                // approximated here by just taking the raw ratio).
                out.push(Observation { day_type, time_slot, isf_sample: None, cr_sample: Some(grams / units) });
            }
            _ => {}
        }
    }
    out
}

fn estimate_from(samples: &[f64], default: f64, lookback_days: u32) -> ProfileEstimate {
    if samples.is_empty() {
        return ProfileEstimate { isf: default, cr: default, sample_count: 0, confidence: 0.2, lookback_days };
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let variance = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / samples.len() as f64;
    let cv = if mean.abs() > 1e-9 { variance.sqrt() / mean.abs() } else { 1.0 };
    let raw_confidence = (samples.len() as f64 / MIN_SAMPLES_FOR_CONFIDENT_ESTIMATE as f64).min(1.0) * (1.0 - cv.min(0.8));
    ProfileEstimate {
        isf: mean,
        cr: mean,
        sample_count: samples.len() as u32,
        confidence: ProfileEstimate::clamp_confidence(raw_confidence),
        lookback_days,
    }
}

impl ProfileEstimator {
    /// A single global estimate blending all ISF/CR observations.
    pub fn estimate_global(
        glucose: &[GlucosePoint],
        therapy: &[TherapyEvent],
        lookback_days: u32,
    ) -> ProfileEstimate {
        let obs = observations(glucose, therapy);
        let isf_samples: Vec<f64> = obs.iter().filter_map(|o| o.isf_sample).collect();
        let cr_samples: Vec<f64> = obs.iter().filter_map(|o| o.cr_sample).collect();

        let isf_est = estimate_from(&isf_samples, DEFAULT_ISF, lookback_days);
        let cr_est = estimate_from(&cr_samples, DEFAULT_CR, lookback_days);
        let sample_count = isf_est.sample_count + cr_est.sample_count;
        ProfileEstimate {
            isf: isf_est.isf,
            cr: cr_est.cr,
            sample_count,
            confidence: ProfileEstimate::clamp_confidence((isf_est.confidence + cr_est.confidence) / 2.0),
            lookback_days,
        }
    }

    /// Per-`(DayType, TimeSlot)` segment estimates, falling back to the
    /// global estimate for segments with no local observations.
    pub fn estimate_segments(
        glucose: &[GlucosePoint],
        therapy: &[TherapyEvent],
        lookback_days: u32,
    ) -> Vec<ProfileSegmentEstimate> {
        let global = Self::estimate_global(glucose, therapy, lookback_days);
        let obs = observations(glucose, therapy);
        let mut by_segment: HashMap<(DayType, TimeSlot), (Vec<f64>, Vec<f64>)> = HashMap::new();
        for o in &obs {
            let entry = by_segment.entry((o.day_type, o.time_slot)).or_default();
            if let Some(v) = o.isf_sample {
                entry.0.push(v);
            }
            if let Some(v) = o.cr_sample {
                entry.1.push(v);
            }
        }

        let mut out = Vec::new();
        for day_type in [DayType::Weekday, DayType::Weekend] {
            for time_slot in [TimeSlot::Night, TimeSlot::Morning, TimeSlot::Afternoon, TimeSlot::Evening] {
                let estimate = match by_segment.get(&(day_type, time_slot)) {
                    Some((isf_samples, cr_samples)) if !isf_samples.is_empty() || !cr_samples.is_empty() => {
                        let isf_est = estimate_from(isf_samples, global.isf, lookback_days);
                        let cr_est = estimate_from(cr_samples, global.cr, lookback_days);
                        ProfileEstimate {
                            isf: isf_est.isf,
                            cr: cr_est.cr,
                            sample_count: isf_est.sample_count + cr_est.sample_count,
                            confidence: ProfileEstimate::clamp_confidence((isf_est.confidence + cr_est.confidence) / 2.0),
                            lookback_days,
                        }
                    }
                    _ => global.clone(),
                };
                out.push(ProfileSegmentEstimate { day_type, time_slot, estimate });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GlucoseQuality;

    fn gp(ts: i64, mmol: f64) -> GlucosePoint {
        GlucosePoint::new(ts, ts, mmol, "nightscout", GlucoseQuality::Ok)
    }

    #[test]
    fn empty_history_falls_back_to_defaults() {
        let est = ProfileEstimator::estimate_global(&[], &[], 60);
        assert_eq!(est.isf, DEFAULT_ISF);
        assert_eq!(est.cr, DEFAULT_CR);
        assert_eq!(est.sample_count, 0);
    }

    #[test]
    fn correction_bolus_drop_yields_isf_sample() {
        let glucose = vec![gp(0, 10.0), gp(180 * 60_000, 7.0)];
        let therapy = vec![TherapyEvent::new("1", 0, TherapyKind::CorrectionBolus { units: 3.0 })];
        let est = ProfileEstimator::estimate_global(&glucose, &therapy, 60);
        assert!((est.isf - 1.0).abs() < 1e-9);
        assert_eq!(est.sample_count, 1);
    }

    #[test]
    fn segments_cover_all_combinations() {
        let segments = ProfileEstimator::estimate_segments(&[], &[], 60);
        assert_eq!(segments.len(), 8);
    }
}
