use crate::model::{DayType, GlucosePoint, PatternWindow};
use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use std::collections::HashMap;

const LOW_THRESHOLD_MMOL: f64 = 3.9;
const HIGH_THRESHOLD_MMOL: f64 = 10.0;
const RISK_LOW_RATE: f64 = 0.15;
const MIN_SAMPLES_FOR_RISK: u32 = 12;

#[derive(Default)]
struct Bucket {
    low_count: u32,
    high_count: u32,
    total: u32,
    days: std::collections::HashSet<i64>,
}

pub struct PatternAnalyzer;

impl PatternAnalyzer {
    /// Recompute one `PatternWindow` per `(DayType, hour)` combination
    /// observed in `glucose` over the last `lookback_days`.
    pub fn recompute(glucose: &[GlucosePoint], now_ts: i64, lookback_days: u32) -> Vec<PatternWindow> {
        let cutoff = now_ts - (lookback_days as i64) * 24 * 60 * 60 * 1000;
        let mut buckets: HashMap<(DayType, u32), Bucket> = HashMap::new();

        for point in glucose {
            if point.ts < cutoff || point.ts > now_ts {
                continue;
            }
            let dt: DateTime<Utc> = Utc.timestamp_millis_opt(point.ts).single().unwrap_or_else(Utc::now);
            let day_type = DayType::from_weekday(dt.weekday());
            let hour = dt.hour();
            let bucket = buckets.entry((day_type, hour)).or_default();
            bucket.total += 1;
            bucket.days.insert(dt.num_days_from_ce() as i64);
            if point.value_mmol < LOW_THRESHOLD_MMOL {
                bucket.low_count += 1;
            } else if point.value_mmol > HIGH_THRESHOLD_MMOL {
                bucket.high_count += 1;
            }
        }

        let mut windows: Vec<PatternWindow> = buckets
            .into_iter()
            .map(|((day_type, hour), bucket)| {
                let low_rate = bucket.low_count as f64 / bucket.total.max(1) as f64;
                let high_rate = bucket.high_count as f64 / bucket.total.max(1) as f64;
                let recommended = recommend_target(low_rate, high_rate);
                let is_risk_window = bucket.total >= MIN_SAMPLES_FOR_RISK && low_rate >= RISK_LOW_RATE;
                PatternWindow {
                    day_type,
                    hour,
                    sample_count: bucket.total,
                    active_days: bucket.days.len() as u32,
                    low_rate,
                    high_rate,
                    recommended_target_mmol: recommended,
                    is_risk_window,
                }
            })
            .collect();

        windows.sort_by(|a, b| (day_type_order(a.day_type), a.hour).cmp(&(day_type_order(b.day_type), b.hour)));
        windows
    }

    pub fn for_now<'a>(windows: &'a [PatternWindow], day_type: DayType, hour: u32) -> Option<&'a PatternWindow> {
        windows.iter().find(|w| w.day_type == day_type && w.hour == hour)
    }
}

fn day_type_order(day_type: DayType) -> u32 {
    match day_type {
        DayType::Weekday => 0,
        DayType::Weekend => 1,
    }
}

/// Shift the base target down when highs dominate, up when lows
/// dominate, clamped to `PatternWindow`'s documented range.
fn recommend_target(low_rate: f64, high_rate: f64) -> f64 {
    const BASE: f64 = 5.6;
    let shift = high_rate * 1.8 - low_rate * 2.4;
    (BASE + shift).clamp(PatternWindow::MIN_TARGET, PatternWindow::MAX_TARGET)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GlucoseQuality;

    fn gp(ts: i64, mmol: f64) -> GlucosePoint {
        GlucosePoint::new(ts, ts, mmol, "nightscout", GlucoseQuality::Ok)
    }

    #[test]
    fn risk_window_flagged_on_frequent_hypos() {
        let base_ts = Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap().timestamp_millis();
        let mut points = Vec::new();
        for day in 0..20 {
            let ts = base_ts + day * 24 * 60 * 60 * 1000;
            points.push(gp(ts, 3.2));
        }
        let now = base_ts + 25 * 24 * 60 * 60 * 1000;
        let windows = PatternAnalyzer::recompute(&points, now, 60);
        let risky = windows.iter().find(|w| w.hour == 3).unwrap();
        assert!(risky.is_risk_window);
        assert!(risky.low_rate > 0.9);
    }

    #[test]
    fn lookback_excludes_old_samples() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap().timestamp_millis();
        let old = gp(now - 800 * 24 * 60 * 60 * 1000, 3.0);
        let recent = gp(now - 1 * 24 * 60 * 60 * 1000, 6.0);
        let windows = PatternAnalyzer::recompute(&[old, recent], now, 60);
        let total_samples: u32 = windows.iter().map(|w| w.sample_count).sum();
        assert_eq!(total_samples, 1);
    }
}
