use crate::model::{GlucosePoint, GlucoseQuality};
use std::collections::HashMap;

/// Source priority per spec.md §4.1. Unknown/"other" sources fall back
/// to the `other` tier.
fn source_priority(source: &str) -> u32 {
    match source {
        "aaps_broadcast" => 60,
        "nightscout" => 50,
        "xdrip_broadcast" => 45,
        "local_nightscout_entry" => 42,
        s if s.starts_with("local_nightscout") => 40,
        "local_broadcast" => 10,
        _ => 20,
    }
}

fn combined_score(p: &GlucosePoint) -> u32 {
    source_priority(&p.source) * 10 + p.quality.priority()
}

/// Legacy artifact rule: drop `source==local_broadcast && mmol>=30`
/// (historical unit bug where mg/dL values leaked through untagged).
fn is_legacy_artifact(p: &GlucosePoint) -> bool {
    p.source == "local_broadcast" && p.value_mmol >= 30.0
}

/// Deduplicate and sort glucose samples, keeping the highest
/// combined-score variant per timestamp. Ties broken by higher id.
pub fn sanitize_glucose(points: Vec<GlucosePoint>) -> Vec<GlucosePoint> {
    let mut best: HashMap<i64, GlucosePoint> = HashMap::new();
    for p in points.into_iter().filter(|p| !is_legacy_artifact(p)) {
        match best.get(&p.ts) {
            None => {
                best.insert(p.ts, p);
            }
            Some(existing) => {
                let existing_score = combined_score(existing);
                let new_score = combined_score(&p);
                if new_score > existing_score || (new_score == existing_score && p.id > existing.id) {
                    best.insert(p.ts, p);
                }
            }
        }
    }
    let mut out: Vec<GlucosePoint> = best.into_values().collect();
    out.sort_by_key(|p| p.ts);
    out
}
