use super::PkCurve;
use crate::model::{GlucosePoint, TherapyEvent, TherapyKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CarbAbsorptionType {
    Fast,
    Medium,
    ProteinSlow,
}

impl CarbAbsorptionType {
    pub fn curve(&self) -> PkCurve {
        let anchors = match self {
            CarbAbsorptionType::Fast => vec![(0.0, 0.0), (15.0, 0.35), (45.0, 0.80), (90.0, 1.0)],
            CarbAbsorptionType::Medium => vec![(0.0, 0.0), (30.0, 0.25), (90.0, 0.70), (180.0, 1.0)],
            CarbAbsorptionType::ProteinSlow => vec![(0.0, 0.0), (60.0, 0.15), (150.0, 0.55), (300.0, 1.0)],
        };
        PkCurve::new(anchors)
    }
}

/// A small, non-exhaustive seed catalog mapping food text to an
/// absorption bucket. Extend with `with_entries` for a fuller list;
/// the original ~250-entry catalog is out of scope for this port.
pub struct CarbCatalog {
    entries: Vec<(&'static str, CarbAbsorptionType)>,
}

impl CarbCatalog {
    pub fn seed() -> Self {
        use CarbAbsorptionType::*;
        Self {
            entries: vec![
                ("glucose tablet", Fast),
                ("juice", Fast),
                ("honey", Fast),
                ("banana", Fast),
                ("white bread", Fast),
                ("soda", Fast),
                ("candy", Fast),
                ("pasta", Medium),
                ("rice", Medium),
                ("potato", Medium),
                ("bread", Medium),
                ("cereal", Medium),
                ("pizza", Medium),
                ("chicken breast", ProteinSlow),
                ("steak", ProteinSlow),
                ("cheese", ProteinSlow),
                ("nuts", ProteinSlow),
                ("eggs", ProteinSlow),
                ("fatty meal", ProteinSlow),
            ],
        }
    }

    pub fn with_entries(mut self, entries: Vec<(&'static str, CarbAbsorptionType)>) -> Self {
        self.entries.extend(entries);
        self
    }

    pub fn lookup(&self, text: &str) -> Option<CarbAbsorptionType> {
        let lower = text.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(needle, _)| lower.contains(needle))
            .map(|(_, t)| *t)
    }
}

impl Default for CarbCatalog {
    fn default() -> Self {
        Self::seed()
    }
}

/// Post-event glucose rise pattern, computed over the 3h following a
/// carb event (spec.md §4.2 step c). `rise_at` gives the mmol/L rise
/// from baseline at minute `m`; `peak_delta_5` is the largest 5-minute
/// delta observed.
struct RisePattern {
    rise15: f64,
    rise30: f64,
    rise60: f64,
    rise120: f64,
    peak_delta5: f64,
}

fn rise_pattern(baseline: f64, following: &[GlucosePoint], event_ts: i64) -> RisePattern {
    let at = |minutes: i64| -> f64 {
        following
            .iter()
            .filter(|p| p.ts >= event_ts)
            .min_by_key(|p| ((p.ts - event_ts) - minutes * 60_000).abs())
            .map(|p| p.value_mmol - baseline)
            .unwrap_or(0.0)
    };
    let mut peak_delta5 = 0.0;
    let mut sorted: Vec<&GlucosePoint> = following.iter().filter(|p| p.ts >= event_ts).collect();
    sorted.sort_by_key(|p| p.ts);
    for w in sorted.windows(2) {
        let d = w[1].value_mmol - w[0].value_mmol;
        if d > peak_delta5 {
            peak_delta5 = d;
        }
    }
    RisePattern { rise15: at(15), rise30: at(30), rise60: at(60), rise120: at(120), peak_delta5 }
}

/// Classify a carb event by (a) explicit payload hint, (b) catalog
/// text match, (c) post-event rise pattern, (d) default MEDIUM
/// (spec.md §4.2).
pub fn classify_carb_event(
    event: &TherapyEvent,
    catalog: &CarbCatalog,
    baseline_glucose: f64,
    following_glucose: &[GlucosePoint],
) -> CarbAbsorptionType {
    if let TherapyKind::Carbs { carb_type, food, .. } = &event.kind {
        if let Some(ct) = carb_type {
            match ct.to_ascii_uppercase().as_str() {
                "FAST" => return CarbAbsorptionType::Fast,
                "MEDIUM" => return CarbAbsorptionType::Medium,
                "PROTEIN_SLOW" | "SLOW" => return CarbAbsorptionType::ProteinSlow,
                _ => {}
            }
        }
        if let Some(text) = food {
            if let Some(t) = catalog.lookup(text) {
                return t;
            }
        }
    }

    let rise = rise_pattern(baseline_glucose, following_glucose, event.ts);
    if rise.rise15 >= 0.70 || rise.peak_delta5 >= 0.30 {
        CarbAbsorptionType::Fast
    } else if rise.rise60 >= 1.0 && rise.rise30 >= 0.45 {
        CarbAbsorptionType::Medium
    } else if rise.rise120 >= 0.70 && rise.rise30 < 0.35 {
        CarbAbsorptionType::ProteinSlow
    } else {
        CarbAbsorptionType::Medium
    }
}
