use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Typed therapy event payloads (design note: "Source dynamic map
/// payloads become explicit typed payload structs ... plus a small
/// key-value side-channel for raw persistence").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TherapyKind {
    Bolus { units: f64 },
    CorrectionBolus { units: f64 },
    MealBolus { grams: f64, units: f64 },
    Carbs { grams: f64, food: Option<String>, carb_type: Option<String> },
    TempTarget { target_low_mmol: f64, target_high_mmol: f64, duration_min: u32 },
    SensorState { blocked: bool },
    Other { event_type: String },
}

impl TherapyKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            TherapyKind::Bolus { .. } => "bolus",
            TherapyKind::CorrectionBolus { .. } => "correction_bolus",
            TherapyKind::MealBolus { .. } => "meal_bolus",
            TherapyKind::Carbs { .. } => "carbs",
            TherapyKind::TempTarget { .. } => "temp_target",
            TherapyKind::SensorState { .. } => "sensor_state",
            TherapyKind::Other { .. } => "other",
        }
    }

    /// Mutable types that are subject to the local-echo dedup rule in
    /// spec.md §4.1.
    pub fn is_mutable_type(&self) -> bool {
        matches!(
            self,
            TherapyKind::CorrectionBolus { .. }
                | TherapyKind::MealBolus { .. }
                | TherapyKind::Carbs { .. }
                | TherapyKind::TempTarget { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TherapyEvent {
    pub id: String,
    pub ts: i64,
    pub kind: TherapyKind,
    /// Raw key-value side channel for fields with no typed home yet.
    pub raw: HashMap<String, String>,
}

impl TherapyEvent {
    pub fn new(id: impl Into<String>, ts: i64, kind: TherapyKind) -> Self {
        Self { id: id.into(), ts, kind, raw: HashMap::new() }
    }

    pub fn carbs_grams(&self) -> Option<f64> {
        match &self.kind {
            TherapyKind::Carbs { grams, .. } => Some(*grams),
            TherapyKind::MealBolus { grams, .. } => Some(*grams),
            _ => None,
        }
    }

    pub fn insulin_units(&self) -> Option<f64> {
        match &self.kind {
            TherapyKind::Bolus { units } => Some(*units),
            TherapyKind::CorrectionBolus { units } => Some(*units),
            TherapyKind::MealBolus { units, .. } => Some(*units),
            _ => None,
        }
    }

    /// True for events whose id indicates a local broadcast echo of a
    /// mutable type originating from AAPS/local broadcast (spec.md
    /// §4.1 local-echo dedup rule).
    pub fn is_local_echo(&self) -> bool {
        self.kind.is_mutable_type()
            && (self.id.starts_with("br-aaps_broadcast-") || self.id.starts_with("br-local_broadcast-"))
    }
}

/// Validation per spec.md §3 invariants. Returns `false` when the
/// event's payload is out of the documented plausible range.
pub fn validate_therapy_event(event: &TherapyEvent) -> bool {
    match &event.kind {
        TherapyKind::CorrectionBolus { units } => (0.05..=15.0).contains(units),
        TherapyKind::MealBolus { grams, units } => {
            (1.0..=300.0).contains(grams)
                && (0.05..=25.0).contains(units)
                && *units > 0.0
                && (1.5..=80.0).contains(&(grams / units))
        }
        TherapyKind::Carbs { grams, .. } => (1.0..=300.0).contains(grams),
        TherapyKind::TempTarget { duration_min, .. } => (5..=720).contains(duration_min),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correction_bolus_range_validated() {
        let ok = TherapyEvent::new("1", 0, TherapyKind::CorrectionBolus { units: 2.5 });
        assert!(validate_therapy_event(&ok));
        let bad = TherapyEvent::new("2", 0, TherapyKind::CorrectionBolus { units: 20.0 });
        assert!(!validate_therapy_event(&bad));
    }

    #[test]
    fn meal_bolus_ratio_validated() {
        let ok = TherapyEvent::new("1", 0, TherapyKind::MealBolus { grams: 60.0, units: 6.0 });
        assert!(validate_therapy_event(&ok));
        let bad_ratio = TherapyEvent::new("2", 0, TherapyKind::MealBolus { grams: 300.0, units: 1.0 });
        assert!(!validate_therapy_event(&bad_ratio));
    }

    #[test]
    fn local_echo_detection() {
        let e = TherapyEvent::new(
            "br-aaps_broadcast-123",
            0,
            TherapyKind::Carbs { grams: 30.0, food: None, carb_type: None },
        );
        assert!(e.is_local_echo());
        let not_echo = TherapyEvent::new(
            "nightscout-1",
            0,
            TherapyKind::Carbs { grams: 30.0, food: None, carb_type: None },
        );
        assert!(!not_echo.is_local_echo());
    }
}
