use crate::model::therapy::validate_therapy_event;
use crate::model::TherapyEvent;
use std::collections::HashMap;

/// Sanitize therapy events: drop local-echo duplicates of mutable
/// types, drop payloads failing invariant validation, dedupe by id
/// (last write wins by ts), and sort ascending.
pub fn sanitize_therapy(events: Vec<TherapyEvent>) -> Vec<TherapyEvent> {
    let mut by_id: HashMap<String, TherapyEvent> = HashMap::new();
    for e in events {
        if e.is_local_echo() {
            continue;
        }
        if !validate_therapy_event(&e) {
            continue;
        }
        match by_id.get(&e.id) {
            Some(existing) if existing.ts >= e.ts => {}
            _ => {
                by_id.insert(e.id.clone(), e);
            }
        }
    }
    let mut out: Vec<TherapyEvent> = by_id.into_values().collect();
    out.sort_by_key(|e| e.ts);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TherapyKind;

    #[test]
    fn drops_local_echo() {
        let events = vec![
            TherapyEvent::new("nightscout-1", 0, TherapyKind::Carbs { grams: 30.0, food: None, carb_type: None }),
            TherapyEvent::new(
                "br-aaps_broadcast-1",
                1,
                TherapyKind::Carbs { grams: 30.0, food: None, carb_type: None },
            ),
        ];
        let out = sanitize_therapy(events);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "nightscout-1");
    }

    #[test]
    fn drops_invalid_payload() {
        let events = vec![TherapyEvent::new("1", 0, TherapyKind::CorrectionBolus { units: 100.0 })];
        assert!(sanitize_therapy(events).is_empty());
    }

    #[test]
    fn sorted_ascending_by_ts() {
        let events = vec![
            TherapyEvent::new("a", 200, TherapyKind::Bolus { units: 1.0 }),
            TherapyEvent::new("b", 100, TherapyKind::Bolus { units: 1.0 }),
        ];
        let out = sanitize_therapy(events);
        assert_eq!(out.iter().map(|e| e.ts).collect::<Vec<_>>(), vec![100, 200]);
    }
}
