use super::PkCurve;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InsulinProfileId {
    Novorapid,
    Humalog,
    Apidra,
    Fiasp,
    Lyumjev,
}

impl InsulinProfileId {
    /// Unknown profile ids fall back to NOVORAPID (spec.md §4.2).
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "HUMALOG" => InsulinProfileId::Humalog,
            "APIDRA" => InsulinProfileId::Apidra,
            "FIASP" => InsulinProfileId::Fiasp,
            "LYUMJEV" => InsulinProfileId::Lyumjev,
            _ => InsulinProfileId::Novorapid,
        }
    }
}

pub struct InsulinProfile {
    pub id: InsulinProfileId,
    curve: PkCurve,
}

impl InsulinProfile {
    pub fn for_id(id: InsulinProfileId) -> Self {
        let anchors = match id {
            // Standard rapid-acting: gentle early action, peak ~75min, tail to 5h.
            InsulinProfileId::Novorapid => {
                vec![(0.0, 0.0), (30.0, 0.15), (75.0, 0.55), (150.0, 0.85), (300.0, 1.0)]
            }
            InsulinProfileId::Humalog => {
                vec![(0.0, 0.0), (30.0, 0.16), (70.0, 0.57), (150.0, 0.86), (300.0, 1.0)]
            }
            InsulinProfileId::Apidra => {
                vec![(0.0, 0.0), (25.0, 0.17), (65.0, 0.58), (140.0, 0.87), (280.0, 1.0)]
            }
            // Ultra-rapid: faster onset and earlier tail-off.
            InsulinProfileId::Fiasp => {
                vec![(0.0, 0.0), (15.0, 0.18), (55.0, 0.60), (120.0, 0.90), (240.0, 1.0)]
            }
            InsulinProfileId::Lyumjev => {
                vec![(0.0, 0.0), (12.0, 0.20), (50.0, 0.62), (110.0, 0.91), (220.0, 1.0)]
            }
        };
        Self { id, curve: PkCurve::new(anchors) }
    }

    pub fn cumulative(&self, minute: f64) -> f64 {
        self.curve.cumulative(minute)
    }
}
