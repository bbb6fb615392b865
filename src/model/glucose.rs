use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlucoseQuality {
    Ok,
    Stale,
    SensorError,
}

impl GlucoseQuality {
    /// Priority used by the sanitizer's combined score (spec.md §4.1).
    pub fn priority(&self) -> u32 {
        match self {
            GlucoseQuality::Ok => 3,
            GlucoseQuality::Stale => 2,
            GlucoseQuality::SensorError => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlucosePoint {
    pub id: i64,
    pub ts: i64,
    pub value_mmol: f64,
    pub source: String,
    pub quality: GlucoseQuality,
}

impl GlucosePoint {
    pub const MIN_MMOL: f64 = 2.2;
    pub const MAX_MMOL: f64 = 22.0;

    pub fn new(id: i64, ts: i64, value_mmol: f64, source: impl Into<String>, quality: GlucoseQuality) -> Self {
        Self { id, ts, value_mmol, source: source.into(), quality }
    }

    pub fn is_in_range(&self) -> bool {
        (Self::MIN_MMOL..=Self::MAX_MMOL).contains(&self.value_mmol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_priority_ordering() {
        assert!(GlucoseQuality::Ok.priority() > GlucoseQuality::Stale.priority());
        assert!(GlucoseQuality::Stale.priority() > GlucoseQuality::SensorError.priority());
    }
}
