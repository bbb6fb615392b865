use super::pattern::{DayType, TimeSlot};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileEstimate {
    /// Insulin sensitivity factor, mmol/L per U.
    pub isf: f64,
    /// Carb ratio, grams per U.
    pub cr: f64,
    pub sample_count: u32,
    pub confidence: f64,
    pub lookback_days: u32,
}

impl ProfileEstimate {
    pub fn clamp_confidence(raw: f64) -> f64 {
        raw.clamp(0.2, 0.99)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSegmentEstimate {
    pub day_type: DayType,
    pub time_slot: TimeSlot,
    pub estimate: ProfileEstimate,
}
