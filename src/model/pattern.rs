use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DayType {
    Weekday,
    Weekend,
}

impl DayType {
    pub fn from_weekday(weekday: chrono::Weekday) -> Self {
        use chrono::Weekday::*;
        match weekday {
            Sat | Sun => DayType::Weekend,
            _ => DayType::Weekday,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeSlot {
    Night,
    Morning,
    Afternoon,
    Evening,
}

impl TimeSlot {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            0..=5 => TimeSlot::Night,
            6..=11 => TimeSlot::Morning,
            12..=17 => TimeSlot::Afternoon,
            _ => TimeSlot::Evening,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternWindow {
    pub day_type: DayType,
    pub hour: u32,
    pub sample_count: u32,
    pub active_days: u32,
    pub low_rate: f64,
    pub high_rate: f64,
    pub recommended_target_mmol: f64,
    pub is_risk_window: bool,
}

impl PatternWindow {
    pub const MIN_TARGET: f64 = 4.4;
    pub const MAX_TARGET: f64 = 8.0;
}
