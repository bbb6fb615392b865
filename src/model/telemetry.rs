use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TelemetryQuality {
    Ok,
    OutOfRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub id: i64,
    pub ts: i64,
    pub source: String,
    pub key: String,
    pub value_double: Option<f64>,
    pub value_text: Option<String>,
    pub unit: Option<String>,
    pub quality: TelemetryQuality,
}

impl TelemetrySample {
    pub fn numeric(id: i64, ts: i64, source: impl Into<String>, key: impl Into<String>, value: f64) -> Self {
        Self {
            id,
            ts,
            source: source.into(),
            key: key.into(),
            value_double: Some(value),
            value_text: None,
            unit: None,
            quality: TelemetryQuality::Ok,
        }
    }
}
