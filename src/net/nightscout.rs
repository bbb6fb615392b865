use super::DEFAULT_TIMEOUT;
use crate::model::{GlucosePoint, GlucoseQuality, TherapyEvent, TherapyKind};
use crate::time::normalize_ts;
use crate::units::mgdl_to_mmol;
use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct SgvEntry {
    date: i64,
    sgv: f64,
    #[serde(default)]
    device: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TreatmentDoc {
    #[serde(rename = "_id")]
    id: Option<String>,
    created_at: String,
    #[serde(rename = "eventType")]
    event_type: String,
    duration: Option<f64>,
    #[serde(rename = "targetTop")]
    target_top: Option<f64>,
    #[serde(rename = "targetBottom")]
    target_bottom: Option<f64>,
    carbs: Option<f64>,
    insulin: Option<f64>,
}

pub struct NightscoutClient {
    http: reqwest::Client,
    base_url: String,
}

impl NightscoutClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { http: super::build_http_client(DEFAULT_TIMEOUT), base_url: base_url.into() }
    }

    /// Fetch SGV entries since `since_ts` (epoch ms), mapped to
    /// `GlucosePoint`s. Source is always `"nightscout"`.
    pub async fn fetch_entries(&self, since_ts: i64, now_ts: i64) -> Result<Vec<GlucosePoint>> {
        if self.base_url.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/api/v1/entries/sgv.json?count=300", self.base_url.trim_end_matches('/'));
        let entries: Vec<SgvEntry> = self.http.get(&url).send().await.context("nightscout entries request")?.json().await.context("parsing nightscout entries")?;
        Ok(entries
            .into_iter()
            .filter_map(|e| {
                let ts = normalize_ts(e.date, now_ts);
                if ts < since_ts {
                    return None;
                }
                Some(GlucosePoint::new(ts, ts, mgdl_to_mmol(e.sgv), "nightscout", GlucoseQuality::Ok))
            })
            .collect())
    }

    pub async fn fetch_treatments(&self, since_ts: i64, now_ts: i64) -> Result<Vec<TherapyEvent>> {
        if self.base_url.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/api/v1/treatments.json?count=200", self.base_url.trim_end_matches('/'));
        let docs: Vec<TreatmentDoc> = self.http.get(&url).send().await.context("nightscout treatments request")?.json().await.context("parsing nightscout treatments")?;
        Ok(docs
            .into_iter()
            .filter_map(|doc| parse_treatment(doc, now_ts))
            .filter(|e| e.ts >= since_ts)
            .collect())
    }

    /// POST a treatment document (spec.md §6 outbound payload shape).
    pub async fn post_treatment(&self, payload: &serde_json::Value) -> Result<()> {
        if self.base_url.is_empty() {
            anyhow::bail!("missing_config:nightscout_url");
        }
        let url = format!("{}/api/v1/treatments", self.base_url.trim_end_matches('/'));
        let resp = self.http.post(&url).json(payload).send().await.context("posting nightscout treatment")?;
        if !resp.status().is_success() {
            anyhow::bail!("nightscout returned {}", resp.status());
        }
        Ok(())
    }
}

fn parse_treatment(doc: TreatmentDoc, now_ts: i64) -> Option<TherapyEvent> {
    let raw_ms = chrono::DateTime::parse_from_rfc3339(&doc.created_at).ok()?.timestamp_millis();
    let ts = normalize_ts(raw_ms, now_ts);
    let event_type_lower = doc.event_type.to_ascii_lowercase();
    let id = doc.id.clone().unwrap_or_else(|| format!("ns-{ts}"));

    let kind = if event_type_lower.contains("temp") && event_type_lower.contains("target") {
        TherapyKind::TempTarget {
            target_low_mmol: doc.target_bottom.map(mgdl_to_mmol).unwrap_or(0.0),
            target_high_mmol: doc.target_top.map(mgdl_to_mmol).unwrap_or(0.0),
            duration_min: doc.duration.unwrap_or(0.0) as u32,
        }
    } else if event_type_lower.contains("correction") {
        TherapyKind::CorrectionBolus { units: doc.insulin.unwrap_or(0.0) }
    } else if event_type_lower.contains("meal") && doc.carbs.is_some() {
        TherapyKind::MealBolus { grams: doc.carbs.unwrap_or(0.0), units: doc.insulin.unwrap_or(0.0) }
    } else if doc.carbs.is_some() {
        TherapyKind::Carbs { grams: doc.carbs.unwrap_or(0.0), food: None, carb_type: None }
    } else if doc.insulin.is_some() {
        TherapyKind::Bolus { units: doc.insulin.unwrap_or(0.0) }
    } else if event_type_lower.contains("sensor") {
        TherapyKind::SensorState { blocked: event_type_lower.contains("block") }
    } else {
        TherapyKind::Other { event_type: doc.event_type.clone() }
    };

    Some(TherapyEvent::new(id, ts, kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_base_url_short_circuits() {
        let client = NightscoutClient::new("");
        assert!(client.base_url.is_empty());
    }

    #[test]
    fn parses_correction_bolus_treatment() {
        let doc = TreatmentDoc {
            id: Some("t1".to_string()),
            created_at: "2024-01-01T00:00:00Z".to_string(),
            event_type: "Correction Bolus".to_string(),
            duration: None,
            target_top: None,
            target_bottom: None,
            carbs: None,
            insulin: Some(2.5),
        };
        let now = chrono::DateTime::parse_from_rfc3339("2024-01-01T00:05:00Z").unwrap().timestamp_millis();
        let event = parse_treatment(doc, now).unwrap();
        assert_eq!(event.kind, TherapyKind::CorrectionBolus { units: 2.5 });
    }

    #[test]
    fn parses_temp_target_treatment() {
        let doc = TreatmentDoc {
            id: None,
            created_at: "2024-01-01T00:00:00Z".to_string(),
            event_type: "Temporary Target".to_string(),
            duration: Some(30.0),
            target_top: Some(140.0),
            target_bottom: Some(130.0),
            carbs: None,
            insulin: None,
        };
        let now = chrono::DateTime::parse_from_rfc3339("2024-01-01T00:05:00Z").unwrap().timestamp_millis();
        let event = parse_treatment(doc, now).unwrap();
        match event.kind {
            TherapyKind::TempTarget { duration_min, .. } => assert_eq!(duration_min, 30),
            _ => panic!("expected temp target"),
        }
    }
}
