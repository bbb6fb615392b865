use super::DEFAULT_TIMEOUT;
use crate::model::{Forecast, GlucosePoint, TherapyEvent};
use anyhow::{Context, Result};
use serde::Serialize;

pub struct CloudClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct IngestPayload<'a> {
    glucose: &'a [GlucosePoint],
    therapy: &'a [TherapyEvent],
}

impl CloudClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { http: super::build_http_client(DEFAULT_TIMEOUT), base_url: base_url.into() }
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.is_empty()
    }

    /// Incremental push of newly-ingested rows (spec.md §4.8 step 4).
    pub async fn push_ingested(&self, glucose: &[GlucosePoint], therapy: &[TherapyEvent]) -> Result<()> {
        if !self.is_configured() {
            return Ok(());
        }
        let url = format!("{}/ingest", self.base_url.trim_end_matches('/'));
        let payload = IngestPayload { glucose, therapy };
        let resp = self.http.post(&url).json(&payload).send().await.context("pushing cloud ingest")?;
        if !resp.status().is_success() {
            anyhow::bail!("cloud ingest returned {}", resp.status());
        }
        Ok(())
    }

    /// Baseline forecast import from the cloud model, merged
    /// per-horizon over the local prediction (spec.md §4.8 step 11:
    /// "cloud overrides per-horizon").
    pub async fn fetch_baseline_forecasts(&self, now_ts: i64) -> Result<Vec<Forecast>> {
        if !self.is_configured() {
            return Ok(Vec::new());
        }
        let url = format!("{}/forecast?ts={now_ts}", self.base_url.trim_end_matches('/'));
        let forecasts: Vec<Forecast> = self.http.get(&url).send().await.context("fetching cloud forecast")?.json().await.context("parsing cloud forecast")?;
        Ok(forecasts)
    }
}

/// Merge `cloud` forecasts over `local`, overriding per horizon
/// (spec.md §4.8 step 11).
pub fn merge_forecasts(local: Vec<Forecast>, cloud: Vec<Forecast>) -> Vec<Forecast> {
    let mut merged = local;
    for cloud_forecast in cloud {
        if let Some(slot) = merged.iter_mut().find(|f| f.horizon_minutes == cloud_forecast.horizon_minutes) {
            *slot = cloud_forecast;
        } else {
            merged.push(cloud_forecast);
        }
    }
    crate::model::sort_by_horizon(&mut merged);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(h: u32, v: f64) -> Forecast {
        Forecast { ts: 0, horizon_minutes: h, value_mmol: v, ci_low: v - 0.5, ci_high: v + 0.5, model_version: "t".into() }
    }

    #[test]
    fn cloud_forecast_overrides_matching_horizon() {
        let local = vec![f(5, 6.0), f(30, 7.0), f(60, 8.0)];
        let cloud = vec![f(30, 9.0)];
        let merged = merge_forecasts(local, cloud);
        let f30 = merged.iter().find(|f| f.horizon_minutes == 30).unwrap();
        assert_eq!(f30.value_mmol, 9.0);
    }

    #[test]
    fn unconfigured_client_short_circuits_as_empty() {
        let client = CloudClient::new("");
        assert!(!client.is_configured());
    }
}
