//! Prediction engine (C4–C7, spec.md §4.3–§4.6).
//!
//! Two implementations share the `PredictionEngine` contract; engine
//! state (Kalman filter, AR(1) history, UAM buckets) is owned by the
//! coordinator and threaded through explicitly rather than living as
//! global mutable state (design note, spec.md §9).

pub mod enhanced_v3;
pub mod kalman;
pub mod legacy_v2;
pub mod residual_ar;
pub mod uam;

use crate::model::{Forecast, GlucosePoint, TherapyEvent};
use crate::pk::InsulinProfileId;
use kalman::KalmanState;
use residual_ar::ResidualArState;
use uam::UamState;

#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub kalman: KalmanState,
    pub ar: ResidualArState,
    pub uam: UamState,
}

#[derive(Debug, Clone)]
pub struct PredictionContext {
    pub now_ts: i64,
    pub isf: f64,
    pub cr: f64,
    pub insulin_profile: InsulinProfileId,
}

impl Default for PredictionContext {
    fn default() -> Self {
        Self { now_ts: 0, isf: 2.3, cr: 10.0, insulin_profile: InsulinProfileId::Novorapid }
    }
}

impl PredictionContext {
    pub fn csf(&self) -> f64 {
        self.isf / self.cr
    }
}

pub trait PredictionEngine {
    fn model_version(&self) -> &'static str;

    fn predict(
        &self,
        state: &mut EngineState,
        glucose: &[GlucosePoint],
        therapy: &[TherapyEvent],
        ctx: &PredictionContext,
    ) -> Vec<Forecast>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_engine_state_is_cold() {
        let state = EngineState::default();
        assert_eq!(state.kalman.updates_count, 0);
        assert!(state.ar.is_empty());
    }
}
