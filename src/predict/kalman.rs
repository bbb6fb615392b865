//! Adaptive-R two-state Kalman filter over the glucose stream (C4,
//! spec.md §4.3).

use nalgebra::{Matrix2, Vector2};

const SIGMA_Z2_DEFAULT: f64 = 0.18 * 0.18;
const SIGMA_Z2_MIN: f64 = 0.08;
const SIGMA_Z2_MAX: f64 = 0.60;
const NIS_EWMA_ALPHA: f64 = 0.2;
const NIS_GROW_THRESHOLD: f64 = 4.0;
const NIS_SHRINK_THRESHOLD: f64 = 0.6;
const WARMUP_UPDATES: u32 = 3;

#[derive(Debug, Clone)]
pub struct KalmanState {
    /// (glucose mmol/L, velocity mmol/min)
    x: Vector2<f64>,
    p: Matrix2<f64>,
    r: f64,
    nis_ewma: f64,
    pub updates_count: u32,
}

impl Default for KalmanState {
    fn default() -> Self {
        Self {
            x: Vector2::new(0.0, 0.0),
            p: Matrix2::identity() * 1.0,
            r: SIGMA_Z2_DEFAULT,
            nis_ewma: 1.0,
            updates_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KalmanOutput {
    pub glucose_mmol: f64,
    pub roc_per5: f64,
    pub sigma_g: f64,
    pub warmed_up: bool,
}

impl KalmanState {
    /// Apply one measurement update at lag `dt_min` since the last
    /// update. `sigma_a` is the acceleration-noise stddev driving
    /// process-noise scaling; `vol_norm` in `[0,1]` is normalized
    /// recent volatility.
    pub fn update(&mut self, measurement_mmol: f64, dt_min: f64, sigma_a: f64, vol_norm: f64) -> KalmanOutput {
        if dt_min <= 0.0 {
            // Ignore non-advancing or out-of-order samples.
            return self.output();
        }
        if dt_min > 20.0 {
            // Too large a gap to trust the model prediction; reset to
            // the raw measurement.
            self.x = Vector2::new(measurement_mmol, 0.0);
            self.p = Matrix2::identity() * 1.0;
            self.updates_count += 1;
            return self.output();
        }

        let dt = dt_min;
        let f = Matrix2::new(1.0, dt, 0.0, 1.0);
        let vol_norm = vol_norm.clamp(0.0, 1.0);
        let sigma_a_eff = sigma_a * (1.0 + vol_norm);
        let q00 = dt.powi(4) / 4.0 * sigma_a_eff.powi(2);
        let q01 = dt.powi(3) / 2.0 * sigma_a_eff.powi(2);
        let q11 = dt.powi(2) * sigma_a_eff.powi(2);
        let q = Matrix2::new(q00, q01, q01, q11);

        let x_pred = f * self.x;
        let p_pred = f * self.p * f.transpose() + q;

        let h = Vector2::new(1.0, 0.0);
        let s = (h.transpose() * p_pred * h)[(0, 0)] + self.r;
        let innovation_raw = measurement_mmol - x_pred[0];
        let clip = 3.0 * s.sqrt();
        let innovation = innovation_raw.clamp(-clip, clip);

        let k = p_pred * h / s;
        let x_new = x_pred + k * innovation;
        let ident = Matrix2::identity();
        let p_new = (ident - k * h.transpose()) * p_pred;

        let nis = if s > 1e-9 { innovation_raw * innovation_raw / s } else { 0.0 };
        self.nis_ewma = NIS_EWMA_ALPHA * nis + (1.0 - NIS_EWMA_ALPHA) * self.nis_ewma;
        if self.nis_ewma > NIS_GROW_THRESHOLD {
            self.r = (self.r * 1.1).min(SIGMA_Z2_MAX);
        } else if self.nis_ewma < NIS_SHRINK_THRESHOLD {
            self.r = (self.r * 0.95).max(SIGMA_Z2_MIN);
        }

        self.x = x_new;
        self.p = p_new;
        self.updates_count += 1;
        self.output()
    }

    fn output(&self) -> KalmanOutput {
        let roc = (self.x[1] * 5.0).clamp(-1.2, 1.2);
        let sigma_g = self.p[(0, 0)].max(0.0).sqrt();
        KalmanOutput {
            glucose_mmol: self.x[0],
            roc_per5: roc,
            sigma_g,
            warmed_up: self.updates_count >= WARMUP_UPDATES,
        }
    }

    pub fn glucose_mmol(&self) -> f64 {
        self.x[0]
    }
}
