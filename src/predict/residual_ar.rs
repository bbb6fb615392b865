//! Residual AR(1) model over the Kalman residual rate-of-change (C5,
//! spec.md §4.4).

use std::collections::VecDeque;

const MAX_SAMPLES: usize = 24;
const TAU: f64 = 8.0;
const MIN_SAMPLES_FOR_FIT: usize = 8;
const FALLBACK_HALF_LIFE_MIN: f64 = 20.0;

#[derive(Debug, Clone, Default)]
pub struct ResidualArState {
    samples: VecDeque<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct Ar1Fit {
    pub mu: f64,
    pub phi: f64,
    pub sigma_e: f64,
}

impl ResidualArState {
    pub fn push(&mut self, residual_roc: f64) {
        if self.samples.len() >= MAX_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(residual_roc);
    }

    /// Weighted fit of `mu`, `phi`, `sigma_e`. `uam_active` clamps
    /// `mu` to `<= 0` (spec.md §4.4: meal-driven rises shouldn't be
    /// attributed to residual drift).
    pub fn fit(&self, uam_active: bool) -> Ar1Fit {
        let n = self.samples.len();
        if n < MIN_SAMPLES_FOR_FIT {
            let phi = (-std::f64::consts::LN_2 * 5.0 / FALLBACK_HALF_LIFE_MIN).exp();
            return Ar1Fit { mu: 0.0, phi, sigma_e: 0.10 };
        }

        let data: Vec<f64> = self.samples.iter().copied().collect();
        // weight[i] = exp(-(m-1-i)/tau), most recent sample heaviest.
        let weights: Vec<f64> = (0..n).map(|i| (-((n - 1 - i) as f64) / TAU).exp()).collect();

        let wsum: f64 = weights.iter().sum();
        let mu_raw = data.iter().zip(&weights).map(|(v, w)| v * w).sum::<f64>() / wsum;
        let mu = if uam_active { mu_raw.min(0.0) } else { mu_raw }.clamp(-0.30, 0.30);

        // Weighted AR(1) regression of data[i] on data[i-1] around mu.
        let mut num = 0.0;
        let mut den = 0.0;
        for i in 1..n {
            let w = weights[i];
            let prev = data[i - 1] - mu;
            let cur = data[i] - mu;
            num += w * prev * cur;
            den += w * prev * prev;
        }
        let phi = if den > 1e-9 { (num / den).clamp(0.0, 0.97) } else { 0.0 };

        let mut sse = 0.0;
        let mut wsum2 = 0.0;
        for i in 1..n {
            let w = weights[i];
            let pred = mu + phi * (data[i - 1] - mu);
            let err = data[i] - pred;
            sse += w * err * err;
            wsum2 += w;
        }
        let sigma_e = if wsum2 > 1e-9 { (sse / wsum2).sqrt() } else { 0.10 };
        let sigma_e = sigma_e.clamp(0.05, 0.60);

        Ar1Fit { mu, phi, sigma_e }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Ar1Fit {
    /// Forecast step `j` (1-indexed): `mu + phi^(j-1) * (residual0 - mu)`.
    pub fn forecast_step(&self, j: u32, residual0: f64) -> f64 {
        self.mu + self.phi.powi((j as i32) - 1) * (residual0 - self.mu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_used_with_few_samples() {
        let mut state = ResidualArState::default();
        state.push(0.1);
        state.push(0.05);
        let fit = state.fit(false);
        let expected_phi = (-std::f64::consts::LN_2 * 5.0 / 20.0).exp();
        assert!((fit.phi - expected_phi).abs() < 1e-9);
        assert_eq!(fit.mu, 0.0);
        assert_eq!(fit.sigma_e, 0.10);
    }

    #[test]
    fn mu_clamped_non_positive_when_uam_active() {
        let mut state = ResidualArState::default();
        for v in [0.2, 0.25, 0.22, 0.24, 0.21, 0.23, 0.26, 0.20, 0.22] {
            state.push(v);
        }
        let fit = state.fit(true);
        assert!(fit.mu <= 0.0);
    }

    #[test]
    fn phi_and_mu_are_bounded() {
        let mut state = ResidualArState::default();
        for i in 0..20 {
            state.push(0.05 * (i as f64 % 3.0 - 1.0));
        }
        let fit = state.fit(false);
        assert!((0.0..=0.97).contains(&fit.phi));
        assert!((-0.30..=0.30).contains(&fit.mu));
        assert!((0.05..=0.60).contains(&fit.sigma_e));
    }

    #[test]
    fn forecast_decays_toward_mu() {
        let mut state = ResidualArState::default();
        for _ in 0..10 {
            state.push(0.15);
        }
        let fit = state.fit(false);
        let step1 = fit.forecast_step(1, 0.30);
        let step12 = fit.forecast_step(12, 0.30);
        assert!((step12 - fit.mu).abs() <= (step1 - fit.mu).abs());
    }
}
