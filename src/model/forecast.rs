use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Horizon {
    Min5,
    Min30,
    Min60,
}

impl Horizon {
    pub fn minutes(&self) -> u32 {
        match self {
            Horizon::Min5 => 5,
            Horizon::Min30 => 30,
            Horizon::Min60 => 60,
        }
    }

    pub fn from_minutes(m: u32) -> Option<Self> {
        match m {
            5 => Some(Horizon::Min5),
            30 => Some(Horizon::Min30),
            60 => Some(Horizon::Min60),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub ts: i64,
    pub horizon_minutes: u32,
    pub value_mmol: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    pub model_version: String,
}

impl Forecast {
    pub const MIN_MMOL: f64 = 2.2;
    pub const MAX_MMOL: f64 = 22.0;

    pub fn is_valid(&self) -> bool {
        Horizon::from_minutes(self.horizon_minutes).is_some()
            && Self::MIN_MMOL <= self.ci_low
            && self.ci_low <= self.value_mmol
            && self.value_mmol <= self.ci_high
            && self.ci_high <= Self::MAX_MMOL
    }
}

/// Sort forecasts by ascending horizon (spec.md §5 ordering guarantee).
pub fn sort_by_horizon(forecasts: &mut [Forecast]) {
    forecasts.sort_by_key(|f| f.horizon_minutes);
}

/// If 5 and 60 are present but 30 is missing, synthesize it
/// (spec.md §4.6 augmentation).
pub fn ensure_horizon_30(forecasts: &mut Vec<Forecast>, ts: i64) {
    let has = |m: u32| forecasts.iter().any(|f| f.horizon_minutes == m);
    if has(30) || !has(5) || !has(60) {
        return;
    }
    let f5 = forecasts.iter().find(|f| f.horizon_minutes == 5).unwrap().clone();
    let f60 = forecasts.iter().find(|f| f.horizon_minutes == 60).unwrap().clone();
    let value = 0.55 * f5.value_mmol + 0.45 * f60.value_mmol;
    let value = value.clamp(Forecast::MIN_MMOL, Forecast::MAX_MMOL);
    forecasts.push(Forecast {
        ts,
        horizon_minutes: 30,
        value_mmol: value,
        ci_low: (value - 0.8).max(Forecast::MIN_MMOL),
        ci_high: (value + 0.8).min(Forecast::MAX_MMOL),
        model_version: "copilot-interpolated-30m-v1".to_string(),
    });
    sort_by_horizon(forecasts);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(h: u32, v: f64) -> Forecast {
        Forecast { ts: 0, horizon_minutes: h, value_mmol: v, ci_low: v - 0.5, ci_high: v + 0.5, model_version: "t".into() }
    }

    #[test]
    fn interpolates_missing_30() {
        let mut v = vec![f(5, 6.0), f(60, 8.0)];
        ensure_horizon_30(&mut v, 0);
        assert_eq!(v.len(), 3);
        let f30 = v.iter().find(|x| x.horizon_minutes == 30).unwrap();
        assert!((f30.value_mmol - (0.55 * 6.0 + 0.45 * 8.0)).abs() < 1e-9);
        assert_eq!(f30.model_version, "copilot-interpolated-30m-v1");
    }

    #[test]
    fn does_not_duplicate_when_present() {
        let mut v = vec![f(5, 6.0), f(30, 7.0), f(60, 8.0)];
        ensure_horizon_30(&mut v, 0);
        assert_eq!(v.len(), 3);
    }

    #[test]
    fn sorted_ascending() {
        let mut v = vec![f(60, 8.0), f(5, 6.0), f(30, 7.0)];
        sort_by_horizon(&mut v);
        assert_eq!(v.iter().map(|x| x.horizon_minutes).collect::<Vec<_>>(), vec![5, 30, 60]);
    }
}
