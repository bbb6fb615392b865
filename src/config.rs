//! Settings snapshot (spec.md §4.12, `SPEC_FULL.md` [AMBIENT]).
//!
//! Read once per cycle from the environment (`.env` via `dotenv`, with
//! typed fallbacks) and passed by value through the pipeline — later
//! mutation of the environment does not affect an in-flight cycle
//! (spec.md §5 "Shared state").

use crate::pk::InsulinProfileId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalenessProfile {
    Strict,
    Medium,
    Aggressive,
}

impl StalenessProfile {
    fn from_env(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "STRICT" => StalenessProfile::Strict,
            "AGGRESSIVE" => StalenessProfile::Aggressive,
            _ => StalenessProfile::Medium,
        }
    }

    /// Minutes, per spec.md §4.8 "Effective limits".
    pub fn stale_max_minutes(&self) -> i64 {
        match self {
            StalenessProfile::Strict => 10,
            StalenessProfile::Medium => 15,
            StalenessProfile::Aggressive => 20,
        }
    }

    pub fn max_actions_6h(&self) -> u32 {
        match self {
            StalenessProfile::Strict => 3,
            StalenessProfile::Medium => 4,
            StalenessProfile::Aggressive => 6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub kill_switch: bool,
    pub base_target_mmol: f64,
    pub insulin_profile: InsulinProfileId,
    pub isf: f64,
    pub cr: f64,
    pub lookback_days: u32,
    pub staleness_profile: StalenessProfile,
    pub global_stale_max_minutes: i64,
    pub adaptive_stale_max_minutes: i64,
    pub global_max_actions_6h: u32,
    pub adaptive_max_actions_6h: u32,
    pub retarget_minutes: u32,
    pub nightscout_url: String,
    pub cloud_url: String,
    pub fallback_enabled: bool,
    pub keepalive_prefix: String,
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).ok().map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes")).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Settings {
    /// Load from `.env` (if present) plus process environment, with
    /// documented fallbacks for every field.
    pub fn load() -> Self {
        let _ = dotenv::dotenv();
        let staleness_profile = StalenessProfile::from_env(&env_string("COPILOT_STALENESS_PROFILE", "MEDIUM"));
        Self {
            kill_switch: env_bool("COPILOT_KILL_SWITCH", false),
            base_target_mmol: env_f64("COPILOT_BASE_TARGET_MMOL", 5.5),
            insulin_profile: InsulinProfileId::from_name(&env_string("COPILOT_INSULIN_PROFILE", "NOVORAPID")),
            isf: env_f64("COPILOT_ISF", 2.3),
            cr: env_f64("COPILOT_CR", 10.0),
            lookback_days: crate::analyze::clamp_lookback_days(env_u32("COPILOT_LOOKBACK_DAYS", 90)),
            staleness_profile,
            global_stale_max_minutes: env_i64("COPILOT_GLOBAL_STALE_MAX_MIN", 20),
            adaptive_stale_max_minutes: env_i64("COPILOT_ADAPTIVE_STALE_MAX_MIN", 20),
            global_max_actions_6h: env_u32("COPILOT_GLOBAL_MAX_ACTIONS_6H", 6),
            adaptive_max_actions_6h: env_u32("COPILOT_ADAPTIVE_MAX_ACTIONS_6H", 6),
            retarget_minutes: env_u32("COPILOT_RETARGET_MINUTES", 15).clamp(5, 30),
            nightscout_url: env_string("COPILOT_NIGHTSCOUT_URL", ""),
            cloud_url: env_string("COPILOT_CLOUD_URL", ""),
            fallback_enabled: env_bool("COPILOT_FALLBACK_ENABLED", true),
            keepalive_prefix: env_string("COPILOT_KEEPALIVE_PREFIX", "keepalive:"),
        }
    }

    /// `staleMax = min(global, adaptiveLimit, profileLimit)` (spec.md
    /// §4.8 "Effective limits").
    pub fn effective_stale_max_minutes(&self) -> i64 {
        self.global_stale_max_minutes.min(self.adaptive_stale_max_minutes).min(self.staleness_profile.stale_max_minutes())
    }

    pub fn effective_max_actions_6h(&self) -> u32 {
        self.global_max_actions_6h.min(self.adaptive_max_actions_6h).min(self.staleness_profile.max_actions_6h())
    }

    /// `effectiveBaseTarget = cob>=20g ? 4.2 : configuredBase` clamped
    /// `[4, 10]` (spec.md §4.8 step 10).
    pub fn effective_base_target(&self, cob_grams: f64) -> f64 {
        let target = if cob_grams >= 20.0 { 4.2 } else { self.base_target_mmol };
        target.clamp(4.0, 10.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_limits_take_the_minimum() {
        let settings = Settings {
            kill_switch: false,
            base_target_mmol: 5.5,
            insulin_profile: InsulinProfileId::Novorapid,
            isf: 2.3,
            cr: 10.0,
            lookback_days: 90,
            staleness_profile: StalenessProfile::Strict,
            global_stale_max_minutes: 100,
            adaptive_stale_max_minutes: 12,
            global_max_actions_6h: 10,
            adaptive_max_actions_6h: 2,
            retarget_minutes: 15,
            nightscout_url: String::new(),
            cloud_url: String::new(),
            fallback_enabled: true,
            keepalive_prefix: "keepalive:".to_string(),
        };
        assert_eq!(settings.effective_stale_max_minutes(), 10);
        assert_eq!(settings.effective_max_actions_6h(), 2);
    }

    #[test]
    fn cob_forces_base_target_to_4_2() {
        let mut settings = Settings::load();
        settings.base_target_mmol = 6.0;
        assert_eq!(settings.effective_base_target(22.0), 4.2);
        assert_eq!(settings.effective_base_target(5.0), 6.0);
    }
}
