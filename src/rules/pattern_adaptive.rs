use super::{Rule, RuleContext};
use crate::model::{ActionProposal, ActionType, RuleDecision};
use serde_json::json;

/// Uses the recomputed `PatternWindow` for the current `(day_type,
/// hour)` to pre-emptively raise the target during a known risk window
/// (spec.md §4.7, §4.8 step 17).
pub struct PatternAdaptiveTarget;

impl Rule for PatternAdaptiveTarget {
    fn id(&self) -> &'static str {
        "PatternAdaptiveTarget.v1"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn cooldown_minutes(&self) -> u32 {
        60
    }

    fn evaluate(&self, ctx: &RuleContext) -> RuleDecision {
        let Some(window) = &ctx.pattern_window else { return RuleDecision::no_match(self.id()) };
        if !window.is_risk_window {
            return RuleDecision::no_match(self.id());
        }
        let target = window.recommended_target_mmol.max(ctx.effective_base_target_mmol + 0.5);
        RuleDecision::triggered(
            self.id(),
            vec![format!("risk_window_hour_{}", window.hour)],
            ActionProposal {
                action_type: ActionType::TempTarget,
                target_low_mmol: Some(target),
                target_high_mmol: Some(target + 0.5),
                duration_min: Some(60),
                carbs_grams: None,
                extra: json!({"lowRate": window.low_rate, "sampleCount": window.sample_count}),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DayType, PatternWindow, RuleState, TimeSlot};

    fn ctx(window: Option<PatternWindow>) -> RuleContext {
        RuleContext {
            now_ts: 0,
            current_glucose_mmol: 6.0,
            forecast_5_mmol: 6.0,
            forecast_30_mmol: 6.0,
            forecast_60_mmol: 6.0,
            effective_base_target_mmol: 5.5,
            iob_units: 0.0,
            cob_grams: 0.0,
            last_hypo_ts: None,
            pattern_window: window,
            profile_segment: None,
            day_type: DayType::Weekday,
            time_slot: TimeSlot::Morning,
        }
    }

    fn risky_window() -> PatternWindow {
        PatternWindow {
            day_type: DayType::Weekday,
            hour: 3,
            sample_count: 20,
            active_days: 10,
            low_rate: 0.3,
            high_rate: 0.0,
            recommended_target_mmol: 7.0,
            is_risk_window: true,
        }
    }

    #[test]
    fn triggers_on_risk_window() {
        let decision = PatternAdaptiveTarget.evaluate(&ctx(Some(risky_window())));
        assert_eq!(decision.state, RuleState::Triggered);
    }

    #[test]
    fn no_match_when_not_risky() {
        let mut window = risky_window();
        window.is_risk_window = false;
        let decision = PatternAdaptiveTarget.evaluate(&ctx(Some(window)));
        assert_eq!(decision.state, RuleState::NoMatch);
    }

    #[test]
    fn no_match_without_window() {
        let decision = PatternAdaptiveTarget.evaluate(&ctx(None));
        assert_eq!(decision.state, RuleState::NoMatch);
    }
}
