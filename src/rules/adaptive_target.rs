use super::{Rule, RuleContext};
use crate::model::{ActionProposal, ActionType, RuleDecision};
use serde_json::json;

const PREDICTED_LOW_MMOL: f64 = 4.4;
const PREDICTED_HIGH_MMOL: f64 = 10.0;

/// Always-enabled controller: raises the target ahead of a predicted
/// low, lowers it ahead of a predicted high (spec.md §4.7).
pub struct AdaptiveTargetController;

impl Rule for AdaptiveTargetController {
    fn id(&self) -> &'static str {
        "AdaptiveTargetController.v1"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn cooldown_minutes(&self) -> u32 {
        15
    }

    fn evaluate(&self, ctx: &RuleContext) -> RuleDecision {
        if ctx.forecast_30_mmol < PREDICTED_LOW_MMOL || ctx.forecast_60_mmol < PREDICTED_LOW_MMOL {
            return RuleDecision::triggered(
                self.id(),
                vec!["predicted_low".to_string()],
                ActionProposal {
                    action_type: ActionType::TempTarget,
                    target_low_mmol: Some(6.5),
                    target_high_mmol: Some(7.5),
                    duration_min: Some(30),
                    carbs_grams: None,
                    extra: json!({"forecast30": ctx.forecast_30_mmol, "forecast60": ctx.forecast_60_mmol}),
                },
            );
        }
        if ctx.forecast_30_mmol > PREDICTED_HIGH_MMOL || ctx.forecast_60_mmol > PREDICTED_HIGH_MMOL {
            return RuleDecision::triggered(
                self.id(),
                vec!["predicted_high".to_string()],
                ActionProposal {
                    action_type: ActionType::TempTarget,
                    target_low_mmol: Some(4.0),
                    target_high_mmol: Some(4.5),
                    duration_min: Some(30),
                    carbs_grams: None,
                    extra: json!({"forecast30": ctx.forecast_30_mmol, "forecast60": ctx.forecast_60_mmol}),
                },
            );
        }
        RuleDecision::no_match(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DayType, RuleState, TimeSlot};

    fn ctx(forecast_30: f64, forecast_60: f64) -> RuleContext {
        RuleContext {
            now_ts: 0,
            current_glucose_mmol: 6.0,
            forecast_5_mmol: 6.0,
            forecast_30_mmol: forecast_30,
            forecast_60_mmol: forecast_60,
            effective_base_target_mmol: 5.5,
            iob_units: 0.0,
            cob_grams: 0.0,
            last_hypo_ts: None,
            pattern_window: None,
            profile_segment: None,
            day_type: DayType::Weekday,
            time_slot: TimeSlot::Morning,
        }
    }

    #[test]
    fn predicted_low_raises_target() {
        let decision = AdaptiveTargetController.evaluate(&ctx(4.0, 4.2));
        assert_eq!(decision.state, RuleState::Triggered);
        assert!(decision.reasons.contains(&"predicted_low".to_string()));
    }

    #[test]
    fn predicted_high_lowers_target() {
        let decision = AdaptiveTargetController.evaluate(&ctx(11.0, 12.0));
        assert_eq!(decision.state, RuleState::Triggered);
        assert!(decision.reasons.contains(&"predicted_high".to_string()));
    }

    #[test]
    fn in_range_forecast_does_not_match() {
        let decision = AdaptiveTargetController.evaluate(&ctx(6.0, 6.2));
        assert_eq!(decision.state, RuleState::NoMatch);
    }
}
