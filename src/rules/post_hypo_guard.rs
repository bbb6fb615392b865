use super::{Rule, RuleContext};
use crate::model::{ActionProposal, ActionType, RuleDecision};
use serde_json::json;

const GUARD_WINDOW_MIN: i64 = 180;

/// Raises the target for a window after a recent hypo to guard against
/// an overcorrection rebound (spec.md §4.7).
pub struct PostHypoReboundGuard;

impl Rule for PostHypoReboundGuard {
    fn id(&self) -> &'static str {
        "PostHypoReboundGuard.v1"
    }

    fn priority(&self) -> i32 {
        90
    }

    fn cooldown_minutes(&self) -> u32 {
        60
    }

    fn evaluate(&self, ctx: &RuleContext) -> RuleDecision {
        let Some(hypo_ts) = ctx.last_hypo_ts else { return RuleDecision::no_match(self.id()) };
        let minutes_since = (ctx.now_ts - hypo_ts) as f64 / 60_000.0;
        if minutes_since < 0.0 || minutes_since > GUARD_WINDOW_MIN as f64 {
            return RuleDecision::no_match(self.id());
        }
        RuleDecision::triggered(
            self.id(),
            vec!["post_hypo_rebound_guard".to_string()],
            ActionProposal {
                action_type: ActionType::TempTarget,
                target_low_mmol: Some(6.5),
                target_high_mmol: Some(7.0),
                duration_min: Some(60),
                carbs_grams: None,
                extra: json!({"minutesSinceHypo": minutes_since}),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DayType, RuleState, TimeSlot};

    fn ctx(last_hypo_ts: Option<i64>, now_ts: i64) -> RuleContext {
        RuleContext {
            now_ts,
            current_glucose_mmol: 6.0,
            forecast_5_mmol: 6.0,
            forecast_30_mmol: 6.0,
            forecast_60_mmol: 6.0,
            effective_base_target_mmol: 5.5,
            iob_units: 0.0,
            cob_grams: 0.0,
            last_hypo_ts,
            pattern_window: None,
            profile_segment: None,
            day_type: DayType::Weekday,
            time_slot: TimeSlot::Morning,
        }
    }

    #[test]
    fn triggers_within_window() {
        let decision = PostHypoReboundGuard.evaluate(&ctx(Some(0), 60 * 60_000));
        assert_eq!(decision.state, RuleState::Triggered);
    }

    #[test]
    fn no_match_without_recent_hypo() {
        let decision = PostHypoReboundGuard.evaluate(&ctx(None, 0));
        assert_eq!(decision.state, RuleState::NoMatch);
    }

    #[test]
    fn no_match_outside_window() {
        let decision = PostHypoReboundGuard.evaluate(&ctx(Some(0), 200 * 60_000));
        assert_eq!(decision.state, RuleState::NoMatch);
    }
}
