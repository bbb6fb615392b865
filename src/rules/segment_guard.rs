use super::{Rule, RuleContext};
use crate::model::{ActionProposal, ActionType, RuleDecision};
use serde_json::json;

const LOW_CONFIDENCE_THRESHOLD: f64 = 0.35;
const MEANINGFUL_IOB_UNITS: f64 = 0.5;
const MEANINGFUL_COB_GRAMS: f64 = 10.0;

/// When the current `(day_type, time_slot)` profile segment is poorly
/// estimated and there is active insulin or carbs on board, proposes a
/// conservative target close to base rather than trusting an
/// aggressive correction built on an uncertain ISF/CR (spec.md §4.7).
pub struct SegmentProfileGuard;

impl Rule for SegmentProfileGuard {
    fn id(&self) -> &'static str {
        "SegmentProfileGuard.v1"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn cooldown_minutes(&self) -> u32 {
        120
    }

    fn evaluate(&self, ctx: &RuleContext) -> RuleDecision {
        let Some(segment) = &ctx.profile_segment else { return RuleDecision::no_match(self.id()) };
        if segment.estimate.confidence >= LOW_CONFIDENCE_THRESHOLD {
            return RuleDecision::no_match(self.id());
        }
        if ctx.iob_units < MEANINGFUL_IOB_UNITS && ctx.cob_grams < MEANINGFUL_COB_GRAMS {
            return RuleDecision::no_match(self.id());
        }
        let target = ctx.effective_base_target_mmol;
        RuleDecision::triggered(
            self.id(),
            vec!["low_confidence_profile_guard".to_string()],
            ActionProposal {
                action_type: ActionType::TempTarget,
                target_low_mmol: Some(target),
                target_high_mmol: Some(target + 0.3),
                duration_min: Some(60),
                carbs_grams: None,
                extra: json!({"confidence": segment.estimate.confidence}),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DayType, ProfileEstimate, ProfileSegmentEstimate, RuleState, TimeSlot};

    fn ctx(confidence: f64, iob: f64, cob: f64) -> RuleContext {
        RuleContext {
            now_ts: 0,
            current_glucose_mmol: 6.0,
            forecast_5_mmol: 6.0,
            forecast_30_mmol: 6.0,
            forecast_60_mmol: 6.0,
            effective_base_target_mmol: 5.5,
            iob_units: iob,
            cob_grams: cob,
            last_hypo_ts: None,
            pattern_window: None,
            profile_segment: Some(ProfileSegmentEstimate {
                day_type: DayType::Weekday,
                time_slot: TimeSlot::Morning,
                estimate: ProfileEstimate { isf: 2.3, cr: 10.0, sample_count: 1, confidence, lookback_days: 60 },
            }),
            day_type: DayType::Weekday,
            time_slot: TimeSlot::Morning,
        }
    }

    #[test]
    fn triggers_on_low_confidence_with_active_iob() {
        let decision = SegmentProfileGuard.evaluate(&ctx(0.2, 2.0, 0.0));
        assert_eq!(decision.state, RuleState::Triggered);
    }

    #[test]
    fn no_match_when_confidence_is_high() {
        let decision = SegmentProfileGuard.evaluate(&ctx(0.9, 2.0, 0.0));
        assert_eq!(decision.state, RuleState::NoMatch);
    }

    #[test]
    fn no_match_without_active_insulin_or_carbs() {
        let decision = SegmentProfileGuard.evaluate(&ctx(0.1, 0.0, 0.0));
        assert_eq!(decision.state, RuleState::NoMatch);
    }
}
