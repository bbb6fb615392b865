//! Rule engine and safety policy (C9, spec.md §4.7).
//!
//! Rules are evaluated in priority-descending order (ties broken by
//! rule id) and never short-circuited; the coordinator decides what to
//! act on. Every decision then passes through `SafetyPolicy`, which is
//! the single place that can force a decision to `BLOCKED`.

pub mod adaptive_target;
pub mod pattern_adaptive;
pub mod post_hypo_guard;
pub mod segment_guard;

pub use adaptive_target::AdaptiveTargetController;
pub use pattern_adaptive::PatternAdaptiveTarget;
pub use post_hypo_guard::PostHypoReboundGuard;
pub use segment_guard::SegmentProfileGuard;

use crate::model::{ActionType, DayType, PatternWindow, ProfileSegmentEstimate, RuleDecision, RuleState, TimeSlot};

#[derive(Debug, Clone)]
pub struct RuleContext {
    pub now_ts: i64,
    pub current_glucose_mmol: f64,
    pub forecast_5_mmol: f64,
    pub forecast_30_mmol: f64,
    pub forecast_60_mmol: f64,
    pub effective_base_target_mmol: f64,
    pub iob_units: f64,
    pub cob_grams: f64,
    pub last_hypo_ts: Option<i64>,
    pub pattern_window: Option<PatternWindow>,
    pub profile_segment: Option<ProfileSegmentEstimate>,
    pub day_type: DayType,
    pub time_slot: TimeSlot,
}

/// A rule is `{id, priority, evaluate}` (spec.md §4.7).
pub trait Rule {
    fn id(&self) -> &'static str;
    fn priority(&self) -> i32;
    /// Minimum interval between two successful triggers of this rule.
    fn cooldown_minutes(&self) -> u32;
    fn evaluate(&self, ctx: &RuleContext) -> RuleDecision;
}

pub struct RuleEngine {
    rules: Vec<Box<dyn Rule + Send + Sync>>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self {
            rules: vec![
                Box::new(AdaptiveTargetController),
                Box::new(PostHypoReboundGuard),
                Box::new(PatternAdaptiveTarget),
                Box::new(SegmentProfileGuard),
            ],
        }
    }
}

impl RuleEngine {
    /// Evaluate every enabled rule, sorted priority-descending with
    /// id as a lexicographic tiebreaker (spec.md §5 ordering guarantee).
    pub fn evaluate_all(&self, ctx: &RuleContext) -> Vec<RuleDecision> {
        let mut ordered: Vec<&Box<dyn Rule + Send + Sync>> = self.rules.iter().collect();
        ordered.sort_by(|a, b| b.priority().cmp(&a.priority()).then_with(|| a.id().cmp(b.id())));
        ordered.iter().map(|rule| rule.evaluate(ctx)).collect()
    }

    pub fn rule_by_id(&self, id: &str) -> Option<&(dyn Rule + Send + Sync)> {
        self.rules.iter().find(|r| r.id() == id).map(|b| b.as_ref())
    }
}

#[derive(Debug, Clone)]
pub struct SafetyPolicyConfig {
    pub kill_switch: bool,
    pub min_target_mmol: f64,
    pub max_target_mmol: f64,
    pub max_actions_in_6h: u32,
}

impl Default for SafetyPolicyConfig {
    fn default() -> Self {
        Self { kill_switch: false, min_target_mmol: 4.0, max_target_mmol: 10.0, max_actions_in_6h: 3 }
    }
}

pub struct SafetyPolicy;

impl SafetyPolicy {
    /// Apply the policy gates from spec.md §4.7 in order, appending
    /// reasons and forcing `BLOCKED` on any violation.
    pub fn apply(
        mut decision: RuleDecision,
        config: &SafetyPolicyConfig,
        data_fresh: bool,
        actions_last_6h: u32,
    ) -> RuleDecision {
        if decision.state != RuleState::Triggered {
            return decision;
        }
        let Some(proposal) = decision.action_proposal.clone() else { return decision };

        if config.kill_switch {
            decision.block("kill_switch");
            return decision;
        }
        if !data_fresh {
            decision.block("stale_data");
            return decision;
        }
        if proposal.action_type != ActionType::TempTarget && actions_last_6h >= config.max_actions_in_6h {
            decision.block("rate_limit_6h");
            return decision;
        }
        if let (Some(low), Some(high)) = (proposal.target_low_mmol, proposal.target_high_mmol) {
            if low < config.min_target_mmol
                || high > config.max_target_mmol
                || low > high
            {
                decision.block("target_out_of_range");
                return decision;
            }
        }
        if let Some(duration) = proposal.duration_min {
            if !(15..=120).contains(&duration) {
                decision.block("duration_out_of_range");
                return decision;
            }
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActionProposal;
    use serde_json::Value;

    fn proposal(low: f64, high: f64, duration: u32) -> ActionProposal {
        ActionProposal {
            action_type: ActionType::TempTarget,
            target_low_mmol: Some(low),
            target_high_mmol: Some(high),
            duration_min: Some(duration),
            carbs_grams: None,
            extra: Value::Null,
        }
    }

    fn base_ctx() -> RuleContext {
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
            pattern_window: None,
            profile_segment: None,
            day_type: DayType::Weekday,
            time_slot: TimeSlot::Morning,
        }
    }

    #[test]
    fn kill_switch_blocks_every_triggered_decision() {
        let decision = RuleDecision::triggered("AdaptiveTargetController.v1", vec!["rising".into()], proposal(5.0, 5.5, 30));
        let config = SafetyPolicyConfig { kill_switch: true, ..Default::default() };
        let blocked = SafetyPolicy::apply(decision, &config, true, 0);
        assert_eq!(blocked.state, RuleState::Blocked);
        assert!(blocked.reasons.contains(&"kill_switch".to_string()));
        assert!(blocked.action_proposal.is_none());
    }

    #[test]
    fn rate_limit_only_applies_to_non_temp_target_per_spec_open_question() {
        let decision = RuleDecision::triggered("AdaptiveTargetController.v1", vec![], proposal(5.0, 5.5, 30));
        let config = SafetyPolicyConfig { max_actions_in_6h: 1, ..Default::default() };
        let result = SafetyPolicy::apply(decision, &config, true, 5);
        assert_eq!(result.state, RuleState::Triggered);
    }

    #[test]
    fn target_out_of_range_blocks() {
        let decision = RuleDecision::triggered("AdaptiveTargetController.v1", vec![], proposal(2.0, 2.5, 30));
        let config = SafetyPolicyConfig::default();
        let result = SafetyPolicy::apply(decision, &config, true, 0);
        assert_eq!(result.state, RuleState::Blocked);
    }

    #[test]
    fn engine_orders_by_priority_then_id() {
        let engine = RuleEngine::default();
        let decisions = engine.evaluate_all(&base_ctx());
        let ids: Vec<&str> = decisions.iter().map(|d| d.rule_id.as_str()).collect();
        assert_eq!(ids[0], "AdaptiveTargetController.v1");
    }
}
