use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleState {
    Triggered,
    Blocked,
    NoMatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionProposal {
    pub action_type: crate::model::ActionType,
    pub target_low_mmol: Option<f64>,
    pub target_high_mmol: Option<f64>,
    pub duration_min: Option<u32>,
    pub carbs_grams: Option<f64>,
    pub extra: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDecision {
    pub rule_id: String,
    pub state: RuleState,
    pub reasons: Vec<String>,
    pub action_proposal: Option<ActionProposal>,
}

impl RuleDecision {
    pub fn no_match(rule_id: impl Into<String>) -> Self {
        Self { rule_id: rule_id.into(), state: RuleState::NoMatch, reasons: Vec::new(), action_proposal: None }
    }

    pub fn blocked(rule_id: impl Into<String>, reasons: Vec<String>) -> Self {
        Self { rule_id: rule_id.into(), state: RuleState::Blocked, reasons, action_proposal: None }
    }

    pub fn triggered(rule_id: impl Into<String>, reasons: Vec<String>, proposal: ActionProposal) -> Self {
        Self { rule_id: rule_id.into(), state: RuleState::Triggered, reasons, action_proposal: Some(proposal) }
    }

    /// Invariant from spec.md §8 property 6.
    pub fn is_well_formed(&self) -> bool {
        match self.state {
            RuleState::Blocked => !self.reasons.is_empty() && self.action_proposal.is_none(),
            _ => true,
        }
    }

    pub fn block(&mut self, reason: impl Into<String>) {
        self.state = RuleState::Blocked;
        self.reasons.push(reason.into());
        self.action_proposal = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_without_reasons_is_malformed() {
        let d = RuleDecision { rule_id: "x".into(), state: RuleState::Blocked, reasons: vec![], action_proposal: None };
        assert!(!d.is_well_formed());
    }

    #[test]
    fn block_clears_proposal() {
        let mut d = RuleDecision::triggered(
            "x",
            vec![],
            ActionProposal {
                action_type: crate::model::ActionType::TempTarget,
                target_low_mmol: Some(5.0),
                target_high_mmol: Some(5.0),
                duration_min: Some(30),
                carbs_grams: None,
                extra: Value::Null,
            },
        );
        d.block("kill_switch");
        assert!(d.is_well_formed());
        assert!(d.action_proposal.is_none());
        assert_eq!(d.state, RuleState::Blocked);
    }
}
