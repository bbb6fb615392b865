use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    TempTarget,
    Carbs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCommand {
    pub id: String,
    pub idempotency_key: String,
    pub action_type: ActionType,
    /// JSON-encoded params (target range, duration, carbs grams, ...).
    pub params: serde_json::Value,
    /// JSON snapshot of the safety inputs in effect when this command
    /// was built, for audit/forensics.
    pub safety_snapshot: serde_json::Value,
    pub status: ActionStatus,
    pub failure_reason: Option<String>,
    pub created_ts: i64,
}

impl ActionCommand {
    pub fn new(
        id: impl Into<String>,
        idempotency_key: impl Into<String>,
        action_type: ActionType,
        params: serde_json::Value,
        safety_snapshot: serde_json::Value,
        created_ts: i64,
    ) -> Self {
        Self {
            id: id.into(),
            idempotency_key: idempotency_key.into(),
            action_type,
            params,
            safety_snapshot,
            status: ActionStatus::Pending,
            failure_reason: None,
            created_ts,
        }
    }
}
