//! Action dispatcher (C12, spec.md §4.11): idempotent submission of a
//! proposed action through the primary Nightscout channel, falling
//! back to an ordered chain of local broadcast channels.

use crate::model::{ActionCommand, ActionStatus};
use crate::net::NightscoutClient;
use crate::storage::ActionRepository;
use anyhow::Result;

/// Ordered local broadcast fallback chain (spec.md §4.11 step 4).
pub const FALLBACK_CHANNELS: &[&str] = &["ns_emulator_treatments", "local_treatments", "custom_fallback"];

/// A local broadcast channel: returns `true` if delivered to at least
/// one matching receiver. Implementations live outside this crate's
/// test boundary (platform broadcast intents); `NoopBroadcaster`
/// stands in for environments with no receivers configured.
pub trait Broadcaster: Send + Sync {
    fn send(&self, channel: &str, action_id: &str, payload: &serde_json::Value) -> Result<bool>;
}

pub struct NoopBroadcaster;

impl Broadcaster for NoopBroadcaster {
    fn send(&self, _channel: &str, _action_id: &str, _payload: &serde_json::Value) -> Result<bool> {
        Ok(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Delivered { via: String },
    Deduplicated,
    Failed { reason: String },
}

pub struct ActionDispatcher<'a, R: ActionRepository> {
    repo: &'a R,
    nightscout: &'a NightscoutClient,
    fallback_enabled: bool,
}

impl<'a, R: ActionRepository> ActionDispatcher<'a, R> {
    pub fn new(repo: &'a R, nightscout: &'a NightscoutClient, fallback_enabled: bool) -> Self {
        Self { repo, nightscout, fallback_enabled }
    }

    /// Submit `command`, which the caller has already built with its
    /// final `idempotency_key` and `params` (spec.md §4.11).
    pub async fn submit(&self, command: ActionCommand, broadcaster: &dyn Broadcaster) -> Result<DispatchOutcome> {
        if let Some(existing) = self.repo.find_by_idempotency_key(&command.idempotency_key)? {
            if existing.status == ActionStatus::Sent {
                return Ok(DispatchOutcome::Deduplicated);
            }
        } else {
            self.repo.insert_pending(&command)?;
        }

        if self.nightscout.post_treatment(&command.params).await.is_ok() {
            self.repo.mark_sent(&command.id)?;
            return Ok(DispatchOutcome::Delivered { via: "nightscout".to_string() });
        }

        if self.fallback_enabled {
            let mut seen: Vec<(&str, crate::model::ActionType)> = Vec::new();
            for channel in FALLBACK_CHANNELS {
                let dedup_key = (*channel, command.action_type);
                if seen.contains(&dedup_key) {
                    continue;
                }
                seen.push(dedup_key);
                if broadcaster.send(channel, &command.id, &command.params).unwrap_or(false) {
                    self.repo.mark_sent(&command.id)?;
                    return Ok(DispatchOutcome::Delivered { via: channel.to_string() });
                }
            }
        }

        let reason = "remote_failure:nightscout+no_receiver:fallback".to_string();
        self.repo.mark_failed(&command.id, &reason)?;
        Ok(DispatchOutcome::Failed { reason })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActionType;
    use crate::storage::sqlite::SqliteStore;

    fn command(key: &str) -> ActionCommand {
        ActionCommand::new(
            format!("cmd-{key}"),
            key,
            ActionType::TempTarget,
            serde_json::json!({"eventType": "Temporary Target"}),
            serde_json::json!({}),
            0,
        )
    }

    #[tokio::test]
    async fn unreachable_nightscout_falls_back_and_fails_with_noop_broadcaster() {
        let store = SqliteStore::open_in_memory().unwrap();
        let ns = NightscoutClient::new("http://127.0.0.1:1"); // unroutable, fast-fails
        let dispatcher = ActionDispatcher::new(&store, &ns, true);
        let outcome = dispatcher.submit(command("K1"), &NoopBroadcaster).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn replayed_idempotency_key_after_sent_is_deduplicated() {
        let store = SqliteStore::open_in_memory().unwrap();
        let cmd = command("K2");
        store.insert_pending(&cmd).unwrap();
        store.mark_sent(&cmd.id).unwrap();

        let ns = NightscoutClient::new("");
        let dispatcher = ActionDispatcher::new(&store, &ns, false);
        let outcome = dispatcher.submit(command("K2"), &NoopBroadcaster).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Deduplicated);
    }
}
