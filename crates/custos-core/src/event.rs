use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::action::{ActionType, FailureKind};
use crate::mode::AutonomyMode;
use crate::types::{AccountId, ActionId, Address, SubscriptionId};

/// Events published as the core makes progress, for UI and notification layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    // ── Action lifecycle ───────────────────────────────────────
    ConfirmationRequested {
        account_id: AccountId,
        action_id: ActionId,
        action_type: ActionType,
        value_usd: f64,
    },
    ActionExecuted {
        account_id: AccountId,
        action_id: ActionId,
        tx_hash: Option<String>,
    },
    ActionFailed {
        account_id: AccountId,
        action_id: ActionId,
        failure: FailureKind,
        error: String,
    },
    ActionCancelled {
        account_id: AccountId,
        action_id: ActionId,
    },

    // ── Account / credential lifecycle ─────────────────────────
    ModeChanged {
        account_id: AccountId,
        from: AutonomyMode,
        to: AutonomyMode,
    },
    CredentialCreated {
        account_id: AccountId,
        address: Address,
    },
    CredentialRevoked {
        account_id: AccountId,
        address: Address,
    },

    // ── Renewal lifecycle ──────────────────────────────────────
    RenewalSucceeded {
        subscription_id: SubscriptionId,
        tx_hash: Option<String>,
        expires_at: DateTime<Utc>,
    },
    RenewalFailed {
        subscription_id: SubscriptionId,
        attempts: u32,
        error: String,
    },
    SubscriptionExpired {
        subscription_id: SubscriptionId,
        reason: String,
    },

    // ── System ─────────────────────────────────────────────────
    SchedulerTick {
        timestamp: DateTime<Utc>,
        due: usize,
    },
    Shutdown,
}

/// A broadcast-based event bus for system-wide pub/sub.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<Event>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
