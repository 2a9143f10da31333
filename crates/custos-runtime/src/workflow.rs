//! # Action workflow
//!
//! Drives a proposed action through its states:
//!
//! ```text
//! PROPOSED ──deny──────────────────────────────────────▶ FAILED
//!    │ ──require_confirm──▶ GATED ──confirm──▶ CONFIRMED ──┐
//!    │                        └──cancel──▶ CANCELLED       │
//!    └──allow──────────────────────────────▶ READY ◀───────┘
//!                                              │
//!                                          EXECUTING ──▶ EXECUTED | FAILED
//! ```
//!
//! Every transition writes exactly one audit entry. Transitions for one account run
//! under that account's lock. Failed actions are terminal and never retried here.

use custos_core::{
    AccountId, Action, ActionDetails, ActionId, ActionOrigin, ActionState, Address, CustosError,
    Decision, Event, EventBus, ExecutionError, FailureKind, Result, SubscriptionId, VaultAccount,
    VaultExecutor,
};
use custos_policy::{Authorization, PolicyContext, PolicyEngine, PolicyRequest, SpendTracker, Verdict};
use custos_store::{NewAuditEntry, Store};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::credentials::CredentialManager;
use crate::locks::AccountLocks;

/// A request to create an action.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub account_id: AccountId,
    pub origin: ActionOrigin,
    pub details: ActionDetails,
    pub value_usd: f64,
    pub subscription_id: Option<SubscriptionId>,
    pub authorization: Authorization,
}

impl Proposal {
    /// An action proposed by the delegated agent, governed by the account's mode.
    pub fn agent(account_id: AccountId, details: ActionDetails, value_usd: f64) -> Self {
        Self {
            account_id,
            origin: ActionOrigin::Agent,
            details,
            value_usd,
            subscription_id: None,
            authorization: Authorization::Mode,
        }
    }

    /// A renewal payment riding the owner's standing auto-renewal authorization.
    pub fn renewal(
        account_id: AccountId,
        subscription_id: SubscriptionId,
        details: ActionDetails,
        value_usd: f64,
    ) -> Self {
        Self {
            account_id,
            origin: ActionOrigin::Scheduler,
            details,
            value_usd,
            subscription_id: Some(subscription_id),
            authorization: Authorization::StandingRenewal {
                approved_amount_usd: value_usd,
            },
        }
    }
}

/// Where an action stands after a workflow call returns.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Executed(Action),
    AwaitingConfirmation(Action),
    Failed(Action),
    Cancelled(Action),
    /// Left mid-flight (only seen for rows interrupted by a crash).
    InProgress(Action),
}

impl ActionOutcome {
    pub fn action(&self) -> &Action {
        match self {
            Self::Executed(a)
            | Self::AwaitingConfirmation(a)
            | Self::Failed(a)
            | Self::Cancelled(a)
            | Self::InProgress(a) => a,
        }
    }

    pub fn into_action(self) -> Action {
        match self {
            Self::Executed(a)
            | Self::AwaitingConfirmation(a)
            | Self::Failed(a)
            | Self::Cancelled(a)
            | Self::InProgress(a) => a,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Executed(_) => "executed",
            Self::AwaitingConfirmation(_) => "awaiting_confirmation",
            Self::Failed(_) => "failed",
            Self::Cancelled(_) => "cancelled",
            Self::InProgress(_) => "in_progress",
        }
    }
}

impl From<Action> for ActionOutcome {
    fn from(action: Action) -> Self {
        match action.state {
            ActionState::Executed => Self::Executed(action),
            ActionState::Failed => Self::Failed(action),
            ActionState::Cancelled => Self::Cancelled(action),
            ActionState::Gated => Self::AwaitingConfirmation(action),
            _ => Self::InProgress(action),
        }
    }
}

#[derive(Clone)]
pub struct ActionWorkflow {
    store: Store,
    engine: Arc<PolicyEngine>,
    spend: SpendTracker,
    credentials: CredentialManager,
    executor: Arc<dyn VaultExecutor>,
    locks: AccountLocks,
    clock: Arc<dyn Clock>,
    events: EventBus,
    execution_timeout: std::time::Duration,
}

impl ActionWorkflow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        engine: Arc<PolicyEngine>,
        spend: SpendTracker,
        credentials: CredentialManager,
        executor: Arc<dyn VaultExecutor>,
        locks: AccountLocks,
        clock: Arc<dyn Clock>,
        events: EventBus,
        execution_timeout: std::time::Duration,
    ) -> Self {
        Self {
            store,
            engine,
            spend,
            credentials,
            executor,
            locks,
            clock,
            events,
            execution_timeout,
        }
    }

    pub fn spend(&self) -> &SpendTracker {
        &self.spend
    }

    pub(crate) fn locks(&self) -> &AccountLocks {
        &self.locks
    }

    /// Create an action, rule on it, and run it as far as the ruling allows.
    ///
    /// A denial is persisted as `FAILED` and returned as `PolicyDenied` (or
    /// `CredentialInvalid` for the credential override). Execution failures are recorded
    /// on the action and returned as `Ok(ActionOutcome::Failed)`.
    pub async fn propose(&self, proposal: Proposal) -> Result<ActionOutcome> {
        let guard = self.locks.lock(proposal.account_id).await;
        self.propose_locked(proposal, &guard).await
    }

    /// [`ActionWorkflow::propose`] for a caller that already holds the account's guard
    /// from the same [`AccountLocks`].
    pub(crate) async fn propose_locked(
        &self,
        proposal: Proposal,
        _held: &OwnedMutexGuard<()>,
    ) -> Result<ActionOutcome> {
        if !proposal.value_usd.is_finite() || proposal.value_usd < 0.0 {
            return Err(CustosError::Validation(format!(
                "value_usd must be a finite, non-negative amount (got {})",
                proposal.value_usd
            )));
        }

        let account = self.store.require_account(proposal.account_id)?;
        if account.paused {
            return Err(CustosError::Validation(format!("account {} is paused", account.id)));
        }

        let now = self.clock.now();
        let mut action = Action::new(
            account.id,
            proposal.origin,
            proposal.details,
            proposal.value_usd,
            now,
        );
        if let Some(subscription_id) = proposal.subscription_id {
            action = action.with_subscription(subscription_id);
        }

        let verdict = self.evaluate(&account, &action, proposal.authorization).await?;
        action.confirmation_required = verdict.decision == Decision::RequireConfirm;
        self.store.insert_action(&action)?;
        self.audit(
            &action,
            "action_proposed",
            json!({
                "to": ActionState::Proposed.as_str(),
                "origin": action.origin.as_str(),
                "action_type": action.action_type.as_str(),
                "value_usd": action.value_usd,
                "subscription_id": action.subscription_id,
                "mode": account.mode.as_str(),
                "decision": verdict.decision.as_str(),
                "rule": verdict.rule,
                "reason": verdict.reason,
                "standing_renewal": matches!(proposal.authorization, Authorization::StandingRenewal { .. }),
            }),
        )?;
        info!(
            account_id = %account.id,
            action_id = %action.id,
            action_type = %action.action_type,
            value_usd = action.value_usd,
            decision = verdict.decision.as_str(),
            "action proposed"
        );

        match verdict.decision {
            Decision::Deny => {
                let error = self.deny(&mut action, &verdict)?;
                Err(error)
            }
            Decision::RequireConfirm => {
                self.advance(
                    &mut action,
                    ActionState::Gated,
                    "action_gated",
                    json!({ "reason": verdict.reason }),
                )?;
                self.events.publish(Event::ConfirmationRequested {
                    account_id: action.account_id,
                    action_id: action.id,
                    action_type: action.action_type,
                    value_usd: action.value_usd,
                });
                Ok(ActionOutcome::AwaitingConfirmation(action))
            }
            Decision::Allow => {
                self.advance(&mut action, ActionState::Ready, "action_ready", json!({}))?;
                self.execute(&account, action).await
            }
        }
    }

    /// Owner confirmation of a gated action. Anything not `GATED` is returned unchanged,
    /// without an audit entry, so retransmitted confirmations are harmless.
    pub async fn confirm(&self, caller: &Address, action_id: ActionId) -> Result<ActionOutcome> {
        let action = self.store.require_action(action_id)?;
        self.require_owner(caller, action.account_id, "confirm")?;

        let _guard = self.locks.lock(action.account_id).await;
        let mut action = self.store.require_action(action_id)?;
        if action.state != ActionState::Gated {
            debug!(%action_id, state = %action.state, "confirm is a no-op");
            return Ok(action.into());
        }

        // Re-read: the mode may have tightened since the proposal.
        let account = self.store.require_account(action.account_id)?;
        if account.paused {
            return Err(CustosError::Validation(format!("account {} is paused", account.id)));
        }
        let verdict = self.evaluate(&account, &action, Authorization::Mode).await?;
        if verdict.decision == Decision::Deny {
            self.deny(&mut action, &verdict)?;
            return Ok(ActionOutcome::Failed(action));
        }

        let now = self.clock.now();
        action.confirmed = true;
        action.confirmed_at = Some(now);
        self.advance(
            &mut action,
            ActionState::Confirmed,
            "action_confirmed",
            json!({ "by": caller }),
        )?;
        info!(account_id = %account.id, %action_id, "action confirmed by owner");
        self.advance(&mut action, ActionState::Ready, "action_ready", json!({}))?;
        self.execute(&account, action).await
    }

    /// Owner cancellation of a gated action. Terminal actions are returned unchanged.
    pub async fn cancel(&self, caller: &Address, action_id: ActionId) -> Result<ActionOutcome> {
        let action = self.store.require_action(action_id)?;
        self.require_owner(caller, action.account_id, "cancel")?;

        let _guard = self.locks.lock(action.account_id).await;
        let mut action = self.store.require_action(action_id)?;
        match action.state {
            ActionState::Gated => {
                self.advance(
                    &mut action,
                    ActionState::Cancelled,
                    "action_cancelled",
                    json!({ "by": caller }),
                )?;
                info!(account_id = %action.account_id, %action_id, "action cancelled by owner");
                self.events.publish(Event::ActionCancelled {
                    account_id: action.account_id,
                    action_id,
                });
                Ok(ActionOutcome::Cancelled(action))
            }
            state if state.is_terminal() => Ok(action.into()),
            state => Err(CustosError::Validation(format!(
                "action {action_id} is {state} and can no longer be cancelled"
            ))),
        }
    }

    /// Fail every action a previous process left between `CONFIRMED` and `EXECUTED`.
    /// An interrupted execution has an unknown on-chain outcome, so it is never resumed.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let mut recovered = 0;
        for state in [
            ActionState::Proposed,
            ActionState::Confirmed,
            ActionState::Ready,
            ActionState::Executing,
        ] {
            for stale in self.store.actions_in_state(state)? {
                let _guard = self.locks.lock(stale.account_id).await;
                let mut action = self.store.require_action(stale.id)?;
                if action.state != state {
                    continue;
                }
                warn!(action_id = %action.id, state = %state, "failing interrupted action");
                self.fail(
                    &mut action,
                    FailureKind::ExecutionTransient,
                    format!("interrupted while {state}; outcome unknown, re-propose if needed"),
                )?;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    // ── Internals ──────────────────────────────────────────────

    async fn evaluate(
        &self,
        account: &VaultAccount,
        action: &Action,
        authorization: Authorization,
    ) -> Result<Verdict> {
        let mutating = action.action_type.is_mutating();
        let credential_valid = if mutating {
            self.credentials.is_valid(account.id).await?
        } else {
            true
        };
        let mut request = PolicyRequest::new(action.action_type, action.value_usd);
        if action.details.breach().is_some() {
            request = request.breach();
        }
        let ctx = PolicyContext::new(account.mode, request, credential_valid)
            .with_spent_today(self.spend.spent_today(account.id, self.clock.now()))
            .with_authorization(authorization);
        Ok(self.engine.evaluate(&ctx))
    }

    /// Fail the action for a `Deny` verdict and build the matching caller error.
    fn deny(&self, action: &mut Action, verdict: &Verdict) -> Result<CustosError> {
        if verdict.credential_override {
            self.fail(
                action,
                FailureKind::CredentialInvalid,
                format!("credential_invalid: {}", verdict.reason),
            )?;
            Ok(CustosError::CredentialInvalid {
                account_id: action.account_id,
            })
        } else {
            self.fail(
                action,
                FailureKind::PolicyDenied,
                format!("policy_denied: {}", verdict.reason),
            )?;
            Ok(CustosError::PolicyDenied {
                action_id: action.id,
                reason: verdict.reason.clone(),
            })
        }
    }

    /// `READY → EXECUTING → EXECUTED | FAILED`. The credential is checked again here,
    /// since a revocation can land between proposal or confirmation and execution.
    async fn execute(&self, account: &VaultAccount, mut action: Action) -> Result<ActionOutcome> {
        if !action.action_type.is_mutating() {
            self.advance(&mut action, ActionState::Executing, "action_executing", json!({}))?;
            self.complete(&mut action, None)?;
            return Ok(ActionOutcome::Executed(action));
        }

        let signer = match self.credentials.lookup(account.id).await {
            Ok(Some(credential)) => credential.address,
            Ok(None) => {
                self.fail(
                    &mut action,
                    FailureKind::CredentialInvalid,
                    "credential_invalid: no valid session credential at execution time".into(),
                )?;
                return Ok(ActionOutcome::Failed(action));
            }
            Err(e) => {
                self.fail(&mut action, FailureKind::ExecutionTransient, e.to_string())?;
                return Ok(ActionOutcome::Failed(action));
            }
        };
        let Some(call) = action.details.vault_call().cloned() else {
            self.fail(
                &mut action,
                FailureKind::ExecutionReverted,
                "action carries no vault call".into(),
            )?;
            return Ok(ActionOutcome::Failed(action));
        };

        self.advance(
            &mut action,
            ActionState::Executing,
            "action_executing",
            json!({ "signer": signer, "target": call.target }),
        )?;

        let result = tokio::time::timeout(
            self.execution_timeout,
            self.executor.execute(&account.vault, &signer, &call),
        )
        .await
        .unwrap_or(Err(ExecutionError::Timeout {
            after_secs: self.execution_timeout.as_secs(),
        }));

        match result {
            Ok(receipt) => {
                self.complete(&mut action, Some(receipt.tx_hash))?;
                self.spend
                    .record(account.id, action.value_usd, action.executed_at.unwrap_or(action.updated_at));
                Ok(ActionOutcome::Executed(action))
            }
            Err(ExecutionError::Reverted(reason)) => {
                self.fail(&mut action, FailureKind::ExecutionReverted, reason)?;
                Ok(ActionOutcome::Failed(action))
            }
            Err(e) => {
                self.fail(&mut action, FailureKind::ExecutionTransient, e.to_string())?;
                Ok(ActionOutcome::Failed(action))
            }
        }
    }

    fn complete(&self, action: &mut Action, tx_hash: Option<String>) -> Result<()> {
        action.executed = true;
        action.executed_at = Some(self.clock.now());
        let details = json!({ "tx_hash": tx_hash });
        action.tx_hash = tx_hash;
        self.advance(action, ActionState::Executed, "action_executed", details)?;
        info!(
            account_id = %action.account_id,
            action_id = %action.id,
            tx_hash = ?action.tx_hash,
            "action executed"
        );
        self.events.publish(Event::ActionExecuted {
            account_id: action.account_id,
            action_id: action.id,
            tx_hash: action.tx_hash.clone(),
        });
        Ok(())
    }

    fn fail(&self, action: &mut Action, failure: FailureKind, error: String) -> Result<()> {
        action.failure = Some(failure);
        action.error = Some(error.clone());
        self.advance(
            action,
            ActionState::Failed,
            "action_failed",
            json!({ "failure": failure.as_str(), "error": error }),
        )?;
        warn!(
            account_id = %action.account_id,
            action_id = %action.id,
            failure = failure.as_str(),
            %error,
            "action failed"
        );
        self.events.publish(Event::ActionFailed {
            account_id: action.account_id,
            action_id: action.id,
            failure,
            error,
        });
        Ok(())
    }

    /// Persist one state transition and its audit entry.
    fn advance(
        &self,
        action: &mut Action,
        to: ActionState,
        event_type: &str,
        mut details: serde_json::Value,
    ) -> Result<()> {
        let from = action.state;
        let now = self.clock.now();
        action.state = to;
        action.updated_at = now;
        if !self.store.transition_action(action, from)? {
            return Err(CustosError::Store(format!(
                "action {} moved out of {from} concurrently",
                action.id
            )));
        }
        if let Some(map) = details.as_object_mut() {
            map.insert("from".into(), json!(from.as_str()));
            map.insert("to".into(), json!(to.as_str()));
        }
        self.audit(action, event_type, details)?;
        debug!(action_id = %action.id, %from, %to, "action transition");
        Ok(())
    }

    fn audit(&self, action: &Action, event_type: &str, details: serde_json::Value) -> Result<()> {
        self.store.append_audit(
            NewAuditEntry::new(event_type, details)
                .account(action.account_id)
                .action(action.id),
            self.clock.now(),
        )?;
        Ok(())
    }

    fn require_owner(&self, caller: &Address, account_id: AccountId, what: &str) -> Result<()> {
        let account = self.store.require_account(account_id)?;
        if account.is_owner(caller) {
            Ok(())
        } else {
            warn!(%account_id, %caller, what, "non-owner attempted an owner-only operation");
            Err(CustosError::Unauthorized {
                caller: caller.to_string(),
                reason: format!("only the account owner may {what} actions"),
            })
        }
    }
}
