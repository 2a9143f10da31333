//! The caller-facing surface of the core. API handlers and the CLI go through here.

use chrono::{DateTime, Utc};
use custos_config::CustosConfig;
use custos_core::{
    AccountId, Action, ActionDetails, ActionId, ActionState, Address, AutonomyMode, CustosError,
    Event, EventBus, Result, SessionCredential, Subscription, SubscriptionId,
    SubscriptionStatus, VaultAccount, VaultExecutor,
};
use custos_policy::{Limits, PolicyEngine, SpendTracker};
use custos_store::{AuditEntry, AuditFilter, NewAuditEntry, Store};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::credentials::CredentialManager;
use crate::locks::AccountLocks;
use crate::scheduler::{RenewalPolicy, RenewalScheduler, TickReport, seconds};
use crate::workflow::{ActionOutcome, ActionWorkflow, Proposal};

/// Snapshot returned by `get_account_status`.
#[derive(Debug, Clone, Serialize)]
pub struct AccountStatus {
    pub account: VaultAccount,
    pub credential: Option<SessionCredential>,
    pub credential_valid: bool,
    pub pending_confirmations: i64,
    pub spent_today_usd: f64,
    pub daily_limit_usd: Option<f64>,
    pub subscriptions: Vec<Subscription>,
    pub recent_actions: Vec<Action>,
}

/// Owner input for a new subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSubscription {
    pub plan: String,
    pub payee: Address,
    pub renewal_cost_usd: f64,
    #[serde(with = "custos_core::executor::u128_string")]
    pub payment_value: u128,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub auto_renewal_enabled: bool,
}

/// Whether the vault contract agrees with the account record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoleCheck {
    pub onchain_owner: Address,
    pub onchain_agent: Option<Address>,
    pub owner_matches: bool,
    pub agent_matches: bool,
}

pub struct VaultService {
    store: Store,
    workflow: ActionWorkflow,
    credentials: CredentialManager,
    scheduler: Arc<RenewalScheduler>,
    executor: Arc<dyn VaultExecutor>,
    locks: AccountLocks,
    clock: Arc<dyn Clock>,
    events: EventBus,
    daily_limit_usd: Option<f64>,
}

impl VaultService {
    /// Wire every component from config and seed today's spend from the store.
    pub fn new(
        config: &CustosConfig,
        store: Store,
        executor: Arc<dyn VaultExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let events = EventBus::new(256);
        let locks = AccountLocks::new();
        let credentials = CredentialManager::new(
            store.clone(),
            Arc::clone(&clock),
            events.clone(),
            config
                .credentials
                .default_ttl_secs
                .map(|s| seconds("credentials.default_ttl_secs", s))
                .transpose()?,
            std::time::Duration::from_secs(config.execution.credential_lookup_timeout_secs),
        );
        let engine = Arc::new(PolicyEngine::new(
            Limits {
                copilot_ceiling_usd: config.policy.copilot_ceiling_usd,
            },
            config.policy.daily_limit_usd,
        ));
        let spend = SpendTracker::new();
        let workflow = ActionWorkflow::new(
            store.clone(),
            engine,
            spend.clone(),
            credentials.clone(),
            Arc::clone(&executor),
            locks.clone(),
            Arc::clone(&clock),
            events.clone(),
            std::time::Duration::from_secs(config.execution.timeout_secs),
        );
        let scheduler = Arc::new(RenewalScheduler::new(
            store.clone(),
            workflow.clone(),
            credentials.clone(),
            Arc::clone(&clock),
            events.clone(),
            RenewalPolicy::from_config(&config.renewal)?,
        ));

        let now = clock.now();
        let day_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or(now);
        for account in store.list_accounts()? {
            let spent = store.executed_value_since(account.id, day_start)?;
            if spent > 0.0 {
                spend.seed(account.id, now.date_naive(), spent);
            }
        }

        Ok(Self {
            store,
            workflow,
            credentials,
            scheduler,
            executor,
            locks,
            clock,
            events,
            daily_limit_usd: config.policy.daily_limit_usd,
        })
    }

    /// Fail actions a previous process left mid-flight. Call once, before serving, from
    /// the process that owns the store.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let recovered = self.workflow.recover_interrupted().await?;
        if recovered > 0 {
            warn!(recovered, "failed actions interrupted by a previous shutdown");
        }
        Ok(recovered)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn scheduler(&self) -> Arc<RenewalScheduler> {
        Arc::clone(&self.scheduler)
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    // ── Accounts ───────────────────────────────────────────────

    pub fn open_account(
        &self,
        vault: Address,
        owner: Address,
        agent: Option<Address>,
        mode: AutonomyMode,
    ) -> Result<VaultAccount> {
        let mut account = VaultAccount::new(vault, owner, agent, mode);
        let now = self.clock.now();
        account.created_at = now;
        account.updated_at = now;
        self.store.insert_account(&account)?;
        self.audit_account(
            account.id,
            "account_opened",
            json!({
                "vault": account.vault,
                "owner": account.owner,
                "agent": account.agent,
                "mode": account.mode,
            }),
        )?;
        info!(account_id = %account.id, vault = %account.vault, mode = %account.mode, "account opened");
        Ok(account)
    }

    pub fn get_account(&self, account_id: AccountId) -> Result<VaultAccount> {
        self.store.require_account(account_id)
    }

    /// Change the autonomy mode. Moving to `observer` also switches auto-renewal off on
    /// every subscription of the account.
    pub async fn set_autonomy_mode(
        &self,
        caller: &Address,
        account_id: AccountId,
        mode: AutonomyMode,
    ) -> Result<VaultAccount> {
        let _guard = self.locks.lock(account_id).await;
        let mut account = self.owned_account(caller, account_id, "change the autonomy mode")?;
        let from = account.mode;
        if from == mode {
            return Ok(account);
        }
        let now = self.clock.now();
        account.mode = mode;
        account.updated_at = now;
        self.store.update_account(&account)?;
        self.audit_account(account_id, "mode_changed", json!({ "from": from, "to": mode }))?;
        info!(%account_id, %from, to = %mode, "autonomy mode changed");
        self.events.publish(Event::ModeChanged {
            account_id,
            from,
            to: mode,
        });

        if mode == AutonomyMode::Observer {
            let disabled = self.store.disable_auto_renewal(account_id, now)?;
            for subscription_id in &disabled {
                self.audit_account(
                    account_id,
                    "auto_renewal_disabled",
                    json!({ "subscription_id": subscription_id, "reason": "observer mode" }),
                )?;
            }
            if !disabled.is_empty() {
                info!(%account_id, count = disabled.len(), "auto-renewal disabled for observer mode");
            }
        }
        Ok(account)
    }

    pub async fn set_agent(
        &self,
        caller: &Address,
        account_id: AccountId,
        agent: Option<Address>,
    ) -> Result<VaultAccount> {
        let _guard = self.locks.lock(account_id).await;
        let mut account = self.owned_account(caller, account_id, "change the agent")?;
        let from = account.agent.take();
        account.agent = agent;
        account.updated_at = self.clock.now();
        self.store.update_account(&account)?;
        self.audit_account(
            account_id,
            "agent_changed",
            json!({ "from": from, "to": account.agent }),
        )?;
        info!(%account_id, agent = ?account.agent, "delegated agent changed");
        Ok(account)
    }

    pub async fn set_paused(
        &self,
        caller: &Address,
        account_id: AccountId,
        paused: bool,
    ) -> Result<VaultAccount> {
        let _guard = self.locks.lock(account_id).await;
        let mut account = self.owned_account(caller, account_id, "pause the account")?;
        if account.paused == paused {
            return Ok(account);
        }
        account.paused = paused;
        account.updated_at = self.clock.now();
        self.store.update_account(&account)?;
        let event_type = if paused { "account_paused" } else { "account_resumed" };
        self.audit_account(account_id, event_type, json!({}))?;
        info!(%account_id, paused, "account pause state changed");
        Ok(account)
    }

    /// Compare the account record with the vault contract's `owner()` and `agent()`.
    pub async fn verify_roles(&self, account_id: AccountId) -> Result<RoleCheck> {
        let account = self.store.require_account(account_id)?;
        let onchain_owner = self.executor.owner(&account.vault).await?;
        let onchain_agent = self.executor.agent(&account.vault).await?;
        Ok(RoleCheck {
            owner_matches: onchain_owner == account.owner,
            agent_matches: onchain_agent == account.agent,
            onchain_owner,
            onchain_agent,
        })
    }

    pub async fn get_account_status(&self, account_id: AccountId) -> Result<AccountStatus> {
        let account = self.store.require_account(account_id)?;
        let credential = self.credentials.current(account_id)?;
        Ok(AccountStatus {
            credential_valid: credential.is_some(),
            credential: match credential {
                Some(c) => Some(c),
                None => self.store.latest_credential(account_id)?,
            },
            pending_confirmations: self
                .store
                .count_actions_in_state(account_id, ActionState::Gated)?,
            spent_today_usd: self.workflow.spend().spent_today(account_id, self.clock.now()),
            daily_limit_usd: self.daily_limit_usd,
            subscriptions: self.store.subscriptions_for_account(account_id)?,
            recent_actions: self.store.actions_for_account(account_id, 20)?,
            account,
        })
    }

    // ── Actions ────────────────────────────────────────────────

    /// Agent entry point.
    pub async fn propose_action(
        &self,
        account_id: AccountId,
        details: ActionDetails,
        value_usd: f64,
    ) -> Result<ActionOutcome> {
        self.workflow
            .propose(Proposal::agent(account_id, details, value_usd))
            .await
    }

    pub async fn confirm_action(&self, caller: &Address, action_id: ActionId) -> Result<ActionOutcome> {
        self.workflow.confirm(caller, action_id).await
    }

    pub async fn cancel_action(&self, caller: &Address, action_id: ActionId) -> Result<ActionOutcome> {
        self.workflow.cancel(caller, action_id).await
    }

    pub fn get_action(&self, action_id: ActionId) -> Result<Action> {
        self.store.require_action(action_id)
    }

    // ── Session keys ───────────────────────────────────────────

    pub fn create_session_key(&self, caller: &Address, account_id: AccountId) -> Result<SessionCredential> {
        self.owned_account(caller, account_id, "create a session key")?;
        self.credentials.create(account_id)
    }

    /// Idempotent. Returns whether a live credential was revoked.
    pub fn revoke_session_key(&self, caller: &Address, account_id: AccountId) -> Result<bool> {
        self.owned_account(caller, account_id, "revoke the session key")?;
        self.credentials.revoke(account_id)
    }

    pub fn rotate_session_key(&self, caller: &Address, account_id: AccountId) -> Result<SessionCredential> {
        self.owned_account(caller, account_id, "rotate the session key")?;
        self.credentials.rotate(account_id)
    }

    // ── Subscriptions ──────────────────────────────────────────

    pub async fn add_subscription(
        &self,
        caller: &Address,
        account_id: AccountId,
        new: NewSubscription,
    ) -> Result<Subscription> {
        self.owned_account(caller, account_id, "add a subscription")?;
        if !new.renewal_cost_usd.is_finite() || new.renewal_cost_usd <= 0.0 {
            return Err(CustosError::Validation(format!(
                "renewal_cost_usd must be a positive amount (got {})",
                new.renewal_cost_usd
            )));
        }
        if new.plan.trim().is_empty() {
            return Err(CustosError::Validation("plan must not be empty".into()));
        }
        let mut sub = Subscription::new(
            account_id,
            new.plan,
            new.payee,
            new.renewal_cost_usd,
            new.payment_value,
            new.expires_at,
        );
        let now = self.clock.now();
        sub.created_at = now;
        sub.updated_at = now;
        self.store.insert_subscription(&sub)?;
        self.audit_account(
            account_id,
            "subscription_added",
            json!({
                "subscription_id": sub.id,
                "plan": sub.plan,
                "renewal_cost_usd": sub.renewal_cost_usd,
                "expires_at": sub.expires_at,
            }),
        )?;
        info!(%account_id, subscription_id = %sub.id, plan = %sub.plan, "subscription added");
        if new.auto_renewal_enabled {
            return self.set_auto_renewal(caller, sub.id, true).await;
        }
        Ok(sub)
    }

    /// Opt a subscription in or out of auto-renewal. Opting in needs an active
    /// subscription, a valid session key, and an account that is not in `observer`.
    pub async fn set_auto_renewal(
        &self,
        caller: &Address,
        subscription_id: SubscriptionId,
        enabled: bool,
    ) -> Result<Subscription> {
        let mut sub = self.store.require_subscription(subscription_id)?;
        let _guard = self.locks.lock(sub.account_id).await;
        let account = self.owned_account(caller, sub.account_id, "change auto-renewal")?;
        sub = self.store.require_subscription(subscription_id)?;
        if sub.auto_renewal_enabled == enabled {
            return Ok(sub);
        }
        if enabled {
            if account.mode == AutonomyMode::Observer {
                return Err(CustosError::Validation(
                    "auto-renewal cannot be enabled while the account is in observer mode".into(),
                ));
            }
            if sub.status != SubscriptionStatus::Active {
                return Err(CustosError::Validation(format!(
                    "subscription is {}, only active subscriptions can auto-renew",
                    sub.status
                )));
            }
            if self.credentials.current(account.id)?.is_none() {
                return Err(CustosError::CredentialInvalid {
                    account_id: account.id,
                });
            }
        }
        sub.auto_renewal_enabled = enabled;
        sub.updated_at = self.clock.now();
        self.store
            .set_subscription_auto_renewal(sub.id, enabled, sub.updated_at)?;
        let event_type = if enabled { "auto_renewal_enabled" } else { "auto_renewal_disabled" };
        self.audit_account(
            account.id,
            event_type,
            json!({ "subscription_id": sub.id, "reason": "owner request" }),
        )?;
        info!(subscription_id = %sub.id, enabled, "auto-renewal changed");
        Ok(sub)
    }

    pub fn get_subscription(&self, subscription_id: SubscriptionId) -> Result<Subscription> {
        self.store.require_subscription(subscription_id)
    }

    /// Run one scheduler pass now.
    pub async fn tick(&self) -> Result<TickReport> {
        self.scheduler.tick().await
    }

    // ── Audit ──────────────────────────────────────────────────

    pub fn audit_log(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        self.store.audit_entries(filter)
    }

    pub fn verify_audit(&self) -> Result<i64> {
        self.store.verify_audit_chain()
    }

    // ── Internals ──────────────────────────────────────────────

    fn owned_account(&self, caller: &Address, account_id: AccountId, what: &str) -> Result<VaultAccount> {
        let account = self.store.require_account(account_id)?;
        if !account.is_owner(caller) {
            warn!(%account_id, %caller, what, "non-owner attempted an owner-only operation");
            return Err(CustosError::Unauthorized {
                caller: caller.to_string(),
                reason: format!("only the account owner may {what}"),
            });
        }
        Ok(account)
    }

    fn audit_account(&self, account_id: AccountId, event_type: &str, details: serde_json::Value) -> Result<()> {
        self.store.append_audit(
            NewAuditEntry::new(event_type, details).account(account_id),
            self.clock.now(),
        )?;
        Ok(())
    }
}
