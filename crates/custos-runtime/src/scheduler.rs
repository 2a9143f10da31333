//! # Renewal scheduler
//!
//! A single control loop that wakes on a fixed interval, selects subscriptions whose
//! auto-renewal is due, and pushes one renewal payment per subscription through the
//! action workflow.
//!
//! Per subscription and tick:
//! - **Backoff**: after a failure, wait `backoff[attempts - 1]` (the last step repeats)
//!   before the next attempt. After `max_attempts` consecutive failures it expires.
//! - **Claim**: an in-process in-flight set plus a leased claim row in the store keep
//!   two ticks (or two processes) from renewing the same subscription at once.
//! - **Credential**: no usable session key expires the subscription on the spot.

use chrono::{DateTime, Duration, Utc};
use custos_config::schema::RenewalConfig;
use custos_core::{
    AccountId, ActionDetails, CustosError, Event, EventBus, FailureKind, Result, Subscription,
    SubscriptionId, SubscriptionStatus,
};
use custos_store::{NewAuditEntry, Store};
use dashmap::DashSet;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::credentials::CredentialManager;
use crate::workflow::{ActionOutcome, ActionWorkflow, Proposal};

/// Scheduler timing, in chrono units so simulated clocks can drive it.
#[derive(Debug, Clone)]
pub struct RenewalPolicy {
    pub tick_interval: std::time::Duration,
    pub backoff: Vec<Duration>,
    pub max_attempts: u32,
    pub period: Duration,
    pub claim_lease: Duration,
}

impl RenewalPolicy {
    pub fn from_config(config: &RenewalConfig) -> Result<Self> {
        Ok(Self {
            tick_interval: std::time::Duration::from_secs(config.tick_interval_secs),
            backoff: config
                .backoff_secs
                .iter()
                .map(|s| seconds("renewal.backoff_secs", *s))
                .collect::<Result<_>>()?,
            max_attempts: config.max_attempts,
            period: Duration::days(i64::from(config.period_days)),
            claim_lease: seconds("renewal.claim_lease_secs", config.claim_lease_secs)?,
        })
    }

    /// Wait imposed after `attempts` consecutive failures. Non-decreasing in `attempts`
    /// for a non-decreasing schedule; the last step repeats.
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::zero();
        }
        let idx = (attempts as usize - 1).min(self.backoff.len().saturating_sub(1));
        self.backoff.get(idx).copied().unwrap_or_else(Duration::zero)
    }

    /// Earliest time the next attempt may run, if still backing off at `now`.
    pub fn retry_at(&self, sub: &Subscription, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let failed_at = sub.renewal_failed_at?;
        let at = failed_at + self.backoff_for(sub.renewal_attempts);
        (now < at).then_some(at)
    }
}

/// A configured number of seconds as a chrono duration, rejecting values chrono cannot hold.
pub(crate) fn seconds(field: &str, secs: u64) -> Result<Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| CustosError::ConfigValidation {
            field: field.to_string(),
            reason: format!("{secs}s is out of range"),
        })
}

/// What happened to one due subscription during a tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RenewalOutcome {
    Renewed { tx_hash: Option<String>, expires_at: DateTime<Utc> },
    Failed { attempts: u32, error: String },
    Expired { reason: String },
    BackingOff { until: DateTime<Utc> },
    AccountPaused,
    InFlight,
    ClaimedElsewhere,
    NotDue,
}

/// Per-tick summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub timestamp: Option<DateTime<Utc>>,
    pub due: usize,
    pub results: Vec<(SubscriptionId, RenewalOutcome)>,
    pub errors: Vec<(SubscriptionId, String)>,
}

impl TickReport {
    pub fn count(&self, pred: impl Fn(&RenewalOutcome) -> bool) -> usize {
        self.results.iter().filter(|(_, o)| pred(o)).count()
    }

    pub fn renewed(&self) -> usize {
        self.count(|o| matches!(o, RenewalOutcome::Renewed { .. }))
    }

    pub fn expired(&self) -> usize {
        self.count(|o| matches!(o, RenewalOutcome::Expired { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, RenewalOutcome::Failed { .. }))
    }
}

/// Removes the subscription from the in-flight set when dropped.
struct InFlight {
    set: Arc<DashSet<SubscriptionId>>,
    id: SubscriptionId,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

pub struct RenewalScheduler {
    store: Store,
    workflow: ActionWorkflow,
    credentials: CredentialManager,
    clock: Arc<dyn Clock>,
    events: EventBus,
    policy: RenewalPolicy,
    in_flight: Arc<DashSet<SubscriptionId>>,
    holder: String,
    shutdown: Arc<Notify>,
}

impl RenewalScheduler {
    pub fn new(
        store: Store,
        workflow: ActionWorkflow,
        credentials: CredentialManager,
        clock: Arc<dyn Clock>,
        events: EventBus,
        policy: RenewalPolicy,
    ) -> Self {
        Self {
            store,
            workflow,
            credentials,
            clock,
            events,
            policy,
            in_flight: Arc::new(DashSet::new()),
            holder: format!("scheduler-{}", Uuid::new_v4()),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn policy(&self) -> &RenewalPolicy {
        &self.policy
    }

    /// Ask a running [`RenewalScheduler::run`] loop to stop after its current tick.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run the scheduler loop. This should be spawned as a background task.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.policy.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_secs = self.policy.tick_interval.as_secs(),
            holder = %self.holder,
            "renewal scheduler started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(report) if report.due > 0 => info!(
                            due = report.due,
                            renewed = report.renewed(),
                            failed = report.failed(),
                            expired = report.expired(),
                            "renewal tick finished"
                        ),
                        Ok(_) => debug!("renewal tick: nothing due"),
                        Err(e) => error!(error = %e, "renewal tick failed"),
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("renewal scheduler stopping");
                    self.events.publish(Event::Shutdown);
                    return;
                }
            }
        }
    }

    /// One pass over every due subscription.
    pub async fn tick(&self) -> Result<TickReport> {
        let now = self.clock.now();
        let due = self.store.due_subscriptions(now)?;
        self.events.publish(Event::SchedulerTick {
            timestamp: now,
            due: due.len(),
        });
        debug!(due = due.len(), "renewal tick");

        let mut report = TickReport {
            timestamp: Some(now),
            due: due.len(),
            ..TickReport::default()
        };
        for sub in due {
            let id = sub.id;
            match self.process(sub, now).await {
                Ok(outcome) => report.results.push((id, outcome)),
                Err(e) => {
                    error!(subscription_id = %id, error = %e, "renewal processing error");
                    report.errors.push((id, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    async fn process(&self, sub: Subscription, now: DateTime<Utc>) -> Result<RenewalOutcome> {
        let account = self.store.require_account(sub.account_id)?;
        if account.paused {
            debug!(subscription_id = %sub.id, "account paused, skipping renewal");
            return Ok(RenewalOutcome::AccountPaused);
        }
        if let Some(until) = self.policy.retry_at(&sub, now) {
            debug!(subscription_id = %sub.id, %until, "renewal backing off");
            return Ok(RenewalOutcome::BackingOff { until });
        }

        if !self.in_flight.insert(sub.id) {
            return Ok(RenewalOutcome::InFlight);
        }
        let _in_flight = InFlight {
            set: Arc::clone(&self.in_flight),
            id: sub.id,
        };

        if !self
            .store
            .try_claim_subscription(sub.id, &self.holder, now, self.policy.claim_lease)?
        {
            debug!(subscription_id = %sub.id, "renewal claimed by another scheduler");
            return Ok(RenewalOutcome::ClaimedElsewhere);
        }
        let result = self.renew(sub.id, account.id, now).await;
        if let Err(e) = self.store.release_subscription_claim(sub.id, &self.holder) {
            warn!(subscription_id = %sub.id, error = %e, "failed to release renewal claim");
        }
        result
    }

    /// Runs under the account's guard until the outcome is written, so an owner opt-out
    /// either lands before the payment is submitted or after its bookkeeping.
    async fn renew(
        &self,
        id: SubscriptionId,
        account_id: AccountId,
        now: DateTime<Utc>,
    ) -> Result<RenewalOutcome> {
        let held = self.workflow.locks().lock(account_id).await;

        // Re-read under the guard and the claim; the owner may have opted out, or another
        // holder may have just renewed it.
        let sub = self.store.require_subscription(id)?;
        if !sub.is_due(now) {
            debug!(subscription_id = %id, "no longer due, skipping renewal");
            return Ok(RenewalOutcome::NotDue);
        }
        let account = self.store.require_account(account_id)?;
        if account.paused {
            return Ok(RenewalOutcome::AccountPaused);
        }

        match self.credentials.is_valid(account.id).await {
            Ok(true) => {}
            Ok(false) => {
                return self.expire(sub, "no valid session credential");
            }
            Err(e) => return self.record_failure(sub, e.to_string()),
        }

        let details = ActionDetails::Trade {
            protocol: "subscription".into(),
            pool: Some(sub.plan.clone()),
            call: sub.payment_call(),
        };
        let proposal = Proposal::renewal(account.id, sub.id, details, sub.renewal_cost_usd);
        info!(
            subscription_id = %sub.id,
            account_id = %account_id,
            value_usd = sub.renewal_cost_usd,
            "submitting renewal"
        );

        match self.workflow.propose_locked(proposal, &held).await {
            Ok(ActionOutcome::Executed(action)) => self.record_success(sub, action.tx_hash),
            Ok(ActionOutcome::Failed(action)) => {
                let error = action.error.unwrap_or_else(|| "renewal failed".into());
                if action.failure == Some(FailureKind::CredentialInvalid) {
                    self.expire(sub, &error)
                } else {
                    self.record_failure(sub, error)
                }
            }
            Ok(other) => {
                warn!(
                    subscription_id = %sub.id,
                    status = other.status(),
                    "renewal did not run to completion"
                );
                self.record_failure(sub, format!("renewal action is {}", other.status()))
            }
            Err(CustosError::CredentialInvalid { .. }) => {
                self.expire(sub, "no valid session credential")
            }
            Err(CustosError::PolicyDenied { reason, .. }) => self.expire(sub, &reason),
            Err(e) => self.record_failure(sub, e.to_string()),
        }
    }

    fn record_success(
        &self,
        mut sub: Subscription,
        tx_hash: Option<String>,
    ) -> Result<RenewalOutcome> {
        let now = self.clock.now();
        sub.expires_at += self.policy.period;
        sub.last_renewal_tx = tx_hash.clone();
        sub.renewal_failed_at = None;
        sub.renewal_attempts = 0;
        sub.updated_at = now;
        if !self.store.record_renewal_success(&sub)? {
            warn!(subscription_id = %sub.id, "subscription left active state during renewal");
        }
        self.audit(
            &sub,
            "renewal_succeeded",
            json!({ "tx_hash": tx_hash, "expires_at": sub.expires_at }),
        )?;
        info!(subscription_id = %sub.id, expires_at = %sub.expires_at, "subscription renewed");
        self.events.publish(Event::RenewalSucceeded {
            subscription_id: sub.id,
            tx_hash: tx_hash.clone(),
            expires_at: sub.expires_at,
        });
        Ok(RenewalOutcome::Renewed {
            tx_hash,
            expires_at: sub.expires_at,
        })
    }

    fn record_failure(&self, mut sub: Subscription, error: String) -> Result<RenewalOutcome> {
        let now = self.clock.now();
        sub.renewal_attempts += 1;
        sub.renewal_failed_at = Some(now);
        sub.updated_at = now;
        if sub.renewal_attempts >= self.policy.max_attempts {
            let reason = format!(
                "renewal failed {} consecutive times; last error: {error}",
                sub.renewal_attempts
            );
            return self.expire(sub, &reason);
        }

        if !self.store.record_renewal_failure(&sub)? {
            debug!(subscription_id = %sub.id, "auto-renewal withdrawn, failure not recorded");
            return Ok(RenewalOutcome::NotDue);
        }
        let retry_at = now + self.policy.backoff_for(sub.renewal_attempts);
        self.audit(
            &sub,
            "renewal_failed",
            json!({ "attempts": sub.renewal_attempts, "error": error, "retry_at": retry_at }),
        )?;
        warn!(
            subscription_id = %sub.id,
            attempts = sub.renewal_attempts,
            %retry_at,
            %error,
            "renewal failed"
        );
        self.events.publish(Event::RenewalFailed {
            subscription_id: sub.id,
            attempts: sub.renewal_attempts,
            error: error.clone(),
        });
        Ok(RenewalOutcome::Failed {
            attempts: sub.renewal_attempts,
            error,
        })
    }

    fn expire(&self, mut sub: Subscription, reason: &str) -> Result<RenewalOutcome> {
        sub.status = SubscriptionStatus::Expired;
        sub.auto_renewal_enabled = false;
        sub.updated_at = self.clock.now();
        if !self.store.expire_subscription(&sub)? {
            return Ok(RenewalOutcome::NotDue);
        }
        self.audit(
            &sub,
            "subscription_expired",
            json!({ "reason": reason, "attempts": sub.renewal_attempts }),
        )?;
        warn!(subscription_id = %sub.id, reason, "subscription expired");
        self.events.publish(Event::SubscriptionExpired {
            subscription_id: sub.id,
            reason: reason.to_string(),
        });
        Ok(RenewalOutcome::Expired {
            reason: reason.to_string(),
        })
    }

    fn audit(&self, sub: &Subscription, event_type: &str, mut details: serde_json::Value) -> Result<()> {
        if let Some(map) = details.as_object_mut() {
            map.insert("subscription_id".into(), json!(sub.id));
        }
        self.store.append_audit(
            NewAuditEntry::new(event_type, details).account(sub.account_id),
            self.clock.now(),
        )?;
        Ok(())
    }
}
