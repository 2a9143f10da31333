use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CustosError;
use crate::executor::VaultCall;
use crate::mode::AutonomyMode;
use crate::types::{AccountId, Address, SubscriptionId};

/// A user's custodial vault and the delegation settings attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultAccount {
    pub id: AccountId,
    /// The vault contract the collaborator calls `execute` on.
    pub vault: Address,
    /// Exactly one owner, fixed at creation.
    pub owner: Address,
    /// Delegated agent. Only the owner may change it.
    pub agent: Option<Address>,
    pub mode: AutonomyMode,
    pub paused: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VaultAccount {
    pub fn new(vault: Address, owner: Address, agent: Option<Address>, mode: AutonomyMode) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            vault,
            owner,
            agent,
            mode,
            paused: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owner(&self, caller: &Address) -> bool {
        &self.owner == caller
    }
}

/// A delegated signing capability (session key) for one account.
///
/// Never physically deleted. `revoked` only ever goes from false to true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCredential {
    pub account_id: AccountId,
    pub address: Address,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl SessionCredential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// Usable: not revoked and not past its expiry.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Expired,
    Pending,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Pending => "pending",
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = CustosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "cancelled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            "pending" => Ok(Self::Pending),
            other => Err(CustosError::Validation(format!(
                "unknown subscription status '{other}'"
            ))),
        }
    }
}

/// A recurring payment the scheduler may renew on the owner's behalf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub account_id: AccountId,
    pub plan: String,
    pub status: SubscriptionStatus,
    /// Recipient of the renewal payment.
    pub payee: Address,
    /// The pre-agreed fee. Renewals for exactly this amount ride the standing authorization.
    pub renewal_cost_usd: f64,
    /// Native value sent with the payment call, in wei.
    #[serde(with = "crate::executor::u128_string")]
    pub payment_value: u128,
    pub expires_at: DateTime<Utc>,
    /// Off until the owner explicitly opts in.
    pub auto_renewal_enabled: bool,
    pub last_renewal_tx: Option<String>,
    pub renewal_failed_at: Option<DateTime<Utc>>,
    /// Consecutive failed renewal attempts since the last success.
    pub renewal_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(
        account_id: AccountId,
        plan: impl Into<String>,
        payee: Address,
        renewal_cost_usd: f64,
        payment_value: u128,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id,
            plan: plan.into(),
            status: SubscriptionStatus::Active,
            payee,
            renewal_cost_usd,
            payment_value,
            expires_at,
            auto_renewal_enabled: false,
            last_renewal_tx: None,
            renewal_failed_at: None,
            renewal_attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.auto_renewal_enabled && self.status == SubscriptionStatus::Active && self.expires_at <= now
    }

    /// The vault call that pays one renewal period.
    pub fn payment_call(&self) -> VaultCall {
        VaultCall {
            target: self.payee.clone(),
            value: self.payment_value,
            data: Vec::new(),
        }
    }
}
