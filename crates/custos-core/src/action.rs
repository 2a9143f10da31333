use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::CustosError;
use crate::executor::VaultCall;
use crate::types::{AccountId, ActionId, SubscriptionId};

/// The kind of operation an action performs against the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Analyze,
    Suggest,
    Trade,
    Exit,
    EmergencyExit,
    Report,
    Other,
}

impl ActionType {
    pub const ALL: [ActionType; 7] = [
        Self::Analyze,
        Self::Suggest,
        Self::Trade,
        Self::Exit,
        Self::EmergencyExit,
        Self::Report,
        Self::Other,
    ];

    /// Everything except analysis and reporting can move funds.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Self::Analyze | Self::Report)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyze => "analyze",
            Self::Suggest => "suggest",
            Self::Trade => "trade",
            Self::Exit => "exit",
            Self::EmergencyExit => "emergency_exit",
            Self::Report => "report",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = CustosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CustosError::Validation(format!("unknown action type '{s}'")))
    }
}

/// A risk-limit breach that triggered an emergency exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breach {
    /// Which monitored metric crossed its limit, e.g. "health_factor", "drawdown_pct".
    pub metric: String,
    pub observed: f64,
    pub threshold: f64,
}

/// Per-type structured details. One variant per [`ActionType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionDetails {
    Analyze {
        #[serde(default)]
        protocol: Option<String>,
        summary: String,
    },
    Suggest {
        protocol: String,
        #[serde(default)]
        pool: Option<String>,
        rationale: String,
        call: VaultCall,
    },
    Trade {
        protocol: String,
        #[serde(default)]
        pool: Option<String>,
        call: VaultCall,
    },
    Exit {
        protocol: String,
        position: String,
        call: VaultCall,
    },
    EmergencyExit {
        protocol: String,
        /// Set when the exit is the automatic response to a limit breach.
        #[serde(default)]
        breach: Option<Breach>,
        call: VaultCall,
    },
    Report {
        period: String,
        summary: String,
    },
    Other {
        label: String,
        call: VaultCall,
    },
}

impl ActionDetails {
    pub fn action_type(&self) -> ActionType {
        match self {
            Self::Analyze { .. } => ActionType::Analyze,
            Self::Suggest { .. } => ActionType::Suggest,
            Self::Trade { .. } => ActionType::Trade,
            Self::Exit { .. } => ActionType::Exit,
            Self::EmergencyExit { .. } => ActionType::EmergencyExit,
            Self::Report { .. } => ActionType::Report,
            Self::Other { .. } => ActionType::Other,
        }
    }

    /// The vault call this action would submit, if it touches the vault at all.
    pub fn vault_call(&self) -> Option<&VaultCall> {
        match self {
            Self::Suggest { call, .. }
            | Self::Trade { call, .. }
            | Self::Exit { call, .. }
            | Self::EmergencyExit { call, .. }
            | Self::Other { call, .. } => Some(call),
            Self::Analyze { .. } | Self::Report { .. } => None,
        }
    }

    pub fn breach(&self) -> Option<&Breach> {
        match self {
            Self::EmergencyExit { breach, .. } => breach.as_ref(),
            _ => None,
        }
    }
}

/// Outcome of the autonomy policy for a single action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    RequireConfirm,
    Deny,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::RequireConfirm => "require_confirm",
            Self::Deny => "deny",
        }
    }

    /// Strictness rank: a higher rank is never overridden by a lower one.
    pub fn strictness(&self) -> u8 {
        match self {
            Self::Allow => 0,
            Self::RequireConfirm => 1,
            Self::Deny => 2,
        }
    }

    /// The stricter of two decisions.
    pub fn stricter(self, other: Decision) -> Decision {
        if other.strictness() > self.strictness() {
            other
        } else {
            self
        }
    }
}

/// Workflow state of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    Proposed,
    Gated,
    Confirmed,
    Ready,
    Executing,
    Executed,
    Failed,
    Cancelled,
}

impl ActionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Gated => "gated",
            Self::Confirmed => "confirmed",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionState {
    type Err = CustosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "proposed" => Self::Proposed,
            "gated" => Self::Gated,
            "confirmed" => Self::Confirmed,
            "ready" => Self::Ready,
            "executing" => Self::Executing,
            "executed" => Self::Executed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            other => {
                return Err(CustosError::Validation(format!(
                    "unknown action state '{other}'"
                )));
            }
        })
    }
}

/// Why an action ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PolicyDenied,
    CredentialInvalid,
    ExecutionReverted,
    ExecutionTransient,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PolicyDenied => "policy_denied",
            Self::CredentialInvalid => "credential_invalid",
            Self::ExecutionReverted => "execution_reverted",
            Self::ExecutionTransient => "execution_transient",
        }
    }
}

impl FromStr for FailureKind {
    type Err = CustosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "policy_denied" => Self::PolicyDenied,
            "credential_invalid" => Self::CredentialInvalid,
            "execution_reverted" => Self::ExecutionReverted,
            "execution_transient" => Self::ExecutionTransient,
            other => {
                return Err(CustosError::Validation(format!(
                    "unknown failure kind '{other}'"
                )));
            }
        })
    }
}

/// Who produced an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOrigin {
    Agent,
    Scheduler,
}

impl ActionOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Scheduler => "scheduler",
        }
    }
}

impl FromStr for ActionOrigin {
    type Err = CustosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(Self::Agent),
            "scheduler" => Ok(Self::Scheduler),
            other => Err(CustosError::Validation(format!("unknown action origin '{other}'"))),
        }
    }
}

/// A proposed or executed operation against a vault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub account_id: AccountId,
    /// Set for renewal payments synthesized by the scheduler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<SubscriptionId>,
    pub origin: ActionOrigin,
    pub action_type: ActionType,
    pub details: ActionDetails,
    pub value_usd: f64,
    pub state: ActionState,
    /// Computed once at proposal time.
    pub confirmation_required: bool,
    pub confirmed: bool,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub executed: bool,
    pub executed_at: Option<DateTime<Utc>>,
    pub tx_hash: Option<String>,
    pub failure: Option<FailureKind>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Action {
    pub fn new(
        account_id: AccountId,
        origin: ActionOrigin,
        details: ActionDetails,
        value_usd: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            subscription_id: None,
            origin,
            action_type: details.action_type(),
            details,
            value_usd,
            state: ActionState::Proposed,
            confirmation_required: false,
            confirmed: false,
            confirmed_at: None,
            executed: false,
            executed_at: None,
            tx_hash: None,
            failure: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_subscription(mut self, subscription_id: SubscriptionId) -> Self {
        self.subscription_id = Some(subscription_id);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
