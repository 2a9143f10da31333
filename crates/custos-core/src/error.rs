use thiserror::Error;
use uuid::Uuid;

/// Unified error type for the entire Custos core.
#[derive(Error, Debug)]
pub enum CustosError {
    // ── Policy errors ──────────────────────────────────────────
    #[error("policy denied action {action_id}: {reason}")]
    PolicyDenied { action_id: Uuid, reason: String },

    // ── Credential errors ──────────────────────────────────────
    #[error("no valid session credential for account {account_id}")]
    CredentialInvalid { account_id: Uuid },

    #[error("account {account_id} already has an active session credential")]
    AlreadyActive { account_id: Uuid },

    // ── Caller / validation errors ─────────────────────────────
    #[error("caller {caller} not authorized: {reason}")]
    Unauthorized { caller: String, reason: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("action not found: {0}")]
    ActionNotFound(Uuid),

    #[error("subscription not found: {0}")]
    SubscriptionNotFound(Uuid),

    // ── Execution errors ───────────────────────────────────────
    #[error("vault execution reverted: {reason}")]
    ExecutionReverted { reason: String },

    #[error("transient scheduler failure: {0}")]
    SchedulerTransient(String),

    // ── Store errors ───────────────────────────────────────────
    #[error("store error: {0}")]
    Store(String),

    #[error("audit chain broken at entry {seq}: {reason}")]
    AuditChainBroken { seq: i64, reason: String },

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    #[error("config validation failed: {field}: {reason}")]
    ConfigValidation { field: String, reason: String },

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CustosError {
    /// Stable machine-readable kind, used by the HTTP layer and audit exports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PolicyDenied { .. } => "policy_denied",
            Self::CredentialInvalid { .. } => "credential_invalid",
            Self::AlreadyActive { .. } => "already_active",
            Self::Unauthorized { .. } => "unauthorized",
            Self::Validation(_) => "validation",
            Self::AccountNotFound(_) => "account_not_found",
            Self::ActionNotFound(_) => "action_not_found",
            Self::SubscriptionNotFound(_) => "subscription_not_found",
            Self::ExecutionReverted { .. } => "execution_reverted",
            Self::SchedulerTransient(_) => "scheduler_transient",
            Self::Store(_) => "store",
            Self::AuditChainBroken { .. } => "audit_chain_broken",
            Self::Config(_) | Self::ConfigValidation { .. } => "config",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, CustosError>;
