use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::CustosError;
use crate::types::Address;

/// Arguments to the vault's `execute(target, value, data)` primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultCall {
    pub target: Address,
    /// Native value in wei. Serialized as a decimal string.
    #[serde(with = "u128_string")]
    pub value: u128,
    #[serde(default)]
    pub data: Vec<u8>,
}

/// What the collaborator hands back for a submitted call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub tx_hash: String,
    #[serde(default)]
    pub output: Vec<u8>,
}

/// Failure reported by the vault-execution collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// The contract rejected the call. The reason is kept verbatim.
    #[error("{0}")]
    Reverted(String),

    #[error("vault call timed out after {after_secs}s")]
    Timeout { after_secs: u64 },

    #[error("transport error: {0}")]
    Transport(String),
}

impl ExecutionError {
    /// Network-level failures that may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport(_))
    }
}

impl From<ExecutionError> for CustosError {
    fn from(e: ExecutionError) -> Self {
        match e {
            ExecutionError::Reverted(reason) => CustosError::ExecutionReverted { reason },
            other => CustosError::SchedulerTransient(other.to_string()),
        }
    }
}

/// The on-chain vault, consumed but not implemented by this core.
///
/// `execute` is callable only by the vault owner or its registered agent/session key
/// and reverts otherwise.
#[async_trait]
pub trait VaultExecutor: Send + Sync {
    /// Submit `execute(target, value, data)` on `vault`, signed by `signer`.
    async fn execute(
        &self,
        vault: &Address,
        signer: &Address,
        call: &VaultCall,
    ) -> Result<ExecutionReceipt, ExecutionError>;

    /// Read the vault's `owner()`.
    async fn owner(&self, vault: &Address) -> Result<Address, ExecutionError>;

    /// Read the vault's `agent()`.
    async fn agent(&self, vault: &Address) -> Result<Option<Address>, ExecutionError>;
}

/// Serde adapter for `u128` values carried as decimal strings (uint256-style amounts).
pub mod u128_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u128>().map_err(serde::de::Error::custom)
    }
}
