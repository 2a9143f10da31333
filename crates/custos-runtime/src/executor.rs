//! Built-in vault executors for running without a chain backend.

use async_trait::async_trait;
use custos_core::{Address, ExecutionError, ExecutionReceipt, VaultCall, VaultExecutor};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// Accepts every call and returns a synthetic transaction hash.
#[derive(Debug, Default)]
pub struct DryRunVault {
    nonce: AtomicU64,
}

impl DryRunVault {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VaultExecutor for DryRunVault {
    async fn execute(
        &self,
        vault: &Address,
        signer: &Address,
        call: &VaultCall,
    ) -> Result<ExecutionReceipt, ExecutionError> {
        let n = self.nonce.fetch_add(1, Ordering::SeqCst);
        let mut hasher = blake3::Hasher::new();
        hasher.update(vault.as_str().as_bytes());
        hasher.update(signer.as_str().as_bytes());
        hasher.update(call.target.as_str().as_bytes());
        hasher.update(&call.value.to_le_bytes());
        hasher.update(&call.data);
        hasher.update(&n.to_le_bytes());
        let tx_hash = format!("0x{}", hasher.finalize().to_hex());
        info!(%vault, %signer, target = %call.target, value = %call.value, %tx_hash, "dry-run vault call");
        Ok(ExecutionReceipt {
            tx_hash,
            output: Vec::new(),
        })
    }

    async fn owner(&self, vault: &Address) -> Result<Address, ExecutionError> {
        Err(ExecutionError::Transport(format!(
            "dry-run executor cannot read owner() of {vault}"
        )))
    }

    async fn agent(&self, vault: &Address) -> Result<Option<Address>, ExecutionError> {
        Err(ExecutionError::Transport(format!(
            "dry-run executor cannot read agent() of {vault}"
        )))
    }
}

/// Fails every call as a transport error. Used when no backend is configured, so
/// nothing is ever reported as executed that was not.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisconnectedVault;

#[async_trait]
impl VaultExecutor for DisconnectedVault {
    async fn execute(
        &self,
        vault: &Address,
        _signer: &Address,
        _call: &VaultCall,
    ) -> Result<ExecutionReceipt, ExecutionError> {
        warn!(%vault, "vault call attempted with no execution backend configured");
        Err(ExecutionError::Transport("no vault execution backend configured".into()))
    }

    async fn owner(&self, _vault: &Address) -> Result<Address, ExecutionError> {
        Err(ExecutionError::Transport("no vault execution backend configured".into()))
    }

    async fn agent(&self, _vault: &Address) -> Result<Option<Address>, ExecutionError> {
        Err(ExecutionError::Transport("no vault execution backend configured".into()))
    }
}
