//! Mock vault executor for deterministic testing.
//!
//! Returns queued outcomes without touching a chain.

use async_trait::async_trait;
use custos_core::{Address, ExecutionError, ExecutionReceipt, VaultCall, VaultExecutor};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// A queued result for the next `execute` call.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Success,
    Revert(String),
    Transport(String),
    /// Never completes; the caller's timeout has to fire.
    Hang,
    /// Waits until [`MockVault::release`] is called, then succeeds.
    Gate,
}

/// A call the mock received.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub vault: Address,
    pub signer: Address,
    pub call: VaultCall,
}

/// A scripted [`VaultExecutor`].
///
/// # Example
/// ```
/// use custos_runtime::mock::MockVault;
/// let vault = MockVault::new().with_revert("execution reverted: STF");
/// ```
#[derive(Clone, Default)]
pub struct MockVault {
    outcomes: Arc<Mutex<VecDeque<MockOutcome>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    owners: Arc<Mutex<HashMap<Address, (Address, Option<Address>)>>>,
    nonce: Arc<AtomicU64>,
    gate: Arc<Notify>,
}

impl MockVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful execution.
    pub fn with_success(self) -> Self {
        self.push(MockOutcome::Success);
        self
    }

    /// Queue a revert with the given reason.
    pub fn with_revert(self, reason: &str) -> Self {
        self.push(MockOutcome::Revert(reason.to_string()));
        self
    }

    /// Queue a transport failure.
    pub fn with_transport_error(self, msg: &str) -> Self {
        self.push(MockOutcome::Transport(msg.to_string()));
        self
    }

    /// Queue a call that never returns.
    pub fn with_hang(self) -> Self {
        self.push(MockOutcome::Hang);
        self
    }

    /// Register the on-chain roles reported by `owner()` / `agent()`.
    pub fn with_roles(self, vault: Address, owner: Address, agent: Option<Address>) -> Self {
        self.owners.lock().insert(vault, (owner, agent));
        self
    }

    /// Queue an outcome (for shared-handle access patterns).
    pub fn push(&self, outcome: MockOutcome) {
        self.outcomes.lock().push_back(outcome);
    }

    /// Let one `Gate` outcome proceed.
    pub fn release(&self) {
        self.gate.notify_one();
    }

    /// All `execute` calls received so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Pop the next queued outcome. An empty queue means success.
    fn next_outcome(&self) -> MockOutcome {
        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or(MockOutcome::Success)
    }

    fn receipt(&self) -> ExecutionReceipt {
        let n = self.nonce.fetch_add(1, Ordering::SeqCst);
        ExecutionReceipt {
            tx_hash: format!("0x{}", blake3::hash(&n.to_le_bytes()).to_hex()),
            output: Vec::new(),
        }
    }
}

#[async_trait]
impl VaultExecutor for MockVault {
    async fn execute(
        &self,
        vault: &Address,
        signer: &Address,
        call: &VaultCall,
    ) -> Result<ExecutionReceipt, ExecutionError> {
        self.calls.lock().push(RecordedCall {
            vault: vault.clone(),
            signer: signer.clone(),
            call: call.clone(),
        });
        match self.next_outcome() {
            MockOutcome::Success => Ok(self.receipt()),
            MockOutcome::Revert(reason) => Err(ExecutionError::Reverted(reason)),
            MockOutcome::Transport(msg) => Err(ExecutionError::Transport(msg)),
            MockOutcome::Hang => {
                std::future::pending::<()>().await;
                Err(ExecutionError::Transport("unreachable".into()))
            }
            MockOutcome::Gate => {
                self.gate.notified().await;
                Ok(self.receipt())
            }
        }
    }

    async fn owner(&self, vault: &Address) -> Result<Address, ExecutionError> {
        self.owners
            .lock()
            .get(vault)
            .map(|(owner, _)| owner.clone())
            .ok_or_else(|| ExecutionError::Reverted(format!("no vault at {vault}")))
    }

    async fn agent(&self, vault: &Address) -> Result<Option<Address>, ExecutionError> {
        self.owners
            .lock()
            .get(vault)
            .map(|(_, agent)| agent.clone())
            .ok_or_else(|| ExecutionError::Reverted(format!("no vault at {vault}")))
    }
}
