//! Session-key lifecycle: create, revoke, rotate, and validity checks.
//!
//! The store's record is the source of truth for whether the core considers a
//! credential usable. Registering the key with the vault contract is the caller's job.

use chrono::Duration;
use custos_core::{AccountId, Address, CustosError, Event, EventBus, Result, SessionCredential};
use custos_store::{NewAuditEntry, Store};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;

#[derive(Clone)]
pub struct CredentialManager {
    store: Store,
    clock: Arc<dyn Clock>,
    events: EventBus,
    default_ttl: Option<Duration>,
    lookup_timeout: std::time::Duration,
}

impl CredentialManager {
    pub fn new(
        store: Store,
        clock: Arc<dyn Clock>,
        events: EventBus,
        default_ttl: Option<Duration>,
        lookup_timeout: std::time::Duration,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            default_ttl,
            lookup_timeout,
        }
    }

    /// Provision a new session credential and return it.
    ///
    /// Fails with `AlreadyActive` while a live credential exists. An expired one is
    /// superseded rather than accumulated.
    pub fn create(&self, account_id: AccountId) -> Result<SessionCredential> {
        self.store.require_account(account_id)?;
        let now = self.clock.now();
        let credential = SessionCredential {
            account_id,
            address: derive_address(),
            created_at: now,
            expires_at: self.default_ttl.map(|ttl| now + ttl),
            revoked: false,
            revoked_at: None,
        };

        let superseded = self.store.insert_credential_if_vacant(&credential, now)?;
        if let Some(old) = superseded {
            self.audit_revoked(&old, "expired")?;
        }
        self.store.append_audit(
            NewAuditEntry::new(
                "credential_created",
                json!({
                    "address": credential.address,
                    "expires_at": credential.expires_at,
                }),
            )
            .account(account_id),
            now,
        )?;
        info!(%account_id, address = %credential.address, "session credential created");
        self.events.publish(Event::CredentialCreated {
            account_id,
            address: credential.address.clone(),
        });
        Ok(credential)
    }

    /// Revoke the live credential. Revoking when nothing is live is a successful no-op.
    /// Returns whether anything was revoked.
    pub fn revoke(&self, account_id: AccountId) -> Result<bool> {
        self.store.require_account(account_id)?;
        match self.store.revoke_credential(account_id, self.clock.now())? {
            Some(revoked) => {
                self.audit_revoked(&revoked, "owner_request")?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Revoke the live credential (if any) and provision a replacement.
    pub fn rotate(&self, account_id: AccountId) -> Result<SessionCredential> {
        self.revoke(account_id)?;
        self.create(account_id)
    }

    /// The credential usable right now, if any.
    pub fn current(&self, account_id: AccountId) -> Result<Option<SessionCredential>> {
        let now = self.clock.now();
        Ok(self
            .store
            .live_credential(account_id)?
            .filter(|c| c.is_valid(now)))
    }

    /// Look up the usable credential with a bounded wait, so a slow backend cannot
    /// wedge the caller. A timeout is a transient error, not "invalid".
    pub async fn lookup(&self, account_id: AccountId) -> Result<Option<SessionCredential>> {
        let manager = self.clone();
        let task = tokio::task::spawn_blocking(move || manager.current(account_id));
        match tokio::time::timeout(self.lookup_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(CustosError::SchedulerTransient(format!(
                "credential lookup task failed: {join}"
            ))),
            Err(_) => {
                warn!(%account_id, "credential lookup timed out");
                Err(CustosError::SchedulerTransient(format!(
                    "credential lookup timed out after {}ms",
                    self.lookup_timeout.as_millis()
                )))
            }
        }
    }

    /// True iff a credential exists, is not revoked, and has not expired.
    pub async fn is_valid(&self, account_id: AccountId) -> Result<bool> {
        Ok(self.lookup(account_id).await?.is_some())
    }

    fn audit_revoked(&self, credential: &SessionCredential, reason: &str) -> Result<()> {
        self.store.append_audit(
            NewAuditEntry::new(
                "credential_revoked",
                json!({ "address": credential.address, "reason": reason }),
            )
            .account(credential.account_id),
            credential.revoked_at.unwrap_or_else(|| self.clock.now()),
        )?;
        info!(
            account_id = %credential.account_id,
            address = %credential.address,
            reason,
            "session credential revoked"
        );
        self.events.publish(Event::CredentialRevoked {
            account_id: credential.account_id,
            address: credential.address.clone(),
        });
        Ok(())
    }
}

/// A fresh, unpredictable 20-byte address for the session key record.
fn derive_address() -> Address {
    let digest = blake3::hash(Uuid::new_v4().as_bytes());
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest.as_bytes()[..20]);
    Address::from_bytes(&bytes)
}
