//! # custos-store
//!
//! SQLite persistence for the custos core:
//!
//! - **Accounts**: vault accounts with their owner, agent, and autonomy mode.
//! - **Session credentials**: append-only history with compare-and-swap revocation.
//! - **Actions**: every proposed action and its workflow state.
//! - **Subscriptions**: renewal bookkeeping plus the scheduler's claim lease.
//! - **Audit log**: append-only, blake3 hash-chained, exportable as JSON lines.

pub mod accounts;
pub mod actions;
pub mod audit;
pub mod credentials;
pub mod store;
pub mod subscriptions;

pub use audit::{AuditEntry, AuditFilter, GENESIS_HASH, NewAuditEntry};
pub use store::Store;
