//! # custos-runtime
//!
//! The stateful half of the core: session credentials, the action workflow, and the
//! subscription renewal scheduler, wired together behind [`VaultService`].
//!
//! ## Architecture
//!
//! ```text
//!     agent / owner                     renewal scheduler
//!          │                                   │ due subscriptions
//!          ▼                                   ▼
//!   ┌──────────────┐   propose/confirm  ┌──────────────┐
//!   │ VaultService │ ─────────────────▶ │   Workflow   │ ◀─ per-account lock
//!   └──────────────┘                    │              │
//!          │                            │ 1. Policy    │ ← custos-policy
//!          │ session keys               │ 2. Gate      │
//!          ▼                            │ 3. Re-check  │ ← credential lookup
//!   ┌──────────────┐                    │ 4. Execute   │ ← VaultExecutor
//!   │ Credentials  │                    │ 5. Audit     │ ← custos-store
//!   └──────────────┘                    └──────────────┘
//! ```

pub mod clock;
pub mod credentials;
pub mod executor;
pub mod locks;
pub mod mock;
pub mod scheduler;
pub mod service;
pub mod workflow;

pub use clock::{Clock, ManualClock, SystemClock};
pub use credentials::CredentialManager;
pub use executor::{DisconnectedVault, DryRunVault};
pub use locks::AccountLocks;
pub use mock::{MockOutcome, MockVault};
pub use scheduler::{RenewalOutcome, RenewalPolicy, RenewalScheduler, TickReport};
pub use service::{AccountStatus, NewSubscription, RoleCheck, VaultService};
pub use workflow::{ActionOutcome, ActionWorkflow, Proposal};
