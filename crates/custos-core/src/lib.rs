//! # custos-core
//!
//! Core types, traits, and primitives for the Custos vault authorization core.
//! This crate defines the shared vocabulary used by every other crate in the workspace:
//! vault accounts, session credentials, actions, subscriptions, the unified error type,
//! the event bus, and the vault-execution collaborator trait.

pub mod account;
pub mod action;
pub mod error;
pub mod event;
pub mod executor;
pub mod mode;
pub mod types;

pub use account::{SessionCredential, Subscription, SubscriptionStatus, VaultAccount};
pub use action::{
    Action, ActionDetails, ActionOrigin, ActionState, ActionType, Breach, Decision, FailureKind,
};
pub use error::{CustosError, Result};
pub use event::{Event, EventBus};
pub use executor::{ExecutionError, ExecutionReceipt, VaultCall, VaultExecutor};
pub use mode::AutonomyMode;
pub use types::*;
