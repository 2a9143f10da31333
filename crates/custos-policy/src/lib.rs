//! # custos-policy
//!
//! The autonomy policy engine. A pure decision table maps an account's autonomy
//! mode, an action's type and value, and the configured limits to
//! allow / require-confirmation / deny. The engine layers the hard credential
//! override, the standing renewal authorization, and the daily spend cap on top.

pub mod engine;
pub mod spend;
pub mod table;

pub use custos_core::{AutonomyMode, Decision};
pub use engine::{Authorization, PolicyContext, PolicyEngine, PolicyRule, Verdict};
pub use spend::{DailySpend, SpendTracker};
pub use table::{Limits, PolicyRequest, decide};
