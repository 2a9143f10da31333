//! # custos-config
//!
//! Configuration system for Custos. Reads from `custos.toml`, then applies
//! environment variable overrides, then validates.

pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::CustosConfig;
pub use schema::{ConfigWarning, WarningSeverity};
