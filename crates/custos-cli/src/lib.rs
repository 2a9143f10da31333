//! # custos-cli
//!
//! Command-line interface for the custos vault authorization core.
//!
//! ## Commands
//!
//! - `custos start` — Run the renewal scheduler and the HTTP API
//! - `custos tick` — Run one renewal pass and print the report
//! - `custos audit` — Show, verify or export the audit trail
//! - `custos status` — Show an account's mode, credential and spend
//! - `custos config` — Show the effective configuration
//! - `custos doctor` — Check configuration, store and audit chain

pub mod commands;

pub use commands::Cli;
