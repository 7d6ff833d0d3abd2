// crates/testbed-config/src/lib.rs
// ============================================================================
// Module: Testbed Config Library
// Description: Canonical config model and validation for Testbed.
// Purpose: Single source of truth for testbed.toml semantics.
// Dependencies: serde, thiserror, toml
// ============================================================================

//! ## Overview
//! `testbed-config` defines the configuration model for Testbed runs: where
//! tests are discovered, how many workers run them, which command executes a
//! test, and where tables are provisioned. Validation is strict and fails
//! closed.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod env;


// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use env::EnvOverrides;
pub use env::TestbedEnv;
pub use env::read_env_strict;
