//! # fleetctl-common
//!
//! Shared types, the error taxonomy, configuration models, and constants
//! used across the entire fleetctl workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and provides the view model that the runtime produces
//! and that every client consumes.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
