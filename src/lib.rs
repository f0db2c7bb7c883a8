//! solvebridge - the bridge between build requests and the solver
//!
//! Loads serialized build graphs under source policy and entitlement
//! control, shares lazily-resolved cache sources across requests, and
//! hands out single-flight result proxies whose failures point back at
//! the build instructions that caused them.

pub mod bridge;
pub mod builder;
pub mod cache;
pub mod cli;
pub mod config;
pub mod entitlements;
pub mod errdefs;
pub mod error;
pub mod executor;
pub mod graph;
pub mod loader;
pub mod policy;
pub mod progress;
pub mod provenance;
pub mod result;
pub mod ui;
pub mod worker;

#[cfg(test)]
mod testutil;

pub use bridge::{Bridge, ResultProxy, SolveRequest};
pub use error::{BridgeError, BridgeResult};
