// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::string_slice
)]

//! Unit tests for the Kafka broker agent
//!
//! This module contains unit tests for:
//! - Status evaluation over relation snapshots
//! - Node port exposure
//! - TLS material management
//! - Broker properties
//! - Whole reconciliation passes against in-memory collaborators

#[path = "../common/mod.rs"]
mod common;

mod agent;
mod exposure;
mod properties;
mod status;
