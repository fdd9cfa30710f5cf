//! Unified client for the relay pipeline.
//!
//! Keep the public surface small and predictable: one client, a builder, and
//! three call shapes (buffered, streaming, failover). Implementation details
//! are split into submodules under `src/client/`.

pub mod builder;
pub mod core;
mod execution;
mod failover;
pub mod validation;

pub use builder::RelayClientBuilder;
pub use core::RelayClient;
pub use validation::{RequestValidator, ValidatedMessages};
