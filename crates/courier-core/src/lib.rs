//! Shared service plumbing for Courier services.
//!
//! Configuration loading, health handlers, request-id middleware, tracing
//! initialisation and serde helpers. No domain logic lives here.

pub mod config;
pub mod health;
pub mod middleware;
pub mod serde;
pub mod tracing;
