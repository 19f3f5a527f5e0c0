//! Identity types shared across Courier services.
//!
//! Provides the gateway-injected `IdentityHeaders` and `Operator` extractors.

pub mod identity;
