pub mod backoff;
pub mod delivery;
pub mod idempotency;
pub mod repository;
pub mod types;
