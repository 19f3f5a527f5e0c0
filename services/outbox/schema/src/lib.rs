//! sea-orm entities for the outbox service.

pub mod integration_outbox;
pub mod reconcile_runs;
