pub mod dispatch;
pub mod enqueue;
pub mod lease;
pub mod query;
pub mod reconcile;
