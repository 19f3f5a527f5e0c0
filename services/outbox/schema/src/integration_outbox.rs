use sea_orm::entity::prelude::*;

/// One durable record per logical side-effecting operation bound for an external integration.
///
/// `idempotency_key` is unique; `status` holds an `OutboxStatus` string.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "integration_outbox")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub integration_id: String,
    pub operation: String,
    pub stable_resource_id: String,
    /// Canonical JSON text of the operation payload.
    #[sea_orm(column_type = "Text")]
    pub payload: String,
    #[sea_orm(unique)]
    pub idempotency_key: String,
    pub status: String,
    pub attempt_count: i32,
    pub next_attempt_at: chrono::DateTime<chrono::Utc>,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<chrono::DateTime<chrono::Utc>>,
    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
