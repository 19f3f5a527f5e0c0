use sea_orm::entity::prelude::*;

/// Audit record of one reconciliation sweep. Written at start, finalised once at end.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "reconcile_runs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub integration_id: String,
    pub status: String,
    pub checked: i32,
    pub drift_fixed: i32,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
