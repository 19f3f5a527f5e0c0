use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ReconcileRuns::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ReconcileRuns::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ReconcileRuns::IntegrationId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ReconcileRuns::Status).string().not_null())
                    .col(
                        ColumnDef::new(ReconcileRuns::Checked)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ReconcileRuns::DriftFixed)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ReconcileRuns::Notes).text())
                    .col(
                        ColumnDef::new(ReconcileRuns::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ReconcileRuns::FinishedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .table(ReconcileRuns::Table)
                    .col(ReconcileRuns::IntegrationId)
                    .col(ReconcileRuns::StartedAt)
                    .name("idx_reconcile_runs_integration_started_at")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ReconcileRuns::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ReconcileRuns {
    Table,
    Id,
    IntegrationId,
    Status,
    Checked,
    DriftFixed,
    Notes,
    StartedAt,
    FinishedAt,
}
