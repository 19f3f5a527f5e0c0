use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(IntegrationOutbox::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(IntegrationOutbox::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(IntegrationOutbox::IntegrationId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IntegrationOutbox::Operation)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IntegrationOutbox::StableResourceId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(IntegrationOutbox::Payload).text().not_null())
                    .col(
                        ColumnDef::new(IntegrationOutbox::IdempotencyKey)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(IntegrationOutbox::Status)
                            .string()
                            .not_null()
                            .default("queued"),
                    )
                    .col(
                        ColumnDef::new(IntegrationOutbox::AttemptCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(IntegrationOutbox::NextAttemptAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(IntegrationOutbox::LeaseOwner).string())
                    .col(ColumnDef::new(IntegrationOutbox::LeaseExpiresAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(IntegrationOutbox::LastError).text())
                    .col(
                        ColumnDef::new(IntegrationOutbox::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(IntegrationOutbox::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // Lease scan: integration + status, oldest next_attempt_at first.
        manager
            .create_index(
                Index::create()
                    .table(IntegrationOutbox::Table)
                    .col(IntegrationOutbox::IntegrationId)
                    .col(IntegrationOutbox::Status)
                    .col(IntegrationOutbox::NextAttemptAt)
                    .name("idx_integration_outbox_claim")
                    .to_owned(),
            )
            .await?;

        // Reconcile scan and stats: integration + status by age.
        manager
            .create_index(
                Index::create()
                    .table(IntegrationOutbox::Table)
                    .col(IntegrationOutbox::IntegrationId)
                    .col(IntegrationOutbox::Status)
                    .col(IntegrationOutbox::CreatedAt)
                    .name("idx_integration_outbox_status_created_at")
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(IntegrationOutbox::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum IntegrationOutbox {
    Table,
    Id,
    IntegrationId,
    Operation,
    StableResourceId,
    Payload,
    IdempotencyKey,
    Status,
    AttemptCount,
    NextAttemptAt,
    LeaseOwner,
    LeaseExpiresAt,
    LastError,
    CreatedAt,
    UpdatedAt,
}
