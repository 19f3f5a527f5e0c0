use sea_orm_migration::prelude::*;

#[tokio::main]
async fn main() {
    cli::run_cli(courier_outbox_migration::Migrator).await;
}
