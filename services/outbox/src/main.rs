use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use sea_orm::Database;
use tokio_util::sync::CancellationToken;
use tracing::info;

use courier_core::config::Config;
use courier_outbox::config::OutboxConfig;
use courier_outbox::router::build_router;
use courier_outbox::state::AppState;
use courier_outbox::worker::run_background;
use courier_outbox_migration::{Migrator, MigratorTrait};

#[derive(Parser)]
#[command(about = "Integration outbox: enqueue, dispatch and reconcile external deliveries")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// HTTP API plus embedded dispatcher pool and reconcile scheduler (default)
    Serve {
        /// Serve the API only; run workers elsewhere with `work`
        #[arg(long)]
        no_workers: bool,
        /// Apply pending migrations before serving
        #[arg(long)]
        migrate: bool,
    },
    /// Dispatcher pool and reconcile scheduler without the HTTP API
    Work,
    /// Run one reconcile sweep and exit (for an external cron)
    Reconcile {
        #[arg(long)]
        integration: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    courier_core::tracing::init_tracing();

    let args = Args::parse();
    let config = OutboxConfig::try_from_env().context("load outbox config")?;
    config.validate().map_err(anyhow::Error::msg)?;

    let db = Database::connect(&config.database_url)
        .await
        .context("connect to database")?;

    let command = args.command.unwrap_or(Command::Serve {
        no_workers: false,
        migrate: false,
    });
    if let Command::Serve { migrate: true, .. } = command {
        Migrator::up(&db, None).await.context("apply migrations")?;
    }

    let port = config.outbox_port;
    let state = AppState::new(db, config)?;
    let token = CancellationToken::new();
    spawn_shutdown_signal(token.clone());

    match command {
        Command::Serve { no_workers, .. } => {
            let background = (!no_workers).then(|| {
                let state = state.clone();
                let token = token.clone();
                tokio::spawn(async move { run_background(state, token).await })
            });

            let addr = format!("0.0.0.0:{port}");
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .with_context(|| format!("bind {addr}"))?;
            info!("outbox service listening on {addr}");
            axum::serve(listener, build_router(state))
                .with_graceful_shutdown(token.clone().cancelled_owned())
                .await
                .context("server error")?;

            token.cancel();
            if let Some(handle) = background {
                handle.await.context("background workers panicked")?;
            }
        }
        Command::Work => {
            info!("outbox workers running without HTTP API");
            run_background(state, token).await;
        }
        Command::Reconcile { integration } => {
            let _guard = state.reconcile_locks.acquire(&integration).await;
            let run = state.reconcile_usecase().execute(&integration).await?;
            info!(
                run_id = %run.id,
                checked = run.checked,
                drift_fixed = run.drift_fixed,
                "one-shot reconcile finished"
            );
        }
    }
    Ok(())
}

fn spawn_shutdown_signal(token: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
            return;
        }
        info!("shutdown requested, finishing in-flight batches");
        token.cancel();
    });
}
