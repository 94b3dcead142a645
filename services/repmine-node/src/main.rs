use anyhow::{bail, Context};
use repmine_core::{logging, ChangeLogApplier, NodeConfig, VersionedStore};
use repmine_node::{router, AppState};
use repmine_scheduler::{HttpLedgerClient, SubmissionScheduler};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config_path = parse_config_path(&args)?;
    let config = NodeConfig::load(config_path.as_deref()).context("failed to load configuration")?;

    logging::init_with(config.log_json);
    info!(
        config = ?config_path,
        db_path = %config.store.db_path.display(),
        auto_submit = config.scheduler.auto_submit,
        "Starting reputation miner node"
    );

    let store = Arc::new(
        VersionedStore::open(&config.store.db_path, &config.store)
            .context("failed to open versioned state store")?,
    );

    let mut scheduler_task = None;
    let mut scheduler_state = None;
    if config.scheduler.auto_submit {
        let publisher = config
            .ledger
            .publisher
            .context("ledger.publisher is required when auto_submit is enabled")?;
        let ledger = Arc::new(HttpLedgerClient::new(&config.ledger, publisher)?);
        let applier = Arc::new(ChangeLogApplier::new(store.clone(), config.applier.clone()));
        let scheduler = SubmissionScheduler::new(ledger, applier, config.scheduler.clone());
        scheduler_state = Some(scheduler.subscribe());

        scheduler_task = Some(tokio::spawn(async move {
            if let Err(e) = scheduler.run(std::future::pending()).await {
                error!(error = %e, "Submission scheduler stopped; proofs are still served");
            }
        }));
    } else {
        info!("Automatic submission disabled; serving proofs only");
    }

    let state = Arc::new(AppState::new(store, scheduler_state));
    let app = router(state);

    let listener = TcpListener::bind(&config.oracle.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.oracle.listen_addr))?;
    info!(addr = %config.oracle.listen_addr, "Proof oracle listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = scheduler_task {
        task.abort();
    }
    info!("Node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

/// `--config <path>` if given; otherwise defaults plus environment.
fn parse_config_path(args: &[String]) -> anyhow::Result<Option<PathBuf>> {
    let mut args_iter = args.iter().skip(1);
    while let Some(arg) = args_iter.next() {
        if arg == "--config" {
            match args_iter.next() {
                Some(path) => return Ok(Some(PathBuf::from(path))),
                None => bail!("--config was provided without a path"),
            }
        }
    }
    Ok(None)
}
