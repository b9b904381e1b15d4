mod cli;

use std::time::Duration;

use clap::Parser;
use cli::{Cli, Commands, RunArgs, ServeArgs};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mediaswap::api::{self, AppState};
use mediaswap::config::Config;
use mediaswap::driver;
use mediaswap::thread::MainThread;
use mediaswap::{Pipeline, QueryReport};

type AnyError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Run(args) => run(config, args).await?,
        Commands::Serve(args) => serve(config, args).await?,
        Commands::Prune => prune(config).await?,
    }

    Ok(())
}

/// Build the pipeline, designate this thread and submit the configured work
async fn start(
    config: &Config,
) -> Result<(Pipeline, MainThread, Vec<JoinHandle<QueryReport>>), AnyError> {
    let pipeline = Pipeline::from_config(config)?;
    let main = pipeline.claim_main_thread()?;

    match pipeline.prune_cache(config.cache.max_age_days).await {
        Ok(removed) => info!(removed, "Pruned stale cache entries"),
        Err(e) => tracing::warn!(error = %e, "Cache pruning failed"),
    }

    let mut handles = Vec::with_capacity(config.queries.len() + 1);
    if let Some(dir) = &config.runtime.placeholders_dir {
        handles.push(pipeline.load_placeholders(dir));
    }
    for query in config.queries.iter().cloned() {
        handles.push(pipeline.execute(query));
    }

    info!(queries = config.queries.len(), "Queries submitted");
    Ok((pipeline, main, handles))
}

async fn run(config: Config, args: RunArgs) -> Result<(), AnyError> {
    let (pipeline, main, handles) = start(&config).await?;

    let reports = driver::drive_queries(
        &pipeline,
        &main,
        config.runtime.tick(),
        handles,
        args.seconds.map(Duration::from_secs),
    )
    .await;

    let storage = pipeline.storage();
    for id in storage.identifiers() {
        info!(
            id = %id,
            kind = ?storage.media_kind(&id),
            handler = storage.handler(&id).map(|h| h.kind_name()).unwrap_or("none"),
            "Media ready"
        );
    }

    let failed: usize = reports.iter().map(|r| r.failed).sum();
    info!(
        media = storage.len(),
        failed,
        metrics = ?pipeline.metrics().snapshot(),
        "Run finished"
    );

    Ok(())
}

async fn serve(config: Config, args: ServeArgs) -> Result<(), AnyError> {
    let address = args.address.unwrap_or(config.server.bind_addr);
    let (pipeline, main, _handles) = start(&config).await?;

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(api::run(
        address,
        AppState::new(pipeline.clone()),
        async move {
            let _ = stop_rx.await;
        },
    ));

    driver::drive_until(&pipeline, &main, config.runtime.tick(), api::shutdown_signal()).await;

    let _ = stop_tx.send(());
    server.await??;

    Ok(())
}

async fn prune(config: Config) -> Result<(), AnyError> {
    let pipeline = Pipeline::from_config(&config)?;
    let removed = pipeline.prune_cache(config.cache.max_age_days).await?;
    info!(removed, dir = %config.cache.base_dir.display(), "Cache pruned");
    Ok(())
}
