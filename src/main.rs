use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use bulk_annotator::{
    cli::CliArgs,
    config::Config,
    logging::init_tracing,
    pipeline::Pipeline,
    ports::ContentStore,
    providers::build_providers,
    store::snapshot,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::from_env()?;
    let config = Config::load(&args.config_path)
        .with_context(|| format!("failed to load config from {}", args.config_path.display()))?;
    let logging_guard = init_tracing(&config.logging)?;
    let session = logging_guard.session_span(&args.collection_key, config.mode);

    run(args, config).instrument(session).await
}

async fn run(args: CliArgs, config: Config) -> Result<()> {
    tracing::info!(target: "pipeline", "bulk_run_requested");
    for warning in config.warnings() {
        tracing::warn!(target: "config", warning = %warning, "config_warning");
    }

    let store = Arc::new(snapshot::load(&config.store.snapshot_path)?);
    let (primary, secondary) =
        build_providers(&config.providers).context("failed to construct annotation providers")?;
    let pipeline = Pipeline::new(
        &config,
        Arc::clone(&store) as Arc<dyn ContentStore>,
        primary,
        secondary,
    );

    let cancellation = CancellationToken::new();
    let signal_task = tokio::spawn(cancel_on_signal(cancellation.clone()).in_current_span());

    let progress = |processed: usize, total: usize| {
        tracing::info!(target: "pipeline", processed, total, "run_progress");
    };
    let result = pipeline
        .run(args.run_request(), &progress, &cancellation)
        .await;
    signal_task.abort();
    let result = result.context("bulk annotation run failed")?;

    if result.metrics.write_backs > 0 {
        snapshot::save(&store, &config.store.snapshot_path).await?;
        tracing::info!(
            target: "store",
            path = %config.store.snapshot_path.display(),
            write_backs = result.metrics.write_backs,
            "content_snapshot_saved"
        );
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("failed to serialize run result")?
    );
    Ok(())
}

async fn cancel_on_signal(cancellation: CancellationToken) -> Result<()> {
    let mut sigint =
        signal(SignalKind::interrupt()).context("unable to listen for SIGINT (Ctrl+C)")?;
    let mut sigterm = signal(SignalKind::terminate()).context("unable to listen for SIGTERM")?;

    let signal_name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    };
    tracing::warn!(target: "pipeline", signal = signal_name, "cancellation_requested");
    eprintln!("received {signal_name}; finishing the current batch");
    cancellation.cancel();
    Ok(())
}
