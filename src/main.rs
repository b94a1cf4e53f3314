use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, utils};
use common::cluster::create_kube_client;
use common::config::Configuration;
use common::storage::create_object_store;
use std::process::ExitCode;
use std::sync::Arc;
use sweeper::{
    ObjectStoreBackend, OpenShiftImageLister, RegistryLayout, SweepSummary, Sweeper, cancellation,
};

#[derive(Parser)]
#[command(name = "regsweep")]
#[command(about = "regsweep - garbage collector for object-storage backed image registries")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long, global = true, help = "Print summaries and configuration as JSON")]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Delete repositories that only hold upload sessions
    Uploads,
    /// Delete repositories whose manifests the cluster no longer references
    Repos,
    /// Delete blobs no repository links to anymore
    Blobs,
    /// Run uploads, repos and blobs in that order
    All,
    /// Print the effective configuration with secrets masked
    Config,
    /// Validate the configuration
    Validate,
    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    utils::init_logging(&cli.common);

    match run(&cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            log::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every stage that ran succeeded.
async fn run(cli: &Cli) -> Result<bool> {
    if cli.command == Command::Version {
        println!(
            "{}",
            utils::version_info(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
        );
        return Ok(true);
    }

    let config = utils::load_config(&cli.common)?;

    let summaries = match cli.command {
        Command::Config => {
            utils::display_config(&config, cli.json)?;
            return Ok(true);
        }
        Command::Validate => {
            utils::validate_config(&config)?;
            return Ok(true);
        }
        Command::Version => return Ok(true),
        Command::Uploads => vec![
            build_sweeper(&config)?
                .sweep_uploads()
                .await
                .context("Upload sweep failed")?,
        ],
        Command::Repos => {
            let sweeper = build_sweeper(&config)?;
            let cluster = cluster_lister(&config).await?;
            vec![
                sweeper
                    .sweep_repos(&cluster)
                    .await
                    .context("Repository sweep failed")?,
            ]
        }
        Command::Blobs => vec![
            build_sweeper(&config)?
                .sweep_blobs()
                .await
                .context("Blob sweep failed")?,
        ],
        Command::All => {
            let sweeper = build_sweeper(&config)?;
            let cluster = cluster_lister(&config).await?;
            sweeper
                .sweep_all(&cluster)
                .await
                .context("Sweep failed")?
        }
    };

    report(&summaries, cli.json)
}

fn build_sweeper(config: &Configuration) -> Result<Sweeper> {
    utils::validate_config(config)?;

    let storage =
        create_object_store(&config.storage).context("Failed to initialize object store")?;
    let backend = Arc::new(ObjectStoreBackend::from_storage(
        &storage,
        config.storage.page_size,
    ));

    let (trigger, cancellation) = cancellation();
    tokio::spawn(async move {
        match wait_for_shutdown_signal().await {
            Ok(()) => {
                log::warn!("Shutdown requested, no further deletions will be started");
                trigger.cancel();
            }
            Err(err) => log::error!("{err:#}"),
        }
    });

    Ok(Sweeper::new(
        RegistryLayout::new(config.storage.root.as_str()),
        config.sweep.clone(),
        backend.clone(),
        backend,
    )
    .with_cancellation(cancellation))
}

async fn cluster_lister(config: &Configuration) -> Result<OpenShiftImageLister> {
    let client = create_kube_client(&config.cluster)
        .await
        .context("Failed to connect to the cluster")?;
    Ok(OpenShiftImageLister::new(client, config.cluster.page_size))
}

fn report(summaries: &[SweepSummary], json: bool) -> Result<bool> {
    if json {
        let json = serde_json::to_string_pretty(summaries)
            .context("Failed to serialize sweep summaries to JSON")?;
        println!("{json}");
    }

    let success = summaries.iter().all(SweepSummary::is_success);
    if !success {
        log::warn!("Sweep finished with failures or was cancelled");
    }
    Ok(success)
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => log::info!("Received SIGINT"),
            _ = sigterm.recv() => log::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        log::info!("Received Ctrl+C");
    }

    Ok(())
}
