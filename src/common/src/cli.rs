use clap::Parser;
use std::path::PathBuf;

/// CLI arguments shared by every regsweep command
#[derive(Parser, Debug, Clone, Default)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,

    #[arg(
        long,
        global = true,
        help = "Log what would be deleted without deleting anything"
    )]
    pub dry_run: bool,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Initialize logging based on CLI arguments. `RUST_LOG` wins when set.
    pub fn init_logging(args: &CommonArgs) {
        let level = if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(args: &CommonArgs) -> Result<Configuration> {
        let mut config = match &args.config {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")?
            }
            None => Configuration::load().context("Failed to load configuration")?,
        };

        if args.dry_run {
            config.sweep.dry_run = true;
        }

        Ok(config)
    }

    /// Display configuration in human-readable or JSON format, secrets masked
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        let config = config.redacted();

        if json {
            let json = serde_json::to_string_pretty(&config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("regsweep configuration:");
            println!("=======================");
            println!("Storage DSN: {}", config.storage.dsn);
            println!("Registry root: {}", config.storage.root);
            println!("Listing page size: {}", config.storage.page_size);
            println!("Region: {}", config.storage.region);
            if let Some(endpoint) = &config.storage.endpoint {
                println!("S3 endpoint: {endpoint}");
            }
            println!("Allow HTTP: {}", config.storage.allow_http);
            match &config.cluster.kubeconfig {
                Some(path) => println!("Kubeconfig: {}", path.display()),
                None => println!("Kubeconfig: inferred"),
            }
            println!("Cluster page size: {}", config.cluster.page_size);
            println!("Concurrency: {}", config.sweep.concurrency);
            println!("Failure policy: {:?}", config.sweep.failure_policy);
            println!("Malformed keys: {:?}", config.sweep.malformed_keys);
            println!("Dry run: {}", config.sweep.dry_run);
            println!(
                "Blob grace period: {}",
                humantime_serde::re::humantime::format_duration(config.sweep.blob_grace_period)
            );
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");
        config.validate().context("Invalid configuration")?;
        log::info!("Configuration validation passed");
        Ok(())
    }

    /// Standard version information for a binary
    pub fn version_info(name: &str, version: &str) -> String {
        format!(
            "{name} {version} (rust {})",
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}
