use clap::{Parser, Subcommand};
use config::{resolve_config_path, BlobsiteConfig};
use std::path::Path;
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod config;
pub mod init;
pub mod plan;
pub mod publish;
pub mod version;

#[derive(Parser)]
#[command(name = "blobsite")]
#[command(author = "Blobsite Project")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Publish static sites to decentralized blob storage", long_about = None)]
pub struct Cli {
    /// Path to config file (default: ./blobsite.toml, then ~/.config/blobsite/config.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Publish a site directory
    Publish {
        /// Directory holding the built site (overrides site.path)
        #[arg(long)]
        path: Option<String>,

        /// Existing site object to update instead of creating a new site
        #[arg(long)]
        site_object_id: Option<String>,

        /// Storage epochs to reserve
        #[arg(long)]
        epochs: Option<u32>,

        /// Attempts per storage node write (0 uses the default)
        #[arg(long)]
        retry_limit: Option<u32>,

        /// Path to file containing the hex signing key
        #[arg(long)]
        signer_key_file: Option<String>,

        /// Skip the post-publish notification
        #[arg(long)]
        no_notify: bool,
    },

    /// Show how a directory would be split into blobs, without publishing
    Plan {
        /// Directory holding the built site (overrides site.path)
        #[arg(long)]
        path: Option<String>,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a default configuration file
    Init {
        /// Where to write the config (default: ./blobsite.toml)
        #[arg(long)]
        output: Option<String>,

        /// Also generate a signing key and store it at this path
        #[arg(long)]
        key_file: Option<String>,

        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },

    /// Display version information
    Version,
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = cli.config;
    let log_level = cli.log_level;

    match cli.command {
        Commands::Publish {
            path,
            site_object_id,
            epochs,
            retry_limit,
            signer_key_file,
            no_notify,
        } => {
            publish::execute(
                config_path,
                log_level,
                publish::PublishArgs {
                    path,
                    site_object_id,
                    epochs,
                    retry_limit,
                    signer_key_file,
                    no_notify,
                },
            )
            .await
        }
        Commands::Plan { path, json } => plan::execute(config_path, log_level, path, json).await,
        Commands::Init {
            output,
            key_file,
            force,
        } => init::execute(output, key_file, force),
        Commands::Version => {
            version::execute();
            Ok(())
        }
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Load the configuration and start logging at its level.
///
/// A missing config file falls back to the defaults with a warning.
pub fn prepare(
    config_path: Option<String>,
    log_level: Option<String>,
) -> Result<BlobsiteConfig, Box<dyn std::error::Error>> {
    let path = resolve_config_path(config_path.as_deref().map(Path::new));
    let (config, found) = BlobsiteConfig::load_or_default(&path)?;

    init_logging(log_level.as_deref().unwrap_or(&config.logging.level));
    if found {
        debug!(config = %path.display(), "loaded configuration");
    } else {
        warn!(config = %path.display(), "config file not found, using defaults");
    }

    Ok(config)
}
