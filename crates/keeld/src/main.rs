//! keeld: the Keel daemon.
//!
//! Builds one [`KeelConfig`] from flags, environment and an optional TOML
//! file, constructs the provider (registering with the router), serves the
//! REST API, and on Ctrl-C stops every process of the rack before exiting.
//!
//! # Usage
//!
//! ```text
//! keeld serve --port 3000 --root /var/keel --router 10.42.0.0
//! keeld config --config /etc/keel.toml
//! ```

mod settings;

use std::net::SocketAddr;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use settings::ConfigArgs;

#[derive(Parser)]
#[command(name = "keeld", about = "Keel control plane daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the API until interrupted.
    Serve {
        /// Port to listen on.
        #[arg(long, env = "PORT", default_value = "3000")]
        port: u16,

        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Print the effective configuration as TOML and exit.
    Config {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Serve { port, config } => serve(port, config.resolve()?).await,
        Command::Config { config } => {
            print!("{}", config.resolve()?.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,keeld=debug,keel=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn serve(port: u16, config: keel_core::KeelConfig) -> anyhow::Result<()> {
    info!(
        rack = %config.name,
        version = %config.version,
        provider = %config.provider,
        root = %config.root.display(),
        "Keel daemon starting"
    );

    // Registration failure aborts startup.
    let provider = keel_provider::from_config(&config).await?;

    let router = keel_api::build_router(provider.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    let report = provider.shutdown().await?;
    for (id, error) in &report.failed {
        warn!(%id, %error, "process did not stop");
    }
    info!(
        stopped = report.stopped.len(),
        failed = report.failed.len(),
        "Keel daemon stopped"
    );
    Ok(())
}
