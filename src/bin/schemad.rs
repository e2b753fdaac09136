//! schemad: the schema reasoning daemon.
//!
//! Serves every `*.json` ontology document of `ontology_dir` over HTTP and
//! re-reads the directory every `update_interval_secs`:
//!
//! - `GET  /health`: liveness and state generation
//! - `GET  /ontologies`: loaded ontologies
//! - `POST /ontologies/{name}/{query,entails,explain,update}`
//! - `GET  /admin/shutdown`: graceful shutdown
//!
//! Configuration: defaults, then `--config <file.toml>`, then `SCHEMAD_*`
//! environment variables, then command-line flags.
//!
//! Build and run: `cargo run --bin schemad -- --ontology-dir ./ontologies`

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use miette::Result;

use schemad::config::ServerConfig;
use schemad::server::Server;
use schemad::server::handlers::knowledge_base_routes;
use schemad::source::DirectorySource;

#[derive(Parser)]
#[command(name = "schemad", version, about = "Schema reasoning daemon")]
struct Args {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Interface to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (0 picks a free port).
    #[arg(long)]
    port: Option<u16>,

    /// Seconds between ontology refreshes.
    #[arg(long)]
    interval: Option<u64>,

    /// Directory of ontology documents.
    #[arg(long)]
    ontology_dir: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        config.apply_env()?;
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(secs) = self.interval {
            config.update_interval_secs = secs;
        }
        if let Some(dir) = self.ontology_dir {
            config.ontology_dir = dir;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn")),
        )
        .init();

    let config = Args::parse().into_config()?;
    let source = Arc::new(DirectorySource::new(config.ontology_dir.clone()));
    tracing::info!(
        ontology_dir = %config.ontology_dir.display(),
        interval_secs = config.update_interval_secs,
        "schemad initialized"
    );

    let server = Server::new(config, source, knowledge_base_routes());
    if let Err(e) = server.start().await {
        // A failed refresh schedule leaves the listener up; release it.
        if let Err(stop_err) = server.stop().await {
            tracing::debug!(error = %stop_err, "cleanup after failed start");
        }
        return Err(e.into());
    }

    tokio::select! {
        () = shutdown_signal() => {
            tracing::info!("signal received");
            server.stop().await?;
        }
        () = server.wait_stopped() => {}
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
