//! Application entrypoint and state wiring.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use cupchain_ledger::{
    build_router, Analyzer, AppState, FileStore, LocalAuditor, NodeConfig, RemoteAnalyzer,
};
use tracing_subscriber::EnvFilter;

/// Serve the booking ledger over HTTP.
#[derive(Parser, Debug)]
#[command(name = "cupchain-node", version, about)]
struct Args {
    /// TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address (overrides config).
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Directory holding the stored chain (overrides config).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log filter, e.g. `info` or `cupchain_ledger=debug` (overrides config).
    #[arg(long)]
    log_level: Option<String>,

    /// Remote text-analysis endpoint (overrides config).
    #[arg(long)]
    analysis_url: Option<String>,
}

fn resolve_config(args: Args) -> anyhow::Result<NodeConfig> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if let Some(url) = args.analysis_url {
        config.analysis_url = Some(url);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = resolve_config(Args::parse())?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // 1) storage
    let store = FileStore::new(&config.data_dir)
        .with_context(|| format!("create data dir {}", config.data_dir.display()))?;
    tracing::info!(path = %config.data_dir.display(), "using data directory");

    // 2) analysis collaborator
    let analyzer: Arc<dyn Analyzer> = match &config.analysis_url {
        Some(url) => {
            tracing::info!(%url, "using remote analysis service");
            Arc::new(RemoteAnalyzer::new(url.clone()))
        }
        None => Arc::new(LocalAuditor::new()),
    };

    // 3) load chain and shared state
    let state = AppState::open(Arc::new(store), analyzer, config.analysis_timeout());

    // 4) serve
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;
    tracing::info!("running on http://{}", config.bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
