use anyhow::Result;
use clap::Parser;
use quire_server::{AppState, QueryCache, RateLimiter, ServerConfig, create_router};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "quire-server", version, about = "Quire edge cache gateway")]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen host
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,
}

fn init_tracing(config: &ServerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_tracing(&config);
    info!("Starting Quire Server v{}", env!("CARGO_PKG_VERSION"));

    // Create cache backends
    let cache = Arc::new(
        QueryCache::open(
            &config.to_query_cache_config(),
            &config.cache.durable_path,
            config.cache.durable_quota_bytes,
            quire_server::core::system_clock(),
        )
        .await?,
    );
    if !config.ttl_cleanup_interval().is_zero() {
        cache.start_ttl_cleanup(config.ttl_cleanup_interval());
    }

    // Create rate limiter
    let limiter = RateLimiter::new(config.rate_limit.clone());
    if config.rate_limit.enabled && config.rate_limit.cleanup_interval_secs > 0 {
        limiter.start_cleanup(Duration::from_secs(config.rate_limit.cleanup_interval_secs));
    }

    let app = create_router(AppState { cache, limiter });

    let addr: SocketAddr = config.server_addr().parse()?;
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
