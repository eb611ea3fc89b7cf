use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use proxy_core::{Generator, OpenSshShell, RemoteExecutionBridge, ResultCache, TaskScheduler};
use tts_proxy::{build_router, AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting TTS proxy...");

    let config = ServerConfig::from_env();
    info!(
        "Server configuration loaded: port={}, rate_limit={}/min, remote={}@{}:{}",
        config.port,
        config.rate_limit_per_minute,
        config.ssh.username,
        config.ssh.host,
        config.ssh.port
    );

    // The remote host must be reachable before we accept any request
    let shell = OpenSshShell::new(config.ssh.clone());
    let mut bridge = RemoteExecutionBridge::new(Box::new(shell), config.generation.workdir.clone());
    if let Err(e) = bridge.connect().await {
        error!("Could not connect to remote host {}: {e}", config.ssh.host);
        return Err(e).context("Remote host unreachable, not starting");
    }
    match &config.generation.interpreter {
        Some(interpreter) => {
            info!("Using configured remote interpreter {interpreter}");
            bridge = bridge.with_interpreter(interpreter.clone());
        }
        None => {
            let interpreter = bridge.ensure_interpreter(&config.generation.conda_env).await;
            info!("Detected remote interpreter {interpreter}");
        }
    }

    let cache = ResultCache::new(&config.cache_dir, &config.local_text_file_path)
        .with_context(|| format!("Failed to create cache directory {}", config.cache_dir.display()))?;
    info!("Audio cache at {}", cache.dir().display());

    let generator = Generator::new(bridge, config.generation.clone());
    let scheduler = TaskScheduler::spawn(generator, Arc::new(cache));
    let state = AppState::new(config.clone(), scheduler);

    // CORS configuration - environment-aware
    let methods = [Method::GET, Method::OPTIONS];
    let cors = match config.cors_allowed_origins.as_deref() {
        Some(allowed_origins) if !allowed_origins.is_empty() => {
            let origins: Vec<HeaderValue> = allowed_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect();
            info!("CORS configured for {} origin(s)", origins.len());
            CorsLayer::new()
                .allow_origin(tower_http::cors::AllowOrigin::list(origins))
                .allow_methods(methods)
                .allow_headers(tower_http::cors::Any)
        }
        _ => {
            warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins");
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(methods)
                .allow_headers(tower_http::cors::Any)
        }
    };

    // Global limit: every client shares the same bucket
    let per_minute = config.rate_limit_per_minute.max(1);
    let governor_conf = GovernorConfigBuilder::default()
        .period(config.rate_limit_period())
        .burst_size(per_minute)
        .key_extractor(GlobalKeyExtractor)
        .finish()
        .context("Invalid rate limit configuration")?;
    info!("Rate limiting: {} requests per minute", per_minute);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(Arc::new(governor_conf)))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors)
        .into_inner();

    let app = build_router(state).layer(middleware_stack);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT."))?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
