use crate::config::{Config, ProfileCatalog};
use crate::streaming::{self, start_sweeper, SessionRegistry};
use anyhow::{Context, Result};
use axum::{
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use kino_av::{FfprobeProber, Prober, ToolPaths};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

pub mod routes_api;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    /// Encode profiles from `[transcoding]`
    pub profiles: Arc<ProfileCatalog>,
    /// Live transcoding sessions
    pub registry: Arc<SessionRegistry>,
    pub prober: Arc<dyn Prober>,
    pub tools: Arc<ToolPaths>,
    /// Absolute parent directory of session working directories
    pub tmp_dir: Arc<PathBuf>,
}

impl AppContext {
    /// Build a context around an explicit prober and tool set.
    pub fn new(config: Config, tools: ToolPaths, prober: Arc<dyn Prober>) -> Result<Self> {
        let tmp_dir = &config.transcoding.tmp_dir;
        let tmp_dir = if tmp_dir.is_absolute() {
            tmp_dir.clone()
        } else {
            std::env::current_dir()
                .context("Failed to resolve working directory")?
                .join(tmp_dir)
        };

        Ok(Self {
            profiles: Arc::new(ProfileCatalog::new(config.transcoding.profiles.clone())),
            registry: Arc::new(SessionRegistry::new(config.transcoding.max_sessions)),
            prober,
            tools: Arc::new(tools),
            tmp_dir: Arc::new(tmp_dir),
            config: Arc::new(config),
        })
    }

    /// Build a context that probes with ffprobe, discovering both tools.
    pub fn from_config(config: Config) -> Result<Self> {
        let tools = ToolPaths::discover(
            config.tools.ffmpeg_path.as_deref(),
            config.tools.ffprobe_path.as_deref(),
        );
        let prober = Arc::new(FfprobeProber::new(tools.ffprobe.clone()));
        Self::new(config, tools, prober)
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext, static_dir: Option<PathBuf>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::RANGE]);

    let mut app = Router::new()
        .route("/health", get(health_check))
        .nest("/api", routes_api::api_routes())
        .nest("/api/stream", streaming::stream_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx);

    // Serve static files if directory is provided
    // Uses SPA fallback: serves index.html for any route that doesn't match a file
    if let Some(dir) = static_dir {
        if dir.exists() {
            tracing::info!("Serving static files from {:?}", dir);
            let index_path = dir.join("index.html");
            app = app.fallback_service(
                ServeDir::new(&dir)
                    .append_index_html_on_directories(true)
                    .not_found_service(ServeFile::new(index_path)),
            );
        }
    }

    app
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Start the HTTP server, the session sweeper, and tear every session down
/// on shutdown.
pub async fn start_server(ctx: AppContext) -> Result<()> {
    let config = ctx.config.clone();
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    tokio::fs::create_dir_all(ctx.tmp_dir.as_path())
        .await
        .with_context(|| format!("Failed to create transcoding directory {:?}", ctx.tmp_dir))?;

    let transcoding = &config.transcoding;
    let sweeper = start_sweeper(
        ctx.registry.clone(),
        transcoding.sweep_interval(),
        transcoding.idle_timeout(),
    );

    let registry = ctx.registry.clone();
    let app = create_router(ctx, config.server.static_dir.clone());

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.abort();
    let killed = registry.drain().await;
    if killed > 0 {
        tracing::info!(killed, "Stopped remaining transcoding sessions");
    }

    served?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
