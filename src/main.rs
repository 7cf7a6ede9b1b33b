mod config;
mod db;
mod error;
mod handlers;
mod models;
mod services;
mod static_files;
mod storage;
mod vectors;

use handlers::{gallery, search, trash, vectors as vector_handlers};

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::services::{ImageProcessor, LibraryService};
use crate::storage::BlobStore;
use crate::vectors::{HttpEmbedder, SqliteVectorIndex};

#[derive(Parser)]
#[command(name = "picseek", about = "Image library with thumbnails, trash and text search")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default)
    Serve,
    /// Embed active images that have no vector yet
    EmbedMissing,
    /// Recompute the vector of every active image
    Reembed,
    /// Remove vectors whose image is no longer active
    Reconcile,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub library: Arc<LibraryService>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "picseek=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Arc::new(Config::load()?);
    tracing::info!("Configuration loaded");

    let library = Arc::new(build_library(&config).await?);

    let result = run(cli.command.unwrap_or(Commands::Serve), config, library.clone()).await;

    library.close().await;
    tracing::info!("Stores closed");
    result
}

async fn run(command: Commands, config: Arc<Config>, library: Arc<LibraryService>) -> anyhow::Result<()> {
    match command {
        Commands::Serve => serve(config, library).await?,
        Commands::EmbedMissing => {
            let report = library.embed_missing().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Reembed => {
            let report = library.reembed_all().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Reconcile => {
            let removed = library.reconcile_vectors().await?;
            println!("Removed {} orphaned vector(s)", removed);
        }
    }
    Ok(())
}

async fn build_library(config: &Config) -> anyhow::Result<LibraryService> {
    let blobs = BlobStore::open(&config.storage).await?;
    tracing::info!("Blob store initialized ({})", blobs.storage_type());

    let embedder = Arc::new(HttpEmbedder::new(&config.embedding)?);
    let vectors = SqliteVectorIndex::open(&config.vectors.path, embedder).await?;

    Ok(LibraryService::new(
        blobs,
        Arc::new(vectors),
        ImageProcessor::new(&config.images),
        config.search.clone(),
    ))
}

async fn serve(config: Arc<Config>, library: Arc<LibraryService>) -> anyhow::Result<()> {
    tracing::info!("Starting picseek...");

    let state = AppState {
        config: config.clone(),
        library,
    };
    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

async fn health() -> &'static str {
    "OK"
}

fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Gallery
        .route(
            "/images",
            get(gallery::list_images).post(gallery::upload_images),
        )
        .route("/images/:name", get(gallery::get_image))
        .route("/images/:name/thumb", get(gallery::get_thumbnail))
        .route("/images/:name/command", post(gallery::run_command))
        // Trash
        .route("/trash", get(trash::list_trash))
        .route("/trash/:name/thumb", get(trash::get_trash_thumbnail))
        // Search
        .route("/search", get(search::search))
        // Vector maintenance
        .route("/vectors/status", get(vector_handlers::status))
        .route("/vectors/reembed", post(vector_handlers::reembed))
        .route("/vectors/embed-missing", post(vector_handlers::embed_missing))
        .route("/vectors/reconcile", post(vector_handlers::reconcile))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(state.config.server.max_upload_bytes));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health))
        .fallback_service(static_files::spa_service(&state.config.server.frontend_dir))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
