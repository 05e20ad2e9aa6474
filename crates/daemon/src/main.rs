use axum::{response::Json, routing::get, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod db;
mod error;
mod genai;
mod jobs;
mod media;
mod orchestrator;
mod storage;
#[cfg(test)]
mod testing;

use config::Config;
use genai::http::GenAiClient;
use media::FfmpegAssembler;
use orchestrator::Pipeline;
use storage::{HttpMediaFetcher, LocalStorage};

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Arc::new(db::Database::new(&config.database_path)?);
    info!("Database initialized at {:?}", config.database_path);

    let tasks = Arc::new(jobs::TaskManager::new(db.clone()));
    let local = LocalStorage::new(&config.storage_dir, &config.public_base_url)?;
    let genai = Arc::new(GenAiClient::new(&config.genai_service_url));
    info!("Generation service at {}", config.genai_service_url);

    let pipeline = Pipeline {
        db: db.clone(),
        tasks: tasks.clone(),
        director: genai.clone(),
        images: genai.clone(),
        videos: genai,
        storage: Arc::new(local.clone()),
        fetcher: Arc::new(HttpMediaFetcher::new(Some(local))),
        assembler: Arc::new(FfmpegAssembler::new(&config.work_dir, config.render.clone())),
    };

    let processor = jobs::processor::TaskProcessor::new(pipeline.clone(), tasks.clone(), config.task_poll_interval);
    let _processor_handle = tokio::spawn(async move {
        processor.run().await;
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_credentials(false);

    let app = Router::new()
        .route("/health", get(health))
        .nest("/api", api::router(api::ApiState { pipeline, tasks }))
        .nest_service("/media", ServeDir::new(&config.storage_dir))
        .layer(cors);

    info!("Starting daemon server on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
