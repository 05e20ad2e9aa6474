use anyhow::{Context, Result};
use engine::render::RenderSettings;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, read from the environment after loading `.env`.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub genai_service_url: String,
    pub storage_dir: PathBuf,
    pub public_base_url: String,
    pub work_dir: PathBuf,
    pub render: RenderSettings,
    pub task_poll_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // A missing .env is fine; the defaults below cover local runs.
        let _ = dotenvy::dotenv();

        let bind_addr = env_or("BIND_ADDR", "127.0.0.1:7777")
            .parse::<SocketAddr>()
            .context("BIND_ADDR must be host:port")?;
        let defaults = RenderSettings::default();

        Ok(Config {
            database_path: PathBuf::from(env_or("DATABASE_PATH", ".cache/videogen.db")),
            bind_addr,
            genai_service_url: env_or("GENAI_SERVICE_URL", "http://127.0.0.1:8001"),
            storage_dir: PathBuf::from(env_or("STORAGE_DIR", ".cache/storage")),
            public_base_url: env_or("PUBLIC_BASE_URL", &format!("http://{}/media", bind_addr)),
            work_dir: PathBuf::from(env_or("WORK_DIR", ".cache/work")),
            render: RenderSettings {
                width: env_parse("OUTPUT_WIDTH", defaults.width)?,
                height: env_parse("OUTPUT_HEIGHT", defaults.height)?,
                fps: env_parse("OUTPUT_FPS", defaults.fps)?,
                sample_rate: defaults.sample_rate,
            },
            task_poll_interval: Duration::from_millis(env_parse("TASK_POLL_MS", 1000u64)?),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value {:?}", key, raw)),
        _ => Ok(default),
    }
}
