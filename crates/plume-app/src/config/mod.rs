//! Configuration loading and XDG path helpers.

use std::path::PathBuf;

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::paths::{AppPaths, PathError};
use crate::text::ChunkingConfig;

const CONFIG_FILE: &str = "config/settings";

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error(transparent)]
    Paths(#[from] PathError),
    #[error(transparent)]
    Build(#[from] config::ConfigError),
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub engine: EngineConfig,
    pub chunking: ChunkingConfig,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub path: PathBuf,
}

/// Settings for the external correction engine.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    pub model: String,
    pub temperature: f32,
    /// Per-attempt deadline for correction calls, in milliseconds.
    pub timeout_ms: u64,
    /// Total attempts per engine call, including the first one.
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Corrections whose replacement exceeds this word count get the whole
    /// chunk response rejected and retried with feedback.
    pub max_correction_words: usize,
    /// Overrides the engine endpoint; tests point this at a mock server.
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Concurrency and batching knobs for the pipeline stages.
#[derive(Debug, Deserialize, Clone)]
pub struct PipelineSettings {
    pub chunk_concurrency: usize,
    pub verify_concurrency: usize,
    pub verify_batch_size: usize,
    /// Optional editorial style guide appended to the correction prompt.
    #[serde(default)]
    pub style_guide: Option<String>,
}

pub fn load() -> Result<AppConfig, AppConfigError> {
    let default_storage = default_storage_path()?;
    let builder = Config::builder()
        .set_default("server.listen_addr", "127.0.0.1:8080")?
        .set_default(
            "storage.path",
            default_storage.to_string_lossy().to_string(),
        )?
        .set_default("engine.model", "gpt-4.1")?
        .set_default("engine.temperature", 0.1)?
        .set_default("engine.timeout_ms", 60_000)?
        .set_default("engine.max_retries", 3)?
        .set_default("engine.retry_delay_ms", 1_000)?
        .set_default("engine.max_correction_words", 18)?
        .set_default("chunking.max_tokens_per_chunk", 1_000)?
        .set_default("chunking.chars_per_token", 4)?
        .set_default("chunking.overlap_sentences", 3)?
        .set_default("pipeline.chunk_concurrency", 20)?
        .set_default("pipeline.verify_concurrency", 10)?
        .set_default("pipeline.verify_batch_size", 15)?
        .add_source(File::with_name(CONFIG_FILE).required(false))
        .add_source(Environment::with_prefix("PLUME").separator("__"));

    let cfg = builder.build()?.try_deserialize()?;
    Ok(cfg)
}

fn default_storage_path() -> Result<PathBuf, AppConfigError> {
    Ok(AppPaths::from_project_dirs()?.data_dir())
}
