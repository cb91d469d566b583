use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::dataset::DuplicatePolicy;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CaptionEmbedConfig {
    pub logging: LoggingConfig,
    pub encoder: EncoderConfig,
    pub dataset: DatasetConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EncoderConfig {
    /// Hugging Face repository the ONNX export is downloaded from.
    pub model: String,
    pub cache_dir: String,
    pub max_seq_len: usize,
    pub intra_threads: usize,
    /// `cpu`, `cuda` or `cuda:<id>`.
    pub device: String,
    /// Load the int8-quantized export instead of the full-precision one.
    pub quantized: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatasetConfig {
    pub caption_column: String,
    pub media_column: String,
    pub duplicate_policy: DuplicatePolicy,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub num_workers: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        let cache_dir = default_app_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            model: "Xenova/t5-small".into(),
            cache_dir,
            max_seq_len: 128,
            intra_threads: 4,
            device: "cpu".into(),
            quantized: false,
        }
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            caption_column: "caption".into(),
            media_column: "media_path".into(),
            duplicate_policy: DuplicatePolicy::Warn,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            num_workers: 2,
        }
    }
}

/// Returns `~/.caption-embed/`, or `./.caption-embed/` when no home directory is known.
pub fn default_app_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".caption-embed")
}

/// Returns the default config file path: `~/.caption-embed/config.toml`
pub fn default_config_path() -> PathBuf {
    default_app_dir().join("config.toml")
}

impl CaptionEmbedConfig {
    /// Load config from the default TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            CaptionEmbedConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (CAPTION_EMBED_LOG_LEVEL, CAPTION_EMBED_MODEL_DIR, CAPTION_EMBED_DEVICE).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CAPTION_EMBED_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("CAPTION_EMBED_MODEL_DIR") {
            self.encoder.cache_dir = val;
        }
        if let Ok(val) = std::env::var("CAPTION_EMBED_DEVICE") {
            self.encoder.device = val;
        }
    }

    /// Resolve the model cache directory, expanding `~` if needed.
    pub fn resolved_model_dir(&self) -> PathBuf {
        expand_tilde(&self.encoder.cache_dir)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
