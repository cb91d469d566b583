pub mod inspect;
pub mod preview;
pub mod process;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use caption_embed::config::{CaptionEmbedConfig, DatasetConfig};
use caption_embed::dataset::{CaptionsDataset, DatasetOptions, DuplicatePolicy};
use caption_embed::embedding::{MODEL_FILE, QUANTIZED_MODEL_FILE, TOKENIZER_FILE};

const HF_BASE_URL: &str = "https://huggingface.co";

/// Dataset selection and caption cleanup flags shared by `process` and `preview`.
#[derive(Args, Debug, Clone)]
pub struct CaptionArgs {
    /// Path to metadata file (CSV/JSON/JSONL) containing captions and media paths
    pub dataset_file: PathBuf,

    /// Column name containing captions in the dataset file
    #[arg(long)]
    pub caption_column: Option<String>,

    /// Column name containing media paths (used for output file naming and folder structure)
    #[arg(long)]
    pub media_column: Option<String>,

    /// Optional token to prepend to each caption (acts as a trigger word when training a LoRA)
    #[arg(long)]
    pub id_token: Option<String>,

    /// Remove common LLM-generated prefixes from captions
    #[arg(long)]
    pub remove_llm_prefixes: bool,

    /// Fail instead of warning when two media paths map to the same output file
    #[arg(long)]
    pub fail_on_duplicates: bool,
}

impl CaptionArgs {
    pub fn dataset_options(&self, config: &DatasetConfig) -> DatasetOptions {
        DatasetOptions {
            caption_column: self
                .caption_column
                .clone()
                .unwrap_or_else(|| config.caption_column.clone()),
            media_column: self
                .media_column
                .clone()
                .unwrap_or_else(|| config.media_column.clone()),
            id_token: self.id_token.clone(),
            remove_llm_prefixes: self.remove_llm_prefixes,
            duplicate_policy: if self.fail_on_duplicates {
                DuplicatePolicy::Error
            } else {
                config.duplicate_policy
            },
        }
    }

    /// Load the dataset, failing fast when the file does not exist.
    pub fn load(&self, config: &DatasetConfig) -> Result<CaptionsDataset> {
        anyhow::ensure!(
            self.dataset_file.is_file(),
            "Dataset file not found: {}",
            self.dataset_file.display()
        );
        let dataset = CaptionsDataset::from_file(&self.dataset_file, &self.dataset_options(config))
            .with_context(|| format!("failed to load {}", self.dataset_file.display()))?;
        Ok(dataset)
    }
}

/// Download the ONNX text encoder and tokenizer to the model cache directory.
pub async fn model_download(config: &CaptionEmbedConfig, quantized: bool) -> Result<()> {
    let model_dir = config.resolved_model_dir();
    std::fs::create_dir_all(&model_dir)
        .with_context(|| format!("failed to create model dir: {}", model_dir.display()))?;

    let repo = &config.encoder.model;
    let model_file = if quantized { QUANTIZED_MODEL_FILE } else { MODEL_FILE };
    let downloads = [
        (format!("{HF_BASE_URL}/{repo}/resolve/main/onnx/{model_file}"), model_file),
        (format!("{HF_BASE_URL}/{repo}/resolve/main/{TOKENIZER_FILE}"), TOKENIZER_FILE),
    ];

    for (url, file_name) in &downloads {
        let dest = model_dir.join(file_name);
        if dest.exists() {
            println!("{file_name} already exists at {}", dest.display());
            continue;
        }
        println!("Downloading {file_name} from {repo}...");
        download_file(url, &dest).await?;
        println!("Saved to {}", dest.display());
    }

    println!("Model download complete. Ready for use.");
    Ok(())
}

/// Download a file from a URL with progress bar. Uses atomic write (tmp + rename).
async fn download_file(url: &str, dest: &Path) -> Result<()> {
    let mut response = reqwest::get(url)
        .await
        .with_context(|| format!("HTTP request failed for {url}"))?;

    anyhow::ensure!(
        response.status().is_success(),
        "download failed with HTTP {}",
        response.status()
    );

    let pb = match response.content_length() {
        Some(size) => {
            let pb = ProgressBar::new(size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")?
                    .progress_chars("##-"),
            );
            pb
        }
        None => ProgressBar::new_spinner(),
    };

    let tmp_path = dest.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;

    while let Some(chunk) = response.chunk().await.context("error reading response")? {
        file.write_all(&chunk)
            .await
            .context("error writing to file")?;
        pb.inc(chunk.len() as u64);
    }

    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest)
        .await
        .context("failed to rename temp file")?;

    pb.finish_and_clear();
    Ok(())
}
