//! Batch embedding pipeline.
//!
//! [`compute_captions_embeddings`] walks a [`CaptionsDataset`] batch by batch,
//! encodes each batch with a [`TextEncoder`], and writes one
//! [`EmbeddingArtifact`](crate::embedding::EmbeddingArtifact) per caption under
//! the output directory, mirroring the media path layout.

pub mod loader;

pub use loader::{batch_count, Batch, BatchLoader};

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use crate::dataset::CaptionsDataset;
use crate::embedding::TextEncoder;

/// Batching and display settings for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub batch_size: usize,
    /// Background threads assembling batches; 0 assembles inline.
    pub num_workers: usize,
    pub show_progress: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            batch_size: 8,
            num_workers: 2,
            show_progress: false,
        }
    }
}

/// What a completed run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSummary {
    pub captions: usize,
    pub batches: usize,
    pub output_dir: PathBuf,
}

/// Encode every caption in `dataset` and write its artifact under `output_dir`.
///
/// Batches are processed in order and items within a batch in order. Any
/// encoder or filesystem error aborts the run; artifacts already written stay
/// on disk.
pub fn compute_captions_embeddings(
    dataset: Arc<CaptionsDataset>,
    output_dir: &Path,
    encoder: &dyn TextEncoder,
    options: &PipelineOptions,
) -> Result<PipelineSummary> {
    anyhow::ensure!(options.batch_size > 0, "batch size must be at least 1");

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output directory {}", output_dir.display()))?;

    let captions = dataset.len();
    let loader = BatchLoader::new(dataset, options.batch_size, options.num_workers)?;
    let total_batches = loader.num_batches();
    info!(
        captions,
        batches = total_batches,
        batch_size = options.batch_size,
        num_workers = options.num_workers,
        "processing captions"
    );

    let pb = progress_bar(total_batches, options.show_progress)?;

    for batch in loader {
        let batch = batch?;
        let prompts = batch.prompts();

        let encoded = encoder
            .encode_batch(&prompts)
            .with_context(|| format!("encoding batch {} failed", batch.id))?;
        anyhow::ensure!(
            encoded.batch_size() == batch.len(),
            "encoder returned {} embeddings for batch {} of {} prompts",
            encoded.batch_size(),
            batch.id,
            batch.len()
        );

        for (i, item) in batch.items.iter().enumerate() {
            let output_file = resolve_output_file(output_dir, &item.output_path)?;
            if let Some(parent) = output_file.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create directory {}", parent.display()))?;
            }
            encoded
                .artifact(i, &item.prompt)?
                .save(&output_file)
                .with_context(|| format!("failed to save embedding for caption {}", item.index))?;
        }

        debug!(batch = batch.id, items = batch.len(), "batch written");
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!(captions, output_dir = %output_dir.display(), "embeddings saved");

    Ok(PipelineSummary {
        captions,
        batches: total_batches,
        output_dir: output_dir.to_path_buf(),
    })
}

/// Join a recorded output path onto `output_dir`.
///
/// Root and drive prefixes are dropped so absolute media paths still land
/// inside `output_dir`; `..` components are rejected.
pub fn resolve_output_file(output_dir: &Path, output_path: &str) -> Result<PathBuf> {
    let mut resolved = output_dir.to_path_buf();
    for component in Path::new(output_path).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                anyhow::bail!("output path escapes the output directory: {output_path}")
            }
        }
    }
    anyhow::ensure!(
        resolved != output_dir,
        "empty output path for artifact: {output_path:?}"
    );
    Ok(resolved)
}

fn progress_bar(total_batches: usize, visible: bool) -> Result<ProgressBar> {
    if !visible {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(total_batches as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner} Processing captions {bar:40.cyan/blue} {pos}/{len} batches ({elapsed}<{eta})")?
            .progress_chars("##-"),
    );
    Ok(pb)
}
