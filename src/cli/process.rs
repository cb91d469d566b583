//! CLI `process` command: encode every caption and save its embedding file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use caption_embed::config::{CaptionEmbedConfig, EncoderConfig};
use caption_embed::embedding;
use caption_embed::pipeline::{self, PipelineOptions};

use super::CaptionArgs;

#[derive(Args, Debug, Clone)]
pub struct ProcessArgs {
    #[command(flatten)]
    pub captions: CaptionArgs,

    /// Output directory to save text embeddings
    #[arg(long)]
    pub output_dir: PathBuf,

    /// Batch size for processing
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Background threads assembling batches (0 = load on the main thread)
    #[arg(long)]
    pub num_workers: Option<usize>,

    /// Device to use for computation (cpu, cuda, cuda:<id>)
    #[arg(long)]
    pub device: Option<String>,

    /// Load the int8-quantized text encoder to save memory
    #[arg(long)]
    pub load_text_encoder_in_8bit: bool,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,
}

impl ProcessArgs {
    /// Merge command-line flags over the config file's encoder and pipeline settings.
    fn run_settings(&self, config: &CaptionEmbedConfig) -> Result<(EncoderConfig, PipelineOptions)> {
        let options = PipelineOptions {
            batch_size: self.batch_size.unwrap_or(config.pipeline.batch_size),
            num_workers: self.num_workers.unwrap_or(config.pipeline.num_workers),
            show_progress: !self.no_progress,
        };
        anyhow::ensure!(options.batch_size > 0, "--batch-size must be at least 1");

        let mut encoder = config.encoder.clone();
        if let Some(device) = &self.device {
            encoder.device = device.clone();
        }
        if self.load_text_encoder_in_8bit {
            encoder.quantized = true;
        }
        Ok((encoder, options))
    }
}

/// Load the dataset, the encoder, and write one embedding per caption.
pub fn process(config: &CaptionEmbedConfig, args: &ProcessArgs) -> Result<()> {
    let (encoder_config, options) = args.run_settings(config)?;

    if let Some(token) = args.captions.id_token.as_deref() {
        info!(id_token = %token, "trigger token will be prepended to all captions");
    }

    let dataset = args.captions.load(&config.dataset)?;
    println!("Loaded {} captions", dataset.len());

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("  {spinner} {msg}")?);
    spinner.set_message("Loading text encoder...");
    spinner.enable_steady_tick(Duration::from_millis(100));
    let encoder = embedding::create_encoder(&encoder_config);
    spinner.finish_and_clear();
    let encoder = encoder?;

    let summary = pipeline::compute_captions_embeddings(
        Arc::new(dataset),
        &args.output_dir,
        encoder.as_ref(),
        &options,
    )
    .context("embedding run failed")?;

    println!(
        "Processed {} captions in {} batches. Embeddings saved to {}",
        summary.captions,
        summary.batches,
        summary.output_dir.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ProcessArgs {
        ProcessArgs {
            captions: CaptionArgs {
                dataset_file: PathBuf::from("meta.jsonl"),
                caption_column: None,
                media_column: None,
                id_token: None,
                remove_llm_prefixes: false,
                fail_on_duplicates: false,
            },
            output_dir: PathBuf::from("out"),
            batch_size: None,
            num_workers: None,
            device: None,
            load_text_encoder_in_8bit: false,
            no_progress: false,
        }
    }

    #[test]
    fn config_values_apply_without_flags() {
        let mut config = CaptionEmbedConfig::default();
        config.pipeline.batch_size = 16;
        config.pipeline.num_workers = 3;
        config.encoder.device = "cuda:1".into();

        let (encoder, options) = args().run_settings(&config).unwrap();
        assert_eq!(options.batch_size, 16);
        assert_eq!(options.num_workers, 3);
        assert!(options.show_progress);
        assert_eq!(encoder.device, "cuda:1");
        assert!(!encoder.quantized);
    }

    #[test]
    fn flags_override_config() {
        let mut flags = args();
        flags.batch_size = Some(2);
        flags.num_workers = Some(0);
        flags.device = Some("cuda".into());
        flags.load_text_encoder_in_8bit = true;
        flags.no_progress = true;

        let (encoder, options) = flags.run_settings(&CaptionEmbedConfig::default()).unwrap();
        assert_eq!(options.batch_size, 2);
        assert_eq!(options.num_workers, 0);
        assert!(!options.show_progress);
        assert_eq!(encoder.device, "cuda");
        assert!(encoder.quantized);
    }

    #[test]
    fn zero_batch_size_flag_is_rejected() {
        let mut flags = args();
        flags.batch_size = Some(0);
        let err = flags.run_settings(&CaptionEmbedConfig::default()).unwrap_err();
        assert!(err.to_string().contains("--batch-size"));
    }
}
