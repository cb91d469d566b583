//! Text-encoder embedding.
//!
//! Provides the [`TextEncoder`] trait, the per-batch [`EncodedPrompts`] it
//! returns, and a local implementation running an ONNX export of a T5-style
//! encoder. The encoder is created via [`create_encoder`] from configuration.
//! [`artifact`] persists one encoded caption per file.

pub mod artifact;
pub mod local;

use std::str::FromStr;

use anyhow::{Context, Result};
use ndarray::{Array2, Array3, Axis};

pub use artifact::EmbeddingArtifact;

/// Full-precision encoder export inside the model directory.
pub const MODEL_FILE: &str = "encoder_model.onnx";
/// Int8-quantized encoder export, used for reduced-precision loading.
pub const QUANTIZED_MODEL_FILE: &str = "encoder_model_quantized.onnx";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Encoder output for one batch of prompts.
///
/// Row `i` of both tensors belongs to prompt `i` of the input batch.
#[derive(Debug, Clone)]
pub struct EncodedPrompts {
    /// `[batch, seq_len, hidden]`
    pub prompt_embeds: Array3<f32>,
    /// `[batch, seq_len]`, 1 for real tokens and 0 for padding.
    pub prompt_attention_mask: Array2<i64>,
}

impl EncodedPrompts {
    pub fn new(prompt_embeds: Array3<f32>, prompt_attention_mask: Array2<i64>) -> Result<Self> {
        let (batch, seq_len, _) = prompt_embeds.dim();
        anyhow::ensure!(
            prompt_attention_mask.dim() == (batch, seq_len),
            "attention mask shape {:?} does not match embeddings shape {:?}",
            prompt_attention_mask.shape(),
            prompt_embeds.shape()
        );
        Ok(Self {
            prompt_embeds,
            prompt_attention_mask,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.prompt_embeds.len_of(Axis(0))
    }

    /// Copy item `index` out of the batch as a contiguous artifact.
    pub fn artifact(&self, index: usize, prompt: &str) -> Result<EmbeddingArtifact> {
        anyhow::ensure!(
            index < self.batch_size(),
            "item {index} out of range for batch of {}",
            self.batch_size()
        );
        let embeds = self
            .prompt_embeds
            .index_axis(Axis(0), index)
            .as_standard_layout()
            .into_owned();
        let mask = self
            .prompt_attention_mask
            .index_axis(Axis(0), index)
            .as_standard_layout()
            .into_owned();
        Ok(EmbeddingArtifact::new(embeds, mask).with_prompt(prompt))
    }
}

/// Trait for turning a batch of captions into per-token embeddings.
///
/// Implementations are synchronous and run inference only.
pub trait TextEncoder: Send + Sync {
    /// Encode `prompts`; the output batch dimension must equal `prompts.len()`.
    fn encode_batch(&self, prompts: &[&str]) -> Result<EncodedPrompts>;
}

/// Compute device for the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda(u32),
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|id| id.parse().ok())
                .map(Self::Cuda)
                .ok_or_else(|| format!("unknown device: {s}. Supported: cpu, cuda, cuda:<id>")),
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda(id) => write!(f, "cuda:{id}"),
        }
    }
}

/// Create the text encoder from config.
///
/// Returns an error if model files are not found. Run `caption-embed model download` first.
pub fn create_encoder(config: &crate::config::EncoderConfig) -> Result<Box<dyn TextEncoder>> {
    let encoder = local::LocalTextEncoder::new(config).context("failed to load text encoder")?;
    Ok(Box::new(encoder))
}
