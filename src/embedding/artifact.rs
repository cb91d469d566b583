//! On-disk embedding artifacts.
//!
//! Each caption is stored as a safetensors file holding `prompt_embeds`
//! (f32, `[seq_len, hidden]`) and `prompt_attention_mask` (i64, `[seq_len]`),
//! with the encoded prompt kept in the file metadata.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use ndarray::{Array1, Array2};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};

pub const PROMPT_EMBEDS_KEY: &str = "prompt_embeds";
pub const ATTENTION_MASK_KEY: &str = "prompt_attention_mask";
const PROMPT_METADATA_KEY: &str = "prompt";

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingArtifact {
    pub prompt_embeds: Array2<f32>,
    pub prompt_attention_mask: Array1<i64>,
    pub prompt: Option<String>,
}

impl EmbeddingArtifact {
    pub fn new(prompt_embeds: Array2<f32>, prompt_attention_mask: Array1<i64>) -> Self {
        Self {
            prompt_embeds,
            prompt_attention_mask,
            prompt: None,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Write the artifact to `path`, replacing any existing file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let embeds_bytes: Vec<u8> = self
            .prompt_embeds
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let mask_bytes: Vec<u8> = self
            .prompt_attention_mask
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();

        let embeds = TensorView::new(Dtype::F32, self.prompt_embeds.shape().to_vec(), &embeds_bytes)
            .map_err(|e| anyhow::anyhow!("invalid {PROMPT_EMBEDS_KEY} tensor: {e:?}"))?;
        let mask = TensorView::new(
            Dtype::I64,
            self.prompt_attention_mask.shape().to_vec(),
            &mask_bytes,
        )
        .map_err(|e| anyhow::anyhow!("invalid {ATTENTION_MASK_KEY} tensor: {e:?}"))?;

        let mut metadata = HashMap::from([("format".to_string(), "pt".to_string())]);
        if let Some(prompt) = &self.prompt {
            metadata.insert(PROMPT_METADATA_KEY.to_string(), prompt.clone());
        }

        safetensors::serialize_to_file(
            [(PROMPT_EMBEDS_KEY, embeds), (ATTENTION_MASK_KEY, mask)],
            &Some(metadata),
            path,
        )
        .map_err(|e| anyhow::anyhow!("failed to write {}: {e:?}", path.display()))
    }

    /// Read an artifact written by [`EmbeddingArtifact::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read artifact {}", path.display()))?;
        let tensors = SafeTensors::deserialize(&bytes)
            .map_err(|e| anyhow::anyhow!("invalid artifact {}: {e:?}", path.display()))?;

        let embeds = tensors
            .tensor(PROMPT_EMBEDS_KEY)
            .map_err(|e| anyhow::anyhow!("missing {PROMPT_EMBEDS_KEY}: {e:?}"))?;
        anyhow::ensure!(
            embeds.dtype() == Dtype::F32 && embeds.shape().len() == 2,
            "{PROMPT_EMBEDS_KEY} must be a 2-D f32 tensor, got {:?} {:?}",
            embeds.dtype(),
            embeds.shape()
        );
        let values: Vec<f32> = embeds
            .data()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let prompt_embeds =
            Array2::from_shape_vec((embeds.shape()[0], embeds.shape()[1]), values)?;

        let mask = tensors
            .tensor(ATTENTION_MASK_KEY)
            .map_err(|e| anyhow::anyhow!("missing {ATTENTION_MASK_KEY}: {e:?}"))?;
        anyhow::ensure!(
            mask.dtype() == Dtype::I64 && mask.shape().len() == 1,
            "{ATTENTION_MASK_KEY} must be a 1-D i64 tensor, got {:?} {:?}",
            mask.dtype(),
            mask.shape()
        );
        let prompt_attention_mask: Array1<i64> = mask
            .data()
            .chunks_exact(8)
            .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect();

        let (_, header) = SafeTensors::read_metadata(&bytes)
            .map_err(|e| anyhow::anyhow!("invalid artifact header {}: {e:?}", path.display()))?;
        let prompt = header
            .metadata()
            .as_ref()
            .and_then(|m| m.get(PROMPT_METADATA_KEY).cloned());

        Ok(Self {
            prompt_embeds,
            prompt_attention_mask,
            prompt,
        })
    }

    /// Number of non-padding tokens.
    pub fn token_count(&self) -> usize {
        self.prompt_attention_mask.iter().filter(|&&m| m != 0).count()
    }
}
