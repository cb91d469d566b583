//! Local ONNX Runtime text encoder.
//!
//! Implements [`TextEncoder`] over an ONNX export of a T5-style encoder via
//! `ort`. Prompts are padded to a fixed length so every artifact in a dataset
//! shares the same `[seq_len, hidden]` shape.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use ndarray::{Array2, Array3};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::{Device, EncodedPrompts, TextEncoder, MODEL_FILE, QUANTIZED_MODEL_FILE, TOKENIZER_FILE};
use crate::config::EncoderConfig;

/// Local ONNX-based text encoder.
pub struct LocalTextEncoder {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    max_seq_len: usize,
}

impl LocalTextEncoder {
    pub fn new(config: &EncoderConfig) -> Result<Self> {
        let model_dir = crate::config::expand_tilde(&config.cache_dir);
        let model_file = if config.quantized {
            QUANTIZED_MODEL_FILE
        } else {
            MODEL_FILE
        };
        let model_path = model_dir.join(model_file);
        let tokenizer_path = model_dir.join(TOKENIZER_FILE);

        anyhow::ensure!(
            model_path.exists(),
            "ONNX encoder not found at {}. Run `caption-embed model download{}` first.",
            model_path.display(),
            if config.quantized { " --quantized" } else { "" }
        );
        anyhow::ensure!(
            tokenizer_path.exists(),
            "Tokenizer not found at {}. Run `caption-embed model download` first.",
            tokenizer_path.display()
        );
        anyhow::ensure!(config.max_seq_len > 0, "encoder max_seq_len must be positive");

        let device: Device = config
            .device
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))?;

        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.intra_threads.max(1))?;
        if let Device::Cuda(device_id) = device {
            builder = with_cuda(builder, device_id)?;
        }
        let session = builder
            .commit_from_file(&model_path)
            .context("failed to load ONNX encoder")?;

        tracing::info!(
            model = %model_path.display(),
            %device,
            quantized = config.quantized,
            "ONNX encoder loaded"
        );

        let tokenizer = load_tokenizer(&tokenizer_path, config.max_seq_len)?;
        tracing::info!(tokenizer = %tokenizer_path.display(), "tokenizer loaded");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            max_seq_len: config.max_seq_len,
        })
    }
}

/// Load the tokenizer with truncation and fixed-length padding to `max_seq_len`.
fn load_tokenizer(path: &Path, max_seq_len: usize) -> Result<Tokenizer> {
    let mut tokenizer = Tokenizer::from_file(path)
        .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;

    tokenizer
        .with_truncation(Some(tokenizers::TruncationParams {
            max_length: max_seq_len,
            ..Default::default()
        }))
        .map_err(|e| anyhow::anyhow!("failed to set truncation: {e}"))?;

    tokenizer.with_padding(Some(tokenizers::PaddingParams {
        strategy: tokenizers::PaddingStrategy::Fixed(max_seq_len),
        ..Default::default()
    }));

    Ok(tokenizer)
}

#[cfg(feature = "cuda")]
fn with_cuda(builder: SessionBuilder, device_id: u32) -> Result<SessionBuilder> {
    use ort::execution_providers::CUDAExecutionProvider;

    let cuda = CUDAExecutionProvider::default().with_device_id(device_id as i32);
    Ok(builder.with_execution_providers([cuda.build()])?)
}

#[cfg(not(feature = "cuda"))]
fn with_cuda(_builder: SessionBuilder, device_id: u32) -> Result<SessionBuilder> {
    anyhow::bail!("device cuda:{device_id} requested, but caption-embed was built without the `cuda` feature")
}

impl TextEncoder for LocalTextEncoder {
    fn encode_batch(&self, prompts: &[&str]) -> Result<EncodedPrompts> {
        if prompts.is_empty() {
            return EncodedPrompts::new(
                Array3::zeros((0, self.max_seq_len, 0)),
                Array2::zeros((0, self.max_seq_len)),
            );
        }

        // Step 1: Tokenize
        let encodings = self
            .tokenizer
            .encode_batch(prompts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;

        let batch_size = encodings.len();
        let seq_len = encodings[0].get_ids().len();

        // Step 2: Build flat input tensors as i64
        let mut input_ids_flat = Vec::with_capacity(batch_size * seq_len);
        let mut attention_mask_flat = Vec::with_capacity(batch_size * seq_len);

        for encoding in &encodings {
            input_ids_flat.extend(encoding.get_ids().iter().map(|&id| id as i64));
            attention_mask_flat.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
        }

        let shape = vec![batch_size as i64, seq_len as i64];
        let input_ids_tensor =
            Tensor::from_array((shape.clone(), input_ids_flat.into_boxed_slice()))?;
        let attention_mask_tensor =
            Tensor::from_array((shape, attention_mask_flat.clone().into_boxed_slice()))?;

        // Step 3: Run ONNX inference
        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;

        let outputs = session.run(ort::inputs! {
            "input_ids" => input_ids_tensor,
            "attention_mask" => attention_mask_tensor,
        })?;

        // Step 4: Extract hidden states, shape [batch, seq_len, hidden]
        let hidden_value = outputs
            .get("last_hidden_state")
            .unwrap_or_else(|| &outputs[0]);

        let (shape, data) = hidden_value
            .try_extract_tensor::<f32>()
            .context("failed to extract last_hidden_state tensor")?;

        let dims: &[i64] = &shape;
        anyhow::ensure!(
            dims.len() == 3 && dims[0] == batch_size as i64 && dims[1] == seq_len as i64,
            "unexpected encoder output shape: {dims:?}, expected [{batch_size}, {seq_len}, hidden]"
        );
        let hidden_dim = dims[2] as usize;

        let prompt_embeds = Array3::from_shape_vec((batch_size, seq_len, hidden_dim), data.to_vec())?;
        let prompt_attention_mask = Array2::from_shape_vec((batch_size, seq_len), attention_mask_flat)?;

        EncodedPrompts::new(prompt_embeds, prompt_attention_mask)
    }
}
