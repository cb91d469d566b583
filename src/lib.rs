//! Precomputed text embeddings for captioned media datasets.
//!
//! caption-embed reads a metadata file describing media items and their
//! captions, cleans the captions, encodes them with a pretrained text encoder,
//! and writes one embedding file per caption. The output tree mirrors the
//! media paths, so `clips/a.mp4` gets its embedding at
//! `<output_dir>/clips/a.safetensors`.
//!
//! | Format | Extension | Layout |
//! |--------|-----------|--------|
//! | CSV | `.csv` | header row, one record per line |
//! | JSON | `.json` | a single array of objects |
//! | JSON-lines | `.jsonl` | one object per line |
//!
//! # Architecture
//!
//! - **Loading**: format dispatch on file extension, output paths derived from
//!   media paths, duplicates warned about or rejected
//! - **Normalization**: optional removal of LLM-style lead-ins ("The video
//!   shows ...") and an optional identifier token prepended to every caption
//! - **Encoding**: local ONNX Runtime encoder (T5-style), fixed-length padding
//! - **Output**: safetensors files holding `prompt_embeds` and
//!   `prompt_attention_mask`
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`dataset`]: Metadata loading, caption normalization, indexed caption collection
//! - [`embedding`]: Text encoder trait, ONNX Runtime encoder, artifact format
//! - [`pipeline`]: Ordered batch loading and the embedding run

pub mod config;
pub mod dataset;
pub mod embedding;
pub mod pipeline;
