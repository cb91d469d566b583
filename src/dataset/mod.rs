//! Caption dataset loading and normalization.
//!
//! [`format`] reads CSV, JSON and JSON-lines metadata files into ordered
//! [`CaptionRecord`]s keyed by their derived output path. [`normalize`] cleans
//! captions. [`captions::CaptionsDataset`] composes both into an indexed
//! collection consumed by the embedding pipeline.

pub mod captions;
pub mod format;
pub mod normalize;

pub use captions::{CaptionItem, CaptionsDataset, DatasetOptions};
pub use format::{derive_output_path, load_caption_records, DatasetFormat, EMBEDDING_EXTENSION};

use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// One caption keyed by the relative path its embedding artifact is written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionRecord {
    pub output_path: String,
    pub prompt: String,
}

/// What to do when two records derive the same output path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Log a warning; the later caption replaces the earlier one in place.
    #[default]
    Warn,
    /// Fail the load.
    Error,
}

/// Errors raised while loading or indexing a caption dataset.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("unsupported dataset format for {path}: expected a .csv, .json or .jsonl file")]
    UnsupportedFormat { path: PathBuf },

    #[error("malformed dataset {path}: {detail}")]
    MalformedStructure { path: PathBuf, detail: String },

    #[error("key '{key}' not found in record: {record}")]
    MissingField { key: String, record: String },

    #[error("invalid value for '{key}' in record: {record} ({reason})")]
    InvalidField {
        key: String,
        record: String,
        reason: String,
    },

    #[error("duplicate output path '{output_path}' (records {first} and {second})")]
    DuplicateOutputPath {
        output_path: String,
        first: usize,
        second: usize,
    },

    #[error("index {index} out of range for dataset of {len} captions")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path} at line {line}: {source}")]
    Json {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid CSV: {0}")]
    Csv(#[from] csv::Error),
}
