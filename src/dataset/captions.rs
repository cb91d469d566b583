//! Indexed caption collection.
//!
//! [`CaptionsDataset`] keeps the loaded records untouched and stores the
//! normalized prompts alongside them, so every read of an index yields the same
//! prompt (identifier token included exactly once).

use std::path::Path;

use serde::Serialize;
use tracing::info;

use super::format::load_caption_records;
use super::normalize::normalize_prompts;
use super::{CaptionRecord, DatasetError, DuplicatePolicy};

/// Options controlling how a dataset file is read and its captions cleaned.
#[derive(Debug, Clone)]
pub struct DatasetOptions {
    pub caption_column: String,
    pub media_column: String,
    pub id_token: Option<String>,
    pub remove_llm_prefixes: bool,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        Self {
            caption_column: "caption".into(),
            media_column: "media_path".into(),
            id_token: None,
            remove_llm_prefixes: false,
            duplicate_policy: DuplicatePolicy::Warn,
        }
    }
}

/// One caption ready for encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptionItem {
    pub prompt: String,
    pub output_path: String,
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct CaptionsDataset {
    records: Vec<CaptionRecord>,
    prompts: Vec<String>,
}

impl CaptionsDataset {
    /// Load and normalize captions from a CSV, JSON or JSONL file.
    pub fn from_file(path: impl AsRef<Path>, options: &DatasetOptions) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let records = load_caption_records(
            path,
            &options.caption_column,
            &options.media_column,
            options.duplicate_policy,
        )?;
        let dataset = Self::from_records(
            records,
            options.remove_llm_prefixes,
            options.id_token.as_deref(),
        );
        info!(
            path = %path.display(),
            captions = dataset.len(),
            remove_llm_prefixes = options.remove_llm_prefixes,
            "caption dataset loaded"
        );
        Ok(dataset)
    }

    /// Build a dataset from already-loaded records.
    pub fn from_records(
        records: Vec<CaptionRecord>,
        remove_llm_prefixes: bool,
        id_token: Option<&str>,
    ) -> Self {
        let prompts = normalize_prompts(
            records.iter().map(|r| r.prompt.as_str()),
            remove_llm_prefixes,
            id_token,
        );
        Self { records, prompts }
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    /// Fetch the item at zero-based `index` in load order.
    pub fn get(&self, index: usize) -> Result<CaptionItem, DatasetError> {
        let (record, prompt) = self
            .records
            .get(index)
            .zip(self.prompts.get(index))
            .ok_or(DatasetError::IndexOutOfRange {
                index,
                len: self.len(),
            })?;
        Ok(CaptionItem {
            prompt: prompt.clone(),
            output_path: record.output_path.clone(),
            index,
        })
    }

    /// The caption exactly as it appeared in the source file.
    pub fn raw_prompt(&self, index: usize) -> Option<&str> {
        self.records.get(index).map(|r| r.prompt.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = CaptionItem> + '_ {
        self.records
            .iter()
            .zip(&self.prompts)
            .enumerate()
            .map(|(index, (record, prompt))| CaptionItem {
                prompt: prompt.clone(),
                output_path: record.output_path.clone(),
                index,
            })
    }
}
