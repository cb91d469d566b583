#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;
use caption_embed::embedding::{EncodedPrompts, TextEncoder};
use ndarray::{Array2, Array3};

pub const SEQ_LEN: usize = 6;
pub const HIDDEN: usize = 4;

/// Write `contents` to `dir/name` and return the full path.
pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// The same three captions written in each supported format.
pub fn write_all_formats(dir: &Path) -> [PathBuf; 3] {
    let csv = write_file(
        dir,
        "meta.csv",
        "caption,media_path\n\
         \"The video shows a cat, sleeping.\",videos/cat.mp4\n\
         A dog runs.,videos/dog.mov\n\
         Waves at dusk., clips/sea.mkv \n",
    );
    let json = write_file(
        dir,
        "meta.json",
        r#"[
  {"caption": "The video shows a cat, sleeping.", "media_path": "videos/cat.mp4"},
  {"caption": "A dog runs.", "media_path": "videos/dog.mov"},
  {"caption": "Waves at dusk.", "media_path": " clips/sea.mkv "}
]"#,
    );
    let jsonl = write_file(
        dir,
        "meta.jsonl",
        "{\"caption\": \"The video shows a cat, sleeping.\", \"media_path\": \"videos/cat.mp4\"}\n\
         {\"caption\": \"A dog runs.\", \"media_path\": \"videos/dog.mov\"}\n\
         {\"caption\": \"Waves at dusk.\", \"media_path\": \" clips/sea.mkv \"}\n",
    );
    [csv, json, jsonl]
}

/// Deterministic encoder: every embedding value of a prompt is derived from its
/// byte length, and the mask covers one token per word.
pub fn fake_encode(prompts: &[&str]) -> EncodedPrompts {
    let embeds = Array3::from_shape_fn((prompts.len(), SEQ_LEN, HIDDEN), |(b, s, h)| {
        prompts[b].len() as f32 + s as f32 * 0.1 + h as f32 * 0.01
    });
    let mask = Array2::from_shape_fn((prompts.len(), SEQ_LEN), |(b, s)| {
        i64::from(s < prompts[b].split_whitespace().count().min(SEQ_LEN))
    });
    EncodedPrompts::new(embeds, mask).unwrap()
}

/// Records every batch it is asked to encode.
#[derive(Default)]
pub struct RecordingEncoder {
    pub batches: Mutex<Vec<Vec<String>>>,
}

impl RecordingEncoder {
    pub fn batches(&self) -> Vec<Vec<String>> {
        self.batches.lock().unwrap().clone()
    }
}

impl TextEncoder for RecordingEncoder {
    fn encode_batch(&self, prompts: &[&str]) -> Result<EncodedPrompts> {
        self.batches
            .lock()
            .unwrap()
            .push(prompts.iter().map(|p| p.to_string()).collect());
        Ok(fake_encode(prompts))
    }
}

/// Succeeds for the first `ok_batches` calls, then fails.
pub struct FailingEncoder {
    pub ok_batches: usize,
    pub calls: Mutex<usize>,
}

impl FailingEncoder {
    pub fn new(ok_batches: usize) -> Self {
        Self {
            ok_batches,
            calls: Mutex::new(0),
        }
    }
}

impl TextEncoder for FailingEncoder {
    fn encode_batch(&self, prompts: &[&str]) -> Result<EncodedPrompts> {
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        if *calls > self.ok_batches {
            anyhow::bail!("encoder out of memory");
        }
        Ok(fake_encode(prompts))
    }
}

/// Drops the last prompt of every batch.
pub struct ShortEncoder;

impl TextEncoder for ShortEncoder {
    fn encode_batch(&self, prompts: &[&str]) -> Result<EncodedPrompts> {
        Ok(fake_encode(&prompts[..prompts.len().saturating_sub(1)]))
    }
}
