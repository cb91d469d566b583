//! CLI `inspect` command: display the contents of a single embedding file.

use anyhow::Result;
use std::path::Path;

use caption_embed::embedding::artifact::{ATTENTION_MASK_KEY, PROMPT_EMBEDS_KEY};
use caption_embed::embedding::EmbeddingArtifact;

pub fn inspect(path: &Path) -> Result<()> {
    let artifact = EmbeddingArtifact::load(path)?;
    let file_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

    println!("Embedding: {}", path.display());
    println!("{}", "=".repeat(50));
    println!("  File size:      {file_size} B");
    println!(
        "  {PROMPT_EMBEDS_KEY}:  f32 {:?}",
        artifact.prompt_embeds.shape()
    );
    println!(
        "  {ATTENTION_MASK_KEY}:  i64 {:?}",
        artifact.prompt_attention_mask.shape()
    );
    println!("  Tokens:         {}", artifact.token_count());
    println!();
    println!("Prompt:");
    println!("  {}", artifact.prompt.as_deref().unwrap_or("(not stored)"));

    Ok(())
}
