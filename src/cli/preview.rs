//! CLI `preview` command: show normalized captions without loading the encoder.

use anyhow::Result;
use clap::Args;

use caption_embed::config::CaptionEmbedConfig;

use super::CaptionArgs;

#[derive(Args, Debug, Clone)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub captions: CaptionArgs,

    /// Maximum number of captions to print
    #[arg(long, default_value_t = 10)]
    pub limit: usize,

    /// Print one JSON object per caption instead of a listing
    #[arg(long)]
    pub json: bool,
}

pub fn preview(config: &CaptionEmbedConfig, args: &PreviewArgs) -> Result<()> {
    let dataset = args.captions.load(&config.dataset)?;

    if !args.json {
        println!("{} captions in {}", dataset.len(), args.captions.dataset_file.display());
        println!();
    }

    for item in dataset.iter().take(args.limit) {
        if args.json {
            println!("{}", serde_json::to_string(&item)?);
            continue;
        }
        println!("[{}] {}", item.index, item.output_path);
        if dataset.raw_prompt(item.index) != Some(item.prompt.as_str()) {
            println!("  raw:    {}", dataset.raw_prompt(item.index).unwrap_or_default());
        }
        println!("  prompt: {}", item.prompt);
    }

    if !args.json && dataset.len() > args.limit {
        println!("... {} more", dataset.len() - args.limit);
    }
    Ok(())
}
