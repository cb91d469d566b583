mod cli;

use std::path::PathBuf;

use anyhow::Result;
use caption_embed::config::CaptionEmbedConfig;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "caption-embed",
    version,
    about = "Process text captions and save embeddings for video generation training"
)]
struct Cli {
    /// Config file to use instead of ~/.caption-embed/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Encode captions and save one embedding file per media item
    Process(cli::process::ProcessArgs),
    /// Print normalized captions and their output paths without encoding
    Preview(cli::preview::PreviewArgs),
    /// Show the tensors stored in an embedding file
    Inspect {
        /// Path to a .safetensors embedding file
        artifact: PathBuf,
    },
    /// Manage the text encoder model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the ONNX text encoder and tokenizer to the model cache directory
    Download {
        /// Fetch the int8-quantized export used by --load-text-encoder-in-8bit
        #[arg(long)]
        quantized: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => CaptionEmbedConfig::load_from(path)?,
        None => CaptionEmbedConfig::load()?,
    };

    // Log to stderr so stdout stays clean for command output.
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Process(args) => {
            tokio::task::spawn_blocking(move || cli::process::process(&config, &args)).await??;
        }
        Command::Preview(args) => {
            cli::preview::preview(&config, &args)?;
        }
        Command::Inspect { artifact } => {
            cli::inspect::inspect(&artifact)?;
        }
        Command::Model { action } => match action {
            ModelAction::Download { quantized } => {
                cli::model_download(&config, quantized).await?;
            }
        },
    }

    Ok(())
}
