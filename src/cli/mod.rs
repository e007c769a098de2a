use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::audio::EncodedPayload;
use crate::config::Config;
use crate::notation::{HttpNotationClient, LookupKey, NotationFetcher};
use crate::recognition::{HttpRecognitionClient, Recognizer};

#[derive(Parser, Debug)]
#[command(name = "keydance")]
#[command(about = "Microphone music recognition with staff notation lookup", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Print version information
    Version,
    /// Recognize an already-recorded audio file instead of capturing
    Recognize(RecognizeCliArgs),
}

#[derive(ClapArgs, Debug)]
pub struct RecognizeCliArgs {
    /// Path to the audio file to submit
    pub file: PathBuf,
    /// Skip the staff notation lookup
    #[arg(long)]
    pub no_notation: bool,
}

pub async fn handle_recognize_command(args: RecognizeCliArgs) -> Result<()> {
    let config = Config::load()?;

    let bytes = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let payload = EncodedPayload::from_bytes(&bytes);

    let recognizer = HttpRecognitionClient::new(config.service.recognition_url.clone());
    let result = recognizer.recognize(&payload).await?;

    println!("Title:      {}", result.title);
    println!("Artist:     {}", result.artist);
    println!("Confidence: {:.2}%", result.confidence * 100.0);

    if args.no_notation {
        return Ok(());
    }

    let key = LookupKey::derive(&result);
    let notation = HttpNotationClient::new(config.service.notation_url.clone());
    match notation.fetch_notation(&key).await {
        Ok(n) => {
            println!();
            println!("Staff notation for {}:", n.title);
            println!("{}", n.notation);
        }
        Err(e) => {
            println!("Staff notation unavailable: {}", e);
        }
    }

    Ok(())
}
