//! Interactive service loop.
//!
//! Wires the mic source and HTTP clients into a `SessionController`, prints
//! observer events as they arrive, and toggles the capture cycle on Enter.

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use crate::audio::MicCaptureSource;
use crate::config::Config;
use crate::notation::HttpNotationClient;
use crate::recognition::{HttpRecognitionClient, RecognitionResult};
use crate::session::{SessionController, SessionEvent, SessionPhase, SessionStatus};

pub async fn run_service() -> Result<()> {
    let config = Config::load()?;

    let capture = MicCaptureSource::new(config.audio.sample_rate);
    let recognizer = Arc::new(HttpRecognitionClient::new(
        config.service.recognition_url.clone(),
    ));
    let notation = Arc::new(HttpNotationClient::new(config.service.notation_url.clone()));

    let mut controller = SessionController::new(Box::new(capture), recognizer, notation);

    let mut events = controller.subscribe().await;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(event);
        }
    });

    println!("Press Enter to start recording, Enter again to stop, q to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim() == "q" {
            break;
        }

        match controller.status().await.phase() {
            SessionPhase::Recording => {
                if let Err(e) = controller.stop().await {
                    error!("Failed to stop recording: {}", e);
                }
            }
            SessionPhase::Processing => {
                println!("Still processing the last capture, hang on...");
            }
            _ => {
                if let Err(e) = controller.start().await {
                    error!("Failed to start recording: {}", e);
                }
            }
        }
    }

    info!("Exiting");
    Ok(())
}

fn print_event(event: SessionEvent) {
    match event {
        SessionEvent::Status(SessionStatus::Recording) => {
            println!("Recording... (capture at least 5-10 seconds of music)");
        }
        SessionEvent::Status(SessionStatus::Processing) => {
            println!("Processing audio...");
        }
        SessionEvent::Status(SessionStatus::Succeeded(result)) => {
            println!("Recognition successful!");
            print_result(&result);
        }
        SessionEvent::Status(SessionStatus::NotationFailed(result)) => {
            println!("Recognition successful!");
            print_result(&result);
            println!("Staff notation is unavailable for this track.");
        }
        SessionEvent::Status(SessionStatus::Failed { kind, message }) => {
            println!("Recognition failed ({}): {}", kind.as_str(), message);
        }
        SessionEvent::Status(SessionStatus::Idle) => {}
        SessionEvent::Notation(notation) => {
            println!("Staff notation for {}:", notation.title);
            println!("{}", notation.notation);
        }
    }
}

fn print_result(result: &RecognitionResult) {
    println!("  Title:      {}", result.title);
    println!("  Artist:     {}", result.artist);
    println!("  Confidence: {:.2}%", result.confidence * 100.0);
}
