//! # Error Handling
//!
//! One error type per external boundary of the relay pipeline. Each stage
//! returns an explicit `Result`, and the pipeline decides per type whether the
//! failure is recovered (transcription, dialogue) or aborts the exchange
//! (conversion, synthesis, anything unclassified).
//!
//! ## Trust boundary:
//! `Display` output of these errors is for server-side logs only. What the
//! browser sees is one of the fixed strings in [`client_messages`].

use std::time::Duration;
use thiserror::Error;

/// Fixed, non-sensitive strings sent to the browser in `error` events.
pub mod client_messages {
    pub const CONVERSION_FAILED: &str = "Audio conversion failed.";
    pub const NOT_UNDERSTOOD: &str = "I didn't catch that. Could you please repeat?";
    pub const SYNTHESIS_FAILED: &str = "Error during speech synthesis.";
    pub const PROCESSING_FAILED: &str = "An error occurred during processing.";
    pub const INVALID_MESSAGE: &str = "Invalid message.";
}

/// Failure turning the browser blob into a canonical waveform.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("received an empty audio payload")]
    EmptyInput,
    #[error("failed to persist audio payload: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to launch converter '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("converter exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
    #[error("converter timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure inside the speech recognizer. Recovered as an empty transcript.
#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("failed to read waveform: {0}")]
    Waveform(String),
    #[error("model inference failed: {0}")]
    Model(#[from] anyhow::Error),
    #[error("transcription worker failed: {0}")]
    Worker(String),
    #[error("transcription timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure talking to the chat-completion service. Recovered with a fallback reply.
#[derive(Debug, Error)]
pub enum DialogueError {
    #[error("chat request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("chat service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("chat service response had no usable choice")]
    EmptyResponse,
    #[error("chat request timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure rendering speech. Aborts the exchange.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("speech request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("speech synthesis canceled by service ({status}): {details}")]
    Canceled { status: u16, details: String },
    #[error("speech service returned no audio")]
    EmptyAudio,
    #[error("speech synthesis timed out after {0:?}")]
    Timeout(Duration),
}

/// Anything that escaped the classified stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("pipeline task panicked: {0}")]
    Panic(String),
}
