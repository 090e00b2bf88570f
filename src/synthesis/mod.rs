//! # Speech Synthesis Module
//!
//! Renders the assistant's reply as audio. A failure here aborts the
//! exchange: the browser gets an error event even though reply text exists.
//!
//! ## Key Components:
//! - **SpeechSynthesis**: Seam for the remote text-to-speech call
//! - **AzureSpeechClient**: Azure Speech REST implementation (SSML in, RIFF/WAV out)
//! - **SpeechSynthesizer**: Applies the call timeout and rejects empty audio

pub mod azure;

pub use azure::AzureSpeechClient;

use crate::error::SynthesisError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Remote text-to-speech service.
#[async_trait]
pub trait SpeechSynthesis: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError>;
}

#[derive(Clone)]
pub struct SpeechSynthesizer {
    backend: Arc<dyn SpeechSynthesis>,
    timeout: Duration,
}

impl SpeechSynthesizer {
    pub fn new(backend: Arc<dyn SpeechSynthesis>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Audio bytes for `text`, or the reason there are none.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        let start_time = Instant::now();
        let audio = tokio::time::timeout(self.timeout, self.backend.synthesize(text))
            .await
            .map_err(|_| SynthesisError::Timeout(self.timeout))??;

        if audio.is_empty() {
            return Err(SynthesisError::EmptyAudio);
        }

        tracing::debug!(
            bytes = audio.len(),
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Speech synthesized"
        );
        Ok(audio)
    }
}
