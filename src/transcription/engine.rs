//! # Transcription Engine
//!
//! Turns the canonical waveform file into text. The [`SpeechToText`] trait is
//! the seam the pipeline depends on; [`WhisperTranscriber`] implements it with
//! the local Candle model, and [`Transcriber`] adds the fail-soft contract the
//! pipeline relies on: any failure becomes an empty transcript.
//!
//! ## Threading:
//! Whisper inference is CPU/GPU bound and synchronous, so it runs on the
//! blocking thread pool under a timeout instead of on the async executor.

use crate::audio::AudioProcessor;
use crate::device::{DeviceManager, DevicePreference};
use crate::error::TranscriptionError;
use crate::transcription::model::{ModelSize, WhisperModel};
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Speech recognition over a waveform file.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, waveform: &Path) -> Result<String, TranscriptionError>;
}

/// Whisper-backed speech recognition.
pub struct WhisperTranscriber {
    model: Arc<Mutex<WhisperModel>>,
    processor: AudioProcessor,
    language: Option<String>,
    timeout: Duration,
}

impl WhisperTranscriber {
    /// Select the compute device and load the model. Called once at startup.
    pub async fn load(
        size: ModelSize,
        device: DevicePreference,
        language: Option<String>,
        processor: AudioProcessor,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let device = DeviceManager::get_device(device);
        tracing::info!(
            "Transcription will run on {}",
            DeviceManager::get_device_info(&device)
        );
        let model = WhisperModel::load(size, device).await?;
        Ok(Self::new(model, processor, language, timeout))
    }

    pub fn new(
        model: WhisperModel,
        processor: AudioProcessor,
        language: Option<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            model: Arc::new(Mutex::new(model)),
            processor,
            language,
            timeout,
        }
    }
}

#[async_trait]
impl SpeechToText for WhisperTranscriber {
    async fn transcribe(&self, waveform: &Path) -> Result<String, TranscriptionError> {
        let path = waveform.to_path_buf();
        let model = self.model.clone();
        let processor = self.processor.clone();
        let language = self.language.clone();
        let sample_rate = processor.target_sample_rate() as f64;

        let task = tokio::task::spawn_blocking(move || -> Result<String, TranscriptionError> {
            let start_time = Instant::now();
            let samples = processor
                .load_waveform(&path)
                .map_err(|e| TranscriptionError::Waveform(format!("{e:#}")))?;
            if samples.is_empty() {
                return Ok(String::new());
            }

            let mut model = model
                .lock()
                .map_err(|_| TranscriptionError::Worker("model lock poisoned".to_string()))?;
            let text = model.transcribe(&samples, language.as_deref())?;

            tracing::info!(
                "Transcription completed: {:.2}s audio -> {} chars in {}ms",
                samples.len() as f64 / sample_rate,
                text.len(),
                start_time.elapsed().as_millis()
            );
            Ok(text)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Err(_) => Err(TranscriptionError::Timeout(self.timeout)),
            Ok(Err(join_error)) => Err(TranscriptionError::Worker(join_error.to_string())),
            Ok(Ok(result)) => result,
        }
    }
}

/// Fail-soft front of a [`SpeechToText`] backend.
#[derive(Clone)]
pub struct Transcriber {
    backend: Arc<dyn SpeechToText>,
}

impl Transcriber {
    pub fn new(backend: Arc<dyn SpeechToText>) -> Self {
        Self { backend }
    }

    /// Recognized text, trimmed. Empty when nothing was understood or the
    /// backend failed; the error is logged, never returned.
    pub async fn transcribe(&self, waveform: &Path) -> String {
        match self.backend.transcribe(waveform).await {
            Ok(text) => {
                let text = text.trim().to_string();
                tracing::debug!("Transcription result: '{}'", text);
                text
            }
            Err(e) => {
                tracing::error!("Transcription failed: {}", e);
                String::new()
            }
        }
    }
}
