//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket actor through
//! `web::Data`. Everything in here is either immutable after startup or
//! synchronizes internally, so the state itself needs no lock.
//!
//! ## Arc pattern:
//! - **Arc<AppConfig>**: Read-only after validation at startup
//! - **Arc<VoicePipeline>**: One pipeline for all connections; it owns the
//!   session store, whose map and conversations carry their own locks

use crate::audio::{AudioIngest, AudioProcessor, FfmpegConverter};
use crate::config::AppConfig;
use crate::conversation::SessionStore;
use crate::dialogue::{DialogueGenerator, OpenAiClient};
use crate::filter::ContentFilter;
use crate::pipeline::VoicePipeline;
use crate::synthesis::{AzureSpeechClient, SpeechSynthesizer};
use crate::transcription::{SpeechToText, Transcriber, WhisperTranscriber};
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<VoicePipeline>,
    /// When the server started
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, pipeline: VoicePipeline) -> Self {
        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
            start_time: Instant::now(),
        }
    }

    /// Load the speech model and wire the production services.
    ///
    /// Expects a configuration that already passed `validate()`.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let processor = AudioProcessor::new(config.audio.sample_rate);
        let recognizer = WhisperTranscriber::load(
            config.models.whisper_model.parse()?,
            config.models.device.parse()?,
            config.language_hint(),
            processor,
            config.timeouts.transcription(),
        )
        .await?;

        let pipeline = Self::build_pipeline(&config, Arc::new(recognizer));
        Ok(Self::new(config, pipeline))
    }

    /// Pipeline over the configured external services and the given recognizer.
    pub fn build_pipeline(config: &AppConfig, recognizer: Arc<dyn SpeechToText>) -> VoicePipeline {
        let converter = FfmpegConverter::new(
            config.audio.ffmpeg_path.clone(),
            config.audio.sample_rate,
            config.timeouts.conversion(),
        );
        let temp_dir = if config.audio.temp_dir.trim().is_empty() {
            std::env::temp_dir()
        } else {
            PathBuf::from(&config.audio.temp_dir)
        };
        let ingest = AudioIngest::new(Arc::new(converter), temp_dir, config.audio.input_suffix.clone());

        let chat = OpenAiClient::new(
            config.dialogue.api_base.clone(),
            config.dialogue.api_key.clone(),
            config.dialogue.model.clone(),
        );
        let dialogue = DialogueGenerator::new(
            Arc::new(chat),
            config.dialogue.fallback_reply.clone(),
            config.timeouts.dialogue(),
        );

        let mut speech = AzureSpeechClient::new(
            config.speech.key.clone(),
            &config.speech.region,
            config.speech.voice.clone(),
            config.speech.output_format.clone(),
        );
        if !config.speech.endpoint.trim().is_empty() {
            speech = speech.with_endpoint(config.speech.endpoint.clone());
        }
        tracing::info!("Speech synthesis voice: {}", speech.voice());
        let synthesizer = SpeechSynthesizer::new(Arc::new(speech), config.timeouts.synthesis());

        let filter = ContentFilter::new();
        tracing::debug!("Content filter loaded with {} words", filter.word_count());

        VoicePipeline::new(
            ingest,
            Transcriber::new(recognizer),
            filter,
            dialogue,
            synthesizer,
            Arc::new(SessionStore::new(config.dialogue.system_prompt.clone())),
        )
        .with_fallback_as_error(config.dialogue.fallback_as_error)
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        self.pipeline.sessions()
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::EchoRecognizer;

    #[tokio::test]
    async fn test_build_pipeline_from_config() {
        let mut config = AppConfig::default();
        config.dialogue.api_key = "sk-test".to_string();
        config.speech.key = "key".to_string();
        config.speech.region = "eastus".to_string();

        let pipeline = AppState::build_pipeline(&config, Arc::new(EchoRecognizer { fail: false, panic: false }));
        let state = AppState::new(config, pipeline);

        assert!(state.sessions().is_empty());
        assert_eq!(state.config.server.port, 5000);
        assert!(state.get_uptime_seconds() < 5);
    }
}
