//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix, `__` between nested keys)
//! - Well-known credential variables (CHAT_GPT_API_KEY, AZURE_SPEECH_KEY, AZURE_SERVICE_REGION)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Well-known variables (HOST, PORT, TLS_CERT_FILE, TLS_KEY_FILE and the credential variables above)
//! 2. Environment variables (APP_SERVER__HOST, APP_MODELS__WHISPER_MODEL, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Startup validation:
//! The relay cannot do anything useful without its chat and speech credentials,
//! so `validate()` rejects a configuration that lacks them and `main` exits
//! with the diagnostic.

use crate::device::DevicePreference;
use crate::transcription::ModelSize;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Fixed instruction that opens every conversation.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an AI assistant called Ava that provides helpful and \
informative responses that are designed for a text to speech process so don't use asterisks etc, \
keep it brief and friendly, a little sassy, sarcastic, and playful and don't let anyone know you \
are an AI or computer. Don't use emoticons or emojis that can't be used in text to speech conversions.";

/// Reply spoken back when the chat service cannot be reached.
pub const DEFAULT_FALLBACK_REPLY: &str = "I'm having trouble connecting to the server.";

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each external service the relay talks to gets its own section, so a
/// deployment can override one vendor's settings without touching the others.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub dialogue: DialogueConfig,
    pub speech: SpeechConfig,
    pub audio: AudioConfig,
    pub timeouts: TimeoutConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
///
/// Browsers only grant microphone access on secure origins, so a relay
/// reached over anything but localhost needs `tls_cert` and `tls_key`
/// (PEM files). Both empty means plain HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub tls_cert: String,
    pub tls_key: String,
}

/// Local speech recognition model settings.
///
/// ## Fields:
/// - `whisper_model`: Which Whisper model to use ("tiny", "base", "small", "medium", "large")
/// - `device`: Compute device preference ("auto", "cpu", "cuda", "metal")
/// - `language`: Language hint passed to the decoder; empty means no hint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub whisper_model: String,
    pub device: String,
    pub language: String,
}

/// Chat-completion service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueConfig {
    /// Bearer credential (normally supplied through CHAT_GPT_API_KEY)
    pub api_key: String,
    /// Base URL of an OpenAI-compatible API
    pub api_base: String,
    pub model: String,
    pub system_prompt: String,
    pub fallback_reply: String,
    /// Send the fallback reply as an `error` event instead of speaking it
    pub fallback_as_error: bool,
}

/// Text-to-speech service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    /// Subscription key (normally supplied through AZURE_SPEECH_KEY)
    pub key: String,
    /// Service region such as "eastus" (normally supplied through AZURE_SERVICE_REGION)
    pub region: String,
    pub voice: String,
    pub output_format: String,
    /// Overrides the region-derived endpoint; empty means derive from `region`
    pub endpoint: String,
}

/// Inbound audio handling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Path or name of the ffmpeg binary
    pub ffmpeg_path: String,
    /// Suffix for the persisted browser blob (the recorder sends webm/opus)
    pub input_suffix: String,
    /// Sample rate of the canonical waveform
    pub sample_rate: u32,
    /// Directory for temporary files; empty means the system temp dir
    pub temp_dir: String,
    /// Largest accepted WebSocket message in bytes
    pub max_message_bytes: usize,
}

/// Upper bounds for every external call, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub conversion_secs: u64,
    pub transcription_secs: u64,
    pub dialogue_secs: u64,
    pub synthesis_secs: u64,
}

impl TimeoutConfig {
    pub fn conversion(&self) -> Duration {
        Duration::from_secs(self.conversion_secs)
    }

    pub fn transcription(&self) -> Duration {
        Duration::from_secs(self.transcription_secs)
    }

    pub fn dialogue(&self) -> Duration {
        Duration::from_secs(self.dialogue_secs)
    }

    pub fn synthesis(&self) -> Duration {
        Duration::from_secs(self.synthesis_secs)
    }
}

/// Provides default configuration values.
///
/// Credentials default to empty strings; they must come from the environment
/// or config.toml, and `validate()` refuses to start without them.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5000,
                tls_cert: String::new(),
                tls_key: String::new(),
            },
            models: ModelsConfig {
                whisper_model: "base".to_string(),
                device: "auto".to_string(),
                language: "en".to_string(),
            },
            dialogue: DialogueConfig {
                api_key: String::new(),
                api_base: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
                fallback_reply: DEFAULT_FALLBACK_REPLY.to_string(),
                fallback_as_error: false,
            },
            speech: SpeechConfig {
                key: String::new(),
                region: String::new(),
                voice: "en-US-AvaNeural".to_string(),
                output_format: "riff-16khz-16bit-mono-pcm".to_string(),
                endpoint: String::new(),
            },
            audio: AudioConfig {
                ffmpeg_path: "ffmpeg".to_string(),
                input_suffix: ".webm".to_string(),
                sample_rate: 16000,
                temp_dir: String::new(),
                max_message_bytes: 16 * 1024 * 1024,
            },
            timeouts: TimeoutConfig {
                conversion_secs: 30,
                transcription_secs: 120,
                dialogue_secs: 30,
                synthesis_secs: 30,
            },
        }
    }
}

/// Well-known environment variables and the config keys they override.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("HOST", "server.host"),
    ("PORT", "server.port"),
    ("TLS_CERT_FILE", "server.tls_cert"),
    ("TLS_KEY_FILE", "server.tls_key"),
    ("CHAT_GPT_API_KEY", "dialogue.api_key"),
    ("AZURE_SPEECH_KEY", "speech.key"),
    ("AZURE_SERVICE_REGION", "speech.region"),
];

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_MODELS__WHISPER_MODEL=small`: Override whisper model
    /// - `APP_DIALOGUE__FALLBACK_AS_ERROR=true`: Report chat outages as errors
    /// - `CHAT_GPT_API_KEY=sk-...`: Chat-completion credential
    /// - `AZURE_SPEECH_KEY=...` / `AZURE_SERVICE_REGION=eastus`: Speech credentials
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        for (var, key) in ENV_OVERRIDES {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(*key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - TLS certificate and key are both set (or both empty) and exist
    /// - The chat-completion credential is present
    /// - The speech key and region are present
    /// - The Whisper model size and device preference are recognized
    /// - Every timeout and the message size limit are non-zero
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if let Some((cert, key)) = self.tls_files()? {
            for (what, path) in [("certificate", &cert), ("private key", &key)] {
                if !path.is_file() {
                    return Err(anyhow::anyhow!("TLS {} file not found: {}", what, path.display()));
                }
            }
        }

        if self.dialogue.api_key.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "The chat API key is not set. Please set the CHAT_GPT_API_KEY environment variable."
            ));
        }

        if self.speech.key.trim().is_empty() || self.speech.region.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "Azure Speech service key and region must be set (AZURE_SPEECH_KEY, AZURE_SERVICE_REGION)."
            ));
        }

        self.models.whisper_model.parse::<ModelSize>()?;
        self.models.device.parse::<DevicePreference>()?;

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rate must be greater than 0"));
        }

        if self.audio.max_message_bytes == 0 {
            return Err(anyhow::anyhow!("Maximum message size must be greater than 0"));
        }

        let timeouts = &self.timeouts;
        if timeouts.conversion_secs == 0
            || timeouts.transcription_secs == 0
            || timeouts.dialogue_secs == 0
            || timeouts.synthesis_secs == 0
        {
            return Err(anyhow::anyhow!("External call timeouts must be greater than 0"));
        }

        Ok(())
    }

    /// Certificate and key paths when TLS is configured.
    ///
    /// Setting only one of the two is an error.
    pub fn tls_files(&self) -> Result<Option<(PathBuf, PathBuf)>> {
        let cert = self.server.tls_cert.trim();
        let key = self.server.tls_key.trim();
        match (cert.is_empty(), key.is_empty()) {
            (true, true) => Ok(None),
            (false, false) => Ok(Some((PathBuf::from(cert), PathBuf::from(key)))),
            _ => Err(anyhow::anyhow!(
                "server.tls_cert and server.tls_key must be set together"
            )),
        }
    }

    /// Language hint for the transcriber, `None` when left empty.
    pub fn language_hint(&self) -> Option<String> {
        let language = self.models.language.trim();
        if language.is_empty() {
            None
        } else {
            Some(language.to_string())
        }
    }
}
