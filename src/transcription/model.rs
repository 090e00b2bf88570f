//! # Whisper Model Management
//!
//! Loads a Whisper checkpoint from the HuggingFace hub and runs greedy
//! decoding over the log-mel spectrogram of a waveform using Candle-rs.
//!
//! ## Model Loading Process:
//! 1. Download `config.json`, `tokenizer.json` and `model.safetensors` (cached locally)
//! 2. Resolve the special tokens from the tokenizer vocabulary
//! 3. Build the mel filter bank for the checkpoint's number of mel bins
//! 4. Map the weights onto the selected device
//!
//! ## Decoding:
//! Audio longer than 30 seconds is decoded in consecutive 30 second windows.
//! A window whose first step is dominated by the no-speech token yields no
//! text, which keeps silence from turning into hallucinated sentences.

use crate::transcription::mel::mel_filter_bank;
use anyhow::{anyhow, Context, Result};
use candle_core::{Device, IndexOp, Tensor, D};
use candle_nn::ops::softmax;
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use hf_hub::api::tokio::ApiBuilder;
use std::path::PathBuf;
use tokenizers::Tokenizer;

/// Probability of the no-speech token above which a window counts as silence.
const NO_SPEECH_THRESHOLD: f64 = 0.6;

/// Available Whisper model sizes with their characteristics.
///
/// ## Trade-offs:
/// - **Size vs Accuracy**: Larger models are more accurate but slower
/// - **Memory vs Speed**: Larger models need more memory on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// Get the HuggingFace model repository name.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "openai/whisper-tiny",
            ModelSize::Base => "openai/whisper-base",
            ModelSize::Small => "openai/whisper-small",
            ModelSize::Medium => "openai/whisper-medium",
            ModelSize::Large => "openai/whisper-large-v2",
        }
    }

    /// Get the approximate model size in MB.
    pub fn size_mb(&self) -> u32 {
        match self {
            ModelSize::Tiny => 39,
            ModelSize::Base => 74,
            ModelSize::Small => 244,
            ModelSize::Medium => 769,
            ModelSize::Large => 1550,
        }
    }

    /// Get a human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "Fastest, basic accuracy",
            ModelSize::Base => "Fast, good general accuracy",
            ModelSize::Small => "Balanced speed and accuracy",
            ModelSize::Medium => "Good accuracy, handles technical vocabulary",
            ModelSize::Large => "Best accuracy, slower processing",
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(anyhow!("Unknown model size: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        write!(f, "{}", name)
    }
}

/// Special token ids looked up in the checkpoint's tokenizer.
#[derive(Debug, Clone, Copy)]
struct SpecialTokens {
    sot: u32,
    eot: u32,
    transcribe: u32,
    no_timestamps: u32,
    no_speech: Option<u32>,
}

impl SpecialTokens {
    fn resolve(tokenizer: &Tokenizer) -> Result<Self> {
        Ok(Self {
            sot: token_id(tokenizer, m::SOT_TOKEN)?,
            eot: token_id(tokenizer, m::EOT_TOKEN)?,
            transcribe: token_id(tokenizer, m::TRANSCRIBE_TOKEN)?,
            no_timestamps: token_id(tokenizer, m::NO_TIMESTAMPS_TOKEN)?,
            no_speech: m::NO_SPEECH_TOKENS
                .iter()
                .find_map(|token| tokenizer.token_to_id(token)),
        })
    }
}

fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| anyhow!("Tokenizer has no id for {}", token))
}

/// Text decoded from one 30 second window.
#[derive(Debug)]
struct DecodedWindow {
    text: String,
    no_speech_prob: f64,
}

/// A loaded Whisper model ready for transcription.
///
/// ## Thread Safety:
/// Decoding mutates the key/value caches, so callers share this behind a
/// mutex and run one inference at a time per model.
pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    device: Device,
    tokenizer: Tokenizer,
    tokens: SpecialTokens,
    mel_filters: Vec<f32>,
    /// Additive logit mask, `-inf` on tokens the checkpoint never emits
    suppress_tokens: Tensor,
}

impl WhisperModel {
    /// Load a Whisper model from HuggingFace.
    ///
    /// Honors `HF_TOKEN` for authentication and `HF_HUB_CACHE` / `HF_HOME`
    /// for the cache location.
    pub async fn load(size: ModelSize, device: Device) -> Result<Self> {
        tracing::info!(
            "Loading Whisper {} model (~{} MB, {})...",
            size,
            size.size_mb(),
            size.description()
        );
        let start_time = std::time::Instant::now();

        let mut builder = ApiBuilder::new()
            .with_token(std::env::var("HF_TOKEN").ok())
            .with_progress(false);
        if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
            tracing::debug!("Using HuggingFace cache dir: {}", cache_dir);
            builder = builder.with_cache_dir(cache_dir.into());
        } else if let Ok(hf_home) = std::env::var("HF_HOME") {
            let cache_path = PathBuf::from(hf_home).join("hub");
            tracing::debug!("Using HuggingFace cache dir from HF_HOME: {:?}", cache_path);
            builder = builder.with_cache_dir(cache_path);
        }
        let api = builder
            .build()
            .context("Failed to create HuggingFace API client")?;

        let repo = api.model(size.repo_name().to_string());
        let config_filename = repo
            .get("config.json")
            .await
            .with_context(|| format!("Failed to download config.json from {}", size.repo_name()))?;
        let tokenizer_filename = repo
            .get("tokenizer.json")
            .await
            .with_context(|| format!("Failed to download tokenizer.json from {}", size.repo_name()))?;
        let model_filename = repo
            .get("model.safetensors")
            .await
            .with_context(|| format!("Failed to download model weights from {}", size.repo_name()))?;

        let config: Config = serde_json::from_reader(std::fs::File::open(config_filename)?)?;
        tracing::debug!("Model config: {:?}", config);

        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[model_filename], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        let whisper = Self::from_parts(model, config, tokenizer, device)?;

        tracing::info!(
            "Whisper {} model loaded in {:.2}s",
            size,
            start_time.elapsed().as_secs_f64()
        );
        Ok(whisper)
    }

    fn from_parts(
        model: m::model::Whisper,
        config: Config,
        tokenizer: Tokenizer,
        device: Device,
    ) -> Result<Self> {
        let tokens = SpecialTokens::resolve(&tokenizer)?;
        let mel_filters = mel_filter_bank(m::SAMPLE_RATE as u32, m::N_FFT, config.num_mel_bins);
        let mask = suppress_mask(config.vocab_size, &config.suppress_tokens);
        let suppress_tokens = Tensor::new(mask.as_slice(), &device)?;

        Ok(Self {
            model,
            config,
            device,
            tokenizer,
            tokens,
            mel_filters,
            suppress_tokens,
        })
    }

    /// Transcribe 16kHz mono float samples.
    ///
    /// `language` is an ISO 639-1 code such as "en". Unknown codes are
    /// ignored and the model detects the language itself.
    pub fn transcribe(&mut self, samples: &[f32], language: Option<&str>) -> Result<String> {
        if samples.is_empty() {
            return Ok(String::new());
        }

        let language_token = language.and_then(|lang| {
            let token = self.tokenizer.token_to_id(&format!("<|{}|>", lang.to_lowercase()));
            if token.is_none() {
                tracing::warn!("Language '{}' not known to the tokenizer, auto-detecting", lang);
            }
            token
        });

        let mel = m::audio::pcm_to_mel(&self.config, samples, &self.mel_filters);
        let n_mels = self.config.num_mel_bins;
        let total_frames = mel.len() / n_mels;
        let mel = Tensor::from_vec(mel, (1, n_mels, total_frames), &self.device)?;

        // The spectrogram is padded with silence; only decode windows that
        // start inside the actual audio.
        let content = content_frames(samples.len(), total_frames);
        let mut seek = 0;
        let mut texts = Vec::new();
        while seek < content {
            let window_frames = usize::min(total_frames - seek, m::N_FRAMES);
            let window = mel.narrow(2, seek, window_frames)?;
            let decoded = self.decode_window(&window, language_token)?;
            seek += window_frames;

            if decoded.no_speech_prob > NO_SPEECH_THRESHOLD {
                tracing::debug!(
                    "Skipping silent window at frame {} (no-speech p={:.2})",
                    seek - window_frames,
                    decoded.no_speech_prob
                );
                continue;
            }
            texts.push(decoded.text);
        }

        Ok(texts
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" "))
    }

    /// Greedy decode of a single mel window.
    fn decode_window(&mut self, mel: &Tensor, language_token: Option<u32>) -> Result<DecodedWindow> {
        let audio_features = self.model.encoder.forward(mel, true)?;

        let mut tokens = vec![self.tokens.sot];
        if let Some(token) = language_token {
            tokens.push(token);
        }
        tokens.push(self.tokens.transcribe);
        tokens.push(self.tokens.no_timestamps);
        let prompt_len = tokens.len();

        let mut no_speech_prob = 0.0;
        let sample_len = self.config.max_target_positions / 2;
        for i in 0..sample_len {
            let tokens_t = Tensor::new(tokens.as_slice(), mel.device())?.unsqueeze(0)?;
            let ys = self.model.decoder.forward(&tokens_t, &audio_features, i == 0)?;

            if i == 0 {
                if let Some(no_speech) = self.tokens.no_speech {
                    let logits = self.model.decoder.final_linear(&ys.i(..1)?)?.i(0)?.i(0)?;
                    no_speech_prob = softmax(&logits, D::Minus1)?
                        .i(no_speech as usize)?
                        .to_scalar::<f32>()? as f64;
                }
            }

            let (_, seq_len, _) = ys.dims3()?;
            let logits = self
                .model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?;
            let logits = logits.broadcast_add(&self.suppress_tokens)?;
            let next_token = logits.argmax(D::Minus1)?.to_scalar::<u32>()?;

            if next_token == self.tokens.eot || tokens.len() > self.config.max_target_positions {
                break;
            }
            tokens.push(next_token);
        }

        let text = self
            .tokenizer
            .decode(&tokens[prompt_len..], true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))?;

        Ok(DecodedWindow {
            text,
            no_speech_prob,
        })
    }
}

/// Logit mask that removes the checkpoint's suppressed tokens from the argmax.
fn suppress_mask(vocab_size: usize, suppress: &[u32]) -> Vec<f32> {
    (0..vocab_size as u32)
        .map(|i| {
            if suppress.contains(&i) {
                f32::NEG_INFINITY
            } else {
                0.0
            }
        })
        .collect()
}

/// Number of spectrogram frames that carry real audio.
fn content_frames(samples: usize, total_frames: usize) -> usize {
    samples.div_ceil(m::HOP_LENGTH).min(total_frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_size_parsing() {
        assert_eq!("medium".parse::<ModelSize>().unwrap(), ModelSize::Medium);
        assert_eq!("LARGE".parse::<ModelSize>().unwrap(), ModelSize::Large);
        assert!("invalid".parse::<ModelSize>().is_err());
    }

    #[test]
    fn test_model_size_display_round_trips() {
        for size in [
            ModelSize::Tiny,
            ModelSize::Base,
            ModelSize::Small,
            ModelSize::Medium,
            ModelSize::Large,
        ] {
            assert_eq!(size.to_string().parse::<ModelSize>().unwrap(), size);
            assert!(size.repo_name().starts_with("openai/whisper-"));
        }
        assert!(ModelSize::Tiny.size_mb() < ModelSize::Large.size_mb());
    }

    #[test]
    fn test_suppress_mask() {
        let mask = suppress_mask(6, &[1, 4]);
        assert_eq!(mask.len(), 6);
        assert_eq!(mask[0], 0.0);
        assert_eq!(mask[1], f32::NEG_INFINITY);
        assert_eq!(mask[4], f32::NEG_INFINITY);
        assert_eq!(mask[5], 0.0);
    }

    #[test]
    fn test_content_frames_ignores_padding() {
        // Five seconds of audio inside a padded thirty second spectrogram
        assert_eq!(content_frames(5 * 16000, 3000), 500);
        assert_eq!(content_frames(161, 3000), 2);
        assert_eq!(content_frames(100 * 16000, 4500), 4500);
    }
}
