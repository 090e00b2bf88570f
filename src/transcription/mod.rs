//! # Transcription Module
//!
//! Speech-to-text for the canonical waveform using Whisper models via the
//! Candle-rs framework, so no C++ toolchain or FFI bindings are needed.
//!
//! ## Key Components:
//! - **Model**: Loading Whisper checkpoints and greedy decoding
//! - **Mel**: The filter bank used to build the log-mel spectrogram
//! - **Engine**: The [`SpeechToText`] seam and the fail-soft [`Transcriber`]
//!
//! ## Whisper Model Sizes:
//! - **tiny**: ~39MB, fastest but least accurate
//! - **base**: ~74MB, default; good balance for conversational speech
//! - **small**: ~244MB, better accuracy
//! - **medium**: ~769MB, good technical vocabulary
//! - **large**: ~1550MB, best accuracy but slowest

pub mod engine; // Transcriber and speech-to-text seam
pub mod mel; // Mel filter bank
pub mod model; // Whisper model loading and decoding

pub use engine::{SpeechToText, Transcriber, WhisperTranscriber};
pub use model::ModelSize;
