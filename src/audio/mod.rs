//! # Audio Module
//!
//! Everything between the browser's recorder blob and the samples the
//! transcription model consumes.
//!
//! ## Key Components:
//! - **Ingest**: Writes the blob to a temporary file and converts it with ffmpeg
//! - **Processor**: Decodes the canonical waveform to mono 16kHz float samples
//!
//! ## Canonical waveform:
//! - **Sample Rate**: 16kHz (configurable)
//! - **Bit Depth**: 16-bit PCM, little-endian
//! - **Channels**: Mono

pub mod ingest;
pub mod processor;

pub use ingest::{AudioConverter, AudioIngest, FfmpegConverter};
pub use processor::AudioProcessor;
