//! # Waveform Loading and Normalization
//!
//! Reads the canonical waveform written by the converter and turns it into
//! what the Whisper model expects: mono, 16kHz, 32-bit float samples in
//! the range [-1.0, 1.0].
//!
//! ## Key Functions:
//! - **Decoding**: 8/16/24-bit integer and 32-bit float WAV
//! - **Down-mixing**: Interleaved multi-channel audio averaged to mono
//! - **Resampling**: Linear interpolation when the file is not at the target rate

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::path::Path;

/// Decodes canonical waveform files for the transcriber.
#[derive(Debug, Clone)]
pub struct AudioProcessor {
    target_sample_rate: u32,
}

impl Default for AudioProcessor {
    fn default() -> Self {
        Self::new(16000)
    }
}

impl AudioProcessor {
    pub fn new(target_sample_rate: u32) -> Self {
        Self { target_sample_rate }
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    /// Read a WAV file and return mono float samples at the target rate.
    pub fn load_waveform(&self, path: &Path) -> Result<Vec<f32>> {
        let mut file = File::open(path)
            .with_context(|| format!("Failed to open waveform {}", path.display()))?;
        let (header, data) = wav::read(&mut file)
            .with_context(|| format!("Failed to parse waveform {}", path.display()))?;

        let channels = header.channel_count.max(1) as usize;
        let interleaved = Self::to_float(data)?;
        let mono = Self::downmix(&interleaved, channels);

        tracing::debug!(
            sample_rate = header.sampling_rate,
            channels,
            samples = mono.len(),
            "Decoded waveform"
        );

        Ok(Self::resample(&mono, header.sampling_rate, self.target_sample_rate))
    }

    /// Convert any supported WAV sample format to floats in [-1.0, 1.0].
    fn to_float(data: wav::BitDepth) -> Result<Vec<f32>> {
        let samples = match data {
            wav::BitDepth::Eight(samples) => samples
                .into_iter()
                .map(|s| (s as f32 - 128.0) / 128.0)
                .collect(),
            wav::BitDepth::Sixteen(samples) => Self::pcm_to_float(&samples),
            wav::BitDepth::TwentyFour(samples) => samples
                .into_iter()
                .map(|s| s as f32 / 8_388_608.0)
                .collect(),
            wav::BitDepth::ThirtyTwoFloat(samples) => samples,
            wav::BitDepth::Empty => return Err(anyhow!("Waveform contains no audio data")),
        };
        Ok(samples)
    }

    /// Convert 16-bit PCM samples to 32-bit float format for ML models.
    ///
    /// Scales from 16-bit integer range [-32768, 32767] to float range [-1.0, 1.0].
    pub fn pcm_to_float(samples: &[i16]) -> Vec<f32> {
        samples.iter().map(|&sample| sample as f32 / 32768.0).collect()
    }

    /// Average interleaved channels down to a single channel.
    pub fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
        if channels <= 1 {
            return samples.to_vec();
        }
        samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    }

    /// Linear-interpolation resampler. Good enough for speech recognition input.
    pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
        if from_rate == to_rate || from_rate == 0 || samples.is_empty() {
            return samples.to_vec();
        }

        let out_len = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
        let step = from_rate as f64 / to_rate as f64;
        let last = samples.len() - 1;

        (0..out_len)
            .map(|i| {
                let position = i as f64 * step;
                let index = (position.floor() as usize).min(last);
                let next = (index + 1).min(last);
                let frac = (position - index as f64) as f32;
                samples[index] * (1.0 - frac) + samples[next] * frac
            })
            .collect()
    }
}
