//! # Audio Ingest
//!
//! Persists the opaque browser recording to a uniquely named temporary file
//! and runs the external converter to produce the canonical waveform.
//!
//! Both files live in [`IngestedAudio`], which deletes them when dropped.
//! Every exit path of the pipeline (success, early return, `?`, panic unwind)
//! therefore removes them before the handler finishes.

use crate::error::ConversionError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempPath;
use tokio::process::Command;
use tracing::{debug, warn};

/// Turns an arbitrary recorder container into the canonical waveform.
#[async_trait]
pub trait AudioConverter: Send + Sync {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionError>;
}

/// Converter backed by the `ffmpeg` command-line tool.
#[derive(Debug, Clone)]
pub struct FfmpegConverter {
    program: String,
    sample_rate: u32,
    timeout: Duration,
}

impl FfmpegConverter {
    pub fn new(program: impl Into<String>, sample_rate: u32, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            sample_rate,
            timeout,
        }
    }
}

#[async_trait]
impl AudioConverter for FfmpegConverter {
    async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionError> {
        let mut command = Command::new(&self.program);
        command
            .arg("-y")
            .args(["-hide_banner", "-loglevel", "error"])
            .arg("-i")
            .arg(input)
            .args(["-ac", "1", "-c:a", "pcm_s16le"])
            .arg("-ar")
            .arg(self.sample_rate.to_string())
            .arg(output)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let run = command.output();
        let result = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| ConversionError::Timeout(self.timeout))?
            .map_err(|source| ConversionError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !result.status.success() {
            return Err(ConversionError::Failed {
                status: result.status.to_string(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

/// Temporary files for one inbound message. Dropping this removes both.
#[derive(Debug)]
pub struct IngestedAudio {
    source: Option<TempPath>,
    waveform: Option<TempPath>,
    waveform_path: PathBuf,
}

impl IngestedAudio {
    /// Path of the canonical waveform produced by the converter.
    pub fn waveform_path(&self) -> &Path {
        &self.waveform_path
    }

    /// Paths of every temporary file this exchange created.
    #[cfg(test)]
    pub fn temp_paths(&self) -> Vec<PathBuf> {
        [&self.source, &self.waveform]
            .into_iter()
            .flatten()
            .map(|p| p.to_path_buf())
            .collect()
    }
}

impl Drop for IngestedAudio {
    fn drop(&mut self) {
        for path in [self.source.take(), self.waveform.take()].into_iter().flatten() {
            let shown = path.display().to_string();
            if let Err(err) = path.close() {
                warn!(path = %shown, error = %err, "Failed to delete temporary audio file");
            }
        }
        debug!("Temporary audio files deleted");
    }
}

/// Writes blobs to disk and converts them.
pub struct AudioIngest {
    converter: Arc<dyn AudioConverter>,
    temp_dir: PathBuf,
    input_suffix: String,
}

impl AudioIngest {
    pub fn new(converter: Arc<dyn AudioConverter>, temp_dir: PathBuf, input_suffix: impl Into<String>) -> Self {
        Self {
            converter,
            temp_dir,
            input_suffix: input_suffix.into(),
        }
    }

    /// Persist `audio` and convert it. `message_id` makes file names traceable in logs.
    ///
    /// On failure every file created so far is removed before returning.
    pub async fn ingest(&self, message_id: &str, audio: &[u8]) -> Result<IngestedAudio, ConversionError> {
        if audio.is_empty() {
            return Err(ConversionError::EmptyInput);
        }

        let prefix = format!("relay-{message_id}-");
        let source = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(&self.input_suffix)
            .tempfile_in(&self.temp_dir)?
            .into_temp_path();
        tokio::fs::write(&source, audio).await?;

        let waveform = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".wav")
            .tempfile_in(&self.temp_dir)?
            .into_temp_path();

        debug!(
            source = %source.display(),
            bytes = audio.len(),
            "Converting inbound audio"
        );
        self.converter.convert(&source, &waveform).await?;

        let waveform_path = waveform.to_path_buf();
        Ok(IngestedAudio {
            source: Some(source),
            waveform: Some(waveform),
            waveform_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Copies the input to the output, or fails, and remembers what it saw.
    struct RecordingConverter {
        fail: bool,
        seen: Mutex<Vec<(PathBuf, PathBuf)>>,
    }

    impl RecordingConverter {
        fn new(fail: bool) -> Self {
            Self { fail, seen: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl AudioConverter for RecordingConverter {
        async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionError> {
            self.seen.lock().unwrap().push((input.to_path_buf(), output.to_path_buf()));
            if self.fail {
                return Err(ConversionError::Failed {
                    status: "exit status: 1".to_string(),
                    stderr: "bad input".to_string(),
                });
            }
            std::fs::copy(input, output)?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_ingest_creates_unique_files_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let converter = Arc::new(RecordingConverter::new(false));
        let ingest = AudioIngest::new(converter.clone(), dir.path().to_path_buf(), ".webm");

        let first = ingest.ingest("msg-1", b"webm bytes").await.unwrap();
        let second = ingest.ingest("msg-1", b"more bytes").await.unwrap();
        assert_ne!(first.waveform_path(), second.waveform_path());
        assert_eq!(std::fs::read(first.waveform_path()).unwrap(), b"webm bytes");

        let paths = first.temp_paths();
        assert_eq!(paths.len(), 2);
        assert!(paths[0].to_string_lossy().ends_with(".webm"));
        assert!(paths.iter().all(|p| p.exists()));

        drop(first);
        assert!(paths.iter().all(|p| !p.exists()));
    }

    #[tokio::test]
    async fn test_failed_conversion_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let converter = Arc::new(RecordingConverter::new(true));
        let ingest = AudioIngest::new(converter.clone(), dir.path().to_path_buf(), ".webm");

        let err = ingest.ingest("msg-2", b"garbage").await.unwrap_err();
        assert!(matches!(err, ConversionError::Failed { .. }));

        let seen = converter.seen.lock().unwrap();
        let (input, output) = &seen[0];
        assert!(!input.exists());
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_empty_payload_rejected_without_running_converter() {
        let dir = tempfile::tempdir().unwrap();
        let converter = Arc::new(RecordingConverter::new(false));
        let ingest = AudioIngest::new(converter.clone(), dir.path().to_path_buf(), ".webm");

        let err = ingest.ingest("msg-3", b"").await.unwrap_err();
        assert!(matches!(err, ConversionError::EmptyInput));
        assert!(converter.seen.lock().unwrap().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_binary_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.webm");
        std::fs::write(&input, b"x").unwrap();
        let converter = FfmpegConverter::new(
            "definitely-not-an-installed-binary",
            16000,
            Duration::from_secs(5),
        );

        let err = converter.convert(&input, &dir.path().join("out.wav")).await.unwrap_err();
        assert!(matches!(err, ConversionError::Spawn { .. }));
    }
}
