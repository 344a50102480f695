//! Voice input capture
//!
//! A [`CaptureSession`] exists only while recording. The browser streams the
//! recorder's chunks and analyser levels in; stopping consumes the session
//! into a single [`AudioBlob`] ready for transcription, so nothing from a
//! capture outlives its stop.

use thiserror::Error;

/// Number of amplitude bars shown while recording
pub const LEVEL_BARS: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AudioError {
    #[error("Already recording")]
    AlreadyRecording,

    #[error("Not recording")]
    NotRecording,

    #[error("Recording is empty")]
    Empty,
}

/// Finished recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBlob {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
}

impl AudioBlob {
    pub fn webm(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            file_name: "audio.webm".to_string(),
            mime_type: "audio/webm".to_string(),
        }
    }
}

/// In-progress recording
#[derive(Debug)]
pub struct CaptureSession {
    chunks: Vec<Vec<u8>>,
    levels: [f32; LEVEL_BARS],
}

impl CaptureSession {
    pub fn start() -> Self {
        tracing::debug!("Audio capture started");
        Self {
            chunks: Vec::new(),
            levels: [0.0; LEVEL_BARS],
        }
    }

    /// Append one recorder chunk
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        if !chunk.is_empty() {
            self.chunks.push(chunk.to_vec());
        }
    }

    /// Refresh the visualizer from byte frequency bins (0..=255)
    pub fn record_levels(&mut self, bins: &[u8]) {
        self.levels = [0.0; LEVEL_BARS];
        for (level, bin) in self.levels.iter_mut().zip(bins) {
            *level = f32::from(*bin) / 255.0;
        }
    }

    pub fn levels(&self) -> &[f32; LEVEL_BARS] {
        &self.levels
    }

    pub fn recorded_bytes(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Finish recording. The session is consumed whether or not audio was captured.
    pub fn stop(self) -> Result<AudioBlob, AudioError> {
        let bytes = self.chunks.concat();
        tracing::debug!(bytes = bytes.len(), "Audio capture stopped");

        if bytes.is_empty() {
            return Err(AudioError::Empty);
        }
        Ok(AudioBlob::webm(bytes))
    }
}
