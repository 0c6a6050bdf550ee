//! Stream encoders: composited frames and audio in, container bytes out.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use clipreel_common::error::ClipreelResult;
use image::RgbaImage;

use crate::audio::{AudioChunk, AudioFormat, AudioSink};

/// Parameters negotiated before an encoder is built.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    /// Container/codec mime type, as selected by the capability registry.
    pub mime_type: String,

    /// Initial frame size. Frames pushed later may differ; the encoder
    /// scales them to this size.
    pub width: u32,
    pub height: u32,

    pub fps: u32,

    /// Audio input layout, `None` for video-only output.
    pub audio: Option<AudioFormat>,
}

/// Runtime statistics from an encoder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncoderStats {
    /// Video frames accepted.
    pub frames_encoded: u64,

    /// Video frames rejected because the encoder fell behind.
    pub frames_dropped: u64,

    /// Audio chunks accepted.
    pub audio_chunks: u64,

    /// Encoded bytes collected so far.
    pub bytes_out: u64,
}

impl EncoderStats {
    /// Drop rate as a percentage.
    pub fn drop_rate(&self) -> f64 {
        let total = self.frames_encoded + self.frames_dropped;
        if total == 0 {
            return 0.0;
        }
        self.frames_dropped as f64 / total as f64 * 100.0
    }
}

/// Everything an encoder produced, in emission order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedOutput {
    pub chunks: Vec<Vec<u8>>,
    pub mime_type: String,
}

impl EncodedOutput {
    pub fn total_len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Concatenate the chunks into one buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.chunks.concat()
    }
}

/// A live encoder.
///
/// Lifecycle: `start` once, push frames/audio, `stop` once. `stop` flushes
/// and returns every collected chunk; calling it on an inactive encoder
/// returns an empty output.
#[async_trait::async_trait]
pub trait StreamEncoder: Send {
    /// Mime type of the produced container.
    fn mime_type(&self) -> &str;

    async fn start(&mut self) -> ClipreelResult<()>;

    /// Encode one frame presented `timestamp` after capture start.
    fn push_video_frame(&mut self, frame: &RgbaImage, timestamp: Duration) -> ClipreelResult<()>;

    fn push_audio(&mut self, chunk: AudioChunk) -> ClipreelResult<()>;

    /// Flush, finalize the container, and hand back the collected output.
    async fn stop(&mut self) -> ClipreelResult<EncodedOutput>;

    fn is_active(&self) -> bool;

    fn stats(&self) -> EncoderStats;
}

/// Shared access to a started encoder.
///
/// The draw loop pushes frames and the audio track pushes samples through
/// clones of this handle; the pipeline `take`s the encoder out to stop it,
/// after which pushes become no-ops.
#[derive(Clone)]
pub struct EncoderHandle {
    inner: Arc<Mutex<Option<Box<dyn StreamEncoder>>>>,
}

impl EncoderHandle {
    pub fn new(encoder: Box<dyn StreamEncoder>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(encoder))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn StreamEncoder>>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Push a frame. Returns `Ok(false)` once the encoder has been taken.
    pub fn push_video_frame(&self, frame: &RgbaImage, timestamp: Duration) -> ClipreelResult<bool> {
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(encoder) if encoder.is_active() => {
                encoder.push_video_frame(frame, timestamp)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Remove the encoder so it can be stopped outside the lock.
    pub fn take(&self) -> Option<Box<dyn StreamEncoder>> {
        self.lock().take()
    }

    pub fn is_active(&self) -> bool {
        self.lock().as_ref().is_some_and(|e| e.is_active())
    }

    pub fn stats(&self) -> Option<EncoderStats> {
        self.lock().as_ref().map(|e| e.stats())
    }
}

impl AudioSink for EncoderHandle {
    fn push_audio(&self, chunk: AudioChunk) {
        let mut guard = self.lock();
        if let Some(encoder) = guard.as_mut().filter(|e| e.is_active()) {
            if let Err(e) = encoder.push_audio(chunk) {
                tracing::warn!(error = %e, "Dropping audio chunk");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockEncoder, Probe};

    #[test]
    fn test_drop_rate() {
        let stats = EncoderStats {
            frames_encoded: 90,
            frames_dropped: 10,
            ..Default::default()
        };
        assert!((stats.drop_rate() - 10.0).abs() < 1e-9);
        assert_eq!(EncoderStats::default().drop_rate(), 0.0);
    }

    #[test]
    fn test_output_concatenates_chunks() {
        let output = EncodedOutput {
            chunks: vec![vec![1, 2], vec![3]],
            mime_type: "video/webm".into(),
        };
        assert_eq!(output.total_len(), 3);
        assert_eq!(output.into_bytes(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_handle_ignores_pushes_after_take() {
        let probe = Probe::default();
        let mut encoder = MockEncoder::new("video/webm", probe.clone());
        encoder.start().await.unwrap();
        let handle = EncoderHandle::new(Box::new(encoder));

        let frame = RgbaImage::new(2, 2);
        assert!(handle.push_video_frame(&frame, Duration::ZERO).unwrap());
        handle.push_audio(AudioChunk::silence(AudioFormat::default(), Duration::from_millis(10)));

        let mut taken = handle.take().unwrap();
        assert!(!handle.push_video_frame(&frame, Duration::from_millis(33)).unwrap());
        assert!(!handle.is_active());

        let output = taken.stop().await.unwrap();
        assert!(output.total_len() > 0);
        assert_eq!(probe.frames_pushed(), 1);
        assert_eq!(probe.audio_chunks_pushed(), 1);
    }
}
