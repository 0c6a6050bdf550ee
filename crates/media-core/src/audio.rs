//! Audio routing from a decode element into an encoder.

use std::sync::Arc;
use std::time::Duration;

use clipreel_common::error::ClipreelResult;

/// PCM layout of an audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
        }
    }
}

impl AudioFormat {
    /// Interleaved sample count covering `duration`.
    pub fn samples_for(&self, duration: Duration) -> usize {
        let frames = (duration.as_secs_f64() * self.sample_rate as f64).round() as usize;
        frames * self.channels as usize
    }
}

/// Interleaved `f32` PCM.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub format: AudioFormat,
}

impl AudioChunk {
    pub fn silence(format: AudioFormat, duration: Duration) -> Self {
        Self {
            samples: vec![0.0; format.samples_for(duration)],
            format,
        }
    }

    /// Playback length of this chunk.
    pub fn duration(&self) -> Duration {
        let channels = self.format.channels.max(1) as usize;
        let frames = self.samples.len() / channels;
        Duration::from_secs_f64(frames as f64 / self.format.sample_rate.max(1) as f64)
    }
}

/// Consumer of audio chunks (the encoder's audio input).
pub trait AudioSink: Send + Sync {
    fn push_audio(&self, chunk: AudioChunk);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

/// A live media track feeding the encoder. `stop` is idempotent.
pub trait MediaTrack: Send + Sync {
    fn kind(&self) -> TrackKind;
    fn stop(&self);
    fn is_live(&self) -> bool;
}

/// Audio track produced by an [`AudioGraph`].
pub trait AudioTrack: MediaTrack {
    fn format(&self) -> AudioFormat;

    /// Route this track's samples into `sink` until the track stops.
    fn attach(&self, sink: Arc<dyn AudioSink>);
}

/// Audio routing opened on a decode element.
pub trait AudioGraph: Send {
    /// Build the output track. `Ok(None)` means the graph produced no audio
    /// track and the export continues video-only.
    fn create_track(&mut self) -> ClipreelResult<Option<Box<dyn AudioTrack>>>;

    /// Disconnect from the element and release the graph. Idempotent.
    fn close(&mut self);
}
