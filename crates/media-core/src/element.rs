//! The decode element: one media decoder bound to at most one source.

use std::fmt;
use std::sync::Arc;

use clipreel_common::error::ClipreelResult;
use image::RgbaImage;
use tokio::sync::broadcast;

use crate::audio::AudioGraph;

/// Ticket identifying one `bind`/`reload` request on an element.
///
/// Every bind produces a fresh id; `LoadedMetadata` events carry the id of
/// the bind they answer so stale completions can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindId(pub u64);

impl fmt::Display for BindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bind#{}", self.0)
    }
}

/// How much of the bound source the element has loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    /// Nothing bound, or metadata not yet known.
    Nothing,
    /// Duration and dimensions are known; seeking is possible.
    Metadata,
    /// Enough data buffered to play.
    Enough,
}

/// Notifications emitted by a decode element.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// The source requested by `bind` is ready for seeking.
    LoadedMetadata { bind: BindId },
    /// A seek completed.
    Seeked,
    /// Playback position advanced (seconds).
    TimeUpdate { position: f64 },
    /// Playback reached the end of the media.
    Ended,
    /// The element failed; the message is human readable.
    Error { message: String },
}

/// A decoded RGBA frame and the media position it was presented at.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: Arc<RgbaImage>,
    pub position: f64,
}

impl VideoFrame {
    pub fn new(image: RgbaImage, position: f64) -> Self {
        Self {
            image: Arc::new(image),
            position,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// A media decoder driven by the sequencer or the export pipeline.
///
/// Methods take `&self`; implementations synchronise internally so a draw
/// loop can sample frames while another task issues seeks. Completion of
/// `bind`, `seek` and playback progress is reported asynchronously through
/// [`DecodeElement::subscribe`].
pub trait DecodeElement: Send + Sync {
    /// Pause and load `handle`. Resolution is signalled by a
    /// `LoadedMetadata` event carrying the returned id, or an `Error`.
    fn bind(&self, handle: &str) -> ClipreelResult<BindId>;

    /// Reload the currently bound handle from scratch.
    fn reload(&self) -> ClipreelResult<BindId>;

    /// Drop the bound source and release decoder resources.
    fn unbind(&self);

    /// Handle of the bound source.
    fn bound_handle(&self) -> Option<String>;

    fn ready_state(&self) -> ReadyState;

    /// Start seeking to `position` seconds; completion is a `Seeked` event.
    fn seek(&self, position: f64) -> ClipreelResult<()>;

    /// Start or resume playback.
    fn play(&self) -> ClipreelResult<()>;

    fn pause(&self);

    /// Current playback position in seconds.
    fn current_time(&self) -> f64;

    /// Duration of the bound media, when known and finite.
    fn duration(&self) -> Option<f64>;

    /// Native frame size of the bound media.
    fn dimensions(&self) -> Option<(u32, u32)>;

    fn is_ended(&self) -> bool;

    /// Most recently decoded frame.
    fn current_frame(&self) -> Option<VideoFrame>;

    /// New receiver for this element's events. Dropping it deregisters.
    fn subscribe(&self) -> broadcast::Receiver<MediaEvent>;

    /// Open an audio graph tapping this element's audio output, or `None`
    /// when the host cannot route audio.
    fn open_audio_graph(&self) -> Option<Box<dyn AudioGraph>>;
}

/// Whether `element` has `handle` bound and at least metadata loaded.
pub fn is_ready_for(element: &dyn DecodeElement, handle: &str) -> bool {
    element.bound_handle().as_deref() == Some(handle)
        && element.ready_state() >= ReadyState::Metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_state_ordering() {
        assert!(ReadyState::Enough > ReadyState::Metadata);
        assert!(ReadyState::Metadata > ReadyState::Nothing);
    }

    #[test]
    fn test_video_frame_dimensions() {
        let frame = VideoFrame::new(RgbaImage::new(4, 2), 1.5);
        assert_eq!((frame.width(), frame.height()), (4, 2));
        assert_eq!(BindId(7).to_string(), "bind#7");
    }
}
