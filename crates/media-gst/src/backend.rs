//! Backend factory and mime → element mapping.

use std::sync::Arc;

use clipreel_common::error::{ClipreelError, ClipreelResult};
use clipreel_media_core::backend::MediaBackend;
use clipreel_media_core::element::DecodeElement;
use clipreel_media_core::encoder::{EncoderConfig, StreamEncoder};
use gstreamer as gst;

use crate::element::GstDecodeElement;
use crate::encoder::GstStreamEncoder;
use crate::init_gstreamer;

/// Elements every encoder pipeline needs regardless of codec.
const BASE_ELEMENTS: [&str; 6] = [
    "appsrc",
    "appsink",
    "videoconvert",
    "videoscale",
    "queue",
    "webmmux",
];

/// Elements the audio branch adds.
const AUDIO_ELEMENTS: [&str; 3] = ["audioconvert", "audioresample", "opusenc"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    Vp8,
    Vp9,
}

impl VideoCodec {
    pub fn factory(&self) -> &'static str {
        match self {
            Self::Vp8 => "vp8enc",
            Self::Vp9 => "vp9enc",
        }
    }
}

/// Codec choice for one WebM output mime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebmCodecs {
    pub video: VideoCodec,
    /// Whether an Opus audio branch is allowed.
    pub opus: bool,
}

impl WebmCodecs {
    /// Element factories needed for this codec set.
    pub fn required_factories(&self) -> Vec<&'static str> {
        let mut factories: Vec<&'static str> = BASE_ELEMENTS.to_vec();
        factories.push(self.video.factory());
        if self.opus {
            factories.extend(AUDIO_ELEMENTS);
        }
        factories
    }
}

/// Map a mime type such as `video/webm;codecs=vp9,opus` to codecs.
///
/// Bare `video/webm` means VP8 with Opus. Returns `None` for other
/// containers and for codecs this backend cannot produce.
pub fn codecs_for_mime(mime_type: &str) -> Option<WebmCodecs> {
    let mut parts = mime_type.split(';').map(str::trim);
    let container = parts.next()?;
    if !container.eq_ignore_ascii_case("video/webm") {
        return None;
    }

    let codecs = parts.find_map(|p| {
        let (key, value) = p.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("codecs")
            .then(|| value.trim().trim_matches('"').to_ascii_lowercase())
    });
    let Some(codecs) = codecs else {
        return Some(WebmCodecs {
            video: VideoCodec::Vp8,
            opus: true,
        });
    };

    let mut video = None;
    let mut opus = false;
    for codec in codecs.split(',').map(str::trim) {
        match codec {
            "vp8" if video.is_none() => video = Some(VideoCodec::Vp8),
            "vp9" if video.is_none() => video = Some(VideoCodec::Vp9),
            "opus" => opus = true,
            _ => return None,
        }
    }

    video.map(|video| WebmCodecs { video, opus })
}

/// Media backend backed by the system GStreamer.
pub struct GstBackend {
    available: bool,
}

impl GstBackend {
    pub fn new() -> Self {
        let available = match init_gstreamer() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "GStreamer backend unavailable");
                false
            }
        };
        Self { available }
    }

    fn ensure_available(&self) -> ClipreelResult<()> {
        if self.available {
            Ok(())
        } else {
            Err(ClipreelError::config("GStreamer is not available on this host"))
        }
    }
}

impl Default for GstBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaBackend for GstBackend {
    fn name(&self) -> &str {
        "gstreamer"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn create_decode_element(&self) -> ClipreelResult<Arc<dyn DecodeElement>> {
        self.ensure_available()?;
        Ok(Arc::new(GstDecodeElement::new()?))
    }

    fn is_mime_type_supported(&self, mime_type: &str) -> bool {
        if !self.available {
            return false;
        }
        let Some(codecs) = codecs_for_mime(mime_type) else {
            return false;
        };
        let missing: Vec<_> = codecs
            .required_factories()
            .into_iter()
            .filter(|name| gst::ElementFactory::find(name).is_none())
            .collect();
        if !missing.is_empty() {
            tracing::debug!(mime_type, ?missing, "Missing GStreamer elements");
        }
        missing.is_empty()
    }

    fn create_encoder(&self, config: &EncoderConfig) -> ClipreelResult<Box<dyn StreamEncoder>> {
        self.ensure_available()?;
        Ok(Box::new(GstStreamEncoder::new(config)?))
    }
}
