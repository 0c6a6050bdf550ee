//! GStreamer backend for Clipreel.
//!
//! Implements the host media contracts from `clipreel-media-core` on top of
//! the system GStreamer installation:
//!
//! - [`GstDecodeElement`]: a `playbin` whose video and audio sinks are
//!   `appsink`s, with a pump thread turning bus messages into media events.
//! - [`GstStreamEncoder`]: an `appsrc` → VP8/VP9 (+ Opus) → `webmmux` →
//!   `appsink` pipeline collecting the container bytes in memory.
//! - [`GstBackend`]: the factory tying both together, with mime probing via
//!   the element factory registry.
//!
//! Only the generic `gstreamer` bindings are used; `appsrc`/`appsink` are
//! driven through their action signals.

use std::sync::OnceLock;

use clipreel_common::error::{ClipreelError, ClipreelResult};
use gstreamer as gst;

pub mod backend;
pub mod element;
pub mod encoder;

pub use backend::*;
pub use element::*;
pub use encoder::*;

/// Initialise GStreamer once per process.
pub fn init_gstreamer() -> ClipreelResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(ClipreelError::config(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}
