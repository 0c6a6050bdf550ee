//! Interactive preview: segment playback plus a display draw loop.

use std::sync::{Arc, Mutex};

use clipreel_common::error::ClipreelResult;
use clipreel_playback::{PlaybackSequencer, PlaybackStatus, PreviewHandle, PreviewSession};
use image::RgbaImage;
use tokio::sync::watch;

use crate::compositor::CompositingSurface;
use crate::draw_loop::{DisplaySink, DrawLoop, DrawLoopConfig, DrawLoopStats, SurfaceSizing};
use crate::overlay::OverlayLayer;

/// A running preview. The display surface follows the bound source's native
/// size.
pub struct PreviewPlayer {
    session: PreviewHandle,
    draw_loop: DrawLoop,
    frames: watch::Receiver<Option<Arc<RgbaImage>>>,
}

impl PreviewPlayer {
    /// Start playback and rendering. `overlay` is drawn on every frame.
    pub fn start(
        sequencer: PlaybackSequencer,
        overlay: Option<OverlayLayer>,
        fps: u32,
    ) -> ClipreelResult<Self> {
        let element = Arc::clone(sequencer.element());
        let session = PreviewSession::spawn(sequencer);

        let (sink, frames) = DisplaySink::new();
        let draw_loop = DrawLoop::start(DrawLoopConfig {
            element,
            surface: Arc::new(Mutex::new(CompositingSurface::default())),
            overlay,
            sink: Arc::new(sink),
            fps,
            sizing: SurfaceSizing::MatchSource,
        })?;

        Ok(Self {
            session,
            draw_loop,
            frames,
        })
    }

    /// Latest composed frame.
    pub fn frames(&self) -> watch::Receiver<Option<Arc<RgbaImage>>> {
        self.frames.clone()
    }

    pub fn status(&self) -> PlaybackStatus {
        self.session.status()
    }

    pub fn session(&self) -> &PreviewHandle {
        &self.session
    }

    /// Stop rendering, then playback; returns the sequencer and frame stats.
    pub async fn stop(self) -> ClipreelResult<(PlaybackSequencer, DrawLoopStats)> {
        let report = self.draw_loop.stop().await?;
        let sequencer = self.session.stop().await?;
        Ok((sequencer, report.stats))
    }
}
