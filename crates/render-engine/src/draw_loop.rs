//! Fixed-rate draw loop feeding a frame sink.
//!
//! Every tick composes the element's current frame (plus overlay) onto the
//! shared surface and hands the result to a [`FrameSink`]. The first frame
//! is rendered synchronously in [`DrawLoop::start`] so a sink never starts
//! empty; after [`DrawLoop::stop`] returns no further tick can run.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use clipreel_common::clock::{CaptureClock, FrameClock};
use clipreel_common::error::{ClipreelError, ClipreelResult};
use clipreel_media_core::audio::{MediaTrack, TrackKind};
use clipreel_media_core::element::DecodeElement;
use clipreel_media_core::encoder::EncoderHandle;
use image::RgbaImage;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::compositor::CompositingSurface;
use crate::overlay::OverlayLayer;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Receives composed frames.
pub trait FrameSink: Send + Sync {
    /// Accept one frame. `Ok(false)` means the sink has closed and the loop
    /// should end quietly.
    fn accept(&self, frame: &RgbaImage, timestamp: Duration) -> ClipreelResult<bool>;
}

/// Latest frame published for a viewer.
pub struct DisplaySink {
    tx: watch::Sender<Option<Arc<RgbaImage>>>,
}

impl DisplaySink {
    pub fn new() -> (Self, watch::Receiver<Option<Arc<RgbaImage>>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }
}

impl FrameSink for DisplaySink {
    fn accept(&self, frame: &RgbaImage, _timestamp: Duration) -> ClipreelResult<bool> {
        self.tx.send_replace(Some(Arc::new(frame.clone())));
        Ok(true)
    }
}

/// The video track captured from the surface during export.
#[derive(Debug)]
pub struct SurfaceCaptureTrack {
    live: AtomicBool,
}

impl SurfaceCaptureTrack {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            live: AtomicBool::new(true),
        })
    }
}

impl MediaTrack for SurfaceCaptureTrack {
    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            tracing::debug!("Surface capture track stopped");
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

/// Pushes frames into the export encoder while the capture track is live.
pub struct EncoderSink {
    encoder: EncoderHandle,
    track: Arc<SurfaceCaptureTrack>,
}

impl EncoderSink {
    pub fn new(encoder: EncoderHandle, track: Arc<SurfaceCaptureTrack>) -> Self {
        Self { encoder, track }
    }
}

impl FrameSink for EncoderSink {
    fn accept(&self, frame: &RgbaImage, timestamp: Duration) -> ClipreelResult<bool> {
        if !self.track.is_live() {
            return Ok(false);
        }
        self.encoder.push_video_frame(frame, timestamp)
    }
}

/// How the loop sizes the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceSizing {
    /// Follow the element's native dimensions every frame (preview).
    MatchSource,
    /// Leave sizing to the owner (export grows the surface per segment).
    Fixed,
}

/// Frame counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrawLoopStats {
    pub frames_rendered: u64,
    pub frames_delivered: u64,
}

/// Outcome of a stopped loop.
#[derive(Debug)]
pub struct DrawLoopReport {
    pub stats: DrawLoopStats,
    /// First sink failure, if the loop ended on one.
    pub failure: Option<String>,
}

#[derive(Default)]
struct LoopShared {
    rendered: AtomicU64,
    delivered: AtomicU64,
    failure: Mutex<Option<String>>,
}

impl LoopShared {
    fn stats(&self) -> DrawLoopStats {
        DrawLoopStats {
            frames_rendered: self.rendered.load(Ordering::SeqCst),
            frames_delivered: self.delivered.load(Ordering::SeqCst),
        }
    }
}

struct Renderer {
    element: Arc<dyn DecodeElement>,
    surface: Arc<Mutex<CompositingSurface>>,
    overlay: Option<OverlayLayer>,
    sink: Arc<dyn FrameSink>,
    sizing: SurfaceSizing,
    clock: CaptureClock,
    shared: Arc<LoopShared>,
}

impl Renderer {
    /// Render and deliver one frame. `Ok(false)` when the sink closed.
    fn render_once(&mut self) -> ClipreelResult<bool> {
        let frame = self.element.current_frame();
        let mut surface = lock(&self.surface);
        if self.sizing == SurfaceSizing::MatchSource {
            if let Some((w, h)) = self.element.dimensions() {
                surface.match_source(w, h);
            }
        }
        let composed = surface.compose(frame.as_ref(), self.overlay.as_mut());
        self.shared.rendered.fetch_add(1, Ordering::SeqCst);

        let delivered = self.sink.accept(composed, self.clock.elapsed())?;
        if delivered {
            self.shared.delivered.fetch_add(1, Ordering::SeqCst);
        }
        Ok(delivered)
    }
}

/// Inputs for [`DrawLoop::start`].
pub struct DrawLoopConfig {
    pub element: Arc<dyn DecodeElement>,
    pub surface: Arc<Mutex<CompositingSurface>>,
    pub overlay: Option<OverlayLayer>,
    pub sink: Arc<dyn FrameSink>,
    pub fps: u32,
    pub sizing: SurfaceSizing,
}

/// A running draw loop.
pub struct DrawLoop {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    shared: Arc<LoopShared>,
    frame_clock: FrameClock,
}

impl DrawLoop {
    /// Render the first frame now, then one per `1/fps` on a tokio task.
    pub fn start(config: DrawLoopConfig) -> ClipreelResult<Self> {
        let frame_clock = FrameClock::new(config.fps);
        let shared = Arc::new(LoopShared::default());
        let mut renderer = Renderer {
            element: config.element,
            surface: config.surface,
            overlay: config.overlay,
            sink: config.sink,
            sizing: config.sizing,
            clock: CaptureClock::start(),
            shared: Arc::clone(&shared),
        };

        renderer.render_once()?;

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let interval = frame_clock.frame_interval();
        let task_shared = Arc::clone(&shared);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; that frame is already out.
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => match renderer.render_once() {
                        Ok(true) => {}
                        Ok(false) => {
                            tracing::debug!("Frame sink closed; draw loop ending");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Draw loop failed");
                            *lock(&task_shared.failure) = Some(e.to_string());
                            break;
                        }
                    },
                }
            }
        });

        tracing::debug!(fps = frame_clock.fps(), "Draw loop started");
        Ok(Self {
            stop_tx: Some(stop_tx),
            task,
            shared,
            frame_clock,
        })
    }

    pub fn fps(&self) -> u32 {
        self.frame_clock.fps()
    }

    pub fn stats(&self) -> DrawLoopStats {
        self.shared.stats()
    }

    /// `Err` once the loop has ended on a sink failure.
    pub fn health(&self) -> ClipreelResult<()> {
        match lock(&self.shared.failure).as_ref() {
            Some(message) => Err(ClipreelError::render(format!(
                "Frame capture failed: {message}"
            ))),
            None => Ok(()),
        }
    }

    /// Stop ticking and wait for the task to finish.
    pub async fn stop(mut self) -> ClipreelResult<DrawLoopReport> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        (&mut self.task)
            .await
            .map_err(|e| ClipreelError::render(format!("Draw loop task failed: {e}")))?;

        let stats = self.shared.stats();
        tracing::debug!(
            frames_rendered = stats.frames_rendered,
            frames_delivered = stats.frames_delivered,
            "Draw loop stopped"
        );
        let failure = lock(&self.shared.failure).take();
        Ok(DrawLoopReport { stats, failure })
    }
}

impl Drop for DrawLoop {
    fn drop(&mut self) {
        if self.stop_tx.is_some() {
            self.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipreel_media_core::testing::{MockElement, MockEncoder, MockMedia, Probe};
    use clipreel_media_core::encoder::StreamEncoder;

    fn element() -> Arc<MockElement> {
        let element = MockElement::new().with_media("a.webm", MockMedia::new(5.0).with_dimensions(32, 24));
        clipreel_media_core::element::DecodeElement::bind(&element, "a.webm").unwrap();
        Arc::new(element)
    }

    #[tokio::test]
    async fn test_first_frame_is_synchronous() {
        let (sink, rx) = DisplaySink::new();
        let draw = DrawLoop::start(DrawLoopConfig {
            element: element(),
            surface: Arc::new(Mutex::new(CompositingSurface::new(8, 8))),
            overlay: None,
            sink: Arc::new(sink),
            fps: 30,
            sizing: SurfaceSizing::MatchSource,
        })
        .unwrap();

        let frame = rx.borrow().clone().expect("first frame published");
        assert_eq!(frame.dimensions(), (32, 24));
        let report = draw.stop().await.unwrap();
        assert!(report.stats.frames_rendered >= 1);
        assert!(report.failure.is_none());
    }

    #[tokio::test]
    async fn test_no_frames_after_stop() {
        let (sink, _rx) = DisplaySink::new();
        let draw = DrawLoop::start(DrawLoopConfig {
            element: element(),
            surface: Arc::new(Mutex::new(CompositingSurface::new(8, 8))),
            overlay: None,
            sink: Arc::new(sink),
            fps: 200,
            sizing: SurfaceSizing::Fixed,
        })
        .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let shared = Arc::clone(&draw.shared);
        let report = draw.stop().await.unwrap();
        assert!(report.stats.frames_rendered > 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(shared.stats(), report.stats);
    }

    #[tokio::test]
    async fn test_encoder_sink_stops_with_track() {
        let probe = Probe::default();
        let mut encoder = MockEncoder::new("video/webm", probe.clone());
        encoder.start().await.unwrap();
        let handle = EncoderHandle::new(Box::new(encoder));
        let track = SurfaceCaptureTrack::new();

        let draw = DrawLoop::start(DrawLoopConfig {
            element: element(),
            surface: Arc::new(Mutex::new(CompositingSurface::new(16, 16))),
            overlay: None,
            sink: Arc::new(EncoderSink::new(handle.clone(), Arc::clone(&track))),
            fps: 100,
            sizing: SurfaceSizing::Fixed,
        })
        .unwrap();
        assert_eq!(probe.frames_pushed(), 1);
        assert_eq!(probe.last_frame_size(), Some((16, 16)));

        track.stop();
        track.stop();
        tokio::time::sleep(Duration::from_millis(30)).await;
        let report = draw.stop().await.unwrap();
        assert_eq!(report.stats.frames_delivered, probe.frames_pushed());
        assert!(report.failure.is_none());
        assert_eq!(probe.frames_after_stop(), 0);
    }

    struct FailingSink;

    impl FrameSink for FailingSink {
        fn accept(&self, _frame: &RgbaImage, _timestamp: Duration) -> ClipreelResult<bool> {
            Err(ClipreelError::encoder("sink exploded"))
        }
    }

    #[tokio::test]
    async fn test_first_frame_failure_is_returned() {
        let result = DrawLoop::start(DrawLoopConfig {
            element: element(),
            surface: Arc::new(Mutex::new(CompositingSurface::new(4, 4))),
            overlay: None,
            sink: Arc::new(FailingSink),
            fps: 30,
            sizing: SurfaceSizing::Fixed,
        });
        assert!(result.is_err());
    }
}
