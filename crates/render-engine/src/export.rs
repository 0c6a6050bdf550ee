//! Export capture pipeline.
//!
//! Plays a clip's segments in order on a private decode element while the
//! draw loop captures the compositing surface into an encoder, then hands
//! back the encoded container. Every resource acquired along the way is
//! released exactly once, whether the export succeeds, fails, or is
//! cancelled.

use std::path::Path;
use std::sync::{Arc, Mutex};

use clipreel_clip_model::{Clip, SourceId, SourceRegistry};
use clipreel_common::config::AppConfig;
use clipreel_common::error::{ClipreelError, ClipreelResult};
use clipreel_media_core::abort::{AbortController, AbortSignal};
use clipreel_media_core::audio::{AudioGraph, AudioSink, AudioTrack, MediaTrack};
use clipreel_media_core::backend::MediaBackend;
use clipreel_media_core::capability::{default_mime_candidates, CapabilityLease, CapabilityRegistry};
use clipreel_media_core::element::DecodeElement;
use clipreel_media_core::encoder::{EncodedOutput, EncoderConfig, EncoderHandle};
use clipreel_media_core::wait::{ensure_source, play_until, seek_to, WaitOptions};
use tokio::task::JoinHandle;

use crate::compositor::{default_surface_size, CompositingSurface};
use crate::draw_loop::{lock, DrawLoop, DrawLoopConfig, EncoderSink, SurfaceCaptureTrack, SurfaceSizing};
use crate::overlay::{OverlayFont, OverlayLayer};

/// Per-export switches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportOptions {
    /// Burn the clip's text overlay into the output.
    pub include_text_overlay: bool,

    /// Capture frame rate.
    pub fps: u32,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_text_overlay: true,
            fps: 30,
        }
    }
}

/// Exporter-wide settings, usually derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct ExportSettings {
    /// Output formats, most preferred first.
    pub mime_candidates: Vec<String>,

    /// Surface size when no source reports its dimensions.
    pub default_surface: (u32, u32),

    pub wait: WaitOptions,

    /// Font for overlay glyphs.
    pub font: Option<Arc<OverlayFont>>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            mime_candidates: default_mime_candidates(),
            default_surface: default_surface_size(),
            wait: WaitOptions::default(),
            font: None,
        }
    }
}

impl ExportSettings {
    /// Settings from the application config. A font that fails to load is
    /// logged and skipped.
    pub fn from_config(config: &AppConfig) -> Self {
        let font = config.overlay.font_path.as_deref().and_then(|path| {
            match OverlayFont::load(path) {
                Ok(font) => Some(Arc::new(font)),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Overlay font unavailable");
                    None
                }
            }
        });
        let mime_candidates = if config.export.mime_candidates.is_empty() {
            default_mime_candidates()
        } else {
            config.export.mime_candidates.clone()
        };

        Self {
            mime_candidates,
            default_surface: (
                config.export.surface_width.max(1),
                config.export.surface_height.max(1),
            ),
            wait: WaitOptions::from_config(&config.playback),
            font,
        }
    }
}

/// Non-fatal conditions collected during an export.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExportWarning {
    /// The output has no audio stream.
    #[error("Audio unavailable: {reason}. The exported clip will be muted.")]
    AudioUnavailable { reason: String },

    /// A segment collapsed after clamping to the decoder's duration.
    #[error("Segment {index} of source {source_id} is empty after clamping to the source duration")]
    SegmentSkipped { index: usize, source_id: SourceId },

    /// Overlay backgrounds are drawn but text needs a font.
    #[error("No overlay font configured; overlay text was not drawn")]
    OverlayTextSkipped,
}

/// The finished export.
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub bytes: Vec<u8>,

    /// Negotiated container/codec.
    pub mime_type: String,

    pub has_audio: bool,

    /// Frames delivered to the encoder.
    pub frames: u64,

    pub warnings: Vec<ExportWarning>,
}

impl ExportArtifact {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// File extension matching the container.
    pub fn extension(&self) -> &'static str {
        if self.mime_type.starts_with("video/mp4") {
            "mp4"
        } else {
            "webm"
        }
    }

    /// Write the bytes to `path`, creating parent directories.
    pub fn write_to(&self, path: &Path) -> ClipreelResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &self.bytes)?;
        Ok(())
    }
}

/// Progress callback for export rendering.
pub type ProgressCallback = Box<dyn Fn(ExportProgress) + Send + Sync>;

/// Export progress report.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportProgress {
    pub stage: ExportStage,

    /// Segment being processed (0-based), or the count when done.
    pub segment_index: usize,

    pub segment_count: usize,

    /// Overall progress in `[0, 1]`.
    pub progress: f64,
}

/// Stages of the export process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    Preparing,
    Rendering,
    Finalizing,
    Complete,
    Failed,
}

/// A clip export to run.
pub struct ExportJob {
    pub clip: Clip,
    pub sources: SourceRegistry,
    pub options: ExportOptions,
    pub progress: Option<ProgressCallback>,
}

impl ExportJob {
    pub fn new(clip: Clip, sources: SourceRegistry) -> Self {
        Self {
            clip,
            sources,
            options: ExportOptions::default(),
            progress: None,
        }
    }

    pub fn with_options(mut self, options: ExportOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    fn report(&self, stage: ExportStage, segment_index: usize, segment_count: usize) {
        if let Some(cb) = &self.progress {
            let progress = match stage {
                ExportStage::Preparing => 0.0,
                ExportStage::Complete | ExportStage::Finalizing => 1.0,
                _ if segment_count == 0 => 0.0,
                _ => segment_index as f64 / segment_count as f64,
            };
            cb(ExportProgress {
                stage,
                segment_index,
                segment_count,
                progress,
            });
        }
    }
}

/// A segment bound to its source handle, with its range sanitised.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSegment {
    /// Position in the clip's segment list.
    pub index: usize,
    pub source_id: SourceId,
    pub handle: String,
    pub start: f64,
    pub end: f64,
}

impl ResolvedSegment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Bind every segment to a playable source and drop degenerate ranges.
///
/// Fails with `SourceUnavailable` if any segment's source cannot be played
/// and with `NoPlayableSegments` when nothing longer than `epsilon` is left.
pub fn resolve_segments(
    clip: &Clip,
    sources: &SourceRegistry,
    epsilon: f64,
) -> ClipreelResult<Vec<ResolvedSegment>> {
    let mut resolved = Vec::with_capacity(clip.segments.len());
    for (index, segment) in clip.segments.iter().enumerate() {
        let handle = sources
            .resolve_playable(&segment.source_id)
            .ok()
            .and_then(|source| source.playable_handle())
            .ok_or_else(|| ClipreelError::source_unavailable(segment.source_id.as_str()))?;

        let start = if segment.start.is_finite() {
            segment.start.max(0.0)
        } else {
            0.0
        };
        let end = if segment.end.is_finite() {
            segment.end.max(start)
        } else {
            start
        };
        resolved.push(ResolvedSegment {
            index,
            source_id: segment.source_id.clone(),
            handle: handle.to_string(),
            start,
            end,
        });
    }

    let before = resolved.len();
    resolved.retain(|s| s.duration() > epsilon);
    if resolved.len() < before {
        tracing::debug!(
            clip = %clip.name,
            dropped = before - resolved.len(),
            "Dropping zero-length segments"
        );
    }
    if resolved.is_empty() {
        return Err(ClipreelError::NoPlayableSegments);
    }
    Ok(resolved)
}

/// Everything an export holds. Each field is taken exactly once on release.
struct ExportResources {
    lease: Option<CapabilityLease>,
    element: Option<Arc<dyn DecodeElement>>,
    audio_graph: Option<Box<dyn AudioGraph>>,
    audio_track: Option<Box<dyn AudioTrack>>,
    encoder: Option<EncoderHandle>,
    capture_track: Option<Arc<SurfaceCaptureTrack>>,
    draw_loop: Option<DrawLoop>,
}

#[derive(Default)]
struct Released {
    output: Option<ClipreelResult<EncodedOutput>>,
    frames: u64,
    capture_failure: Option<String>,
}

impl ExportResources {
    fn new(lease: CapabilityLease) -> Self {
        Self {
            lease: Some(lease),
            element: None,
            audio_graph: None,
            audio_track: None,
            encoder: None,
            capture_track: None,
            draw_loop: None,
        }
    }

    /// Tear down in dependency order: draw loop, capture track, encoder,
    /// audio track, audio graph, element, lease.
    async fn release(&mut self) -> Released {
        let mut released = Released::default();

        if let Some(draw_loop) = self.draw_loop.take() {
            match draw_loop.stop().await {
                Ok(report) => {
                    released.frames = report.stats.frames_delivered;
                    released.capture_failure = report.failure;
                }
                Err(e) => released.capture_failure = Some(e.to_string()),
            }
        }

        if let Some(track) = self.capture_track.take() {
            track.stop();
        }

        if let Some(handle) = self.encoder.take() {
            if let Some(mut encoder) = handle.take() {
                released.output = Some(encoder.stop().await);
            }
        }

        if let Some(track) = self.audio_track.take() {
            track.stop();
        }

        if let Some(mut graph) = self.audio_graph.take() {
            graph.close();
        }

        if let Some(element) = self.element.take() {
            element.pause();
            element.unbind();
        }

        if let Some(lease) = self.lease.take() {
            lease.release();
        }

        released
    }
}

/// What a successful run learned about the output.
struct RunSummary {
    has_audio: bool,
    warnings: Vec<ExportWarning>,
}

/// Exports clips through a media backend.
pub struct ClipExporter {
    backend: Arc<dyn MediaBackend>,
    registry: Arc<CapabilityRegistry>,
    settings: ExportSettings,
}

impl ClipExporter {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            backend,
            registry: CapabilityRegistry::global(),
            settings: ExportSettings::default(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<CapabilityRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_settings(mut self, settings: ExportSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    /// Run `job` to completion.
    pub async fn export(&self, job: &ExportJob, signal: &AbortSignal) -> ClipreelResult<ExportArtifact> {
        tracing::info!(
            clip = %job.clip.name,
            segments = job.clip.segments.len(),
            backend = self.backend.name(),
            "Starting export"
        );
        job.report(ExportStage::Preparing, 0, 0);

        let result = self.export_inner(job, signal).await;
        match &result {
            Ok(artifact) => {
                tracing::info!(
                    clip = %job.clip.name,
                    bytes = artifact.len(),
                    mime_type = %artifact.mime_type,
                    frames = artifact.frames,
                    "Export complete"
                );
                job.report(ExportStage::Complete, 1, 1);
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!(clip = %job.clip.name, "Export cancelled");
                job.report(ExportStage::Failed, 0, 0);
            }
            Err(e) => {
                tracing::error!(clip = %job.clip.name, error = %e, "Export failed");
                job.report(ExportStage::Failed, 0, 0);
            }
        }
        result
    }

    async fn export_inner(&self, job: &ExportJob, signal: &AbortSignal) -> ClipreelResult<ExportArtifact> {
        let epsilon = self.settings.wait.epsilon;
        let segments = resolve_segments(&job.clip, &job.sources, epsilon)?;

        let lease = self.registry.acquire();
        let mime_type = match lease.select_mime_type(self.backend.as_ref(), &self.settings.mime_candidates) {
            Ok(mime_type) => mime_type,
            Err(e) => {
                lease.release();
                return Err(e);
            }
        };

        let mut resources = ExportResources::new(lease);
        let outcome = self
            .run(job, &segments, &mime_type, &mut resources, signal)
            .await;
        let released = resources.release().await;

        let summary = outcome?;
        if let Some(message) = released.capture_failure {
            return Err(ClipreelError::render(format!("Frame capture failed: {message}")));
        }
        let output = match released.output {
            Some(output) => output?,
            None => return Err(ClipreelError::encoder("Encoder was never started")),
        };

        if output.chunks.is_empty() {
            tracing::warn!(clip = %job.clip.name, "Encoder produced no data");
        }
        let mime_type = if output.mime_type.is_empty() {
            mime_type
        } else {
            output.mime_type.clone()
        };
        Ok(ExportArtifact {
            bytes: output.into_bytes(),
            mime_type,
            has_audio: summary.has_audio,
            frames: released.frames,
            warnings: summary.warnings,
        })
    }

    async fn run(
        &self,
        job: &ExportJob,
        segments: &[ResolvedSegment],
        mime_type: &str,
        resources: &mut ExportResources,
        signal: &AbortSignal,
    ) -> ClipreelResult<RunSummary> {
        let wait = &self.settings.wait;
        let mut warnings = Vec::new();

        let element = self.backend.create_decode_element()?;
        resources.element = Some(Arc::clone(&element));

        match element.open_audio_graph() {
            Some(mut graph) => {
                let track = graph.create_track();
                resources.audio_graph = Some(graph);
                match track {
                    Ok(Some(track)) => resources.audio_track = Some(track),
                    Ok(None) => {
                        tracing::warn!("The selected clip has no audio track.");
                        warnings.push(ExportWarning::AudioUnavailable {
                            reason: "the clip has no audio track".to_string(),
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Audio capture failed; exporting without sound");
                        warnings.push(ExportWarning::AudioUnavailable {
                            reason: e.to_string(),
                        });
                    }
                }
            }
            None => {
                tracing::warn!("Audio graph unavailable. Exported clip will be muted.");
                warnings.push(ExportWarning::AudioUnavailable {
                    reason: "no audio graph on this backend".to_string(),
                });
            }
        }

        let (width, height) = job
            .sources
            .max_dimensions(segments.iter().map(|s| &s.source_id))
            .unwrap_or(self.settings.default_surface);
        let surface = Arc::new(Mutex::new(CompositingSurface::new(width, height)));

        let config = EncoderConfig {
            mime_type: mime_type.to_string(),
            width,
            height,
            fps: job.options.fps.max(1),
            audio: resources.audio_track.as_ref().map(|t| t.format()),
        };
        let mut encoder = self.backend.create_encoder(&config)?;
        encoder.start().await?;
        let encoder = EncoderHandle::new(encoder);
        resources.encoder = Some(encoder.clone());
        tracing::debug!(mime_type, width, height, fps = config.fps, "Encoder started");

        if let Some(track) = &resources.audio_track {
            track.attach(Arc::new(encoder.clone()) as Arc<dyn AudioSink>);
        }

        let overlay = match (&job.clip.text_overlay, job.options.include_text_overlay) {
            (Some(overlay), true) if !overlay.content.trim().is_empty() => {
                if self.settings.font.is_none() {
                    warnings.push(ExportWarning::OverlayTextSkipped);
                }
                Some(OverlayLayer::new(overlay.clone(), self.settings.font.clone()))
            }
            _ => None,
        };

        let capture_track = SurfaceCaptureTrack::new();
        resources.capture_track = Some(Arc::clone(&capture_track));
        resources.draw_loop = Some(DrawLoop::start(DrawLoopConfig {
            element: Arc::clone(&element),
            surface: Arc::clone(&surface),
            overlay,
            sink: Arc::new(EncoderSink::new(encoder, capture_track)),
            fps: config.fps,
            sizing: SurfaceSizing::Fixed,
        })?);

        let count = segments.len();
        for (position, segment) in segments.iter().enumerate() {
            if signal.is_aborted() {
                return Err(ClipreelError::Cancelled);
            }
            job.report(ExportStage::Rendering, position, count);
            tracing::debug!(
                segment = segment.index,
                source = %segment.source_id,
                start = segment.start,
                end = segment.end,
                "Exporting segment"
            );

            ensure_source(element.as_ref(), &segment.handle, signal, wait).await?;
            if let Some((w, h)) = element.dimensions() {
                lock(&surface).grow_to(w, h);
            }

            let safe_end = match element.duration() {
                Some(duration) if duration.is_finite() && duration > 0.0 => segment.end.min(duration),
                _ => segment.end,
            };
            if safe_end - segment.start <= wait.epsilon {
                tracing::warn!(
                    segment = segment.index,
                    source = %segment.source_id,
                    "Segment starts past the end of its source; skipping"
                );
                warnings.push(ExportWarning::SegmentSkipped {
                    index: segment.index,
                    source_id: segment.source_id.clone(),
                });
                continue;
            }

            seek_to(element.as_ref(), segment.start, signal, wait).await?;
            play_until(element.as_ref(), safe_end, signal, wait).await?;
            element.pause();

            if let Some(draw_loop) = &resources.draw_loop {
                draw_loop.health()?;
            }
        }

        job.report(ExportStage::Finalizing, count, count);
        Ok(RunSummary {
            has_audio: resources.audio_track.is_some(),
            warnings,
        })
    }

    /// Run `job` on a tokio task.
    pub fn spawn(self: Arc<Self>, job: ExportJob) -> ExportHandle {
        let controller = AbortController::new();
        let signal = controller.signal();
        let task = tokio::spawn(async move { self.export(&job, &signal).await });
        ExportHandle { controller, task }
    }
}

/// A running export.
pub struct ExportHandle {
    controller: AbortController,
    task: JoinHandle<ClipreelResult<ExportArtifact>>,
}

impl ExportHandle {
    /// Request cancellation. Returns `true` only for the call that actually
    /// cancelled a running export.
    pub fn cancel(&self) -> bool {
        if self.task.is_finished() {
            return false;
        }
        let cancelled = self.controller.abort();
        if cancelled {
            tracing::info!("Export cancellation requested");
        }
        cancelled
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the export's outcome.
    pub async fn wait(self) -> ClipreelResult<ExportArtifact> {
        self.task
            .await
            .map_err(|e| ClipreelError::render(format!("Export task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipreel_clip_model::{Segment, Source};

    fn registry() -> SourceRegistry {
        let mut missing = Source::new("gone", "gone.webm", 3.0);
        missing.invalidate();
        vec![
            Source::new("a", "a.webm", 10.0),
            Source::new("b", "b.webm", 10.0),
            missing,
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_resolve_drops_degenerate_segments() {
        let clip = Clip::new(
            1,
            "c",
            vec![Segment::new("a", 0.0, 0.0), Segment::new("b", 1.0, 5.0)],
        );
        let resolved = resolve_segments(&clip, &registry(), 0.01).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].index, 1);
        assert_eq!(resolved[0].handle, "b.webm");
    }

    #[test]
    fn test_resolve_clamps_ranges() {
        let clip = Clip::new(
            1,
            "c",
            vec![Segment::new("a", -2.0, 3.0), Segment::new("b", 4.0, 2.0)],
        );
        let resolved = resolve_segments(&clip, &registry(), 0.01).unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!((resolved[0].start, resolved[0].end), (0.0, 3.0));
    }

    #[test]
    fn test_resolve_all_degenerate_fails() {
        let clip = Clip::new(1, "c", vec![Segment::new("a", 2.0, 2.005)]);
        let err = resolve_segments(&clip, &registry(), 0.01).unwrap_err();
        assert!(matches!(err, ClipreelError::NoPlayableSegments));
    }

    #[test]
    fn test_resolve_missing_source_fails() {
        let clip = Clip::new(
            1,
            "c",
            vec![Segment::new("a", 0.0, 1.0), Segment::new("gone", 0.0, 1.0)],
        );
        let err = resolve_segments(&clip, &registry(), 0.01).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Source unavailable: gone. Re-import the video first."
        );

        let clip = Clip::new(1, "c", vec![Segment::new("nope", 0.0, 1.0)]);
        assert!(matches!(
            resolve_segments(&clip, &registry(), 0.01),
            Err(ClipreelError::SourceUnavailable { .. })
        ));
    }

    #[test]
    fn test_artifact_extension() {
        let artifact = ExportArtifact {
            bytes: vec![1, 2, 3],
            mime_type: "video/webm;codecs=vp9,opus".into(),
            has_audio: true,
            frames: 3,
            warnings: Vec::new(),
        };
        assert_eq!(artifact.extension(), "webm");
        assert_eq!(artifact.len(), 3);
    }

    #[test]
    fn test_progress_fractions() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let job = ExportJob::new(Clip::new(1, "c", Vec::new()), SourceRegistry::new())
            .with_progress(Box::new(move |p| sink.lock().unwrap().push(p.progress)));
        job.report(ExportStage::Preparing, 0, 4);
        job.report(ExportStage::Rendering, 1, 4);
        job.report(ExportStage::Finalizing, 4, 4);
        assert_eq!(*seen.lock().unwrap(), vec![0.0, 0.25, 1.0]);
    }
}
