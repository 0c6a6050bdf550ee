//! WebM stream encoder built from a `gst-launch` description.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use clipreel_common::clock::DriftMeasurement;
use clipreel_common::error::{ClipreelError, ClipreelResult};
use clipreel_media_core::audio::{AudioChunk, AudioFormat};
use clipreel_media_core::encoder::{EncodedOutput, EncoderConfig, EncoderStats, StreamEncoder};
use gst::prelude::*;
use gstreamer as gst;
use image::RgbaImage;

use crate::backend::{codecs_for_mime, WebmCodecs};
use crate::init_gstreamer;

/// Audio lagging video by more than this is padded with silence.
const AUDIO_GAP_MS: f64 = 100.0;
const EOS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Build the launch description for an encoder.
///
/// The audio branch is only present when `audio` is set and the codec set
/// allows Opus.
pub fn build_launch(
    codecs: WebmCodecs,
    width: u32,
    height: u32,
    fps: u32,
    audio: Option<AudioFormat>,
) -> String {
    let fps = fps.max(1);
    // One keyframe every 2 seconds.
    let keyint = fps.saturating_mul(2).max(2);
    let venc = codecs.video.factory();
    let mut launch = format!(
        "appsrc name=video_src is-live=true format=time caps=\"{}\" ! queue max-size-buffers=8 ! videoconvert ! videoscale ! video/x-raw,width={width},height={height} ! {venc} deadline=1 cpu-used=8 keyframe-max-dist={keyint} ! queue ! webmmux name=mux streamable=true ! appsink name=sink emit-signals=true sync=false",
        video_caps(width, height, fps)
    );
    if let Some(format) = audio.filter(|_| codecs.opus) {
        launch.push_str(&format!(
            " appsrc name=audio_src is-live=true format=time caps=\"{}\" ! queue ! audioconvert ! audioresample ! opusenc ! queue ! mux.",
            audio_caps(format)
        ));
    }
    launch
}

fn video_caps(width: u32, height: u32, fps: u32) -> String {
    format!("video/x-raw,format=RGBA,width={width},height={height},framerate={fps}/1")
}

fn audio_caps(format: AudioFormat) -> String {
    format!(
        "audio/x-raw,format=F32LE,layout=interleaved,rate={},channels={}",
        format.sample_rate, format.channels
    )
}

fn clock_time(duration: Duration) -> gst::ClockTime {
    gst::ClockTime::from_nseconds(duration.as_nanos() as u64)
}

/// Encoder feeding composited RGBA frames and PCM audio into `webmmux`.
pub struct GstStreamEncoder {
    mime_type: String,
    pipeline: gst::Pipeline,
    video_src: gst::Element,
    audio_src: Option<(gst::Element, AudioFormat)>,
    chunks: Arc<Mutex<Vec<Vec<u8>>>>,
    frame_size: (u32, u32),
    frame_duration: Duration,
    audio_pts: Duration,
    active: bool,
    stats: EncoderStats,
}

impl GstStreamEncoder {
    pub fn new(config: &EncoderConfig) -> ClipreelResult<Self> {
        init_gstreamer()?;
        let codecs = codecs_for_mime(&config.mime_type).ok_or_else(|| {
            ClipreelError::encoder_unsupported(format!(
                "No GStreamer encoder for {}",
                config.mime_type
            ))
        })?;

        let width = config.width.max(1);
        let height = config.height.max(1);
        let fps = config.fps.max(1);
        let launch = build_launch(codecs, width, height, fps, config.audio);
        tracing::debug!(mime_type = %config.mime_type, %launch, "Building encoder pipeline");

        let element = gst::parse::launch(&launch)
            .map_err(|e| ClipreelError::encoder(format!("Failed to build pipeline: {e}")))?;
        let pipeline = element
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| ClipreelError::encoder("Launch string did not produce a pipeline"))?;

        let by_name = |name: &str| {
            pipeline
                .by_name(name)
                .ok_or_else(|| ClipreelError::encoder(format!("Pipeline has no {name}")))
        };
        let video_src = by_name("video_src")?;
        let audio_src = match config.audio.filter(|_| codecs.opus) {
            Some(format) => Some((by_name("audio_src")?, format)),
            None => None,
        };

        let chunks = Arc::new(Mutex::new(Vec::new()));
        let sink = by_name("sink")?;
        let collected = Arc::clone(&chunks);
        sink.connect("new-sample", false, move |args| {
            let appsink = args.first()?.get::<gst::Element>().ok()?;
            let sample = appsink.emit_by_name::<Option<gst::Sample>>("pull-sample", &[])?;
            let buffer = sample.buffer()?;
            let map = buffer.map_readable().ok()?;
            lock(&collected).push(map.as_slice().to_vec());
            Some(gst::FlowReturn::Ok.to_value())
        });

        Ok(Self {
            mime_type: config.mime_type.clone(),
            pipeline,
            video_src,
            audio_src,
            chunks,
            frame_size: (width, height),
            frame_duration: Duration::from_secs_f64(1.0 / fps as f64),
            audio_pts: Duration::ZERO,
            active: false,
            stats: EncoderStats::default(),
        })
    }

    fn push_buffer(
        src: &gst::Element,
        data: Vec<u8>,
        pts: Duration,
        duration: Duration,
    ) -> gst::FlowReturn {
        let mut buffer = gst::Buffer::from_mut_slice(data);
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(clock_time(pts));
            buffer.set_duration(clock_time(duration));
        }
        src.emit_by_name::<gst::FlowReturn>("push-buffer", &[&buffer])
    }

    fn push_samples(&mut self, chunk: &AudioChunk) -> ClipreelResult<()> {
        let Some((src, _)) = &self.audio_src else {
            return Ok(());
        };
        let duration = chunk.duration();
        let data: Vec<u8> = chunk.samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        match Self::push_buffer(src, data, self.audio_pts, duration) {
            gst::FlowReturn::Ok => {
                self.audio_pts += duration;
                self.stats.audio_chunks += 1;
                Ok(())
            }
            flow => Err(ClipreelError::encoder(format!("Audio push failed: {flow:?}"))),
        }
    }

    /// Pad the audio stream up to `timestamp` when it has fallen behind,
    /// so the muxer never waits on a silent source.
    fn fill_audio_gap(&mut self, timestamp: Duration) -> ClipreelResult<()> {
        let Some((_, format)) = self.audio_src else {
            return Ok(());
        };
        let drift = DriftMeasurement {
            reference_ns: timestamp.as_nanos() as u64,
            measured_ns: self.audio_pts.as_nanos() as u64,
        };
        if !drift.lags_by_more_than_ms(AUDIO_GAP_MS) {
            return Ok(());
        }
        tracing::trace!(drift_ms = drift.drift_ms(), "Filling audio gap with silence");
        let gap = timestamp.saturating_sub(self.audio_pts);
        self.push_samples(&AudioChunk::silence(format, gap))
    }

    fn resize_input(&mut self, width: u32, height: u32, fps: u32) {
        let caps = video_caps(width, height, fps);
        match caps.parse::<gst::Caps>() {
            Ok(caps) => {
                self.video_src.set_property("caps", &caps);
                self.frame_size = (width, height);
                tracing::debug!(width, height, "Encoder input size changed");
            }
            Err(e) => tracing::warn!(error = %e, "Invalid input caps"),
        }
    }
}

#[async_trait::async_trait]
impl StreamEncoder for GstStreamEncoder {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    async fn start(&mut self) -> ClipreelResult<()> {
        if self.active {
            return Ok(());
        }
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| ClipreelError::encoder(format!("Failed to start encoder: {e:?}")))?;

        let pipeline = self.pipeline.clone();
        let (result, state, _) = tokio::task::spawn_blocking(move || {
            pipeline.state(gst::ClockTime::from_seconds(10))
        })
        .await
        .map_err(|e| ClipreelError::encoder(format!("Encoder start task failed: {e}")))?;
        match (result, state) {
            (Ok(_), gst::State::Playing) => {}
            (Ok(_), state) => {
                tracing::warn!(?state, "Encoder did not reach Playing state within timeout");
            }
            (Err(e), _) => {
                let _ = self.pipeline.set_state(gst::State::Null);
                return Err(ClipreelError::encoder(format!(
                    "Encoder failed to reach Playing state: {e:?}"
                )));
            }
        }

        self.active = true;
        tracing::info!(mime_type = %self.mime_type, "Encoder started");
        Ok(())
    }

    fn push_video_frame(&mut self, frame: &RgbaImage, timestamp: Duration) -> ClipreelResult<()> {
        if !self.active {
            return Err(ClipreelError::encoder("Encoder is not running"));
        }
        if frame.dimensions() != self.frame_size {
            let fps = (1.0 / self.frame_duration.as_secs_f64()).round() as u32;
            self.resize_input(frame.width(), frame.height(), fps.max(1));
        }
        self.fill_audio_gap(timestamp)?;

        let data = frame.as_raw().clone();
        match Self::push_buffer(&self.video_src, data, timestamp, self.frame_duration) {
            gst::FlowReturn::Ok => {
                self.stats.frames_encoded += 1;
                Ok(())
            }
            gst::FlowReturn::Flushing | gst::FlowReturn::Eos => {
                self.stats.frames_dropped += 1;
                Ok(())
            }
            flow => Err(ClipreelError::encoder(format!("Video push failed: {flow:?}"))),
        }
    }

    fn push_audio(&mut self, chunk: AudioChunk) -> ClipreelResult<()> {
        if !self.active {
            return Err(ClipreelError::encoder("Encoder is not running"));
        }
        self.push_samples(&chunk)
    }

    async fn stop(&mut self) -> ClipreelResult<EncodedOutput> {
        if !self.active {
            return Ok(EncodedOutput {
                chunks: Vec::new(),
                mime_type: self.mime_type.clone(),
            });
        }
        self.active = false;

        let _ = self
            .video_src
            .emit_by_name::<gst::FlowReturn>("end-of-stream", &[]);
        if let Some((src, _)) = &self.audio_src {
            let _ = src.emit_by_name::<gst::FlowReturn>("end-of-stream", &[]);
        }

        // Wait for EOS to reach the sink so the muxer finalizes its output.
        let pipeline = self.pipeline.clone();
        tokio::task::spawn_blocking(move || drain_to_eos(&pipeline))
            .await
            .map_err(|e| ClipreelError::encoder(format!("Encoder drain task failed: {e}")))?;

        self.pipeline
            .set_state(gst::State::Null)
            .map_err(|e| ClipreelError::encoder(format!("Failed to stop encoder: {e:?}")))?;

        let chunks = std::mem::take(&mut *lock(&self.chunks));
        let output = EncodedOutput {
            chunks,
            mime_type: self.mime_type.clone(),
        };
        tracing::info!(
            bytes = output.total_len(),
            frames = self.stats.frames_encoded,
            dropped = self.stats.frames_dropped,
            "Encoder stopped"
        );
        Ok(output)
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn stats(&self) -> EncoderStats {
        let bytes_out = lock(&self.chunks).iter().map(|c| c.len() as u64).sum();
        EncoderStats {
            bytes_out,
            ..self.stats.clone()
        }
    }
}

impl Drop for GstStreamEncoder {
    fn drop(&mut self) {
        if self.active {
            let _ = self.pipeline.set_state(gst::State::Null);
        }
    }
}

fn drain_to_eos(pipeline: &gst::Pipeline) {
    let Some(bus) = pipeline.bus() else {
        return;
    };
    let start = std::time::Instant::now();
    loop {
        let elapsed = start.elapsed();
        if elapsed >= EOS_DRAIN_TIMEOUT {
            tracing::warn!("EOS drain timed out after 10s");
            break;
        }
        match bus.timed_pop(clock_time(EOS_DRAIN_TIMEOUT - elapsed)) {
            Some(msg) => match msg.view() {
                gst::MessageView::Eos(_) => {
                    tracing::debug!("EOS received; encoder drained");
                    break;
                }
                gst::MessageView::Error(e) => {
                    tracing::warn!(error = %e.error(), "Encoder error during EOS drain");
                    break;
                }
                _ => {}
            },
            None => {
                tracing::warn!("EOS drain timed out after 10s");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::VideoCodec;

    #[test]
    fn test_launch_with_audio_branch() {
        let codecs = codecs_for_mime("video/webm;codecs=vp9,opus").unwrap();
        let launch = build_launch(codecs, 1280, 720, 30, Some(AudioFormat::default()));
        assert!(launch.contains("vp9enc"));
        assert!(launch.contains("keyframe-max-dist=60"));
        assert!(launch.contains("width=1280,height=720,framerate=30/1"));
        assert!(launch.contains("opusenc ! queue ! mux."));
        assert!(launch.contains("rate=48000,channels=2"));
    }

    #[test]
    fn test_launch_without_audio() {
        let codecs = WebmCodecs {
            video: VideoCodec::Vp8,
            opus: true,
        };
        let launch = build_launch(codecs, 640, 360, 0, None);
        assert!(launch.contains("vp8enc"));
        assert!(launch.contains("framerate=1/1"));
        assert!(!launch.contains("audio_src"));

        // A codec set without Opus drops the branch even when audio exists.
        let silent = codecs_for_mime("video/webm;codecs=vp8").unwrap();
        let launch = build_launch(silent, 640, 360, 30, Some(AudioFormat::default()));
        assert!(!launch.contains("opusenc"));
    }
}
