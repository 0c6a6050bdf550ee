//! `playbin`-backed decode element.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use clipreel_common::error::{ClipreelError, ClipreelResult};
use clipreel_media_core::audio::{
    AudioChunk, AudioFormat, AudioGraph, AudioSink, AudioTrack, MediaTrack, TrackKind,
};
use clipreel_media_core::element::{BindId, DecodeElement, MediaEvent, ReadyState, VideoFrame};
use gst::prelude::*;
use gstreamer as gst;
use image::RgbaImage;
use tokio::sync::broadcast;

use crate::init_gstreamer;

const EVENT_CAPACITY: usize = 64;
const BUS_POLL: Duration = Duration::from_millis(50);
const TIME_UPDATE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct ElementState {
    bound: Option<String>,
    ready: ReadyState,
    pending_bind: Option<BindId>,
    next_bind: u64,
    seeking: bool,
    playing: bool,
    ended: bool,
    position: f64,
    duration: Option<f64>,
    dimensions: Option<(u32, u32)>,
}

impl Default for ElementState {
    fn default() -> Self {
        Self {
            bound: None,
            ready: ReadyState::Nothing,
            pending_bind: None,
            next_bind: 1,
            seeking: false,
            playing: false,
            ended: false,
            position: 0.0,
            duration: None,
            dimensions: None,
        }
    }
}

type AudioRoute = Arc<Mutex<Option<Arc<dyn AudioSink>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Decode element wrapping one `playbin`.
///
/// Frames land in a single-slot buffer; audio is forwarded to whichever
/// track is attached. The pump thread owns bus handling and emits
/// `TimeUpdate` every 100 ms while playing.
pub struct GstDecodeElement {
    playbin: gst::Element,
    state: Arc<Mutex<ElementState>>,
    frame: Arc<Mutex<Option<VideoFrame>>>,
    audio: AudioRoute,
    events: broadcast::Sender<MediaEvent>,
    shutdown: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl GstDecodeElement {
    pub fn new() -> ClipreelResult<Self> {
        init_gstreamer()?;

        let playbin = gst::ElementFactory::make("playbin")
            .name("clipreel-decode")
            .build()
            .map_err(|e| ClipreelError::playback_failed(format!("Failed to create playbin: {e}")))?;

        let state = Arc::new(Mutex::new(ElementState::default()));
        let frame = Arc::new(Mutex::new(None));
        let audio: AudioRoute = Arc::new(Mutex::new(None));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let video_sink = build_video_sink(Arc::clone(&state), Arc::clone(&frame))?;
        let audio_sink = build_audio_sink(Arc::clone(&audio))?;
        playbin.set_property("video-sink", &video_sink);
        playbin.set_property("audio-sink", &audio_sink);

        let bus = playbin
            .bus()
            .ok_or_else(|| ClipreelError::playback_failed("playbin has no bus"))?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let pump = BusPump {
            playbin: playbin.clone(),
            bus,
            state: Arc::clone(&state),
            events: events.clone(),
            shutdown: Arc::clone(&shutdown),
        };
        let pump = std::thread::Builder::new()
            .name("clipreel-gst-bus".into())
            .spawn(move || pump.run())
            .map_err(ClipreelError::Io)?;

        Ok(Self {
            playbin,
            state,
            frame,
            audio,
            events,
            shutdown,
            pump: Mutex::new(Some(pump)),
        })
    }

    fn set_state(&self, target: gst::State) -> ClipreelResult<()> {
        self.playbin
            .set_state(target)
            .map(|_| ())
            .map_err(|e| ClipreelError::playback_failed(format!("Failed to enter {target:?}: {e:?}")))
    }
}

impl DecodeElement for GstDecodeElement {
    fn bind(&self, handle: &str) -> ClipreelResult<BindId> {
        let uri = handle_to_uri(handle)?;
        self.set_state(gst::State::Null)?;
        *lock(&self.frame) = None;

        let bind = {
            let mut state = lock(&self.state);
            let bind = BindId(state.next_bind);
            let next_bind = bind.0 + 1;
            *state = ElementState {
                bound: Some(handle.to_string()),
                pending_bind: Some(bind),
                next_bind,
                ..ElementState::default()
            };
            bind
        };

        self.playbin.set_property("uri", uri.as_str());
        self.set_state(gst::State::Paused)?;
        tracing::debug!(%bind, handle, "Binding source");
        Ok(bind)
    }

    fn reload(&self) -> ClipreelResult<BindId> {
        let handle = lock(&self.state)
            .bound
            .clone()
            .ok_or_else(|| ClipreelError::playback_failed("Nothing bound to reload"))?;
        self.bind(&handle)
    }

    fn unbind(&self) {
        if let Err(e) = self.playbin.set_state(gst::State::Null) {
            tracing::warn!(error = ?e, "Failed to reset playbin");
        }
        *lock(&self.frame) = None;
        let mut state = lock(&self.state);
        let next_bind = state.next_bind;
        *state = ElementState {
            next_bind,
            ..ElementState::default()
        };
    }

    fn bound_handle(&self) -> Option<String> {
        lock(&self.state).bound.clone()
    }

    fn ready_state(&self) -> ReadyState {
        lock(&self.state).ready
    }

    fn seek(&self, position: f64) -> ClipreelResult<()> {
        {
            let state = lock(&self.state);
            if state.ready < ReadyState::Metadata {
                return Err(ClipreelError::seek_failed("No source loaded"));
            }
        }
        let target = gst::ClockTime::from_nseconds((position.max(0.0) * 1e9) as u64);
        lock(&self.state).seeking = true;
        // Flushing seeks always finish with async-done, even for the current
        // position, so `Seeked` is emitted for every accepted seek.
        if let Err(e) = self
            .playbin
            .seek_simple(gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE, target)
        {
            lock(&self.state).seeking = false;
            return Err(ClipreelError::seek_failed(format!(
                "Unable to seek within the source video: {e}"
            )));
        }
        let mut state = lock(&self.state);
        state.position = position;
        state.ended = false;
        Ok(())
    }

    fn play(&self) -> ClipreelResult<()> {
        self.set_state(gst::State::Playing)?;
        let mut state = lock(&self.state);
        state.playing = true;
        state.ended = false;
        Ok(())
    }

    fn pause(&self) {
        let bound = lock(&self.state).bound.is_some();
        if bound {
            if let Err(e) = self.playbin.set_state(gst::State::Paused) {
                tracing::warn!(error = ?e, "Failed to pause playbin");
            }
        }
        lock(&self.state).playing = false;
    }

    fn current_time(&self) -> f64 {
        match self.playbin.query_position::<gst::ClockTime>() {
            Some(pos) => clock_secs(pos),
            None => lock(&self.state).position,
        }
    }

    fn duration(&self) -> Option<f64> {
        lock(&self.state).duration
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        lock(&self.state).dimensions
    }

    fn is_ended(&self) -> bool {
        lock(&self.state).ended
    }

    fn current_frame(&self) -> Option<VideoFrame> {
        lock(&self.frame).clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.events.subscribe()
    }

    fn open_audio_graph(&self) -> Option<Box<dyn AudioGraph>> {
        Some(Box::new(GstAudioGraph {
            route: Arc::clone(&self.audio),
            closed: false,
        }))
    }
}

impl Drop for GstDecodeElement {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.playbin.set_state(gst::State::Null);
        if let Some(pump) = lock(&self.pump).take() {
            if pump.join().is_err() {
                tracing::warn!("GStreamer bus pump panicked");
            }
        }
    }
}

/// Translates bus messages and position polls into media events.
struct BusPump {
    playbin: gst::Element,
    bus: gst::Bus,
    state: Arc<Mutex<ElementState>>,
    events: broadcast::Sender<MediaEvent>,
    shutdown: Arc<AtomicBool>,
}

impl BusPump {
    fn run(self) {
        let mut last_update = Instant::now();
        while !self.shutdown.load(Ordering::SeqCst) {
            let poll = gst::ClockTime::from_nseconds(BUS_POLL.as_nanos() as u64);
            if let Some(msg) = self.bus.timed_pop(poll) {
                self.handle_message(&msg);
            }

            if last_update.elapsed() >= TIME_UPDATE_INTERVAL {
                last_update = Instant::now();
                self.emit_time_update();
            }
        }
        tracing::debug!("GStreamer bus pump stopped");
    }

    fn handle_message(&self, msg: &gst::Message) {
        match msg.view() {
            gst::MessageView::AsyncDone(_) => {
                let event = {
                    let mut state = lock(&self.state);
                    if let Some(bind) = state.pending_bind.take() {
                        state.duration = self
                            .playbin
                            .query_duration::<gst::ClockTime>()
                            .map(clock_secs)
                            .filter(|d| d.is_finite() && *d > 0.0);
                        state.ready = ReadyState::Metadata;
                        Some(MediaEvent::LoadedMetadata { bind })
                    } else if state.seeking {
                        state.seeking = false;
                        state.ready = ReadyState::Enough;
                        Some(MediaEvent::Seeked)
                    } else {
                        None
                    }
                };
                if let Some(event) = event {
                    self.emit(event);
                }
            }
            gst::MessageView::Eos(_) => {
                {
                    let mut state = lock(&self.state);
                    state.ended = true;
                    state.playing = false;
                    if let Some(duration) = state.duration {
                        state.position = duration;
                    }
                }
                self.emit(MediaEvent::Ended);
            }
            gst::MessageView::Error(err) => {
                let message = err.error().to_string();
                tracing::warn!(
                    error = %message,
                    debug = ?err.debug(),
                    "Decode element error"
                );
                {
                    let mut state = lock(&self.state);
                    state.pending_bind = None;
                    state.seeking = false;
                    state.playing = false;
                }
                self.emit(MediaEvent::Error { message });
            }
            gst::MessageView::DurationChanged(_) => {
                let duration = self
                    .playbin
                    .query_duration::<gst::ClockTime>()
                    .map(clock_secs);
                lock(&self.state).duration = duration.filter(|d| d.is_finite() && *d > 0.0);
            }
            _ => {}
        }
    }

    fn emit_time_update(&self) {
        let playing = {
            let state = lock(&self.state);
            state.playing && !state.seeking
        };
        if !playing {
            return;
        }
        let Some(position) = self.playbin.query_position::<gst::ClockTime>() else {
            return;
        };
        let position = clock_secs(position);
        lock(&self.state).position = position;
        self.emit(MediaEvent::TimeUpdate { position });
    }

    fn emit(&self, event: MediaEvent) {
        // No receivers is fine; nobody is waiting.
        let _ = self.events.send(event);
    }
}

fn clock_secs(time: gst::ClockTime) -> f64 {
    time.nseconds() as f64 / 1e9
}

/// Accept either a URI or a local path.
fn handle_to_uri(handle: &str) -> ClipreelResult<String> {
    if handle.contains("://") {
        return Ok(handle.to_string());
    }
    let path = std::path::Path::new(handle);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    gst::glib::filename_to_uri(&absolute, None)
        .map(|uri| uri.to_string())
        .map_err(|e| ClipreelError::source_unavailable(format!("{handle}: {e}")))
}

fn build_video_sink(
    state: Arc<Mutex<ElementState>>,
    frame: Arc<Mutex<Option<VideoFrame>>>,
) -> ClipreelResult<gst::Element> {
    let sink = make_appsink("clipreel-video-sink")?;
    let caps = gst::Caps::builder("video/x-raw")
        .field("format", "RGBA")
        .build();
    sink.set_property("caps", &caps);
    sink.set_property("max-buffers", 2u32);
    sink.set_property("drop", true);

    for (signal, action) in [("new-preroll", "pull-preroll"), ("new-sample", "pull-sample")] {
        let state = Arc::clone(&state);
        let frame = Arc::clone(&frame);
        sink.connect(signal, false, move |args| {
            let appsink = args.first()?.get::<gst::Element>().ok()?;
            if let Some(sample) = appsink.emit_by_name::<Option<gst::Sample>>(action, &[]) {
                if let Some(decoded) = sample_to_frame(&sample) {
                    lock(&state).dimensions = Some((decoded.width(), decoded.height()));
                    *lock(&frame) = Some(decoded);
                }
            }
            Some(gst::FlowReturn::Ok.to_value())
        });
    }
    Ok(sink)
}

fn build_audio_sink(route: AudioRoute) -> ClipreelResult<gst::Element> {
    let format = AudioFormat::default();
    let sink = make_appsink("clipreel-audio-sink")?;
    let caps = gst::Caps::builder("audio/x-raw")
        .field("format", "F32LE")
        .field("layout", "interleaved")
        .field("rate", format.sample_rate as i32)
        .field("channels", format.channels as i32)
        .build();
    sink.set_property("caps", &caps);

    sink.connect("new-sample", false, move |args| {
        let appsink = args.first()?.get::<gst::Element>().ok()?;
        let sample = appsink.emit_by_name::<Option<gst::Sample>>("pull-sample", &[])?;
        let target = lock(&route).clone();
        if let Some(target) = target {
            if let Some(chunk) = sample_to_audio(&sample, format) {
                target.push_audio(chunk);
            }
        }
        Some(gst::FlowReturn::Ok.to_value())
    });
    Ok(sink)
}

fn make_appsink(name: &str) -> ClipreelResult<gst::Element> {
    let sink = gst::ElementFactory::make("appsink")
        .name(name)
        .build()
        .map_err(|e| ClipreelError::playback_failed(format!("Failed to create appsink: {e}")))?;
    sink.set_property("emit-signals", true);
    sink.set_property("sync", true);
    Ok(sink)
}

fn sample_to_frame(sample: &gst::Sample) -> Option<VideoFrame> {
    let caps = sample.caps()?;
    let structure = caps.structure(0)?;
    let width = u32::try_from(structure.get::<i32>("width").ok()?).ok()?;
    let height = u32::try_from(structure.get::<i32>("height").ok()?).ok()?;
    let buffer = sample.buffer()?;
    let map = buffer.map_readable().ok()?;

    let expected = width as usize * height as usize * 4;
    let data = map.as_slice().get(..expected)?.to_vec();
    let image = RgbaImage::from_raw(width, height, data)?;
    let position = buffer.pts().map(clock_secs).unwrap_or(0.0);
    Some(VideoFrame::new(image, position))
}

fn sample_to_audio(sample: &gst::Sample, format: AudioFormat) -> Option<AudioChunk> {
    let buffer = sample.buffer()?;
    let map = buffer.map_readable().ok()?;
    let samples = map
        .as_slice()
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Some(AudioChunk { samples, format })
}

/// Routes the playbin's decoded audio to one attached sink.
struct GstAudioGraph {
    route: AudioRoute,
    closed: bool,
}

impl AudioGraph for GstAudioGraph {
    fn create_track(&mut self) -> ClipreelResult<Option<Box<dyn AudioTrack>>> {
        if self.closed {
            return Ok(None);
        }
        Ok(Some(Box::new(GstAudioTrack {
            route: Arc::clone(&self.route),
            live: AtomicBool::new(true),
        })))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            *lock(&self.route) = None;
        }
    }
}

struct GstAudioTrack {
    route: AudioRoute,
    live: AtomicBool,
}

impl MediaTrack for GstAudioTrack {
    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            *lock(&self.route) = None;
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

impl AudioTrack for GstAudioTrack {
    fn format(&self) -> AudioFormat {
        AudioFormat::default()
    }

    fn attach(&self, sink: Arc<dyn AudioSink>) {
        if self.is_live() {
            *lock(&self.route) = Some(sink);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_handles_pass_through() {
        assert_eq!(
            handle_to_uri("file:///tmp/a.webm").unwrap(),
            "file:///tmp/a.webm"
        );
        assert_eq!(
            handle_to_uri("https://cdn.example/b.webm").unwrap(),
            "https://cdn.example/b.webm"
        );
    }

    #[test]
    fn test_absolute_paths_become_file_uris() {
        let uri = handle_to_uri("/tmp/clip a.webm").unwrap();
        assert!(uri.starts_with("file:///tmp/"));
        assert!(uri.ends_with(".webm"));
        assert!(!uri.contains(' '));
    }

    #[test]
    fn test_fresh_state_is_unbound() {
        let state = ElementState::default();
        assert_eq!(state.ready, ReadyState::Nothing);
        assert!(state.bound.is_none());
        assert_eq!(state.next_bind, 1);
    }
}
