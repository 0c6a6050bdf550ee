//! Scripted media doubles for tests.
//!
//! [`MockElement`] behaves like a decoder over a table of fake media:
//! binds and seeks complete synchronously (the event is queued for anyone
//! already subscribed), and in autoplay mode `play` advances the position
//! in fixed steps on a tokio task. [`Probe`] counts resource lifecycle
//! calls across the element, its audio graph, and the encoder so tests can
//! assert that everything was released exactly once.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use clipreel_common::error::{ClipreelError, ClipreelResult};
use image::{Rgba, RgbaImage};
use tokio::sync::broadcast;

use crate::audio::{AudioChunk, AudioFormat, AudioGraph, AudioSink, AudioTrack, MediaTrack, TrackKind};
use crate::backend::MediaBackend;
use crate::capability::default_mime_candidates;
use crate::element::{BindId, DecodeElement, MediaEvent, ReadyState, VideoFrame};
use crate::encoder::{EncodedOutput, EncoderConfig, EncoderStats, StreamEncoder};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Shared lifecycle counters.
#[derive(Debug, Clone, Default)]
pub struct Probe {
    inner: Arc<ProbeInner>,
}

#[derive(Debug, Default)]
struct ProbeInner {
    encoders_created: AtomicU64,
    encoder_starts: AtomicU64,
    encoder_stops: AtomicU64,
    frames_pushed: AtomicU64,
    frames_after_stop: AtomicU64,
    audio_chunks_pushed: AtomicU64,
    graphs_opened: AtomicU64,
    graph_closes: AtomicU64,
    audio_track_stops: AtomicU64,
    unbinds: AtomicU64,
    last_frame_size: Mutex<Option<(u32, u32)>>,
    encoder_config: Mutex<Option<EncoderConfig>>,
}

impl Probe {
    pub fn encoders_created(&self) -> u64 {
        self.inner.encoders_created.load(Ordering::SeqCst)
    }
    pub fn encoder_starts(&self) -> u64 {
        self.inner.encoder_starts.load(Ordering::SeqCst)
    }
    pub fn encoder_stops(&self) -> u64 {
        self.inner.encoder_stops.load(Ordering::SeqCst)
    }
    pub fn frames_pushed(&self) -> u64 {
        self.inner.frames_pushed.load(Ordering::SeqCst)
    }
    /// Frames offered to an encoder that had already been stopped.
    pub fn frames_after_stop(&self) -> u64 {
        self.inner.frames_after_stop.load(Ordering::SeqCst)
    }
    pub fn audio_chunks_pushed(&self) -> u64 {
        self.inner.audio_chunks_pushed.load(Ordering::SeqCst)
    }
    pub fn graphs_opened(&self) -> u64 {
        self.inner.graphs_opened.load(Ordering::SeqCst)
    }
    pub fn graph_closes(&self) -> u64 {
        self.inner.graph_closes.load(Ordering::SeqCst)
    }
    pub fn audio_track_stops(&self) -> u64 {
        self.inner.audio_track_stops.load(Ordering::SeqCst)
    }
    pub fn unbinds(&self) -> u64 {
        self.inner.unbinds.load(Ordering::SeqCst)
    }
    pub fn last_frame_size(&self) -> Option<(u32, u32)> {
        *lock(&self.inner.last_frame_size)
    }
    pub fn encoder_config(&self) -> Option<EncoderConfig> {
        lock(&self.inner.encoder_config).clone()
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// One fake media file.
#[derive(Debug, Clone)]
pub struct MockMedia {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub color: Rgba<u8>,
}

impl MockMedia {
    pub fn new(duration: f64) -> Self {
        Self {
            duration,
            width: 320,
            height: 240,
            color: Rgba([40, 90, 200, 255]),
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_color(mut self, color: [u8; 3]) -> Self {
        self.color = Rgba([color[0], color[1], color[2], 255]);
        self
    }
}

/// Calls made on a [`MockElement`], in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementCall {
    Bind(String),
    Reload(String),
    Unbind,
    Seek(f64),
    Play,
    Pause,
}

struct ElementState {
    bound: Option<String>,
    ready: ReadyState,
    position: f64,
    playing: bool,
    ended: bool,
    next_bind: u64,
    calls: Vec<ElementCall>,
    plays: usize,
    generation: u64,
    pending_loads: Vec<(BindId, String)>,
    frame_cache: Option<(String, Arc<RgbaImage>)>,
}

/// Scripted decode element.
pub struct MockElement {
    state: Arc<Mutex<ElementState>>,
    events: broadcast::Sender<MediaEvent>,
    media: HashMap<String, MockMedia>,
    autoplay: bool,
    step: f64,
    tick: Duration,
    defer_loads: bool,
    fail_play_at: HashSet<usize>,
    error_during_play_at: HashSet<usize>,
    audio_graph: bool,
    audio_track: bool,
    probe: Probe,
}

impl Default for MockElement {
    fn default() -> Self {
        Self::new()
    }
}

impl MockElement {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: Arc::new(Mutex::new(ElementState {
                bound: None,
                ready: ReadyState::Nothing,
                position: 0.0,
                playing: false,
                ended: false,
                next_bind: 1,
                calls: Vec::new(),
                plays: 0,
                generation: 0,
                pending_loads: Vec::new(),
                frame_cache: None,
            })),
            events,
            media: HashMap::new(),
            autoplay: false,
            step: 0.25,
            tick: Duration::from_millis(1),
            defer_loads: false,
            fail_play_at: HashSet::new(),
            error_during_play_at: HashSet::new(),
            audio_graph: true,
            audio_track: true,
            probe: Probe::default(),
        }
    }

    pub fn with_media(mut self, handle: &str, media: MockMedia) -> Self {
        self.media.insert(handle.to_string(), media);
        self
    }

    /// Advance the position on a task after `play` instead of waiting for
    /// manual [`MockElement::emit_time`] calls.
    pub fn autoplay(mut self, enabled: bool) -> Self {
        self.autoplay = enabled;
        self
    }

    /// Seconds advanced per autoplay tick.
    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step;
        self
    }

    /// Hold `LoadedMetadata` until [`MockElement::complete_pending_loads`].
    pub fn defer_loads(mut self, enabled: bool) -> Self {
        self.defer_loads = enabled;
        self
    }

    /// Make the `n`-th `play` call (0-based) return an error.
    pub fn fail_play_at_call(mut self, n: usize) -> Self {
        self.fail_play_at.insert(n);
        self
    }

    /// During the `n`-th playback (0-based), emit one time update and then
    /// an `Error` event.
    pub fn error_during_play(mut self, n: usize) -> Self {
        self.error_during_play_at.insert(n);
        self
    }

    pub fn without_audio_graph(mut self) -> Self {
        self.audio_graph = false;
        self
    }

    pub fn without_audio_track(mut self) -> Self {
        self.audio_track = false;
        self
    }

    pub fn with_probe(mut self, probe: Probe) -> Self {
        self.probe = probe;
        self
    }

    pub fn probe(&self) -> Probe {
        self.probe.clone()
    }

    pub fn calls(&self) -> Vec<ElementCall> {
        lock(&self.state).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    /// Live event receivers.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.state).playing
    }

    /// Id the next `bind`/`reload` will return.
    pub fn peek_next_bind(&self) -> BindId {
        BindId(lock(&self.state).next_bind)
    }

    /// Deliver every deferred load, oldest first.
    pub fn complete_pending_loads(&self) {
        let pending = std::mem::take(&mut lock(&self.state).pending_loads);
        for (bind, handle) in pending {
            self.finish_load(bind, &handle);
        }
    }

    /// Set the position and broadcast a `TimeUpdate`.
    pub fn emit_time(&self, position: f64) {
        lock(&self.state).position = position;
        let _ = self.events.send(MediaEvent::TimeUpdate { position });
    }

    /// Broadcast an arbitrary event.
    pub fn emit(&self, event: MediaEvent) {
        if event == MediaEvent::Ended {
            let mut state = lock(&self.state);
            state.ended = true;
            state.playing = false;
        }
        let _ = self.events.send(event);
    }

    fn record(&self, call: ElementCall) {
        lock(&self.state).calls.push(call);
    }

    fn start_load(&self, handle: &str) -> BindId {
        let bind = {
            let mut state = lock(&self.state);
            let bind = BindId(state.next_bind);
            state.next_bind += 1;
            state.generation += 1;
            state.bound = Some(handle.to_string());
            state.ready = ReadyState::Nothing;
            state.position = 0.0;
            state.playing = false;
            state.ended = false;
            if self.defer_loads {
                state.pending_loads.push((bind, handle.to_string()));
            }
            bind
        };
        if !self.defer_loads {
            self.finish_load(bind, handle);
        }
        bind
    }

    fn finish_load(&self, bind: BindId, handle: &str) {
        if self.media.contains_key(handle) {
            {
                let mut state = lock(&self.state);
                if state.bound.as_deref() == Some(handle) {
                    state.ready = ReadyState::Enough;
                }
            }
            let _ = self.events.send(MediaEvent::LoadedMetadata { bind });
        } else {
            let _ = self.events.send(MediaEvent::Error {
                message: format!("cannot open {handle}"),
            });
        }
    }

    fn bound_media(&self) -> Option<&MockMedia> {
        let state = lock(&self.state);
        let handle = state.bound.clone()?;
        drop(state);
        self.media.get(&handle)
    }

    fn spawn_autoplay(&self, generation: u64, fail_mid_play: bool) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let Some(duration) = self.bound_media().map(|m| m.duration) else {
            return;
        };
        let state = Arc::clone(&self.state);
        let events = self.events.clone();
        let step = self.step;
        let tick = self.tick;

        runtime.spawn(async move {
            let mut ticks = 0u32;
            loop {
                tokio::time::sleep(tick).await;
                let event = {
                    let mut s = lock(&state);
                    if s.generation != generation || !s.playing {
                        return;
                    }
                    if fail_mid_play && ticks == 1 {
                        s.playing = false;
                        MediaEvent::Error {
                            message: "decoder error".to_string(),
                        }
                    } else {
                        s.position = (s.position + step).min(duration);
                        if s.position >= duration {
                            s.ended = true;
                            s.playing = false;
                        }
                        MediaEvent::TimeUpdate {
                            position: s.position,
                        }
                    }
                };
                let finished = !matches!(event, MediaEvent::TimeUpdate { .. });
                let _ = events.send(event);
                if finished {
                    return;
                }
                if lock(&state).ended {
                    let _ = events.send(MediaEvent::Ended);
                    return;
                }
                ticks += 1;
            }
        });
    }
}

impl DecodeElement for MockElement {
    fn bind(&self, handle: &str) -> ClipreelResult<BindId> {
        self.record(ElementCall::Bind(handle.to_string()));
        Ok(self.start_load(handle))
    }

    fn reload(&self) -> ClipreelResult<BindId> {
        let handle = lock(&self.state)
            .bound
            .clone()
            .ok_or_else(|| ClipreelError::playback_failed("Nothing bound to reload"))?;
        self.record(ElementCall::Reload(handle.clone()));
        Ok(self.start_load(&handle))
    }

    fn unbind(&self) {
        self.record(ElementCall::Unbind);
        let mut state = lock(&self.state);
        state.generation += 1;
        state.bound = None;
        state.ready = ReadyState::Nothing;
        state.playing = false;
        state.position = 0.0;
        Probe::bump(&self.probe.inner.unbinds);
    }

    fn bound_handle(&self) -> Option<String> {
        lock(&self.state).bound.clone()
    }

    fn ready_state(&self) -> ReadyState {
        lock(&self.state).ready
    }

    fn seek(&self, position: f64) -> ClipreelResult<()> {
        self.record(ElementCall::Seek(position));
        {
            let mut state = lock(&self.state);
            if state.ready == ReadyState::Nothing {
                return Err(ClipreelError::seek_failed("No media loaded"));
            }
            state.generation += 1;
            state.position = position;
            state.ended = false;
        }
        let _ = self.events.send(MediaEvent::Seeked);
        let state = lock(&self.state);
        if state.playing {
            let generation = state.generation;
            drop(state);
            if self.autoplay {
                self.spawn_autoplay(generation, false);
            }
        }
        Ok(())
    }

    fn play(&self) -> ClipreelResult<()> {
        self.record(ElementCall::Play);
        let (generation, index) = {
            let mut state = lock(&self.state);
            let index = state.plays;
            state.plays += 1;
            if self.fail_play_at.contains(&index) {
                return Err(ClipreelError::playback_failed("play() was interrupted"));
            }
            if state.ready == ReadyState::Nothing {
                return Err(ClipreelError::playback_failed("No media loaded"));
            }
            state.generation += 1;
            state.playing = true;
            (state.generation, index)
        };
        if self.autoplay {
            self.spawn_autoplay(generation, self.error_during_play_at.contains(&index));
        }
        Ok(())
    }

    fn pause(&self) {
        self.record(ElementCall::Pause);
        let mut state = lock(&self.state);
        state.playing = false;
        state.generation += 1;
    }

    fn current_time(&self) -> f64 {
        lock(&self.state).position
    }

    fn duration(&self) -> Option<f64> {
        if lock(&self.state).ready == ReadyState::Nothing {
            return None;
        }
        self.bound_media().map(|m| m.duration)
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        if lock(&self.state).ready == ReadyState::Nothing {
            return None;
        }
        self.bound_media().map(|m| (m.width, m.height))
    }

    fn is_ended(&self) -> bool {
        lock(&self.state).ended
    }

    fn current_frame(&self) -> Option<VideoFrame> {
        let media = self.bound_media()?.clone();
        let mut state = lock(&self.state);
        if state.ready == ReadyState::Nothing {
            return None;
        }
        let handle = state.bound.clone()?;
        let image = match &state.frame_cache {
            Some((cached, image)) if *cached == handle => Arc::clone(image),
            _ => {
                let image = Arc::new(RgbaImage::from_pixel(media.width, media.height, media.color));
                state.frame_cache = Some((handle, Arc::clone(&image)));
                image
            }
        };
        Some(VideoFrame {
            image,
            position: state.position,
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.events.subscribe()
    }

    fn open_audio_graph(&self) -> Option<Box<dyn AudioGraph>> {
        if !self.audio_graph {
            return None;
        }
        Probe::bump(&self.probe.inner.graphs_opened);
        Some(Box::new(MockAudioGraph {
            probe: self.probe.clone(),
            has_track: self.audio_track,
            closed: false,
        }))
    }
}

struct MockAudioGraph {
    probe: Probe,
    has_track: bool,
    closed: bool,
}

impl AudioGraph for MockAudioGraph {
    fn create_track(&mut self) -> ClipreelResult<Option<Box<dyn AudioTrack>>> {
        if !self.has_track {
            return Ok(None);
        }
        Ok(Some(Box::new(MockAudioTrack {
            probe: self.probe.clone(),
            live: Mutex::new(true),
        })))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            Probe::bump(&self.probe.inner.graph_closes);
        }
    }
}

struct MockAudioTrack {
    probe: Probe,
    live: Mutex<bool>,
}

impl MediaTrack for MockAudioTrack {
    fn kind(&self) -> TrackKind {
        TrackKind::Audio
    }

    fn stop(&self) {
        let mut live = lock(&self.live);
        if *live {
            *live = false;
            Probe::bump(&self.probe.inner.audio_track_stops);
        }
    }

    fn is_live(&self) -> bool {
        *lock(&self.live)
    }
}

impl AudioTrack for MockAudioTrack {
    fn format(&self) -> AudioFormat {
        AudioFormat::default()
    }

    fn attach(&self, sink: Arc<dyn AudioSink>) {
        if self.is_live() {
            sink.push_audio(AudioChunk::silence(self.format(), Duration::from_millis(20)));
        }
    }
}

/// Encoder that records what it was fed.
pub struct MockEncoder {
    mime_type: String,
    active: bool,
    fail_start: bool,
    stats: EncoderStats,
    probe: Probe,
}

impl MockEncoder {
    pub fn new(mime_type: &str, probe: Probe) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            active: false,
            fail_start: false,
            stats: EncoderStats::default(),
            probe,
        }
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }
}

#[async_trait::async_trait]
impl StreamEncoder for MockEncoder {
    fn mime_type(&self) -> &str {
        &self.mime_type
    }

    async fn start(&mut self) -> ClipreelResult<()> {
        if self.fail_start {
            return Err(ClipreelError::encoder("mock encoder refused to start"));
        }
        self.active = true;
        Probe::bump(&self.probe.inner.encoder_starts);
        Ok(())
    }

    fn push_video_frame(&mut self, frame: &RgbaImage, _timestamp: Duration) -> ClipreelResult<()> {
        if !self.active {
            Probe::bump(&self.probe.inner.frames_after_stop);
            return Err(ClipreelError::encoder("encoder is not running"));
        }
        self.stats.frames_encoded += 1;
        Probe::bump(&self.probe.inner.frames_pushed);
        *lock(&self.probe.inner.last_frame_size) = Some(frame.dimensions());
        Ok(())
    }

    fn push_audio(&mut self, _chunk: AudioChunk) -> ClipreelResult<()> {
        if !self.active {
            return Err(ClipreelError::encoder("encoder is not running"));
        }
        self.stats.audio_chunks += 1;
        Probe::bump(&self.probe.inner.audio_chunks_pushed);
        Ok(())
    }

    async fn stop(&mut self) -> ClipreelResult<EncodedOutput> {
        if !self.active {
            return Ok(EncodedOutput {
                chunks: Vec::new(),
                mime_type: self.mime_type.clone(),
            });
        }
        self.active = false;
        Probe::bump(&self.probe.inner.encoder_stops);
        let body = self.stats.frames_encoded.to_le_bytes().to_vec();
        self.stats.bytes_out = 4 + body.len() as u64;
        Ok(EncodedOutput {
            chunks: vec![b"MOCK".to_vec(), body],
            mime_type: self.mime_type.clone(),
        })
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn stats(&self) -> EncoderStats {
        self.stats.clone()
    }
}

type ElementFactory = Box<dyn Fn() -> MockElement + Send + Sync>;

/// Backend producing [`MockElement`]s and [`MockEncoder`]s.
pub struct MockBackend {
    name: String,
    supported: Vec<String>,
    factory: ElementFactory,
    fail_encoder_start: bool,
    probe: Probe,
    elements: Mutex<Vec<Arc<MockElement>>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            supported: default_mime_candidates(),
            factory: Box::new(MockElement::new),
            fail_encoder_start: false,
            probe: Probe::default(),
            elements: Mutex::new(Vec::new()),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_supported(mut self, mime_types: &[&str]) -> Self {
        self.supported = mime_types.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_elements(mut self, factory: impl Fn() -> MockElement + Send + Sync + 'static) -> Self {
        self.factory = Box::new(factory);
        self
    }

    pub fn failing_encoder_start(mut self) -> Self {
        self.fail_encoder_start = true;
        self
    }

    pub fn probe(&self) -> Probe {
        self.probe.clone()
    }

    /// Elements created so far, oldest first.
    pub fn elements(&self) -> Vec<Arc<MockElement>> {
        lock(&self.elements).clone()
    }
}

impl MediaBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_decode_element(&self) -> ClipreelResult<Arc<dyn DecodeElement>> {
        let element = Arc::new((self.factory)().with_probe(self.probe.clone()));
        lock(&self.elements).push(Arc::clone(&element));
        Ok(element as Arc<dyn DecodeElement>)
    }

    fn is_mime_type_supported(&self, mime_type: &str) -> bool {
        self.supported.iter().any(|s| s == mime_type)
    }

    fn create_encoder(&self, config: &EncoderConfig) -> ClipreelResult<Box<dyn StreamEncoder>> {
        Probe::bump(&self.probe.inner.encoders_created);
        *lock(&self.probe.inner.encoder_config) = Some(config.clone());
        let encoder = MockEncoder::new(&config.mime_type, self.probe.clone());
        Ok(Box::new(if self.fail_encoder_start {
            encoder.failing_start()
        } else {
            encoder
        }))
    }
}
