//! Segment playback state machine.
//!
//! ```text
//!  Idle ──start──▶ Loading(i) ──LoadedMetadata──▶ Playing(i)
//!                     ▲                              │ position ≥ end / Ended
//!                     │ next source differs          ▼
//!                     └─────────────────────── advance ──▶ Playing(i+1) (same source)
//!                                                  │
//!                            last segment: wrap to 0, or Ended when not looping
//! ```
//!
//! A missing source parks the machine in `Blocked` without moving the
//! cursor; [`PlaybackSequencer::reconnect`] retries the blocked segment.
//!
//! Segment indices in states, the cursor and the segment callback are
//! positions in the clip's own segment list, degenerate entries included.

use std::sync::Arc;

use clipreel_clip_model::{Clip, Segment, Source, SourceId, SourceRegistry};
use clipreel_common::config::PlaybackDefaults;
use clipreel_common::error::{ClipreelError, ClipreelResult};
use clipreel_media_core::element::{is_ready_for, BindId, DecodeElement, MediaEvent};

/// Called with the clip index of each segment playback moves to.
pub type SegmentCallback = Box<dyn Fn(usize) + Send>;

/// Sequencer tuning.
#[derive(Debug, Clone, Copy)]
pub struct SequencerOptions {
    /// Position tolerance in seconds.
    pub epsilon: f64,

    /// Wrap to the first segment after the last.
    pub looping: bool,

    /// Limit segment ends to the element-reported duration.
    pub clamp_to_source_duration: bool,
}

impl Default for SequencerOptions {
    fn default() -> Self {
        Self::from_config(&PlaybackDefaults::default())
    }
}

impl SequencerOptions {
    pub fn from_config(playback: &PlaybackDefaults) -> Self {
        Self {
            epsilon: playback.epsilon,
            looping: playback.looping,
            clamp_to_source_duration: playback.clamp_to_source_duration,
        }
    }
}

/// A playable segment and its position in the clip.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencedSegment {
    pub index: usize,
    pub segment: Segment,
}

/// Where the sequencer is.
#[derive(Debug, Clone, PartialEq)]
pub enum SequencerState {
    Idle,
    /// Waiting for the element to load the segment's source.
    Loading { segment_index: usize },
    Playing { segment_index: usize },
    /// The segment's source cannot be played; needs [`PlaybackSequencer::reconnect`].
    Blocked {
        segment_index: usize,
        source_id: SourceId,
        reason: String,
    },
    /// Reached the end of the last segment with looping disabled.
    Ended,
}

impl SequencerState {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

/// An outstanding bind the sequencer is waiting on. At most one exists.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBind {
    pub bind: BindId,
    pub source_id: SourceId,
    pub segment_index: usize,
}

/// Transient playback position, discarded on stop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackCursor {
    /// Clip index of the current segment.
    pub segment_index: usize,

    /// Slot of the current segment among the playable ones.
    pub position: usize,

    /// Source whose data the element holds (or is loading).
    pub bound_source: Option<SourceId>,

    pub pending: Option<PendingBind>,

    /// A seek was issued and its `Seeked` has not arrived; position events
    /// until then describe the old position.
    pub awaiting_seek: bool,

    /// Segments skipped in a row for starting past their source's end.
    pub skipped: usize,
}

/// Snapshot for UIs.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackStatus {
    pub state: SequencerState,
    pub segment_index: Option<usize>,
    pub loops: u64,
}

/// Drives one decode element through a clip's segments.
pub struct PlaybackSequencer {
    element: Arc<dyn DecodeElement>,
    sources: SourceRegistry,
    segments: Vec<SequencedSegment>,
    options: SequencerOptions,
    state: SequencerState,
    cursor: Option<PlaybackCursor>,
    on_segment: Option<SegmentCallback>,
    loops: u64,
}

impl PlaybackSequencer {
    /// Prepare playback of `clip`. Degenerate segments are skipped; a clip
    /// with none left is rejected.
    pub fn new(
        clip: &Clip,
        sources: SourceRegistry,
        element: Arc<dyn DecodeElement>,
        options: SequencerOptions,
    ) -> ClipreelResult<Self> {
        let segments: Vec<SequencedSegment> = clip
            .segments
            .iter()
            .map(Segment::normalized)
            .enumerate()
            .filter(|(_, s)| !s.is_degenerate(options.epsilon))
            .map(|(index, segment)| SequencedSegment { index, segment })
            .collect();

        if segments.is_empty() {
            return Err(ClipreelError::NoPlayableSegments);
        }

        if segments.len() < clip.segments.len() {
            tracing::debug!(
                clip = %clip.name,
                skipped = clip.segments.len() - segments.len(),
                "Skipping degenerate segments"
            );
        }

        Ok(Self {
            element,
            sources,
            segments,
            options,
            state: SequencerState::Idle,
            cursor: None,
            on_segment: None,
            loops: 0,
        })
    }

    /// Register the "now playing index" callback.
    pub fn on_segment_change(&mut self, callback: SegmentCallback) {
        self.on_segment = Some(callback);
    }

    pub fn state(&self) -> &SequencerState {
        &self.state
    }

    pub fn cursor(&self) -> Option<&PlaybackCursor> {
        self.cursor.as_ref()
    }

    /// The playable segments, in play order.
    pub fn segments(&self) -> &[SequencedSegment] {
        &self.segments
    }

    pub fn element(&self) -> &Arc<dyn DecodeElement> {
        &self.element
    }

    pub fn status(&self) -> PlaybackStatus {
        PlaybackStatus {
            state: self.state.clone(),
            segment_index: self.cursor.as_ref().map(|c| c.segment_index),
            loops: self.loops,
        }
    }

    /// Length of one pass over the playable segments.
    pub fn loop_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.segment.duration()).sum()
    }

    /// Begin (or restart) playback from the first segment.
    pub fn start(&mut self) {
        if self.cursor.is_some() {
            self.stop();
        }
        tracing::info!(segments = self.segments.len(), "Starting segment playback");
        self.cursor = Some(PlaybackCursor::default());
        self.loops = 0;
        self.enter_segment(0);
    }

    /// Pause the element and discard the cursor.
    pub fn stop(&mut self) {
        if self.cursor.take().is_some() {
            self.element.pause();
            tracing::debug!("Segment playback stopped");
        }
        self.state = SequencerState::Idle;
    }

    /// Re-supply a source (e.g. after re-import) and retry a segment blocked
    /// on it.
    pub fn reconnect(&mut self, source: Source) {
        let source_id = source.id.clone();
        self.sources.insert(source);

        let SequencerState::Blocked {
            segment_index,
            source_id: blocked,
            ..
        } = &self.state
        else {
            return;
        };
        if *blocked != source_id {
            return;
        }
        let segment_index = *segment_index;
        let Some(cursor) = self.cursor.as_mut() else {
            return;
        };
        cursor.skipped = 0;
        let position = cursor.position;
        tracing::info!(source = %source_id, segment_index, "Source reconnected; resuming");
        self.enter_segment(position);
    }

    /// Feed one media event from the element.
    pub fn handle_event(&mut self, event: &MediaEvent) {
        if self.cursor.is_none() {
            return;
        }
        match event {
            MediaEvent::LoadedMetadata { bind } => self.on_loaded(*bind),
            MediaEvent::Seeked => {
                if let Some(cursor) = self.cursor.as_mut() {
                    cursor.awaiting_seek = false;
                }
            }
            MediaEvent::TimeUpdate { position } => {
                if let Some(slot) = self.playing_slot() {
                    if *position >= self.effective_end(slot) - self.options.epsilon {
                        self.advance(slot);
                    }
                }
            }
            MediaEvent::Ended => {
                if let Some(slot) = self.playing_slot() {
                    self.advance(slot);
                }
            }
            MediaEvent::Error { message } => self.on_element_error(message),
        }
    }

    /// Recover after media events were dropped: re-derive progress from the
    /// element's current state.
    pub fn resync(&mut self) {
        let Some(cursor) = self.cursor.as_mut() else {
            return;
        };
        cursor.awaiting_seek = false;

        if let Some(pending) = cursor.pending.clone() {
            let handle = self
                .sources
                .get(&pending.source_id)
                .and_then(Source::playable_handle)
                .map(str::to_string);
            if let Some(handle) = handle {
                if is_ready_for(self.element.as_ref(), &handle) {
                    self.on_loaded(pending.bind);
                }
            }
            return;
        }

        if let Some(slot) = self.playing_slot() {
            let position = self.element.current_time();
            if self.element.is_ended()
                || position >= self.effective_end(slot) - self.options.epsilon
            {
                self.advance(slot);
            }
        }
    }

    fn playing_slot(&self) -> Option<usize> {
        match (&self.state, &self.cursor) {
            (SequencerState::Playing { .. }, Some(cursor)) if !cursor.awaiting_seek => {
                Some(cursor.position)
            }
            _ => None,
        }
    }

    /// Segment end, limited to the element's duration when clamping is on.
    fn effective_end(&self, slot: usize) -> f64 {
        let end = self.segments[slot].segment.end;
        if !self.options.clamp_to_source_duration {
            return end;
        }
        match self.element.duration() {
            Some(duration) if duration.is_finite() && duration > 0.0 && duration < end => duration,
            _ => end,
        }
    }

    /// Nothing of the segment is left once its end is clamped.
    fn starts_past_source_end(&self, slot: usize) -> bool {
        self.effective_end(slot) - self.segments[slot].segment.start <= self.options.epsilon
    }

    fn advance(&mut self, from: usize) {
        let next = from + 1;
        if next < self.segments.len() {
            self.enter_segment(next);
        } else if self.options.looping {
            self.loops += 1;
            tracing::debug!(loops = self.loops, "Looping to first segment");
            self.enter_segment(0);
        } else {
            self.element.pause();
            self.state = SequencerState::Ended;
            tracing::info!("Segment playback ended");
        }
    }

    fn enter_segment(&mut self, slot: usize) {
        let SequencedSegment { index, segment } = self.segments[slot].clone();

        let handle = match self.sources.resolve_playable(&segment.source_id) {
            Ok(source) => source.playable_handle().map(str::to_string),
            Err(_) => None,
        };
        let Some(handle) = handle else {
            self.block(slot, segment.source_id, "source unavailable".to_string());
            return;
        };

        let Some(cursor) = self.cursor.as_mut() else {
            return;
        };

        if cursor.pending.is_none() && is_ready_for(self.element.as_ref(), &handle) {
            cursor.segment_index = index;
            cursor.position = slot;
            cursor.bound_source = Some(segment.source_id.clone());
            if self.starts_past_source_end(slot) {
                self.skip(slot);
                return;
            }
            tracing::debug!(segment_index = index, start = segment.start, "Seeking in place");
            self.notify(slot);
            self.seek_and_play(slot);
            return;
        }

        if let Some(stale) = cursor.pending.take() {
            tracing::debug!(bind = %stale.bind, "Cancelling outstanding source load");
        }
        match self.element.bind(&handle) {
            Ok(bind) => {
                cursor.segment_index = index;
                cursor.position = slot;
                cursor.bound_source = Some(segment.source_id.clone());
                cursor.awaiting_seek = false;
                cursor.pending = Some(PendingBind {
                    bind,
                    source_id: segment.source_id.clone(),
                    segment_index: index,
                });
                tracing::debug!(segment_index = index, source = %segment.source_id, %bind, "Binding source");
                self.state = SequencerState::Loading {
                    segment_index: index,
                };
                self.notify(slot);
            }
            Err(e) => self.block(slot, segment.source_id, e.to_string()),
        }
    }

    fn on_loaded(&mut self, bind: BindId) {
        let Some(cursor) = self.cursor.as_mut() else {
            return;
        };
        if cursor.pending.as_ref().is_some_and(|pending| pending.bind == bind) {
            cursor.pending = None;
            let slot = cursor.position;
            self.seek_and_play(slot);
        } else {
            tracing::debug!(%bind, "Ignoring stale source-ready event");
        }
    }

    fn seek_and_play(&mut self, slot: usize) {
        if self.starts_past_source_end(slot) {
            self.skip(slot);
            return;
        }
        let SequencedSegment { index, segment } = self.segments[slot].clone();
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.awaiting_seek = true;
        }
        let result = self
            .element
            .seek(segment.start)
            .and_then(|()| self.element.play());
        match result {
            Ok(()) => {
                if let Some(cursor) = self.cursor.as_mut() {
                    cursor.skipped = 0;
                }
                self.state = SequencerState::Playing {
                    segment_index: index,
                };
            }
            Err(e) => self.block(slot, segment.source_id, e.to_string()),
        }
    }

    /// Move past a segment that starts at or beyond its source's end. Once
    /// every playable segment was skipped in a row, playback blocks instead.
    fn skip(&mut self, slot: usize) {
        let SequencedSegment { index, segment } = self.segments[slot].clone();
        let Some(cursor) = self.cursor.as_mut() else {
            return;
        };
        cursor.skipped += 1;
        tracing::warn!(
            segment_index = index,
            source = %segment.source_id,
            start = segment.start,
            "Segment starts past the end of its source; skipping"
        );
        if cursor.skipped >= self.segments.len() {
            self.block(
                slot,
                segment.source_id,
                "no segment starts within its source".to_string(),
            );
            return;
        }
        self.advance(slot);
    }

    fn on_element_error(&mut self, message: &str) {
        let slot = match (&self.state, &self.cursor) {
            (SequencerState::Loading { .. } | SequencerState::Playing { .. }, Some(cursor)) => {
                cursor.position
            }
            _ => return,
        };
        let source_id = self.segments[slot].segment.source_id.clone();
        self.block(slot, source_id, message.to_string());
    }

    fn block(&mut self, slot: usize, source_id: SourceId, reason: String) {
        let index = self.segments[slot].index;
        tracing::warn!(segment_index = index, source = %source_id, %reason, "Playback blocked");
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.segment_index = index;
            cursor.position = slot;
            cursor.pending = None;
            cursor.awaiting_seek = false;
        }
        self.element.pause();
        self.state = SequencerState::Blocked {
            segment_index: index,
            source_id,
            reason,
        };
    }

    fn notify(&self, slot: usize) {
        if let Some(callback) = &self.on_segment {
            callback(self.segments[slot].index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipreel_media_core::testing::{ElementCall, MockElement, MockMedia};
    use std::sync::Mutex;

    fn registry() -> SourceRegistry {
        vec![
            Source::new("A", "a.webm", 10.0),
            Source::new("B", "b.webm", 10.0),
        ]
        .into_iter()
        .collect()
    }

    fn element() -> Arc<MockElement> {
        Arc::new(
            MockElement::new()
                .with_media("a.webm", MockMedia::new(10.0))
                .with_media("b.webm", MockMedia::new(10.0)),
        )
    }

    fn sequencer(clip: &Clip, element: &Arc<MockElement>) -> PlaybackSequencer {
        PlaybackSequencer::new(
            clip,
            registry(),
            element.clone() as Arc<dyn DecodeElement>,
            SequencerOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_clip_without_playable_segments() {
        let clip = Clip::new(1, "empty", vec![Segment::new("A", 1.0, 1.0)]);
        let element = element();
        let result = PlaybackSequencer::new(
            &clip,
            registry(),
            element as Arc<dyn DecodeElement>,
            SequencerOptions::default(),
        );
        assert!(matches!(result, Err(ClipreelError::NoPlayableSegments)));
    }

    #[test]
    fn test_start_binds_first_source() {
        let clip = Clip::new(1, "c", vec![Segment::new("A", 1.0, 3.0)]);
        let element = element();
        let mut seq = sequencer(&clip, &element);
        seq.start();

        assert_eq!(seq.state(), &SequencerState::Loading { segment_index: 0 });
        assert_eq!(element.calls(), vec![ElementCall::Bind("a.webm".into())]);
        let pending = seq.cursor().unwrap().pending.clone().unwrap();

        seq.handle_event(&MediaEvent::LoadedMetadata { bind: pending.bind });
        assert_eq!(seq.state(), &SequencerState::Playing { segment_index: 0 });
        assert_eq!(
            &element.calls()[1..],
            &[ElementCall::Seek(1.0), ElementCall::Play]
        );
    }

    #[test]
    fn test_time_updates_ignored_until_seek_confirms() {
        let clip = Clip::new(
            1,
            "same source",
            vec![Segment::new("A", 5.0, 8.0), Segment::new("A", 0.0, 2.0)],
        );
        let element = element();
        let mut seq = sequencer(&clip, &element);
        seq.start();
        let bind = seq.cursor().unwrap().pending.clone().unwrap().bind;
        seq.handle_event(&MediaEvent::LoadedMetadata { bind });
        seq.handle_event(&MediaEvent::Seeked);
        seq.handle_event(&MediaEvent::TimeUpdate { position: 8.0 });
        assert_eq!(seq.state(), &SequencerState::Playing { segment_index: 1 });

        // A position report from before the in-place seek lands late.
        seq.handle_event(&MediaEvent::TimeUpdate { position: 8.05 });
        assert_eq!(seq.state(), &SequencerState::Playing { segment_index: 1 });
    }

    #[test]
    fn test_segment_callback_reports_indices() {
        let clip = Clip::new(
            1,
            "c",
            vec![Segment::new("A", 0.0, 1.0), Segment::new("A", 2.0, 3.0)],
        );
        let element = element();
        let mut seq = sequencer(&clip, &element);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        seq.on_segment_change(Box::new(move |i| sink.lock().unwrap().push(i)));

        seq.start();
        let bind = seq.cursor().unwrap().pending.clone().unwrap().bind;
        seq.handle_event(&MediaEvent::LoadedMetadata { bind });
        seq.handle_event(&MediaEvent::Seeked);
        seq.handle_event(&MediaEvent::TimeUpdate { position: 1.0 });
        seq.handle_event(&MediaEvent::Seeked);
        seq.handle_event(&MediaEvent::TimeUpdate { position: 3.0 });

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 0]);
        assert_eq!(seq.status().loops, 1);
    }

    #[test]
    fn test_no_loop_ends_playback() {
        let clip = Clip::new(1, "c", vec![Segment::new("A", 0.0, 1.0)]);
        let element = element();
        let mut seq = PlaybackSequencer::new(
            &clip,
            registry(),
            element.clone() as Arc<dyn DecodeElement>,
            SequencerOptions {
                looping: false,
                ..SequencerOptions::default()
            },
        )
        .unwrap();
        seq.start();
        let bind = seq.cursor().unwrap().pending.clone().unwrap().bind;
        seq.handle_event(&MediaEvent::LoadedMetadata { bind });
        seq.handle_event(&MediaEvent::Seeked);
        seq.handle_event(&MediaEvent::Ended);
        assert_eq!(seq.state(), &SequencerState::Ended);
        assert_eq!(element.calls().last(), Some(&ElementCall::Pause));
    }

    #[test]
    fn test_end_clamped_to_element_duration() {
        let clip = Clip::new(
            1,
            "c",
            vec![Segment::new("A", 8.0, 14.0), Segment::new("B", 0.0, 2.0)],
        );
        let element = element();
        let mut seq = sequencer(&clip, &element);
        seq.start();
        let bind = seq.cursor().unwrap().pending.clone().unwrap().bind;
        seq.handle_event(&MediaEvent::LoadedMetadata { bind });
        seq.handle_event(&MediaEvent::Seeked);
        // Source A is only 10s long.
        seq.handle_event(&MediaEvent::TimeUpdate { position: 10.0 });
        assert_eq!(seq.state(), &SequencerState::Loading { segment_index: 1 });
    }

    #[test]
    fn test_element_error_blocks() {
        let clip = Clip::new(1, "c", vec![Segment::new("A", 0.0, 4.0)]);
        let element = element();
        let mut seq = sequencer(&clip, &element);
        seq.start();
        seq.handle_event(&MediaEvent::Error {
            message: "decode failure".into(),
        });
        match seq.state() {
            SequencerState::Blocked { reason, .. } => assert_eq!(reason, "decode failure"),
            other => panic!("unexpected state {other:?}"),
        }
        assert!(seq.cursor().unwrap().pending.is_none());
    }

    #[test]
    fn test_stop_discards_cursor() {
        let clip = Clip::new(1, "c", vec![Segment::new("A", 0.0, 4.0)]);
        let element = element();
        let mut seq = sequencer(&clip, &element);
        seq.start();
        seq.stop();
        assert!(seq.cursor().is_none());
        assert_eq!(seq.state(), &SequencerState::Idle);

        // Events after stop are ignored.
        seq.handle_event(&MediaEvent::LoadedMetadata { bind: BindId(1) });
        assert_eq!(seq.state(), &SequencerState::Idle);
    }

    #[test]
    fn test_indices_refer_to_clip_positions() {
        let clip = Clip::new(
            1,
            "c",
            vec![Segment::new("A", 0.0, 0.0), Segment::new("A", 4.0, 6.0)],
        );
        let element = element();
        let mut seq = sequencer(&clip, &element);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        seq.on_segment_change(Box::new(move |i| sink.lock().unwrap().push(i)));

        seq.start();
        assert_eq!(seq.state(), &SequencerState::Loading { segment_index: 1 });
        let pending = seq.cursor().unwrap().pending.clone().unwrap();
        assert_eq!(pending.segment_index, 1);

        seq.handle_event(&MediaEvent::LoadedMetadata { bind: pending.bind });
        assert_eq!(seq.state(), &SequencerState::Playing { segment_index: 1 });
        assert_eq!(element.calls()[1], ElementCall::Seek(4.0));
        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(seq.status().segment_index, Some(1));
    }

    #[test]
    fn test_blocked_reports_clip_index() {
        let clip = Clip::new(
            1,
            "c",
            vec![Segment::new("A", 2.0, 2.0), Segment::new("C", 0.0, 3.0)],
        );
        let element = element();
        let mut seq = sequencer(&clip, &element);
        seq.start();
        match seq.state() {
            SequencerState::Blocked { segment_index, .. } => assert_eq!(*segment_index, 1),
            other => panic!("unexpected state {other:?}"),
        }
        assert_eq!(seq.cursor().unwrap().segment_index, 1);
    }

    #[test]
    fn test_segment_past_source_end_is_skipped() {
        let clip = Clip::new(
            1,
            "c",
            vec![Segment::new("A", 12.0, 14.0), Segment::new("A", 1.0, 3.0)],
        );
        let element = element();
        let mut seq = sequencer(&clip, &element);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        seq.on_segment_change(Box::new(move |i| sink.lock().unwrap().push(i)));

        seq.start();
        let bind = seq.cursor().unwrap().pending.clone().unwrap().bind;
        seq.handle_event(&MediaEvent::LoadedMetadata { bind });

        // Source A is only 10s long; the first segment never seeks.
        assert_eq!(seq.state(), &SequencerState::Playing { segment_index: 1 });
        assert_eq!(
            element.calls(),
            vec![
                ElementCall::Bind("a.webm".into()),
                ElementCall::Seek(1.0),
                ElementCall::Play
            ]
        );
        assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
        assert_eq!(seq.cursor().unwrap().skipped, 0);
    }

    #[test]
    fn test_all_segments_past_source_end_blocks() {
        let clip = Clip::new(
            1,
            "c",
            vec![Segment::new("A", 12.0, 14.0), Segment::new("A", 11.0, 13.0)],
        );
        let element = element();
        let mut seq = sequencer(&clip, &element);
        seq.start();
        let bind = seq.cursor().unwrap().pending.clone().unwrap().bind;
        seq.handle_event(&MediaEvent::LoadedMetadata { bind });

        match seq.state() {
            SequencerState::Blocked { source_id, .. } => {
                assert_eq!(source_id, &SourceId::from("A"))
            }
            other => panic!("unexpected state {other:?}"),
        }
        assert!(!element
            .calls()
            .iter()
            .any(|c| matches!(c, ElementCall::Seek(_))));
    }

    #[test]
    fn test_loop_duration_excludes_degenerate() {
        let clip = Clip::new(
            1,
            "c",
            vec![
                Segment::new("A", 0.0, 0.0),
                Segment::new("A", 1.0, 3.0),
                Segment::new("B", 4.0, 5.5),
            ],
        );
        let element = element();
        let seq = sequencer(&clip, &element);
        assert_eq!(seq.segments().len(), 2);
        assert!((seq.loop_duration() - clip.playable_duration(0.01)).abs() < 1e-12);
    }
}
