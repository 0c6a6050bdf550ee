//! Time ranges cut from a single source.

use serde::{Deserialize, Serialize};

use crate::source::SourceId;

/// Position tolerance, in seconds, for seeks and segment boundaries.
pub const SEGMENT_EPSILON: f64 = 0.01;

/// A `[start, end)` range within one source.
///
/// `start < end` is expected but not enforced: clips may be authored before
/// a source's duration is confirmed, and consumers filter degenerate ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub source_id: SourceId,
}

impl Segment {
    pub fn new(source_id: impl Into<SourceId>, start: f64, end: f64) -> Self {
        Self {
            start,
            end,
            source_id: source_id.into(),
        }
    }

    /// Length in seconds; never negative.
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    /// True when the range is too short to play.
    pub fn is_degenerate(&self, epsilon: f64) -> bool {
        self.duration() <= epsilon
    }

    /// Copy with `start >= 0` and `end >= start`.
    pub fn normalized(&self) -> Self {
        let start = self.start.max(0.0);
        Self {
            start,
            end: self.end.max(start),
            source_id: self.source_id.clone(),
        }
    }

    /// Copy with `end` limited to `duration` when the source is shorter than
    /// recorded. Non-finite or non-positive durations leave the end as is.
    pub fn clamped_to(&self, duration: f64) -> Self {
        let end = if duration.is_finite() && duration > 0.0 {
            self.end.min(duration)
        } else {
            self.end
        };
        Self {
            start: self.start,
            end,
            source_id: self.source_id.clone(),
        }
    }

    pub fn contains(&self, position: f64) -> bool {
        position >= self.start && position < self.end
    }
}
