//! Clips: ordered segment lists treated as one continuous unit.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::overlay::TextOverlay;
use crate::segment::Segment;
use crate::source::SourceId;

/// Numeric clip identifier, unique within a project.
pub type ClipId = u64;

/// An ordered sequence of segments, possibly spanning several sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: ClipId,
    pub name: String,
    pub segments: Vec<Segment>,

    /// Sum of `end - start` over all segments. Producers keep this in sync;
    /// playback never recomputes it.
    pub duration_secs: f64,

    /// Built by combining other clips.
    #[serde(default)]
    pub is_combined: bool,

    #[serde(default)]
    pub text_overlay: Option<TextOverlay>,
}

/// Errors raised by clip authoring and source lookups.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("Source unavailable: {id}")]
    SourceUnavailable { id: SourceId },

    #[error("Invalid range: end {end} must be after start {start}")]
    InvalidRange { start: f64, end: f64 },

    #[error("Combining requires at least 2 clips, got {count}")]
    NotEnoughClips { count: usize },

    #[error("Clip duration {declared:.3}s does not match its segments ({computed:.3}s)")]
    DurationMismatch { declared: f64, computed: f64 },
}

impl Clip {
    /// Build a clip whose duration is derived from `segments`.
    pub fn new(id: ClipId, name: impl Into<String>, segments: Vec<Segment>) -> Self {
        let duration_secs = segments.iter().map(Segment::duration).sum();
        Self {
            id,
            name: name.into(),
            segments,
            duration_secs,
            is_combined: false,
            text_overlay: None,
        }
    }

    /// Single-segment clip cut from a trim range on one source.
    pub fn from_range(
        id: ClipId,
        name: impl Into<String>,
        source_id: impl Into<SourceId>,
        start: f64,
        end: f64,
    ) -> Result<Self, ModelError> {
        if end.partial_cmp(&start) != Some(Ordering::Greater) || start < 0.0 {
            return Err(ModelError::InvalidRange { start, end });
        }
        Ok(Self::new(id, name, vec![Segment::new(source_id, start, end)]))
    }

    pub fn with_overlay(mut self, overlay: Option<TextOverlay>) -> Self {
        self.text_overlay = overlay;
        self
    }

    /// Deep copy under a new id, named `"<name> (Copy)"`.
    pub fn duplicate(&self, id: ClipId) -> Self {
        Self {
            id,
            name: format!("{} (Copy)", self.name),
            ..self.clone()
        }
    }

    /// Concatenate the segments of `clips`, ordered by each clip's first
    /// segment start. The result carries no overlay.
    pub fn combine(id: ClipId, name: impl Into<String>, clips: &[&Clip]) -> Result<Self, ModelError> {
        if clips.len() < 2 {
            return Err(ModelError::NotEnoughClips { count: clips.len() });
        }

        let mut ordered: Vec<&Clip> = clips.to_vec();
        ordered.sort_by(|a, b| {
            a.first_start()
                .partial_cmp(&b.first_start())
                .unwrap_or(Ordering::Equal)
        });

        let segments: Vec<Segment> = ordered
            .iter()
            .flat_map(|clip| clip.segments.iter().cloned())
            .collect();

        let mut combined = Self::new(id, name, segments);
        combined.is_combined = true;
        Ok(combined)
    }

    fn first_start(&self) -> f64 {
        self.segments.first().map_or(f64::INFINITY, |s| s.start)
    }

    /// Total length of segments longer than `epsilon`. This is the length of
    /// one preview loop.
    pub fn playable_duration(&self, epsilon: f64) -> f64 {
        self.playable_segments(epsilon).map(Segment::duration).sum()
    }

    pub fn playable_segments(&self, epsilon: f64) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(move |s| !s.is_degenerate(epsilon))
    }

    pub fn has_playable_segments(&self, epsilon: f64) -> bool {
        self.playable_segments(epsilon).next().is_some()
    }

    /// Distinct source ids in first-use order.
    pub fn distinct_sources(&self) -> Vec<&SourceId> {
        let mut seen: Vec<&SourceId> = Vec::new();
        for segment in &self.segments {
            if !seen.contains(&&segment.source_id) {
                seen.push(&segment.source_id);
            }
        }
        seen
    }

    /// Segments come from more than one source, so playback needs
    /// cross-source handoff.
    pub fn is_multi_source(&self) -> bool {
        self.distinct_sources().len() > 1
    }

    /// Check the declared duration against the segments.
    pub fn check_duration(&self, tolerance: f64) -> Result<(), ModelError> {
        let computed: f64 = self.segments.iter().map(Segment::duration).sum();
        if (computed - self.duration_secs).abs() > tolerance {
            return Err(ModelError::DurationMismatch {
                declared: self.duration_secs,
                computed,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SEGMENT_EPSILON;

    #[test]
    fn test_from_range() {
        let clip = Clip::from_range(1, "Clip 1", "a", 2.0, 7.5).unwrap();
        assert_eq!(clip.segments.len(), 1);
        assert!((clip.duration_secs - 5.5).abs() < 1e-12);
        assert!(!clip.is_combined);
        assert!(clip.text_overlay.is_none());

        assert!(matches!(
            Clip::from_range(2, "Bad", "a", 3.0, 3.0),
            Err(ModelError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_duplicate_keeps_segments_and_overlay() {
        let clip = Clip::from_range(1, "Intro", "a", 0.0, 4.0)
            .unwrap()
            .with_overlay(TextOverlay::from_content("Hello"));
        let copy = clip.duplicate(9);
        assert_eq!(copy.id, 9);
        assert_eq!(copy.name, "Intro (Copy)");
        assert_eq!(copy.segments, clip.segments);
        assert_eq!(copy.text_overlay, clip.text_overlay);
    }

    #[test]
    fn test_combine_orders_by_first_segment() {
        let late = Clip::from_range(1, "Late", "a", 10.0, 12.0).unwrap();
        let early = Clip::from_range(2, "Early", "b", 1.0, 4.0).unwrap();
        let combined = Clip::combine(3, "Combined 3", &[&late, &early]).unwrap();

        assert!(combined.is_combined);
        assert_eq!(combined.segments[0].source_id, SourceId::from("b"));
        assert_eq!(combined.segments[1].source_id, SourceId::from("a"));
        assert!((combined.duration_secs - 5.0).abs() < 1e-12);
        assert!(combined.is_multi_source());
        assert!(combined.text_overlay.is_none());
    }

    #[test]
    fn test_combine_requires_two() {
        let only = Clip::from_range(1, "Only", "a", 0.0, 1.0).unwrap();
        assert_eq!(
            Clip::combine(2, "x", &[&only]),
            Err(ModelError::NotEnoughClips { count: 1 })
        );
    }

    #[test]
    fn test_playable_duration_skips_degenerate() {
        let clip = Clip::new(
            1,
            "Mixed",
            vec![
                Segment::new("a", 0.0, 0.0),
                Segment::new("a", 1.0, 5.0),
                Segment::new("b", 3.0, 3.005),
            ],
        );
        assert!((clip.playable_duration(SEGMENT_EPSILON) - 4.0).abs() < 1e-12);
        assert_eq!(clip.playable_segments(SEGMENT_EPSILON).count(), 1);
    }

    #[test]
    fn test_distinct_sources_in_first_use_order() {
        let clip = Clip::new(
            1,
            "Multi",
            vec![
                Segment::new("b", 0.0, 1.0),
                Segment::new("a", 0.0, 1.0),
                Segment::new("b", 2.0, 3.0),
            ],
        );
        let ids: Vec<&str> = clip.distinct_sources().iter().map(|s| s.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_check_duration() {
        let mut clip = Clip::from_range(1, "c", "a", 0.0, 2.0).unwrap();
        assert!(clip.check_duration(SEGMENT_EPSILON).is_ok());
        clip.duration_secs = 3.0;
        assert!(matches!(
            clip.check_duration(SEGMENT_EPSILON),
            Err(ModelError::DurationMismatch { .. })
        ));
    }
}
