//! Project file: the sources a user imported and the clips cut from them.
//!
//! A project is a single pretty-printed JSON document. Handles inside it are
//! opaque to the model; relative paths are resolved against the project file's
//! directory by [`ClipProject::resolve_handle`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::clip::{Clip, ClipId};
use crate::segment::{Segment, SEGMENT_EPSILON};
use crate::source::{Source, SourceRegistry};

/// Current schema version written by [`ClipProject::new`].
pub const PROJECT_VERSION: &str = "1.0";

/// Top-level project file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipProject {
    /// Schema version.
    pub version: String,

    /// Human-readable project name.
    pub name: String,

    /// Creation timestamp (RFC 3339).
    pub created_at: String,

    /// Last modified timestamp (RFC 3339).
    pub modified_at: String,

    #[serde(default)]
    pub sources: SourceRegistry,

    #[serde(default)]
    pub clips: Vec<Clip>,
}

impl ClipProject {
    pub fn new(name: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            version: PROJECT_VERSION.to_string(),
            name: name.into(),
            created_at: now.clone(),
            modified_at: now,
            sources: SourceRegistry::new(),
            clips: Vec::new(),
        }
    }

    /// Load a project file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProjectError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ProjectError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&json).map_err(|e| ProjectError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Write the project as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ProjectError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ProjectError::IoError {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| ProjectError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        std::fs::write(path, json).map_err(|e| ProjectError::IoError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn touch(&mut self) {
        self.modified_at = chrono::Utc::now().to_rfc3339();
    }

    /// Next free clip id.
    pub fn next_clip_id(&self) -> ClipId {
        self.clips.iter().map(|c| c.id).max().map_or(1, |id| id + 1)
    }

    /// Find a clip by numeric id or exact name.
    pub fn find_clip(&self, key: &str) -> Option<&Clip> {
        let by_id = key.trim().parse::<ClipId>().ok();
        self.clips
            .iter()
            .find(|c| Some(c.id) == by_id)
            .or_else(|| self.clips.iter().find(|c| c.name == key))
    }

    pub fn add_source(&mut self, source: Source) {
        self.sources.insert(source);
        self.touch();
    }

    pub fn add_clip(&mut self, clip: Clip) {
        self.clips.push(clip);
        self.touch();
    }

    /// Registry with relative handles rewritten against `base_dir`.
    pub fn registry_relative_to(&self, base_dir: &Path) -> SourceRegistry {
        self.sources
            .iter()
            .cloned()
            .map(|mut source| {
                if let Some(handle) = source.playable_handle() {
                    source.handle = Some(Self::resolve_handle(base_dir, handle));
                }
                source
            })
            .collect()
    }

    /// URIs and absolute paths pass through; relative paths are joined to
    /// `base_dir`.
    pub fn resolve_handle(base_dir: &Path, handle: &str) -> String {
        if handle.contains("://") || Path::new(handle).is_absolute() {
            return handle.to_string();
        }
        base_dir.join(handle).to_string_lossy().into_owned()
    }

    /// Human-readable problems that would block preview or export.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = vec![];

        for source in self.sources.iter() {
            if !source.is_playable() {
                errors.push(format!(
                    "Source '{}' has no playable handle; re-import it",
                    source.id
                ));
            }
        }

        for clip in &self.clips {
            if !clip.has_playable_segments(SEGMENT_EPSILON) {
                errors.push(format!("Clip '{}' has no playable segments", clip.name));
            }
            if let Err(e) = clip.check_duration(SEGMENT_EPSILON) {
                errors.push(format!("Clip '{}': {e}", clip.name));
            }
            for (index, segment) in clip.segments.iter().enumerate() {
                self.check_segment(clip, index, segment, &mut errors);
            }
        }

        errors
    }

    fn check_segment(&self, clip: &Clip, index: usize, segment: &Segment, errors: &mut Vec<String>) {
        let Some(source) = self.sources.get(&segment.source_id) else {
            errors.push(format!(
                "Clip '{}' segment {index} references unknown source '{}'",
                clip.name, segment.source_id
            ));
            return;
        };
        if segment.is_degenerate(SEGMENT_EPSILON) {
            errors.push(format!(
                "Clip '{}' segment {index} is empty ({:.3}..{:.3}) and will be skipped",
                clip.name, segment.start, segment.end
            ));
        }
        if source.duration_secs > 0.0 && segment.end > source.duration_secs + SEGMENT_EPSILON {
            errors.push(format!(
                "Clip '{}' segment {index} ends at {:.3}s past source duration {:.3}s",
                clip.name, segment.end, source.duration_secs
            ));
        }
    }
}

/// Errors that can occur when working with project files.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::TextOverlay;

    fn sample() -> ClipProject {
        let mut project = ClipProject::new("Demo");
        project.add_source(Source::new("a", "sources/a.webm", 30.0));
        project.add_source(Source::new("b", "/abs/b.webm", 10.0));
        project.add_clip(
            Clip::from_range(1, "Clip 1", "a", 0.0, 5.0)
                .unwrap()
                .with_overlay(TextOverlay::from_content("Hi")),
        );
        project
    }

    #[test]
    fn test_project_creation() {
        let project = ClipProject::new("Demo");
        assert_eq!(project.version, PROJECT_VERSION);
        assert!(project.clips.is_empty());
        assert_eq!(project.next_clip_id(), 1);
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join("clipreel_test_project");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("project.json");

        sample().save(&path).unwrap();
        let loaded = ClipProject::load(&path).unwrap();
        assert_eq!(loaded.name, "Demo");
        assert_eq!(loaded.sources.len(), 2);
        assert_eq!(loaded.clips[0].text_overlay.as_ref().unwrap().content, "Hi");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_missing_file() {
        let err = ClipProject::load("/nonexistent/clipreel/project.json").unwrap_err();
        assert!(matches!(err, ProjectError::IoError { .. }));
    }

    #[test]
    fn test_find_clip_by_id_or_name() {
        let project = sample();
        assert_eq!(project.find_clip("1").unwrap().name, "Clip 1");
        assert_eq!(project.find_clip("Clip 1").unwrap().id, 1);
        assert!(project.find_clip("Clip 9").is_none());
        assert_eq!(project.next_clip_id(), 2);
    }

    #[test]
    fn test_relative_handles_resolve_against_base() {
        let project = sample();
        let registry = project.registry_relative_to(Path::new("/projects/demo"));
        assert_eq!(
            registry.get(&"a".into()).unwrap().handle.as_deref(),
            Some("/projects/demo/sources/a.webm")
        );
        assert_eq!(
            registry.get(&"b".into()).unwrap().handle.as_deref(),
            Some("/abs/b.webm")
        );
        assert_eq!(
            ClipProject::resolve_handle(Path::new("/x"), "file:///v.webm"),
            "file:///v.webm"
        );
    }

    #[test]
    fn test_validate_reports_problems() {
        let mut project = sample();
        assert!(project.validate().is_empty());

        project.add_clip(Clip::new(
            2,
            "Broken",
            vec![Segment::new("missing", 0.0, 1.0), Segment::new("b", 2.0, 15.0)],
        ));
        let mut stale = Source::new("c", "c.webm", 5.0);
        stale.invalidate();
        project.add_source(stale);

        let errors = project.validate();
        assert!(errors.iter().any(|e| e.contains("unknown source 'missing'")));
        assert!(errors.iter().any(|e| e.contains("past source duration")));
        assert!(errors.iter().any(|e| e.contains("'c' has no playable handle")));
    }
}
