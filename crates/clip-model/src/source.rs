//! Source media and the registry that owns it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clip::ModelError;

/// Stable identifier of a source video.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A decodable media input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,

    /// Path or URI the decoder opens. `None` once the handle has been
    /// invalidated; the source must be re-imported before it plays again.
    #[serde(default)]
    pub handle: Option<String>,

    /// Duration in seconds as recorded at import time.
    pub duration_secs: f64,

    /// Native frame size, filled in once a decoder has reported it.
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

impl Source {
    pub fn new(id: impl Into<SourceId>, handle: impl Into<String>, duration_secs: f64) -> Self {
        Self {
            id: id.into(),
            handle: Some(handle.into()),
            duration_secs,
            width: None,
            height: None,
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// Whether the source has a non-empty handle.
    pub fn is_playable(&self) -> bool {
        self.playable_handle().is_some()
    }

    pub fn playable_handle(&self) -> Option<&str> {
        self.handle
            .as_deref()
            .map(str::trim)
            .filter(|handle| !handle.is_empty())
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Some((w, h)),
            _ => None,
        }
    }

    /// Drop the handle, marking the source unplayable.
    pub fn invalidate(&mut self) {
        self.handle = None;
    }
}

impl From<String> for SourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// All sources known to the application, keyed by id.
///
/// Serialized as a plain list of sources ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Source>", into = "Vec<Source>")]
pub struct SourceRegistry {
    sources: BTreeMap<SourceId, Source>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a source, returning the previous entry.
    pub fn insert(&mut self, source: Source) -> Option<Source> {
        self.sources.insert(source.id.clone(), source)
    }

    pub fn get(&self, id: &SourceId) -> Option<&Source> {
        self.sources.get(id)
    }

    pub fn remove(&mut self, id: &SourceId) -> Option<Source> {
        self.sources.remove(id)
    }

    pub fn contains(&self, id: &SourceId) -> bool {
        self.sources.contains_key(id)
    }

    /// Look up a source that can be opened right now.
    pub fn resolve_playable(&self, id: &SourceId) -> Result<&Source, ModelError> {
        match self.sources.get(id) {
            Some(source) if source.is_playable() => Ok(source),
            _ => Err(ModelError::SourceUnavailable { id: id.clone() }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Source> {
        self.sources.values()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Largest known native frame size across `ids`, if any source reports one.
    pub fn max_dimensions<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a SourceId>,
    ) -> Option<(u32, u32)> {
        ids.into_iter()
            .filter_map(|id| self.get(id).and_then(Source::dimensions))
            .fold(None, |acc, (w, h)| match acc {
                None => Some((w, h)),
                Some((aw, ah)) => Some((aw.max(w), ah.max(h))),
            })
    }
}

impl From<Vec<Source>> for SourceRegistry {
    fn from(sources: Vec<Source>) -> Self {
        let mut registry = Self::new();
        for source in sources {
            registry.insert(source);
        }
        registry
    }
}

impl From<SourceRegistry> for Vec<Source> {
    fn from(registry: SourceRegistry) -> Self {
        registry.sources.into_values().collect()
    }
}

impl FromIterator<Source> for SourceRegistry {
    fn from_iter<T: IntoIterator<Item = Source>>(iter: T) -> Self {
        iter.into_iter().collect::<Vec<_>>().into()
    }
}
