//! Scene annotations: named time intervals over a track's timeline.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A named interval in milliseconds. `start <= end` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub start: f64,
    pub end: f64,
    pub description: String,
}

impl Scene {
    /// Create a scene, swapping the bounds if they were given reversed.
    #[must_use]
    pub fn new(start: f64, end: f64, description: impl Into<String>) -> Self {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        Self {
            start,
            end,
            description: description.into(),
        }
    }

    /// Length of the interval in milliseconds.
    #[must_use]
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    #[must_use]
    pub fn contains(&self, t: f64) -> bool {
        (self.start..=self.end).contains(&t)
    }
}

/// Ordered list of scenes attached to a track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SceneTable {
    scenes: Vec<Scene>,
}

impl SceneTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scene; reversed bounds are normalized.
    pub fn push(&mut self, start: f64, end: f64, description: impl Into<String>) {
        self.scenes.push(Scene::new(start, end, description));
    }

    #[must_use]
    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    /// Duration of each scene in table order.
    #[must_use]
    pub fn durations(&self) -> Vec<f64> {
        self.scenes.iter().map(Scene::duration).collect()
    }

    /// Sum of all scene durations. Overlaps are counted once per scene.
    #[must_use]
    pub fn total_duration(&self) -> f64 {
        self.scenes.iter().map(Scene::duration).sum()
    }

    /// Total duration per description, in first-seen order.
    #[must_use]
    pub fn summary(&self) -> IndexMap<String, f64> {
        let mut out: IndexMap<String, f64> = IndexMap::new();
        for scene in &self.scenes {
            *out.entry(scene.description.clone()).or_insert(0.0) += scene.duration();
        }
        out
    }

    /// First scene containing `t`.
    #[must_use]
    pub fn scene_at(&self, t: f64) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.contains(t))
    }

    /// Sort scenes by start time.
    pub fn sort(&mut self) {
        self.scenes.sort_by(|a, b| a.start.total_cmp(&b.start));
    }
}
