//! JSON persistence of track tables and derived feature artifacts.
//!
//! Missing values are stored as `null`. Every artifact carries its
//! processing history, so a feature set can be recomputed from its source
//! track.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::table::{FeatureTable, MemberFrame, RowKey, TrackAttrs, TrackTable};

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).map_err(|e| EngineError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush().map_err(|e| EngineError::io(path, e))?;
    log::debug!("wrote {}", path.display());
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| EngineError::io(path, e))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

impl TrackTable {
    /// Write the table and its attrs as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if the file cannot be written.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json(path.as_ref(), self)
    }

    /// Read a table written by [`TrackTable::save_json`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if the file is missing or unreadable and
    /// [`EngineError::Serialization`] if it is not a track table.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path.as_ref())
    }
}

/// A derived feature table with the attrs of the track it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureArtifact<K> {
    pub table: FeatureTable<K>,
    pub attrs: TrackAttrs,
}

impl<K: RowKey> FeatureArtifact<K> {
    #[must_use]
    pub fn new(table: FeatureTable<K>, attrs: TrackAttrs) -> Self {
        Self { table, attrs }
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json(path.as_ref(), self)
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if the file is missing or unreadable and
    /// [`EngineError::Serialization`] if it does not decode.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path.as_ref())
    }
}

/// Logical groups of a feature store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreGroup {
    /// Vector features computed from keypoints.
    Points,
    /// Mixed and normalized features.
    Mix,
    /// Behavior classification tables.
    Behavior,
}

/// One group of a feature store and how it was computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureGroup {
    pub table: FeatureTable<MemberFrame>,
    /// Parameters the group was computed with (calc or mix records, filter
    /// settings, ...).
    pub settings: serde_json::Value,
    pub source_cols: Vec<String>,
}

/// Multi-group feature file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureStore {
    pub attrs: TrackAttrs,
    groups: BTreeMap<StoreGroup, FeatureGroup>,
}

impl FeatureStore {
    #[must_use]
    pub fn new(attrs: TrackAttrs) -> Self {
        Self {
            attrs,
            groups: BTreeMap::new(),
        }
    }

    /// Set a group, returning the one it replaced.
    pub fn insert(&mut self, group: StoreGroup, data: FeatureGroup) -> Option<FeatureGroup> {
        self.groups.insert(group, data)
    }

    #[must_use]
    pub fn get(&self, group: StoreGroup) -> Option<&FeatureGroup> {
        self.groups.get(&group)
    }

    pub fn remove(&mut self, group: StoreGroup) -> Option<FeatureGroup> {
        self.groups.remove(&group)
    }

    /// Groups present, in `points`, `mix`, `behavior` order.
    pub fn groups(&self) -> impl Iterator<Item = StoreGroup> + '_ {
        self.groups.keys().copied()
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json(path.as_ref(), self)
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Io`] if the file is missing or unreadable and
    /// [`EngineError::Serialization`] if it does not decode.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path.as_ref())
    }
}
