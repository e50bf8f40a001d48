//! Track and feature table data structures.
//!
//! A [`TrackTable`] holds one row per `(frame, member, keypoint)` with an
//! optional 2D position, the capture timestamp in milliseconds and any
//! model-specific extras (`conf`, `score`, `z`, `visible`, ...). A
//! [`FeatureTable`] is the columnar result of a derivation, keyed either by
//! [`MemberFrame`] (relationships between keypoints) or by [`TrackKey`]
//! (per-keypoint quantities such as speed).
//!
//! Missing values are explicit: an undetected keypoint has
//! `position == None`, and a missing derived value is `NaN`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::record::ProcStep;
use crate::scene::SceneTable;

/// Frame number within a video.
pub type Frame = i64;

/// Keypoint (landmark) index as emitted by the detector.
pub type KeypointId = u32;

/// Tracked subject identifier.
///
/// Integer tracking ids are stringified once at ingestion so every
/// comparison downstream works on one type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    /// Create a member id from any string-like value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for MemberId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u32> for MemberId {
    fn from(id: u32) -> Self {
        Self(id.to_string())
    }
}

impl From<i64> for MemberId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// Composite key of a track row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrackKey {
    pub frame: Frame,
    pub member: MemberId,
    pub keypoint: KeypointId,
}

impl TrackKey {
    #[must_use]
    pub fn new(frame: Frame, member: impl Into<MemberId>, keypoint: KeypointId) -> Self {
        Self {
            frame,
            member: member.into(),
            keypoint,
        }
    }

    /// The `(frame, member)` part of the key.
    #[must_use]
    pub fn member_frame(&self) -> MemberFrame {
        MemberFrame {
            frame: self.frame,
            member: self.member.clone(),
        }
    }
}

/// Two-level key of a derived row: the keypoint level is collapsed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberFrame {
    pub frame: Frame,
    pub member: MemberId,
}

impl MemberFrame {
    #[must_use]
    pub fn new(frame: Frame, member: impl Into<MemberId>) -> Self {
        Self {
            frame,
            member: member.into(),
        }
    }
}

/// Row key of a [`FeatureTable`].
pub trait RowKey: Clone + Ord + fmt::Debug + Serialize + DeserializeOwned {
    /// Grouping key for per-series operations (lag differences, rolling means).
    type Group: Clone + Ord + fmt::Debug;

    fn frame(&self) -> Frame;
    fn member(&self) -> &MemberId;
    fn group(&self) -> Self::Group;
}

impl RowKey for TrackKey {
    type Group = (MemberId, KeypointId);

    fn frame(&self) -> Frame {
        self.frame
    }

    fn member(&self) -> &MemberId {
        &self.member
    }

    fn group(&self) -> Self::Group {
        (self.member.clone(), self.keypoint)
    }
}

impl RowKey for MemberFrame {
    type Group = MemberId;

    fn frame(&self) -> Frame {
        self.frame
    }

    fn member(&self) -> &MemberId {
        &self.member
    }

    fn group(&self) -> Self::Group {
        self.member.clone()
    }
}

/// One detected (or undetected) keypoint observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPoint {
    /// `(x, y)` in frame pixels; `None` when the detector missed the keypoint.
    #[serde(with = "serde_nan::position")]
    pub position: Option<[f64; 2]>,

    /// Capture time in milliseconds.
    #[serde(with = "serde_nan::float")]
    pub timestamp: f64,

    /// Model-specific fields such as `conf`, `score`, `z` or `visible`.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty", with = "serde_nan::scalars")]
    pub extras: IndexMap<String, f64>,
}

impl TrackPoint {
    /// A detected keypoint.
    #[must_use]
    pub fn new(x: f64, y: f64, timestamp: f64) -> Self {
        Self {
            position: Some([x, y]),
            timestamp,
            extras: IndexMap::new(),
        }
    }

    /// An undetected keypoint.
    #[must_use]
    pub fn undetected(timestamp: f64) -> Self {
        Self {
            position: None,
            timestamp,
            extras: IndexMap::new(),
        }
    }

    /// Build a point from raw detector output.
    ///
    /// Detectors write the ROI origin (or `(0, 0)` without an ROI) for
    /// keypoints they did not find. Such a pair, or any non-finite
    /// coordinate, becomes `position == None`.
    #[must_use]
    pub fn from_raw(x: f64, y: f64, timestamp: f64, roi_origin: [f64; 2]) -> Self {
        let sentinel = x == roi_origin[0] && y == roi_origin[1];
        if sentinel || !x.is_finite() || !y.is_finite() {
            Self::undetected(timestamp)
        } else {
            Self::new(x, y, timestamp)
        }
    }

    /// Attach a model-specific field.
    #[must_use]
    pub fn with_extra(mut self, name: impl Into<String>, value: f64) -> Self {
        self.extras.insert(name.into(), value);
        self
    }

    /// x coordinate, `NaN` when undetected.
    #[must_use]
    pub fn x(&self) -> f64 {
        self.position.map_or(f64::NAN, |p| p[0])
    }

    /// y coordinate, `NaN` when undetected.
    #[must_use]
    pub fn y(&self) -> f64 {
        self.position.map_or(f64::NAN, |p| p[1])
    }
}

/// Table-level metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackAttrs {
    /// Detector name (`yolo`, `mediapipe`, `rtmpose`, ...).
    pub model: String,
    pub video_name: String,
    /// `(width, height)` of the source frames.
    pub frame_size: Option<(u32, u32)>,
    /// Offset of the region-of-interest capture, also the undetected sentinel.
    pub roi_left_top: Option<[f64; 2]>,
    pub scene_table: SceneTable,
    pub proc_history: Vec<ProcStep>,
    /// Multi-part recording linkage.
    pub take: Option<u32>,
    pub prev: Option<String>,
    pub next: Option<String>,
}

impl TrackAttrs {
    /// Sentinel coordinate pair for undetected keypoints.
    #[must_use]
    pub fn sentinel(&self) -> [f64; 2] {
        self.roi_left_top.unwrap_or([0.0, 0.0])
    }
}

/// Canonical `(frame, member, keypoint)` motion table.
///
/// Rows are kept sorted by key. Writing a key that already exists replaces
/// the earlier row, so merges resolve duplicates by keeping the last one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "TrackTableRepr", into = "TrackTableRepr")]
pub struct TrackTable {
    rows: BTreeMap<TrackKey, TrackPoint>,
    pub attrs: TrackAttrs,
}

#[derive(Serialize, Deserialize)]
struct TrackRow {
    key: TrackKey,
    point: TrackPoint,
}

#[derive(Serialize, Deserialize)]
struct TrackTableRepr {
    attrs: TrackAttrs,
    rows: Vec<TrackRow>,
}

impl From<TrackTableRepr> for TrackTable {
    fn from(repr: TrackTableRepr) -> Self {
        Self::from_rows(repr.rows.into_iter().map(|r| (r.key, r.point)), repr.attrs)
    }
}

impl From<TrackTable> for TrackTableRepr {
    fn from(table: TrackTable) -> Self {
        Self {
            attrs: table.attrs,
            rows: table
                .rows
                .into_iter()
                .map(|(key, point)| TrackRow { key, point })
                .collect(),
        }
    }
}

impl TrackTable {
    /// Create an empty table.
    #[must_use]
    pub fn new(attrs: TrackAttrs) -> Self {
        Self {
            rows: BTreeMap::new(),
            attrs,
        }
    }

    /// Build a table from rows; later duplicates replace earlier ones.
    pub fn from_rows(
        rows: impl IntoIterator<Item = (TrackKey, TrackPoint)>,
        attrs: TrackAttrs,
    ) -> Self {
        Self {
            rows: rows.into_iter().collect(),
            attrs,
        }
    }

    /// Insert a row, returning the row it replaced.
    pub fn insert(&mut self, key: TrackKey, point: TrackPoint) -> Option<TrackPoint> {
        self.rows.insert(key, point)
    }

    #[must_use]
    pub fn get(&self, key: &TrackKey) -> Option<&TrackPoint> {
        self.rows.get(key)
    }

    /// Look up one keypoint of one member in one frame.
    #[must_use]
    pub fn point(
        &self,
        frame: Frame,
        member: &MemberId,
        keypoint: KeypointId,
    ) -> Option<&TrackPoint> {
        self.rows.get(&TrackKey {
            frame,
            member: member.clone(),
            keypoint,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&TrackKey, &TrackPoint)> {
        self.rows.iter()
    }

    /// Sorted unique members.
    #[must_use]
    pub fn members(&self) -> BTreeSet<MemberId> {
        self.rows.keys().map(|k| k.member.clone()).collect()
    }

    /// Sorted unique keypoint ids.
    #[must_use]
    pub fn keypoints(&self) -> BTreeSet<KeypointId> {
        self.rows.keys().map(|k| k.keypoint).collect()
    }

    /// Sorted unique `(frame, member)` pairs.
    #[must_use]
    pub fn member_frames(&self) -> Vec<MemberFrame> {
        let mut out: Vec<MemberFrame> = Vec::new();
        for key in self.rows.keys() {
            let same = out
                .last()
                .is_some_and(|mf| mf.frame == key.frame && mf.member == key.member);
            if !same {
                out.push(key.member_frame());
            }
        }
        out
    }

    /// Keep rows matching the predicate, returning a new table.
    #[must_use]
    pub fn filtered(&self, mut pred: impl FnMut(&TrackKey, &TrackPoint) -> bool) -> Self {
        Self {
            rows: self
                .rows
                .iter()
                .filter(|(k, p)| pred(k, p))
                .map(|(k, p)| (k.clone(), p.clone()))
                .collect(),
            attrs: self.attrs.clone(),
        }
    }

    /// Check that timestamps never decrease within a member as frames advance.
    ///
    /// Every timestamp of a member at a later frame must be at least the
    /// largest timestamp of that member at any earlier frame, whichever
    /// keypoints carry them. Keypoints of one frame may differ among
    /// themselves. `NaN` timestamps are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidInput`] naming the first offending row.
    pub fn validate_timestamps(&self) -> Result<()> {
        struct Seen {
            frame: Frame,
            before: f64,
            current: f64,
        }

        let mut seen: BTreeMap<&MemberId, Seen> = BTreeMap::new();
        for (key, point) in &self.rows {
            let ts = point.timestamp;
            if ts.is_nan() {
                continue;
            }
            let state = seen.entry(&key.member).or_insert(Seen {
                frame: key.frame,
                before: f64::NEG_INFINITY,
                current: f64::NEG_INFINITY,
            });
            if key.frame != state.frame {
                state.before = state.before.max(state.current);
                state.current = f64::NEG_INFINITY;
                state.frame = key.frame;
            }
            if ts < state.before {
                return Err(EngineError::invalid_input(format!(
                    "timestamp {ts} at frame {} member {} goes back from {} at an earlier frame",
                    key.frame, key.member, state.before
                )));
            }
            state.current = state.current.max(ts);
        }
        Ok(())
    }

    /// Lift coordinates and extras into a columnar table that keeps the
    /// keypoint level. Undetected positions become `NaN`.
    #[must_use]
    pub fn to_feature_table(&self) -> FeatureTable<TrackKey> {
        let mut names: Vec<String> = vec!["x".to_owned(), "y".to_owned()];
        for point in self.rows.values() {
            for name in point.extras.keys() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }

        let mut builder = FeatureTableBuilder::new(names.clone());
        for (key, point) in &self.rows {
            let mut values = vec![point.x(), point.y()];
            values.extend(
                names[2..]
                    .iter()
                    .map(|n| point.extras.get(n).copied().unwrap_or(f64::NAN)),
            );
            builder.push(key.clone(), point.timestamp, &values);
        }
        let mut table = builder.finish();
        table.proc_history.clone_from(&self.attrs.proc_history);
        table
    }

    /// Lower a per-keypoint feature table back into a track table.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ColumnNotFound`] if `x` or `y` is missing.
    pub fn from_feature_table(table: &FeatureTable<TrackKey>, attrs: TrackAttrs) -> Result<Self> {
        let xs = table.column("x")?;
        let ys = table.column("y")?;
        let extras: Vec<(&String, &Vec<f64>)> = table
            .columns()
            .iter()
            .filter(|(name, _)| name.as_str() != "x" && name.as_str() != "y")
            .collect();

        let rows = table.keys().iter().enumerate().map(|(i, key)| {
            let mut point = if xs[i].is_nan() || ys[i].is_nan() {
                TrackPoint::undetected(table.timestamps()[i])
            } else {
                TrackPoint::new(xs[i], ys[i], table.timestamps()[i])
            };
            for (name, values) in &extras {
                point.extras.insert((*name).clone(), values[i]);
            }
            (key.clone(), point)
        });
        let mut out = Self::from_rows(rows, attrs);
        out.attrs.proc_history.clone_from(&table.proc_history);
        Ok(out)
    }
}

/// Columnar derived table.
///
/// Keys are sorted and unique; every column has one value per key, `NaN`
/// marking a missing value. Timestamps are carried alongside and never
/// treated as a data column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable<K> {
    keys: Vec<K>,
    #[serde(with = "serde_nan::floats")]
    timestamps: Vec<f64>,
    #[serde(with = "serde_nan::columns")]
    columns: IndexMap<String, Vec<f64>>,
    #[serde(default)]
    pub proc_history: Vec<ProcStep>,
}

impl<K: RowKey> Default for FeatureTable<K> {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            timestamps: Vec::new(),
            columns: IndexMap::new(),
            proc_history: Vec::new(),
        }
    }
}

impl<K: RowKey> FeatureTable<K> {
    /// Create an empty table with the given (empty) columns.
    #[must_use]
    pub fn with_columns(names: &[String]) -> Self {
        Self {
            columns: names.iter().map(|n| (n.clone(), Vec::new())).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    #[must_use]
    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    #[must_use]
    pub fn columns(&self) -> &IndexMap<String, Vec<f64>> {
        &self.columns
    }

    /// Column names in insertion order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Borrow a column by name.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ColumnNotFound`] if the column does not exist.
    pub fn column(&self, name: &str) -> Result<&[f64]> {
        self.columns
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| EngineError::column_not_found(name))
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Add or replace a column.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::LengthMismatch`] if the column length differs
    /// from the row count.
    pub fn insert_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        if values.len() != self.keys.len() {
            return Err(EngineError::length_mismatch(self.keys.len(), values.len()));
        }
        self.columns.insert(name.into(), values);
        Ok(())
    }

    /// Append a processing step to the history.
    pub fn push_history(&mut self, step: ProcStep) {
        self.proc_history.push(step);
    }

    /// Row indices grouped by [`RowKey::group`], each group in frame order.
    #[must_use]
    pub fn group_indices(&self) -> BTreeMap<K::Group, Vec<usize>> {
        let mut groups: BTreeMap<K::Group, Vec<usize>> = BTreeMap::new();
        for (i, key) in self.keys.iter().enumerate() {
            groups.entry(key.group()).or_default().push(i);
        }
        for indices in groups.values_mut() {
            indices.sort_by_key(|&i| self.keys[i].frame());
        }
        groups
    }

    /// A new table holding only the given rows, in the given order.
    #[must_use]
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            keys: indices.iter().map(|&i| self.keys[i].clone()).collect(),
            timestamps: indices.iter().map(|&i| self.timestamps[i]).collect(),
            columns: self
                .columns
                .iter()
                .map(|(name, values)| (name.clone(), indices.iter().map(|&i| values[i]).collect()))
                .collect(),
            proc_history: self.proc_history.clone(),
        }
    }

    /// A table with the same keys, timestamps and history but no columns.
    #[must_use]
    pub fn empty_like(&self) -> Self {
        Self {
            keys: self.keys.clone(),
            timestamps: self.timestamps.clone(),
            columns: IndexMap::new(),
            proc_history: self.proc_history.clone(),
        }
    }

    /// A new table of the same shape with every column replaced.
    pub(crate) fn map_columns(&self, mut f: impl FnMut(&str, &[f64]) -> Vec<f64>) -> Self {
        Self {
            keys: self.keys.clone(),
            timestamps: self.timestamps.clone(),
            columns: self
                .columns
                .iter()
                .map(|(name, values)| (name.clone(), f(name, values)))
                .collect(),
            proc_history: self.proc_history.clone(),
        }
    }

    /// Outer join on key.
    ///
    /// Columns present in both tables take `other`'s value wherever `other`
    /// has the row (the later computation wins); timestamps likewise. The
    /// history is `self`'s followed by the steps of `other` past their
    /// common prefix.
    #[must_use]
    pub fn join(&self, other: &Self) -> Self {
        let mut rows: BTreeMap<K, (f64, IndexMap<&str, f64>)> = BTreeMap::new();
        for (src, table) in [self, other].into_iter().enumerate() {
            for (i, key) in table.keys.iter().enumerate() {
                let entry = rows
                    .entry(key.clone())
                    .or_insert_with(|| (table.timestamps[i], IndexMap::new()));
                if src == 1 {
                    entry.0 = table.timestamps[i];
                }
                for (name, values) in &table.columns {
                    entry.1.insert(name.as_str(), values[i]);
                }
            }
        }

        let mut names: Vec<String> = self.columns.keys().cloned().collect();
        for name in other.columns.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }

        let mut builder = FeatureTableBuilder::new(names.clone());
        for (key, (ts, values)) in rows {
            let row: Vec<f64> = names
                .iter()
                .map(|n| values.get(n.as_str()).copied().unwrap_or(f64::NAN))
                .collect();
            builder.push(key, ts, &row);
        }
        let mut joined = builder.finish();
        joined.proc_history = self.proc_history.clone();
        let shared = self
            .proc_history
            .iter()
            .zip(&other.proc_history)
            .take_while(|(a, b)| a == b)
            .count();
        joined
            .proc_history
            .extend(other.proc_history[shared..].iter().cloned());
        joined
    }
}

/// Row-wise builder for [`FeatureTable`].
///
/// Rows may be pushed in any order; `finish` sorts them and keeps the last
/// row pushed for a duplicated key.
#[derive(Debug)]
pub struct FeatureTableBuilder<K> {
    names: Vec<String>,
    rows: BTreeMap<K, (f64, Vec<f64>)>,
}

impl<K: RowKey> FeatureTableBuilder<K> {
    #[must_use]
    pub fn new(names: Vec<String>) -> Self {
        Self {
            names,
            rows: BTreeMap::new(),
        }
    }

    /// Push a row. `values` must hold one value per column.
    pub fn push(&mut self, key: K, timestamp: f64, values: &[f64]) {
        debug_assert_eq!(values.len(), self.names.len());
        self.rows.insert(key, (timestamp, values.to_vec()));
    }

    #[must_use]
    pub fn finish(self) -> FeatureTable<K> {
        let n = self.rows.len();
        let mut keys = Vec::with_capacity(n);
        let mut timestamps = Vec::with_capacity(n);
        let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(n); self.names.len()];
        for (key, (ts, values)) in self.rows {
            keys.push(key);
            timestamps.push(ts);
            for (col, v) in columns.iter_mut().zip(values) {
                col.push(v);
            }
        }
        FeatureTable {
            keys,
            timestamps,
            columns: self.names.into_iter().zip(columns).collect(),
            proc_history: Vec::new(),
        }
    }
}

/// JSON encoding of floats that may be non-finite.
///
/// Finite values are plain numbers, `NaN` is `null` and the infinities are
/// the strings `"inf"` and `"-inf"`.
pub(crate) mod serde_nan {
    use std::fmt;

    use serde::de::{self, Visitor};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Debug, Clone, Copy)]
    pub(super) struct JsonFloat(pub f64);

    impl Serialize for JsonFloat {
        fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
            let v = self.0;
            if v.is_nan() {
                s.serialize_none()
            } else if v == f64::INFINITY {
                s.serialize_str("inf")
            } else if v == f64::NEG_INFINITY {
                s.serialize_str("-inf")
            } else {
                s.serialize_f64(v)
            }
        }
    }

    struct JsonFloatVisitor;

    impl<'de> Visitor<'de> for JsonFloatVisitor {
        type Value = JsonFloat;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a number, null, \"inf\" or \"-inf\"")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<JsonFloat, E> {
            Ok(JsonFloat(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<JsonFloat, E> {
            Ok(JsonFloat(v as f64))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<JsonFloat, E> {
            Ok(JsonFloat(v as f64))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<JsonFloat, E> {
            match v {
                "inf" => Ok(JsonFloat(f64::INFINITY)),
                "-inf" => Ok(JsonFloat(f64::NEG_INFINITY)),
                "nan" => Ok(JsonFloat(f64::NAN)),
                other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
            }
        }

        fn visit_unit<E: de::Error>(self) -> Result<JsonFloat, E> {
            Ok(JsonFloat(f64::NAN))
        }

        fn visit_none<E: de::Error>(self) -> Result<JsonFloat, E> {
            Ok(JsonFloat(f64::NAN))
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<JsonFloat, D::Error> {
            d.deserialize_any(JsonFloatVisitor)
        }
    }

    impl<'de> Deserialize<'de> for JsonFloat {
        fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
            d.deserialize_any(JsonFloatVisitor)
        }
    }

    pub mod float {
        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        use super::JsonFloat;

        pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
            JsonFloat(*v).serialize(s)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
            Ok(JsonFloat::deserialize(d)?.0)
        }
    }

    pub mod floats {
        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        use super::JsonFloat;

        pub fn serialize<S: Serializer>(values: &[f64], s: S) -> Result<S::Ok, S::Error> {
            s.collect_seq(values.iter().map(|&v| JsonFloat(v)))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<f64>, D::Error> {
            let raw: Vec<JsonFloat> = Vec::deserialize(d)?;
            Ok(raw.into_iter().map(|v| v.0).collect())
        }
    }

    /// `None` is `null`; a present pair is a two-element array.
    pub mod position {
        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        use super::JsonFloat;

        pub fn serialize<S: Serializer>(p: &Option<[f64; 2]>, s: S) -> Result<S::Ok, S::Error> {
            p.map(|[x, y]| [JsonFloat(x), JsonFloat(y)]).serialize(s)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<[f64; 2]>, D::Error> {
            let raw: Option<[JsonFloat; 2]> = Option::deserialize(d)?;
            Ok(raw.map(|[x, y]| [x.0, y.0]))
        }
    }

    pub mod columns {
        use indexmap::IndexMap;
        use serde::ser::SerializeMap;
        use serde::{Deserialize, Deserializer, Serializer};

        use super::JsonFloat;

        pub fn serialize<S: Serializer>(
            cols: &IndexMap<String, Vec<f64>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            let mut map = s.serialize_map(Some(cols.len()))?;
            for (name, values) in cols {
                let encoded: Vec<JsonFloat> = values.iter().map(|&v| JsonFloat(v)).collect();
                map.serialize_entry(name, &encoded)?;
            }
            map.end()
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<IndexMap<String, Vec<f64>>, D::Error> {
            let raw: IndexMap<String, Vec<JsonFloat>> = IndexMap::deserialize(d)?;
            Ok(raw
                .into_iter()
                .map(|(k, v)| (k, v.into_iter().map(|x| x.0).collect()))
                .collect())
        }
    }

    pub mod scalars {
        use indexmap::IndexMap;
        use serde::ser::SerializeMap;
        use serde::{Deserialize, Deserializer, Serializer};

        use super::JsonFloat;

        pub fn serialize<S: Serializer>(
            values: &IndexMap<String, f64>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            let mut map = s.serialize_map(Some(values.len()))?;
            for (name, &v) in values {
                map.serialize_entry(name, &JsonFloat(v))?;
            }
            map.end()
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<IndexMap<String, f64>, D::Error> {
            let raw: IndexMap<String, JsonFloat> = IndexMap::deserialize(d)?;
            Ok(raw.into_iter().map(|(k, v)| (k, v.0)).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> TrackTable {
        let rows = (0..3).flat_map(|f| {
            (0..2).map(move |kp| {
                (
                    TrackKey::new(f, "1", kp),
                    TrackPoint::new(f as f64, kp as f64, f as f64 * 100.0).with_extra("conf", 0.9),
                )
            })
        });
        TrackTable::from_rows(rows, TrackAttrs::default())
    }

    #[test]
    fn test_sentinel_becomes_undetected() {
        let p = TrackPoint::from_raw(0.0, 0.0, 10.0, [0.0, 0.0]);
        assert!(p.position.is_none());
        assert!(p.x().is_nan());

        let roi = TrackPoint::from_raw(50.0, 20.0, 10.0, [50.0, 20.0]);
        assert!(roi.position.is_none());

        // origin is a valid position once an ROI offset is in effect
        let origin = TrackPoint::from_raw(0.0, 0.0, 10.0, [50.0, 20.0]);
        assert_eq!(origin.position, Some([0.0, 0.0]));
    }

    #[test]
    fn test_insert_keeps_last() {
        let mut table = sample_table();
        let key = TrackKey::new(1, "1", 0);
        let old = table.insert(key.clone(), TrackPoint::new(9.0, 9.0, 100.0));
        assert!(old.is_some());
        assert_eq!(table.get(&key).map(TrackPoint::x), Some(9.0));
        assert_eq!(table.len(), 6);

        let dup = TrackTable::from_rows(
            vec![
                (key.clone(), TrackPoint::new(1.0, 1.0, 0.0)),
                (key.clone(), TrackPoint::new(2.0, 2.0, 0.0)),
            ],
            TrackAttrs::default(),
        );
        assert_eq!(dup.len(), 1);
        assert_eq!(dup.get(&key).map(TrackPoint::x), Some(2.0));
    }

    #[test]
    fn test_member_frames() {
        let table = sample_table();
        let mfs = table.member_frames();
        assert_eq!(mfs.len(), 3);
        assert_eq!(mfs[2], MemberFrame::new(2, "1"));
    }

    #[test]
    fn test_validate_timestamps() {
        let mut table = sample_table();
        assert!(table.validate_timestamps().is_ok());
        table.insert(TrackKey::new(2, "1", 0), TrackPoint::new(0.0, 0.0, 50.0));
        assert!(table.validate_timestamps().is_err());
    }

    #[test]
    fn test_validate_timestamps_per_member() {
        // kp1 of frame 1 is earlier than kp0 of frame 0 within member 1
        let rows = vec![
            (TrackKey::new(0, "1", 0), TrackPoint::new(0.0, 0.0, 100.0)),
            (TrackKey::new(1, "1", 1), TrackPoint::new(0.0, 0.0, 90.0)),
        ];
        assert!(TrackTable::from_rows(rows, TrackAttrs::default())
            .validate_timestamps()
            .is_err());

        // members are independent and keypoints of one frame may differ
        let rows = vec![
            (TrackKey::new(0, "1", 0), TrackPoint::new(0.0, 0.0, 100.0)),
            (TrackKey::new(0, "1", 1), TrackPoint::new(0.0, 0.0, 104.0)),
            (TrackKey::new(0, "2", 0), TrackPoint::new(0.0, 0.0, 500.0)),
            (TrackKey::new(1, "1", 0), TrackPoint::new(0.0, 0.0, 120.0)),
            (TrackKey::new(1, "2", 0), TrackPoint::new(0.0, 0.0, 516.0)),
        ];
        assert!(TrackTable::from_rows(rows, TrackAttrs::default())
            .validate_timestamps()
            .is_ok());
    }

    #[test]
    fn test_feature_table_round_trip() {
        let mut table = sample_table();
        table.insert(TrackKey::new(1, "1", 1), TrackPoint::undetected(100.0));
        let features = table.to_feature_table();
        assert_eq!(features.column_names().collect::<Vec<_>>(), vec!["x", "y", "conf"]);
        assert!(features.column("x").unwrap()[3].is_nan());

        let back = TrackTable::from_feature_table(&features, TrackAttrs::default()).unwrap();
        assert_eq!(back.len(), table.len());
        assert!(back.get(&TrackKey::new(1, "1", 1)).unwrap().position.is_none());
        assert_eq!(back.get(&TrackKey::new(2, "1", 1)).unwrap().extras["conf"], 0.9);
    }

    #[test]
    fn test_builder_sorts_and_dedups() {
        let mut builder = FeatureTableBuilder::new(vec!["a".to_owned()]);
        builder.push(MemberFrame::new(2, "1"), 20.0, &[2.0]);
        builder.push(MemberFrame::new(1, "1"), 10.0, &[1.0]);
        builder.push(MemberFrame::new(2, "1"), 20.0, &[3.0]);
        let table = builder.finish();
        assert_eq!(table.len(), 2);
        assert_eq!(table.column("a").unwrap(), &[1.0, 3.0]);
    }

    #[test]
    fn test_join_keeps_last() {
        let mut a = FeatureTableBuilder::new(vec!["v".to_owned(), "only_a".to_owned()]);
        a.push(MemberFrame::new(0, "1"), 0.0, &[1.0, 5.0]);
        a.push(MemberFrame::new(1, "1"), 10.0, &[1.0, 6.0]);
        let mut b = FeatureTableBuilder::new(vec!["v".to_owned()]);
        b.push(MemberFrame::new(1, "1"), 10.0, &[2.0]);
        b.push(MemberFrame::new(2, "1"), 20.0, &[2.0]);

        let joined = a.finish().join(&b.finish());
        assert_eq!(joined.len(), 3);
        assert_eq!(joined.column("v").unwrap(), &[1.0, 2.0, 2.0]);
        let only_a = joined.column("only_a").unwrap();
        assert_eq!(only_a[0], 5.0);
        assert!(only_a[2].is_nan());
    }

    #[test]
    fn test_join_history_keeps_shared_steps_once() {
        let calc = ProcStep::new("calc", Vec::new(), serde_json::json!({ "calc_type": "sin_cos" }));
        let mix = ProcStep::new("mix", vec!["sin(0-1,0-2)".to_owned()], serde_json::Value::Null);

        let mut builder = FeatureTableBuilder::new(vec!["sin(0-1,0-2)".to_owned()]);
        builder.push(MemberFrame::new(0, "1"), 0.0, &[0.5]);
        let mut base = builder.finish();
        base.push_history(calc.clone());

        let mut derived = base.empty_like();
        derived.insert_column("mixed", vec![1.0]).unwrap();
        derived.push_history(mix.clone());

        let kinds = |t: &FeatureTable<MemberFrame>| {
            t.proc_history.iter().map(|p| p.kind.clone()).collect::<Vec<_>>()
        };
        assert_eq!(kinds(&base.join(&derived)), vec!["calc", "mix"]);
        assert_eq!(kinds(&base.join(&base)), vec!["calc"]);

        // unrelated histories are concatenated
        let mut other = base.empty_like();
        other.proc_history = vec![mix];
        assert_eq!(kinds(&base.join(&other)), vec!["calc", "mix"]);
    }

    #[test]
    fn test_non_finite_values_survive_json() {
        let mut builder = FeatureTableBuilder::new(vec!["ratio".to_owned()]);
        builder.push(MemberFrame::new(0, "1"), 0.0, &[f64::INFINITY]);
        builder.push(MemberFrame::new(1, "1"), f64::NAN, &[f64::NEG_INFINITY]);
        builder.push(MemberFrame::new(2, "1"), 32.0, &[f64::NAN]);
        builder.push(MemberFrame::new(3, "1"), 48.0, &[0.1 + 0.2]);
        let table = builder.finish();

        let json = serde_json::to_string(&table).unwrap();
        assert!(json.contains("\"inf\"") && json.contains("\"-inf\""));
        let back: FeatureTable<MemberFrame> = serde_json::from_str(&json).unwrap();
        let v = back.column("ratio").unwrap();
        assert_eq!(v[0], f64::INFINITY);
        assert_eq!(v[1], f64::NEG_INFINITY);
        assert!(v[2].is_nan());
        assert_eq!(v[3], 0.1 + 0.2);
        assert!(back.timestamps()[1].is_nan());
    }

    #[test]
    fn test_nan_timestamp_track_reloads() {
        let table = TrackTable::from_rows(
            vec![
                (TrackKey::new(0, "1", 0), TrackPoint::new(1.0, f64::INFINITY, f64::NAN)),
                (
                    TrackKey::new(1, "1", 0),
                    TrackPoint::undetected(16.0).with_extra("conf", f64::NAN),
                ),
            ],
            TrackAttrs::default(),
        );
        let json = serde_json::to_string(&table).unwrap();
        let back: TrackTable = serde_json::from_str(&json).unwrap();

        let first = back.get(&TrackKey::new(0, "1", 0)).unwrap();
        assert!(first.timestamp.is_nan());
        assert_eq!(first.position, Some([1.0, f64::INFINITY]));
        let second = back.get(&TrackKey::new(1, "1", 0)).unwrap();
        assert_eq!(second.position, None);
        assert!(second.extras["conf"].is_nan());
    }

    #[test]
    fn test_unknown_float_tag_is_rejected() {
        let json = concat!(
            r#"{"keys":[{"frame":0,"member":"1"}],"timestamps":[0.0],"#,
            r#""columns":{"a":["big"]}}"#,
        );
        assert!(serde_json::from_str::<FeatureTable<MemberFrame>>(json).is_err());
    }

    #[test]
    fn test_missing_column_is_error() {
        let table = sample_table().to_feature_table();
        assert!(matches!(
            table.column("speed"),
            Err(EngineError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_group_indices() {
        let table = sample_table().to_feature_table();
        let groups = table.group_indices();
        assert_eq!(groups.len(), 2);
        let kp0 = &groups[&(MemberId::from("1"), 0)];
        let frames: Vec<Frame> = kp0.iter().map(|&i| table.keys()[i].frame).collect();
        assert_eq!(frames, vec![0, 1, 2]);
    }
}
