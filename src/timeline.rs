//! Time and frame index utilities.
//!
//! Both [`TrackTable`] and [`FeatureTable`] implement [`Timeline`], so the
//! same time-range, scene and thinning filters apply before and after
//! feature derivation.

use std::collections::BTreeSet;

use crate::record::ProcStep;
use crate::scene::Scene;
use crate::table::{FeatureTable, Frame, RowKey, TrackTable};

/// Row-level access to the frame and timestamp of a table.
pub trait Timeline: Sized {
    /// Number of rows.
    fn row_count(&self) -> usize;

    /// Sorted unique frames present in the table.
    fn unique_frames(&self) -> BTreeSet<Frame>;

    /// `(frame, timestamp)` of each row, in row order.
    fn row_timestamps(&self) -> Vec<(Frame, f64)>;

    /// A new table holding the rows for which `pred(frame, timestamp)` holds.
    #[must_use]
    fn retain_rows(&self, pred: impl FnMut(Frame, f64) -> bool) -> Self;

    /// Append a processing step to the table's history.
    fn record_step(&mut self, step: ProcStep);
}

impl Timeline for TrackTable {
    fn row_count(&self) -> usize {
        self.len()
    }

    fn unique_frames(&self) -> BTreeSet<Frame> {
        self.iter().map(|(k, _)| k.frame).collect()
    }

    fn row_timestamps(&self) -> Vec<(Frame, f64)> {
        self.iter().map(|(k, p)| (k.frame, p.timestamp)).collect()
    }

    fn retain_rows(&self, mut pred: impl FnMut(Frame, f64) -> bool) -> Self {
        self.filtered(|k, p| pred(k.frame, p.timestamp))
    }

    fn record_step(&mut self, step: ProcStep) {
        self.attrs.proc_history.push(step);
    }
}

impl<K: RowKey> Timeline for FeatureTable<K> {
    fn row_count(&self) -> usize {
        self.len()
    }

    fn unique_frames(&self) -> BTreeSet<Frame> {
        self.keys().iter().map(RowKey::frame).collect()
    }

    fn row_timestamps(&self) -> Vec<(Frame, f64)> {
        self.keys()
            .iter()
            .zip(self.timestamps())
            .map(|(k, &ts)| (k.frame(), ts))
            .collect()
    }

    fn retain_rows(&self, mut pred: impl FnMut(Frame, f64) -> bool) -> Self {
        let indices: Vec<usize> = self
            .row_timestamps()
            .into_iter()
            .enumerate()
            .filter(|&(_, (frame, ts))| pred(frame, ts))
            .map(|(i, _)| i)
            .collect();
        self.select_rows(&indices)
    }

    fn record_step(&mut self, step: ProcStep) {
        self.push_history(step);
    }
}

/// Keep rows whose timestamp lies in `[start_ms - tolerance, end_ms + tolerance]`.
///
/// Reversed bounds are not swapped; both they and an empty result are
/// logged as warnings and the (possibly empty) table is returned.
#[must_use]
pub fn filter_by_timerange<T: Timeline>(
    table: &T,
    start_ms: f64,
    end_ms: f64,
    tolerance_ms: f64,
) -> T {
    if start_ms > end_ms {
        log::warn!("time range start {start_ms} ms is after end {end_ms} ms");
    }
    let lo = start_ms - tolerance_ms;
    let hi = end_ms + tolerance_ms;
    let out = table.retain_rows(|_, ts| ts >= lo && ts <= hi);
    if out.row_count() == 0 {
        log::warn!("no rows between {start_ms} ms and {end_ms} ms");
    }
    out
}

/// Keep rows inside a scene's interval.
#[must_use]
pub fn filter_by_scene<T: Timeline>(table: &T, scene: &Scene, tolerance_ms: f64) -> T {
    filter_by_timerange(table, scene.start, scene.end, tolerance_ms)
}

/// Keep every `n`-th distinct frame.
///
/// Frames are picked by position in the sorted set of frames present, so
/// gaps in coverage do not shift the sampling. `n <= 1` returns the table
/// unchanged.
#[must_use]
pub fn thinning<T: Timeline + Clone>(table: &T, n: usize) -> T {
    if n <= 1 {
        return table.clone();
    }
    let kept: BTreeSet<Frame> = table.unique_frames().into_iter().step_by(n).collect();
    let mut out = table.retain_rows(|frame, _| kept.contains(&frame));
    out.record_step(ProcStep::new("thinning", Vec::new(), serde_json::json!({ "n": n })));
    out
}
