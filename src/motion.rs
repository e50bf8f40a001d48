//! Motion derivatives: speed, acceleration, total distance and smoothing.
//!
//! Differences use a fixed row lag within each `(member, keypoint)` series
//! ordered by frame, not wall-clock time, so `step` is measured in samples.

use crate::error::{EngineError, Result};
use crate::record::ProcStep;
use crate::table::{FeatureTable, KeypointId, MemberId, RowKey, TrackKey, TrackTable};

fn check_step(step: usize) -> Result<()> {
    if step == 0 {
        Err(EngineError::invalid_input("step must be at least 1"))
    } else {
        Ok(())
    }
}

/// Per-row displacement magnitude against the row `step` earlier in the
/// same series. The first `step` rows of each series are `NaN`.
fn lagged_displacement(table: &FeatureTable<TrackKey>, step: usize) -> Result<Vec<f64>> {
    let xs = table.column("x")?;
    let ys = table.column("y")?;
    let mut out = vec![f64::NAN; table.len()];
    for indices in table.group_indices().values() {
        for pair in indices.windows(step + 1) {
            let (j, i) = (pair[0], pair[step]);
            let (dx, dy) = (xs[i] - xs[j], ys[i] - ys[j]);
            out[i] = (dx * dx + dy * dy).sqrt();
        }
    }
    Ok(out)
}

/// Speed of every keypoint, column `speed`.
///
/// # Errors
///
/// Returns an error if `step` is zero.
pub fn speed(table: &TrackTable, step: usize) -> Result<FeatureTable<TrackKey>> {
    check_step(step)?;
    let features = table.to_feature_table();
    let values: Vec<f64> = lagged_displacement(&features, step)?
        .into_iter()
        .map(|d| d / step as f64)
        .collect();

    let mut out = features.empty_like();
    out.insert_column("speed", values)?;
    out.push_history(ProcStep::new(
        "speed",
        vec!["x".to_owned(), "y".to_owned()],
        serde_json::json!({ "step": step }),
    ));
    Ok(out)
}

/// Acceleration from a speed table, column `acceleration`.
///
/// The same lag is applied to `speed` and the difference divided by `step`.
///
/// # Errors
///
/// Returns an error if `step` is zero or the table has no `speed` column.
pub fn acceleration<K: RowKey>(
    speed_table: &FeatureTable<K>,
    step: usize,
) -> Result<FeatureTable<K>> {
    check_step(step)?;
    let speed = speed_table.column("speed")?;
    let mut values = vec![f64::NAN; speed_table.len()];
    for indices in speed_table.group_indices().values() {
        for pair in indices.windows(step + 1) {
            let (j, i) = (pair[0], pair[step]);
            values[i] = (speed[i] - speed[j]) / step as f64;
        }
    }

    let mut out = speed_table.empty_like();
    out.insert_column("acceleration", values)?;
    out.push_history(ProcStep::new(
        "acceleration",
        vec!["speed".to_owned()],
        serde_json::json!({ "step": step }),
    ));
    Ok(out)
}

/// Distance travelled by one keypoint of one member.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceSummary {
    pub member: MemberId,
    pub keypoint: KeypointId,
    /// Sum of finite step magnitudes, or that sum divided by `samples`.
    pub distance: f64,
    /// Number of finite step magnitudes.
    pub samples: usize,
}

/// Total distance per `(member, keypoint)`.
///
/// With `per_plot` the total is divided by the number of finite samples
/// (`NaN` when there are none).
///
/// # Errors
///
/// Returns an error if `step` is zero.
pub fn total_distance(
    table: &TrackTable,
    step: usize,
    per_plot: bool,
) -> Result<Vec<DistanceSummary>> {
    check_step(step)?;
    let features = table.to_feature_table();
    let steps = lagged_displacement(&features, step)?;

    Ok(features
        .group_indices()
        .into_iter()
        .map(|((member, keypoint), indices)| {
            let finite: Vec<f64> =
                indices.iter().map(|&i| steps[i]).filter(|d| d.is_finite()).collect();
            let total: f64 = finite.iter().sum();
            let distance = if per_plot {
                if finite.is_empty() {
                    f64::NAN
                } else {
                    total / finite.len() as f64
                }
            } else {
                total
            };
            DistanceSummary {
                member,
                keypoint,
                distance,
                samples: finite.len(),
            }
        })
        .collect())
}

/// Centered rolling mean of a series with full windows only.
///
/// The window at position `i` ends at `i + (w - 1) / 2`; windows running
/// off either end or holding a `NaN` give `NaN`.
fn centered_mean(series: &[f64], window: usize) -> Vec<f64> {
    let n = series.len();
    let offset = (window - 1) / 2;
    (0..n)
        .map(|i| {
            let end = i + offset;
            if end >= n || end + 1 < window {
                return f64::NAN;
            }
            let slice = &series[end + 1 - window..=end];
            if slice.iter().any(|v| v.is_nan()) {
                f64::NAN
            } else {
                slice.iter().sum::<f64>() / window as f64
            }
        })
        .collect()
}

/// Centered moving average of every column, per [`RowKey::group`] series.
///
/// Timestamps are carried through unchanged.
///
/// # Errors
///
/// Returns an error if `window` is zero.
pub fn moving_average<K: RowKey>(
    table: &FeatureTable<K>,
    window: usize,
) -> Result<FeatureTable<K>> {
    if window == 0 {
        return Err(EngineError::invalid_input("window must be at least 1"));
    }
    let groups = table.group_indices();
    let mut out = table.map_columns(|_, values| {
        let mut smoothed = vec![f64::NAN; values.len()];
        for indices in groups.values() {
            let series: Vec<f64> = indices.iter().map(|&i| values[i]).collect();
            for (&i, v) in indices.iter().zip(centered_mean(&series, window)) {
                smoothed[i] = v;
            }
        }
        smoothed
    });
    out.push_history(ProcStep::new(
        "moving_average",
        table.column_names().map(str::to_owned).collect(),
        serde_json::json!({ "window": window }),
    ));
    Ok(out)
}

/// Smooth the coordinates and extras of a track table.
///
/// Positions whose window is incomplete become undetected.
///
/// # Errors
///
/// Returns an error if `window` is zero.
pub fn smooth_track(table: &TrackTable, window: usize) -> Result<TrackTable> {
    let smoothed = moving_average(&table.to_feature_table(), window)?;
    TrackTable::from_feature_table(&smoothed, table.attrs.clone())
}
