//! Dimensionality reduction and recurrence analysis.
//!
//! Multi-column feature series (speed + acceleration, a set of angles, ...)
//! are compressed to a single ordering dimension with [`pca`] or laid out
//! for cluster exploration with [`umap`]. [`recurrence`] turns an embedded
//! series into a pairwise-distance recurrence matrix.
//!
//! Long computations take a [`CancelToken`] and check it between units of
//! work, so a caller running them on a worker thread can abandon them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nalgebra::DMatrix;

use crate::config::UmapConfig;
use crate::error::{EngineError, Result};
use crate::math::linalg::{compute_pca, euclidean, rows_to_matrix};
use crate::math::umap;
use crate::record::ProcStep;
use crate::table::{FeatureTable, FeatureTableBuilder, RowKey};

/// Cooperative cancellation flag shared between a caller and a computation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// # Errors
    ///
    /// Returns [`EngineError::Cancelled`] once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Rows of `columns` with no missing value, with their row indices.
///
/// # Errors
///
/// Returns [`EngineError::ColumnNotFound`] if a column is missing.
pub fn embedding_points<K: RowKey>(
    table: &FeatureTable<K>,
    columns: &[&str],
) -> Result<(Vec<usize>, Vec<Vec<f64>>)> {
    let cols: Vec<&[f64]> = columns
        .iter()
        .map(|name| table.column(name))
        .collect::<Result<_>>()?;

    let mut indices = Vec::new();
    let mut points = Vec::new();
    for i in 0..table.len() {
        let point: Vec<f64> = cols.iter().map(|c| c[i]).collect();
        if point.iter().all(|v| v.is_finite()) {
            indices.push(i);
            points.push(point);
        }
    }
    let dropped = table.len() - indices.len();
    if dropped > 0 {
        log::debug!("dropped {dropped} incomplete rows before embedding");
    }
    Ok((indices, points))
}

fn embedded_table<K: RowKey>(
    table: &FeatureTable<K>,
    indices: &[usize],
    names: Vec<String>,
    values: &[f64],
) -> FeatureTable<K> {
    let width = names.len();
    let mut builder = FeatureTableBuilder::new(names);
    for (row, &i) in indices.iter().enumerate() {
        builder.push(
            table.keys()[i].clone(),
            table.timestamps()[i],
            &values[row * width..(row + 1) * width],
        );
    }
    let mut out = builder.finish();
    out.proc_history.clone_from(&table.proc_history);
    out
}

/// One-component PCA projection of `columns`.
///
/// Rows with a missing value in any of the columns are dropped. The result
/// has a single `pca` column.
///
/// # Errors
///
/// Returns an error if a column is missing or fewer than two complete rows
/// remain.
pub fn pca<K: RowKey>(table: &FeatureTable<K>, columns: &[&str]) -> Result<FeatureTable<K>> {
    let (indices, points) = embedding_points(table, columns)?;
    if points.len() < 2 {
        return Err(EngineError::too_few_rows(2, points.len()));
    }
    let data = rows_to_matrix(&points)?;
    let projected = compute_pca(&data, 1)?.project(&data);
    let values: Vec<f64> = projected.column(0).iter().copied().collect();

    let mut out = embedded_table(table, &indices, vec!["pca".to_owned()], &values);
    out.push_history(ProcStep::new(
        "pca",
        columns.iter().map(|c| (*c).to_owned()).collect(),
        serde_json::json!({ "n_components": 1 }),
    ));
    Ok(out)
}

/// UMAP embedding of `columns` into `umap_0 .. umap_{n-1}`.
///
/// Rows with a missing value are dropped before fitting. With
/// `config.seed` set the fit is serial and reproducible.
///
/// # Errors
///
/// Returns an error if a column is missing, too few complete rows remain,
/// the configuration is invalid or the computation is cancelled.
pub fn umap<K: RowKey>(
    table: &FeatureTable<K>,
    columns: &[&str],
    config: &UmapConfig,
    cancel: &CancelToken,
) -> Result<FeatureTable<K>> {
    let (indices, points) = embedding_points(table, columns)?;
    let layout = umap::fit(&points, config, cancel)?;

    let names = (0..config.n_components).map(|i| format!("umap_{i}")).collect();
    let mut out = embedded_table(table, &indices, names, &layout);
    out.push_history(ProcStep::new(
        "umap",
        columns.iter().map(|c| (*c).to_owned()).collect(),
        serde_json::to_value(config).unwrap_or(serde_json::Value::Null),
    ));
    Ok(out)
}

/// Recurrence matrix of an embedded series.
#[derive(Debug, Clone, PartialEq)]
pub enum RecurrenceMatrix {
    /// Raw pairwise distances.
    Distance(DMatrix<f64>),
    /// `1` where the distance exceeds the threshold, `0` elsewhere.
    Binary(DMatrix<u8>),
}

impl RecurrenceMatrix {
    /// Side length of the square matrix.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Self::Distance(m) => m.nrows(),
            Self::Binary(m) => m.nrows(),
        }
    }
}

/// Pairwise Euclidean recurrence matrix.
///
/// `threshold == 0` returns the continuous distance matrix; otherwise each
/// cell is `distance > threshold`. The threshold is in the units of the
/// embedding, not of the original coordinates.
///
/// # Errors
///
/// Returns an error if the points have different dimensions, the
/// threshold is negative, or the computation is cancelled.
pub fn recurrence(
    points: &[Vec<f64>],
    threshold: f64,
    cancel: &CancelToken,
) -> Result<RecurrenceMatrix> {
    if threshold < 0.0 || threshold.is_nan() {
        return Err(EngineError::invalid_input(format!(
            "recurrence threshold must be non-negative, got {threshold}"
        )));
    }
    let d = points.first().map_or(0, Vec::len);
    if let Some(bad) = points.iter().find(|p| p.len() != d) {
        return Err(EngineError::length_mismatch(d, bad.len()));
    }

    let n = points.len();
    let mut dist = DMatrix::zeros(n, n);
    for i in 0..n {
        cancel.check()?;
        for j in (i + 1)..n {
            let v = euclidean(&points[i], &points[j]);
            dist[(i, j)] = v;
            dist[(j, i)] = v;
        }
    }

    if threshold == 0.0 {
        Ok(RecurrenceMatrix::Distance(dist))
    } else {
        Ok(RecurrenceMatrix::Binary(dist.map(|v| u8::from(v > threshold))))
    }
}
