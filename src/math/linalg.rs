//! Linear algebra utilities.
//!
//! This module provides PCA with sign correction and pairwise distances
//! using nalgebra for eigendecomposition.

use nalgebra::{DMatrix, DVector, SymmetricEigen};

use crate::error::{EngineError, Result};

/// Result of PCA computation.
#[derive(Debug, Clone)]
pub struct PcaResult {
    /// Eigenvalues of the kept components, sorted in descending order.
    pub eigenvalues: Vec<f64>,

    /// Principal axes as columns (`n_features x n_components`).
    pub components: DMatrix<f64>,

    /// Per-feature mean removed before projection.
    pub mean: DVector<f64>,
}

impl PcaResult {
    /// Get the i-th principal axis.
    #[must_use]
    pub fn axis(&self, i: usize) -> Vec<f64> {
        self.components.column(i).iter().copied().collect()
    }

    /// Project samples (rows) onto the principal axes.
    #[must_use]
    pub fn project(&self, data: &DMatrix<f64>) -> DMatrix<f64> {
        let mut centered = data.clone();
        for mut row in centered.row_iter_mut() {
            row -= self.mean.transpose();
        }
        centered * &self.components
    }
}

/// Compute PCA of row samples.
///
/// # Arguments
///
/// * `data` - `n_samples x n_features` matrix
/// * `n_components` - Number of axes to keep (clamped to `n_features`)
///
/// # Returns
///
/// PCA result with components sorted by explained variance and signs
/// corrected so the largest loading of each axis is positive.
///
/// # Errors
///
/// Returns an error with fewer than two samples or if the
/// eigendecomposition does not converge.
pub fn compute_pca(data: &DMatrix<f64>, n_components: usize) -> Result<PcaResult> {
    let (n, d) = data.shape();
    if n < 2 {
        return Err(EngineError::too_few_rows(2, n));
    }
    if d == 0 {
        return Err(EngineError::invalid_input("PCA needs at least one feature"));
    }

    let mean = DVector::from_iterator(d, data.column_iter().map(|c| c.mean()));
    let mut centered = data.clone();
    for mut row in centered.row_iter_mut() {
        row -= mean.transpose();
    }

    // Sample covariance
    let cov = (centered.transpose() * &centered) / (n - 1) as f64;

    let eigen = SymmetricEigen::try_new(cov, f64::EPSILON, 10_000)
        .ok_or_else(|| EngineError::linalg("symmetric eigendecomposition did not converge"))?;

    // Collect eigenvalue-eigenvector pairs and sort descending
    let mut pairs: Vec<(f64, DVector<f64>)> = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .map(|(i, &v)| (v, eigen.eigenvectors.column(i).into_owned()))
        .collect();
    pairs.sort_by(|a, b| b.0.total_cmp(&a.0));

    let k = n_components.clamp(1, d);
    let eigenvalues = pairs.iter().take(k).map(|p| p.0).collect();
    let mut components = DMatrix::zeros(d, k);
    for (i, (_, v)) in pairs.iter().take(k).enumerate() {
        components.set_column(i, v);
    }

    let mut pca = PcaResult {
        eigenvalues,
        components,
        mean,
    };
    apply_sign_correction(&mut pca);
    Ok(pca)
}

/// Flip each axis so that its largest-magnitude loading is positive.
///
/// Eigenvectors are only defined up to sign; this makes the projection
/// deterministic across runs and inputs.
pub fn apply_sign_correction(pca: &mut PcaResult) {
    for mut axis in pca.components.column_iter_mut() {
        let max_idx = axis
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.abs().total_cmp(&b.abs()))
            .map_or(0, |(i, _)| i);
        if axis[max_idx] < 0.0 {
            axis.neg_mut();
        }
    }
}

/// Squared Euclidean distance between two points.
#[must_use]
#[inline]
pub fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Euclidean distance between two points.
#[must_use]
#[inline]
pub fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    squared_distance(a, b).sqrt()
}

/// Stack row points into an `n x d` matrix.
///
/// # Errors
///
/// Returns an error if the rows have different lengths.
pub fn rows_to_matrix(points: &[Vec<f64>]) -> Result<DMatrix<f64>> {
    let d = points.first().map_or(0, Vec::len);
    if let Some(bad) = points.iter().find(|p| p.len() != d) {
        return Err(EngineError::length_mismatch(d, bad.len()));
    }
    Ok(DMatrix::from_fn(points.len(), d, |i, j| points[i][j]))
}
