//! Numeric kernels.
//!
//! This module provides:
//! - [`linalg`]: PCA and pairwise distances
//! - [`stats`]: NaN-aware descriptive statistics
//! - [`butterworth`]: IIR design and zero-phase filtering
//! - [`umap`]: nonlinear embedding

pub mod butterworth;
pub mod linalg;
pub mod stats;
pub mod umap;

pub use butterworth::{design, filtfilt, FilterKind, Sos};
pub use linalg::{compute_pca, euclidean, PcaResult};
pub use stats::{mean, quantile, sample_std};
pub use umap::find_ab_params;
