//! Uniform Manifold Approximation and Projection.
//!
//! A compact UMAP for the few thousand frames of a motion clip:
//!
//! 1. exact k-nearest-neighbour graph (parallel unless seeded)
//! 2. smooth-kNN bandwidths and fuzzy membership strengths
//! 3. fuzzy union symmetrization `a + b - a*b`
//! 4. PCA initialization scaled to `[-10, 10]`
//! 5. SGD over edges with negative sampling and a linearly decaying rate
//!
//! With a fixed seed everything runs on one thread and the output is
//! reproducible bit for bit.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::config::UmapConfig;
use crate::error::{EngineError, Result};
use crate::math::linalg::{compute_pca, rows_to_matrix, squared_distance};
use crate::reduction::CancelToken;

const SMOOTH_K_TOLERANCE: f64 = 1e-5;
const MIN_K_DIST_SCALE: f64 = 1e-3;
const BANDWIDTH_ITERATIONS: usize = 64;
const GRADIENT_CLIP: f64 = 4.0;
const INIT_SCALE: f64 = 10.0;

/// Fitted curve `1 / (1 + a * d^(2b))` for the low-dimensional similarity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurveParams {
    pub a: f64,
    pub b: f64,
}

/// Fit `a` and `b` so the embedding similarity curve matches an offset
/// exponential with the given `spread` and `min_dist`.
///
/// Levenberg-Marquardt on 300 samples of `[0, 3 * spread]`.
#[must_use]
pub fn find_ab_params(spread: f64, min_dist: f64) -> CurveParams {
    let xs: Vec<f64> = (0..300).map(|i| 3.0 * spread * i as f64 / 299.0).collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| if x < min_dist { 1.0 } else { (-(x - min_dist) / spread).exp() })
        .collect();

    let residuals = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| (1.0 / (1.0 + a * x.powf(2.0 * b)) - y).powi(2))
            .sum()
    };

    let (mut a, mut b) = (1.0, 1.0);
    let mut lambda = 1e-3;
    let mut cost = residuals(a, b);
    for _ in 0..500 {
        // Normal equations of the 2-parameter least squares problem
        let (mut jtj, mut jtr) = ([[0.0f64; 2]; 2], [0.0f64; 2]);
        for (&x, &y) in xs.iter().zip(&ys) {
            if x <= 0.0 {
                continue;
            }
            let p = x.powf(2.0 * b);
            let denom = 1.0 + a * p;
            let f = 1.0 / denom;
            let r = f - y;
            let da = -p / (denom * denom);
            let db = -a * p * 2.0 * x.ln() / (denom * denom);
            jtj[0][0] += da * da;
            jtj[0][1] += da * db;
            jtj[1][1] += db * db;
            jtr[0] += da * r;
            jtr[1] += db * r;
        }
        jtj[1][0] = jtj[0][1];

        let m00 = jtj[0][0] * (1.0 + lambda);
        let m11 = jtj[1][1] * (1.0 + lambda);
        let det = m00 * m11 - jtj[0][1] * jtj[1][0];
        if det.abs() < f64::MIN_POSITIVE {
            break;
        }
        let step_a = (m11 * jtr[0] - jtj[0][1] * jtr[1]) / det;
        let step_b = (m00 * jtr[1] - jtj[1][0] * jtr[0]) / det;
        let (na, nb) = (a - step_a, b - step_b);
        let new_cost = if na > 0.0 && nb > 0.0 { residuals(na, nb) } else { f64::INFINITY };

        if new_cost < cost {
            let converged = (cost - new_cost) < 1e-14;
            a = na;
            b = nb;
            cost = new_cost;
            lambda *= 0.3;
            if converged {
                break;
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e12 {
                break;
            }
        }
    }

    if a.is_finite() && b.is_finite() {
        CurveParams { a, b }
    } else {
        // umap-learn's values for spread 1, min_dist 0.1
        CurveParams { a: 1.577, b: 0.895 }
    }
}

/// Exact k nearest neighbours of every point (self excluded), ascending.
fn knn(points: &[Vec<f64>], k: usize, parallel: bool) -> Vec<Vec<(usize, f64)>> {
    let neighbours = |i: usize| -> Vec<(usize, f64)> {
        let mut dists: Vec<(usize, f64)> = points
            .iter()
            .enumerate()
            .filter(|&(j, _)| j != i)
            .map(|(j, p)| (j, squared_distance(&points[i], p).sqrt()))
            .collect();
        dists.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        dists.truncate(k);
        dists
    };
    if parallel {
        (0..points.len()).into_par_iter().map(neighbours).collect()
    } else {
        (0..points.len()).map(neighbours).collect()
    }
}

/// Per-point distance to the nearest neighbour (`rho`) and bandwidth
/// (`sigma`) such that the memberships sum to `log2(n_neighbors)`.
fn smooth_knn_dist(graph: &[Vec<(usize, f64)>], n_neighbors: usize) -> Vec<(f64, f64)> {
    let target = (n_neighbors as f64).log2();
    let mean_all = {
        let all: Vec<f64> = graph.iter().flatten().map(|&(_, d)| d).collect();
        all.iter().sum::<f64>() / all.len().max(1) as f64
    };

    graph
        .iter()
        .map(|row| {
            let rho = row.iter().map(|&(_, d)| d).find(|&d| d > 0.0).unwrap_or(0.0);
            let (mut lo, mut hi, mut mid) = (0.0, f64::INFINITY, 1.0);
            for _ in 0..BANDWIDTH_ITERATIONS {
                let psum: f64 = row
                    .iter()
                    .map(|&(_, d)| {
                        let r = d - rho;
                        if r > 0.0 { (-r / mid).exp() } else { 1.0 }
                    })
                    .sum();
                if (psum - target).abs() < SMOOTH_K_TOLERANCE {
                    break;
                }
                if psum > target {
                    hi = mid;
                    mid = (lo + hi) / 2.0;
                } else {
                    lo = mid;
                    mid = if hi.is_infinite() { mid * 2.0 } else { (lo + hi) / 2.0 };
                }
            }

            let mean_row = row.iter().map(|&(_, d)| d).sum::<f64>() / row.len().max(1) as f64;
            let floor = if rho > 0.0 {
                MIN_K_DIST_SCALE * mean_row
            } else {
                MIN_K_DIST_SCALE * mean_all
            };
            (rho, mid.max(floor))
        })
        .collect()
}

/// Symmetric fuzzy graph as a directed edge list `(head, tail, weight)`.
fn fuzzy_graph(graph: &[Vec<(usize, f64)>], bandwidths: &[(f64, f64)]) -> Vec<(usize, usize, f64)> {
    let mut directed: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for (i, row) in graph.iter().enumerate() {
        let (rho, sigma) = bandwidths[i];
        for &(j, d) in row {
            let w = if d - rho <= 0.0 { 1.0 } else { (-(d - rho) / sigma).exp() };
            directed.insert((i, j), w);
        }
    }

    let mut undirected: BTreeMap<(usize, usize), f64> = BTreeMap::new();
    for &(i, j) in directed.keys() {
        let key = (i.min(j), i.max(j));
        if undirected.contains_key(&key) {
            continue;
        }
        let a = directed.get(&(key.0, key.1)).copied().unwrap_or(0.0);
        let b = directed.get(&(key.1, key.0)).copied().unwrap_or(0.0);
        undirected.insert(key, a + b - a * b);
    }

    undirected
        .into_iter()
        .flat_map(|((i, j), w)| [(i, j, w), (j, i, w)])
        .collect()
}

/// Initial layout: leading principal components scaled to `[-10, 10]`,
/// padded with uniform noise when the input has fewer features than
/// requested components.
fn initialize(points: &[Vec<f64>], n_components: usize, rng: &mut StdRng) -> Result<Vec<f64>> {
    let n = points.len();
    let data = rows_to_matrix(points)?;
    let n_pca = n_components.min(data.ncols());
    let projected = compute_pca(&data, n_pca)?.project(&data);

    let mut layout = vec![0.0; n * n_components];
    for c in 0..n_components {
        if c < n_pca {
            let col = projected.column(c);
            let max = col.iter().fold(0.0f64, |m, v| m.max(v.abs()));
            let scale = if max > 0.0 { INIT_SCALE / max } else { 0.0 };
            for i in 0..n {
                layout[i * n_components + c] = col[i] * scale + rng.random_range(-1e-4..1e-4);
            }
        } else {
            for i in 0..n {
                layout[i * n_components + c] = rng.random_range(-INIT_SCALE..INIT_SCALE);
            }
        }
    }
    Ok(layout)
}

fn clip(v: f64) -> f64 {
    v.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}

/// Fit a UMAP embedding of row points.
///
/// # Returns
///
/// Flat row-major layout, `n_components` values per input point.
///
/// # Errors
///
/// Returns an error for fewer than `n_components + 2` points, ragged rows,
/// an invalid configuration, or when `cancel` fires between epochs.
pub fn fit(points: &[Vec<f64>], config: &UmapConfig, cancel: &CancelToken) -> Result<Vec<f64>> {
    config.validate()?;
    let n = points.len();
    let dim = config.n_components;
    if n < dim + 2 {
        return Err(EngineError::too_few_rows(dim + 2, n));
    }

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let k = config.n_neighbors.saturating_sub(1).clamp(1, n - 1);
    let graph = knn(points, k, config.seed.is_none());
    let bandwidths = smooth_knn_dist(&graph, config.n_neighbors.min(n));
    let n_epochs = config.epochs_for(n);

    let all_edges = fuzzy_graph(&graph, &bandwidths);
    let max_w = all_edges.iter().fold(0.0f64, |m, e| m.max(e.2));
    let edges: Vec<(usize, usize, f64)> = all_edges
        .into_iter()
        .filter(|e| e.2 >= max_w / n_epochs as f64)
        .collect();
    log::debug!("umap: {n} points, {} edges, {n_epochs} epochs", edges.len());

    let CurveParams { a, b } = find_ab_params(config.spread, config.min_dist);
    let mut layout = initialize(points, dim, &mut rng)?;

    let epochs_per_sample: Vec<f64> = edges.iter().map(|e| max_w / e.2).collect();
    let neg_rate = config.negative_sample_rate.max(1) as f64;
    let epochs_per_negative: Vec<f64> = epochs_per_sample.iter().map(|e| e / neg_rate).collect();
    let mut next_sample = epochs_per_sample.clone();
    let mut next_negative = epochs_per_negative.clone();

    let mut delta = vec![0.0; dim];
    for epoch in 0..n_epochs {
        cancel.check()?;
        let alpha = config.learning_rate * (1.0 - epoch as f64 / n_epochs as f64);
        let epoch_f = epoch as f64;

        for (e, &(head, tail, _)) in edges.iter().enumerate() {
            if next_sample[e] > epoch_f {
                continue;
            }

            // Attraction along the edge
            for (d, slot) in delta.iter_mut().enumerate() {
                *slot = layout[head * dim + d] - layout[tail * dim + d];
            }
            let dist_sq: f64 = delta.iter().map(|v| v * v).sum();
            let coeff = if dist_sq > 0.0 {
                -2.0 * a * b * dist_sq.powf(b - 1.0) / (a * dist_sq.powf(b) + 1.0)
            } else {
                0.0
            };
            for (d, &dv) in delta.iter().enumerate() {
                let grad = clip(coeff * dv) * alpha;
                layout[head * dim + d] += grad;
                layout[tail * dim + d] -= grad;
            }
            next_sample[e] += epochs_per_sample[e];

            // Repulsion from random points
            let n_neg = ((epoch_f - next_negative[e]) / epochs_per_negative[e]).max(0.0) as usize;
            for _ in 0..n_neg {
                let other = rng.random_range(0..n);
                if other == head {
                    continue;
                }
                for (d, slot) in delta.iter_mut().enumerate() {
                    *slot = layout[head * dim + d] - layout[other * dim + d];
                }
                let dist_sq: f64 = delta.iter().map(|v| v * v).sum();
                let coeff = if dist_sq > 0.0 {
                    2.0 * b / ((0.001 + dist_sq) * (a * dist_sq.powf(b) + 1.0))
                } else {
                    0.0
                };
                for (d, &dv) in delta.iter().enumerate() {
                    let grad = if coeff > 0.0 { clip(coeff * dv) } else { GRADIENT_CLIP };
                    layout[head * dim + d] += grad * alpha;
                }
            }
            next_negative[e] += n_neg as f64 * epochs_per_negative[e];
        }
    }

    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_clusters(n: usize) -> Vec<Vec<f64>> {
        (0..n)
            .map(|i| {
                let offset = if i % 2 == 0 { 0.0 } else { 50.0 };
                let jitter = (i as f64 * 0.37).sin();
                vec![offset + jitter, offset - jitter, offset + 0.5 * jitter]
            })
            .collect()
    }

    #[test]
    fn test_find_ab_params_default() {
        let params = find_ab_params(1.0, 0.1);
        assert!((params.a - 1.577).abs() < 0.1, "a = {}", params.a);
        assert!((params.b - 0.895).abs() < 0.05, "b = {}", params.b);
    }

    #[test]
    fn test_fuzzy_graph_symmetric() {
        let points = two_clusters(20);
        let graph = knn(&points, 4, false);
        let bw = smooth_knn_dist(&graph, 5);
        let edges = fuzzy_graph(&graph, &bw);
        let lookup: BTreeMap<(usize, usize), f64> =
            edges.iter().map(|&(i, j, w)| ((i, j), w)).collect();
        for (&(i, j), &w) in &lookup {
            assert_eq!(lookup.get(&(j, i)), Some(&w));
            assert!(w > 0.0 && w <= 1.0);
        }
    }

    #[test]
    fn test_seeded_fit_is_reproducible() {
        let points = two_clusters(30);
        let config = UmapConfig {
            n_neighbors: 5,
            n_epochs: Some(50),
            seed: Some(3),
            ..UmapConfig::default()
        };
        let cancel = CancelToken::new();
        let first = fit(&points, &config, &cancel).unwrap();
        let second = fit(&points, &config, &cancel).unwrap();
        assert_eq!(first.len(), 60);
        assert_eq!(first, second);
        assert!(first.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_unseeded_fit() {
        let points = two_clusters(30);
        assert_eq!(knn(&points, 4, true), knn(&points, 4, false));

        let config = UmapConfig {
            n_neighbors: 5,
            n_epochs: Some(30),
            seed: None,
            ..UmapConfig::default()
        };
        let layout = fit(&points, &config, &CancelToken::new()).unwrap();
        assert_eq!(layout.len(), 60);
        assert!(layout.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_clusters_stay_apart() {
        let points = two_clusters(40);
        let config = UmapConfig {
            n_neighbors: 5,
            n_epochs: Some(100),
            seed: Some(11),
            ..UmapConfig::default()
        };
        let layout = fit(&points, &config, &CancelToken::new()).unwrap();
        let centroid = |parity: usize| -> [f64; 2] {
            let idx: Vec<usize> = (0..40).filter(|i| i % 2 == parity).collect();
            let sx: f64 = idx.iter().map(|&i| layout[i * 2]).sum();
            let sy: f64 = idx.iter().map(|&i| layout[i * 2 + 1]).sum();
            [sx / idx.len() as f64, sy / idx.len() as f64]
        };
        let (c0, c1) = (centroid(0), centroid(1));
        let gap = ((c0[0] - c1[0]).powi(2) + (c0[1] - c1[1]).powi(2)).sqrt();
        assert!(gap > 1.0, "cluster centroids too close: {gap}");
    }

    #[test]
    fn test_cancelled_fit() {
        let points = two_clusters(20);
        let cancel = CancelToken::new();
        cancel.cancel();
        let config = UmapConfig {
            n_neighbors: 5,
            seed: Some(1),
            ..UmapConfig::default()
        };
        assert!(matches!(fit(&points, &config, &cancel), Err(EngineError::Cancelled)));
    }

    #[test]
    fn test_too_few_points() {
        let points = vec![vec![0.0], vec![1.0], vec![2.0]];
        assert!(fit(&points, &UmapConfig::default(), &CancelToken::new()).is_err());
    }
}
