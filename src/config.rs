//! Configuration for keypoint motion processing.
//!
//! This module provides the [`EngineConfig`] struct which centralizes the
//! tunable constants of the engine (time-range tolerance, filter design,
//! embedding hyperparameters, recurrence threshold), along with presets.
//! The config is passed explicitly to the operations that need it; there is
//! no process-wide state.
//!
//! # Example
//!
//! ```
//! use keypoint_motion::EngineConfig;
//!
//! let config = EngineConfig::default();
//! assert_eq!(config.time_tolerance_ms, 1.0);
//!
//! let reproducible = EngineConfig::interactive().with_umap_seed(Some(7));
//! assert!(reproducible.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Configuration for the keypoint motion engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Tolerance (ms) added on both sides of a time-range filter so that
    /// boundary rows are not lost to floating rounding.
    pub time_tolerance_ms: f64,

    /// Butterworth filter design used by the `bandpass`/`highpass`/`lowpass`
    /// normalization codes.
    pub filter: FilterConfig,

    /// UMAP hyperparameters.
    pub umap: UmapConfig,

    /// Recurrence threshold in embedding-space units.
    /// `0.0` yields a continuous distance plot.
    pub recurrence_threshold: f64,
}

/// Butterworth filter design parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Sample rate of the series in Hz.
    pub sample_rate: f64,
    /// Filter order.
    pub order: usize,
    /// Lower cutoff (Hz): highpass cutoff and bandpass low edge.
    pub low_cut_hz: f64,
    /// Upper cutoff (Hz): lowpass cutoff and bandpass high edge.
    pub high_cut_hz: f64,
}

/// UMAP hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UmapConfig {
    /// Output dimensionality.
    pub n_components: usize,
    /// Size of the local neighbourhood.
    pub n_neighbors: usize,
    /// Minimum distance between embedded points.
    pub min_dist: f64,
    /// Spread of the embedded points.
    pub spread: f64,
    /// Optimization epochs. `None` picks 500 for small inputs, 200 otherwise.
    pub n_epochs: Option<usize>,
    /// Initial SGD learning rate.
    pub learning_rate: f64,
    /// Negative samples per positive edge sample.
    pub negative_sample_rate: usize,
    /// Fixed seed. When set the fit runs serially and is reproducible.
    pub seed: Option<u64>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            sample_rate: 60.0,
            order: 5,
            low_cut_hz: 0.2,
            high_cut_hz: 2.0,
        }
    }
}

impl Default for UmapConfig {
    fn default() -> Self {
        Self {
            n_components: 2,
            n_neighbors: 15,
            min_dist: 0.1,
            spread: 1.0,
            n_epochs: None,
            learning_rate: 1.0,
            negative_sample_rate: 5,
            seed: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            time_tolerance_ms: 1.0,
            filter: FilterConfig::default(),
            umap: UmapConfig::default(),
            recurrence_threshold: 0.0,
        }
    }
}

impl FilterConfig {
    /// Validate the filter design.
    ///
    /// # Errors
    ///
    /// Returns an error if the order is zero or the cutoffs are not
    /// `0 < low < high < nyquist`.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate <= 0.0 {
            return Err(EngineError::invalid_config("sample_rate must be positive"));
        }
        if self.order == 0 {
            return Err(EngineError::invalid_config("filter order must be at least 1"));
        }
        let nyquist = self.sample_rate / 2.0;
        if !(self.low_cut_hz > 0.0 && self.low_cut_hz < self.high_cut_hz) {
            return Err(EngineError::invalid_config(
                "cutoffs must satisfy 0 < low_cut_hz < high_cut_hz",
            ));
        }
        if self.high_cut_hz >= nyquist {
            return Err(EngineError::invalid_config(format!(
                "high_cut_hz {} must be below the Nyquist frequency {nyquist}",
                self.high_cut_hz
            )));
        }
        Ok(())
    }
}

impl UmapConfig {
    /// Validate the embedding hyperparameters.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.n_components == 0 {
            return Err(EngineError::invalid_config("n_components must be at least 1"));
        }
        if self.n_neighbors < 2 {
            return Err(EngineError::invalid_config("n_neighbors must be at least 2"));
        }
        if self.min_dist < 0.0 || self.min_dist > self.spread {
            return Err(EngineError::invalid_config(
                "min_dist must be in [0, spread]",
            ));
        }
        if self.learning_rate <= 0.0 {
            return Err(EngineError::invalid_config("learning_rate must be positive"));
        }
        if self.n_epochs == Some(0) {
            return Err(EngineError::invalid_config("n_epochs must be at least 1"));
        }
        Ok(())
    }

    /// Number of epochs to run for `n_samples` points.
    #[must_use]
    pub fn epochs_for(&self, n_samples: usize) -> usize {
        self.n_epochs
            .unwrap_or(if n_samples <= 10_000 { 500 } else { 200 })
    }
}

impl EngineConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any parameter is out of valid range.
    pub fn validate(&self) -> Result<()> {
        if self.time_tolerance_ms < 0.0 {
            return Err(EngineError::invalid_config(
                "time_tolerance_ms must be non-negative",
            ));
        }
        if self.recurrence_threshold < 0.0 {
            return Err(EngineError::invalid_config(
                "recurrence_threshold must be non-negative",
            ));
        }
        self.filter.validate()?;
        self.umap.validate()
    }

    /// Preset for interactive cluster exploration: seeded embedding so the
    /// same selection always lays out the same way.
    #[must_use]
    pub fn interactive() -> Self {
        Self {
            umap: UmapConfig {
                seed: Some(42),
                n_epochs: Some(200),
                ..UmapConfig::default()
            },
            ..Self::default()
        }
    }

    /// Preset for 120 fps captures.
    #[must_use]
    pub fn high_frame_rate() -> Self {
        Self {
            filter: FilterConfig {
                sample_rate: 120.0,
                ..FilterConfig::default()
            },
            ..Self::default()
        }
    }

    /// Set the time-range tolerance.
    #[must_use]
    pub const fn with_time_tolerance(mut self, tolerance_ms: f64) -> Self {
        self.time_tolerance_ms = tolerance_ms;
        self
    }

    /// Set the recurrence threshold.
    #[must_use]
    pub const fn with_recurrence_threshold(mut self, threshold: f64) -> Self {
        self.recurrence_threshold = threshold;
        self
    }

    /// Set the filter sample rate.
    #[must_use]
    pub const fn with_sample_rate(mut self, sample_rate: f64) -> Self {
        self.filter.sample_rate = sample_rate;
        self
    }

    /// Set the UMAP seed.
    #[must_use]
    pub const fn with_umap_seed(mut self, seed: Option<u64>) -> Self {
        self.umap.seed = seed;
        self
    }
}
