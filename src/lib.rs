//! Keypoint Motion Library
//!
//! Geometry and time-series engine for 2D keypoint tracking data.
//!
//! This library operates on pose-estimation output (YOLO, MediaPipe,
//! RTMPose, ...) stored as a `(frame, member, keypoint)` keyed table and
//! derives analysis features from it.
//!
//! # Features
//!
//! - **Typed tables**: composite keys decided once at ingestion, explicit
//!   missing positions instead of sentinel coordinates
//! - **Vector geometry**: components, norms, cross/dot products and angles
//!   between keypoints, named by a stable `op(a-b,a-c)` column contract
//! - **Motion derivatives**: speed, acceleration, total distance and
//!   centered moving averages
//! - **Region filters**: polygon containment with coordinate scaling
//! - **Embeddings**: PCA and UMAP with cooperative cancellation, plus
//!   recurrence matrices
//! - **Mixing**: column arithmetic and normalization, including zero-phase
//!   Butterworth filters
//!
//! # Quick Start
//!
//! ```
//! use keypoint_motion::{calc_angle2, calc_norm, TrackAttrs, TrackKey, TrackPoint, TrackTable};
//!
//! let rows = (0..10i64).flat_map(|frame| {
//!     let ts = frame as f64 * 1000.0 / 60.0;
//!     [
//!         (TrackKey::new(frame, "1", 0), TrackPoint::new(100.0, 50.0, ts)),
//!         (TrackKey::new(frame, "1", 1), TrackPoint::new(110.0, 50.0, ts)),
//!     ]
//! });
//! let table = TrackTable::from_rows(rows, TrackAttrs::default());
//!
//! let norms = calc_norm(&table, 0, 1);
//! assert!(norms.column("norm(0-1)")?.iter().all(|&v| v == 10.0));
//!
//! let angles = calc_angle2(&table, 0, 1);
//! assert!(angles.column("deg(0-1)")?.iter().all(|&v| v == 0.0));
//! # Ok::<(), keypoint_motion::EngineError>(())
//! ```
//!
//! # Presets
//!
//! ```
//! use keypoint_motion::EngineConfig;
//!
//! let default_config = EngineConfig::default();
//! let interactive = EngineConfig::interactive();
//! let high_rate = EngineConfig::high_frame_rate();
//! assert!(interactive.validate().is_ok());
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::float_cmp)]

pub mod artifact;
pub mod config;
pub mod error;
pub mod math;
pub mod mixing;
pub mod motion;
pub mod record;
pub mod reduction;
pub mod region;
pub mod scene;
pub mod table;
pub mod timeline;
pub mod vector;

// Re-exports for convenient access
pub use artifact::{FeatureArtifact, FeatureGroup, FeatureStore, StoreGroup};
pub use config::{EngineConfig, FilterConfig, UmapConfig};
pub use error::{EngineError, Result};
pub use mixing::{arithmetic_operations, calc, mix, MixOp, NormalizeCode};
pub use motion::{
    acceleration, moving_average, smooth_track, speed, total_distance, DistanceSummary,
};
pub use record::{parse_column_name, CalcRecord, CalcType, MixRecord, ParsedColumn, ProcStep};
pub use reduction::{embedding_points, pca, recurrence, umap, CancelToken, RecurrenceMatrix};
pub use region::{filter_region, in_poly_column, is_in_poly, point_in_polygon, RegionMode};
pub use scene::{Scene, SceneTable};
pub use table::{
    FeatureTable, FeatureTableBuilder, Frame, KeypointId, MemberFrame, MemberId, RowKey,
    TrackAttrs, TrackKey, TrackPoint, TrackTable,
};
pub use timeline::{filter_by_scene, filter_by_timerange, thinning, Timeline};
pub use vector::{
    calc_angle2, calc_angle3, calc_component, calc_cross, calc_cross_dot_plus_angle,
    calc_cross_dot_plus_norms, calc_dot, calc_norm, calc_norms, calc_plus, calc_sin_cos, compute,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
