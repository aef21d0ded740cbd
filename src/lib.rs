// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

#![allow(clippy::multiple_crate_versions)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # 6D Pose Post-processing Library
//!
//! Detection post-processing and 6D pose recovery for single-shot pose
//! estimators (`EfficientPose` style), written in Rust.
//!
//! The upstream network is treated as a producer of dense arrays: one row of
//! `[4 box deltas | C class scores]` per prior box, and optionally one row of
//! `[rotation | translation]` regressions per prior box. This crate turns those
//! rows into pixel-space 2D boxes paired with 6D poses.
//!
//! ## Features
//!
//! - **Box decoding** - Anchor-relative deltas decoded with configurable variances
//! - **Class handling** - Background class removal with optional renormalization
//! - **Per-class NMS** - Stable greedy suppression with per-class `top_k`
//! - **Pose recovery** - Axis-angle rotations and translations paired to surviving boxes
//! - **Camera geometry** - Intrinsics, per-class object extents and cuboid projection
//!
//! ## Installation
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! pose6d-postprocess = "0.1.0"
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use ndarray::array;
//! use pose6d_postprocess::{PostprocessConfig, PostprocessPipeline, PriorBoxes};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PostprocessConfig::new()
//!         .with_class_names(["background", "driller"])
//!         .with_class_arg(Some(0))
//!         .with_score_threshold(0.5)
//!         .with_nms_threshold(0.45);
//!     let priors = PriorBoxes::from_rows(&[[0.2, 0.2, 0.2, 0.2], [0.7, 0.7, 0.2, 0.2]])?;
//!     let pipeline = PostprocessPipeline::new(config, priors)?;
//!
//!     let detections = array![
//!         [0.0f32, 0.0, 0.0, 0.0, 0.1, 0.9],
//!         [0.0, 0.0, 0.0, 0.0, 0.8, 0.2]
//!     ];
//!     let poses = array![
//!         [0.5f32, 0.0, 0.0, 0.1, 0.2, 1.5],
//!         [0.0, 0.0, 0.0, 0.0, 0.0, 1.0]
//!     ];
//!
//!     let output = pipeline.run(detections.view(), Some(poses.view()), (480, 640), 1.0)?;
//!     for (box2d, pose) in output.pairs() {
//!         println!(
//!             "{} {:.2} {:?} r={:?} t={:?}",
//!             box2d.class_name, box2d.score, box2d.coordinates, pose.rotation_vector, pose.translation
//!         );
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`pipeline`] | [`PostprocessPipeline`] running the full stage sequence |
//! | [`codec`] | Prior boxes, box decoding and encoding |
//! | [`filter`] | Class removal and score filtering |
//! | [`nms`] | `IoU` and per-class Non-Maximum Suppression |
//! | [`selection`] | Mapping survivors back to their anchors |
//! | [`pose`] | [`Pose6D`] and pose assembly |
//! | [`rescale`] | Normalized to pixel coordinates and back |
//! | [`camera`] | [`CameraIntrinsics`], [`ObjectExtents`], cuboid projection |
//! | [`results`] | Output types ([`PostprocessOutput`], [`Box2D`]) |
//! | [`config`] | [`PostprocessConfig`] builder |
//! | [`processor`] | The [`Processor`] stage contract |
//! | [`error`] | Error types ([`PostprocessError`], [`Result`]) |
//! | [`logging`] | Console logging macros and verbosity |
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `serde` | `Serialize`/`Deserialize` for configuration and output types |
//!
//! ## License
//!
//! This project is licensed under [AGPL-3.0](https://ultralytics.com/license).

// Modules
pub mod camera;
pub mod codec;
pub mod config;
pub mod error;
pub mod filter;
pub mod logging;
pub mod nms;
pub mod pipeline;
pub mod pose;
pub mod processor;
pub mod rescale;
pub mod results;
pub mod selection;

// Used by the logging macros.
#[doc(hidden)]
pub use colored as __colored;

// Re-export main types for convenience
pub use camera::{CameraIntrinsics, ObjectExtents};
pub use codec::{BoxDecoder, PriorBoxes};
pub use config::{DEFAULT_VARIANCES, PostprocessConfig};
pub use error::{PostprocessError, PostprocessWarning, Result};
pub use pipeline::{PipelineState, PostprocessPipeline};
pub use pose::{Pose6D, PoseAssembler};
pub use processor::{Processor, Sequential};
pub use rescale::GeometryRescaler;
pub use results::{Box2D, Detections, PostprocessOutput, Speed};
pub use selection::SelectionIndex;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
