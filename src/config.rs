// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Post-processing configuration.
//!
//! This module defines the [`PostprocessConfig`] struct, which controls score
//! filtering, Non-Maximum Suppression (NMS), box decoding variances, class
//! handling and pose denormalization.

use std::f32::consts::PI;

use crate::error::{PostprocessError, Result};

/// Default variances applied to the `(cx, cy, w, h)` regression deltas.
pub const DEFAULT_VARIANCES: [f32; 4] = [0.1, 0.1, 0.2, 0.2];

/// Configuration for detection post-processing and pose recovery.
///
/// Uses a builder pattern for convenient construction.
///
/// # Example
///
/// ```rust
/// use pose6d_postprocess::PostprocessConfig;
///
/// let config = PostprocessConfig::new()
///     .with_class_names(["background", "driller"])
///     .with_class_arg(Some(0))
///     .with_score_threshold(0.5)
///     .with_nms_threshold(0.45);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PostprocessConfig {
    /// Score threshold (0.0 to 1.0).
    /// Anchors whose best class score is lower than this value are discarded.
    pub score_threshold: f32,
    /// Intersection over Union (IoU) threshold for NMS (0.0 to 1.0).
    /// A box is suppressed when its overlap with a kept box exceeds this value.
    pub nms_threshold: f32,
    /// Scale factors for the `(cx, cy, w, h)` regression deltas.
    pub variances: [f32; 4],
    /// Ordered class names as emitted by the model, ignored class included.
    pub class_names: Vec<String>,
    /// Index of a class column to drop before filtering (e.g. background).
    pub class_arg: Option<usize>,
    /// Renormalize the remaining scores to sum to one after dropping `class_arg`.
    pub renormalize: bool,
    /// Number of rotation dimensions in the pose regression (axis-angle: 3).
    pub num_pose_dims: usize,
    /// Maximum number of boxes kept per class by NMS.
    pub top_k: usize,
    /// Maximum number of detections returned per image.
    pub max_detections: usize,
    /// Factor mapping normalized rotation regressions back to radians.
    pub rotation_scale: f32,
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.5,
            nms_threshold: 0.45,
            variances: DEFAULT_VARIANCES,
            class_names: Vec::new(),
            class_arg: None,
            renormalize: false,
            num_pose_dims: 3,
            top_k: 200,
            max_detections: 300,
            rotation_scale: PI,
        }
    }
}

impl PostprocessConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the score threshold.
    #[must_use]
    pub const fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = threshold;
        self
    }

    /// Set the IoU threshold for Non-Maximum Suppression (NMS).
    ///
    /// # Arguments
    ///
    /// * `threshold` - The IoU threshold (0.0 to 1.0).
    #[must_use]
    pub const fn with_nms_threshold(mut self, threshold: f32) -> Self {
        self.nms_threshold = threshold;
        self
    }

    /// Set the box decoding variances.
    #[must_use]
    pub const fn with_variances(mut self, variances: [f32; 4]) -> Self {
        self.variances = variances;
        self
    }

    /// Set the ordered class names, including any class dropped by `class_arg`.
    #[must_use]
    pub fn with_class_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.class_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the class column to drop before filtering.
    #[must_use]
    pub const fn with_class_arg(mut self, class_arg: Option<usize>) -> Self {
        self.class_arg = class_arg;
        self
    }

    /// Enable or disable score renormalization after class removal.
    #[must_use]
    pub const fn with_renormalize(mut self, renormalize: bool) -> Self {
        self.renormalize = renormalize;
        self
    }

    /// Set the number of rotation dimensions in the pose regression.
    #[must_use]
    pub const fn with_num_pose_dims(mut self, dims: usize) -> Self {
        self.num_pose_dims = dims;
        self
    }

    /// Set the maximum number of boxes kept per class.
    #[must_use]
    pub const fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set the maximum number of detections to return.
    ///
    /// Only the top `max` detections (sorted by score) are kept after NMS.
    #[must_use]
    pub const fn with_max_detections(mut self, max: usize) -> Self {
        self.max_detections = max;
        self
    }

    /// Set the rotation denormalization factor.
    #[must_use]
    pub const fn with_rotation_scale(mut self, scale: f32) -> Self {
        self.rotation_scale = scale;
        self
    }

    /// Class names after removing the ignored class, indexed by class id.
    #[must_use]
    pub fn effective_class_names(&self) -> Vec<String> {
        self.class_names
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != self.class_arg)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Check thresholds, variances and class settings.
    ///
    /// # Errors
    ///
    /// Returns [`PostprocessError::ConfigError`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.score_threshold) {
            return Err(PostprocessError::ConfigError(format!(
                "score_threshold must be in [0, 1], got {}",
                self.score_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.nms_threshold) {
            return Err(PostprocessError::ConfigError(format!(
                "nms_threshold must be in [0, 1], got {}",
                self.nms_threshold
            )));
        }
        if self.variances.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(PostprocessError::ConfigError(format!(
                "variances must be finite and positive, got {:?}",
                self.variances
            )));
        }
        if self.class_names.is_empty() {
            return Err(PostprocessError::ConfigError(
                "class_names must not be empty".to_string(),
            ));
        }
        if let Some(arg) = self.class_arg {
            if arg >= self.class_names.len() {
                return Err(PostprocessError::ConfigError(format!(
                    "class_arg {arg} out of range for {} classes",
                    self.class_names.len()
                )));
            }
            if self.class_names.len() < 2 {
                return Err(PostprocessError::ConfigError(
                    "class_arg would remove the only class".to_string(),
                ));
            }
        }
        // Pose6D carries axis-angle rotations only.
        if self.num_pose_dims != 3 {
            return Err(PostprocessError::ConfigError(format!(
                "num_pose_dims must be 3 (axis-angle), got {}",
                self.num_pose_dims
            )));
        }
        if self.top_k == 0 || self.max_detections == 0 {
            return Err(PostprocessError::ConfigError(
                "top_k and max_detections must be positive".to_string(),
            ));
        }
        if !self.rotation_scale.is_finite() {
            return Err(PostprocessError::ConfigError(
                "rotation_scale must be finite".to_string(),
            ));
        }
        Ok(())
    }
}
