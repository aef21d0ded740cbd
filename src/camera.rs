// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Camera intrinsics, per-class object extents and cuboid projection.
//!
//! These are the downstream collaborators of [`Pose6D`]: a renderer projects
//! the 3D bounding cuboid of each posed object into the image.

use std::collections::HashMap;

use nalgebra::{Matrix3, Vector2, Vector3};

use crate::error::{PostprocessError, Result};
use crate::pose::Pose6D;

/// Pinhole intrinsics `(fx, fy, cx, cy)` in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CameraIntrinsics {
    /// Focal length along x.
    pub fx: f32,
    /// Focal length along y.
    pub fy: f32,
    /// Principal point x.
    pub cx: f32,
    /// Principal point y.
    pub cy: f32,
}

impl CameraIntrinsics {
    /// Create intrinsics from focal lengths and principal point.
    ///
    /// # Errors
    ///
    /// Returns [`PostprocessError::ConfigError`] if a value is not finite or a
    /// focal length is not positive.
    pub fn new(fx: f32, fy: f32, cx: f32, cy: f32) -> Result<Self> {
        if [fx, fy, cx, cy].iter().any(|v| !v.is_finite()) {
            return Err(PostprocessError::ConfigError(
                "camera intrinsics must be finite".to_string(),
            ));
        }
        if fx <= 0.0 || fy <= 0.0 {
            return Err(PostprocessError::ConfigError(format!(
                "focal lengths must be positive, got fx={fx} fy={fy}"
            )));
        }
        Ok(Self { fx, fy, cx, cy })
    }

    /// Create intrinsics from a row-major 3x3 camera matrix
    /// `[[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`. Skew is not supported.
    ///
    /// # Errors
    ///
    /// Returns [`PostprocessError::ConfigError`] if the matrix is not of that form.
    pub fn from_matrix(matrix: [[f32; 3]; 3]) -> Result<Self> {
        let [[fx, skew, cx], [r10, fy, cy], bottom] = matrix;
        if skew != 0.0 || r10 != 0.0 || bottom != [0.0, 0.0, 1.0] {
            return Err(PostprocessError::ConfigError(format!(
                "camera matrix must be upper triangular with [0, 0, 1] last row, got {matrix:?}"
            )));
        }
        Self::new(fx, fy, cx, cy)
    }

    /// The 3x3 camera matrix.
    #[must_use]
    pub fn matrix(&self) -> Matrix3<f32> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Project a point in camera coordinates to pixels.
    ///
    /// Returns `None` for points on or behind the image plane.
    #[must_use]
    pub fn project(&self, point: [f32; 3]) -> Option<[f32; 2]> {
        let p = Vector3::from(point);
        if p.z <= 0.0 {
            return None;
        }
        let n = Vector2::new(p.x / p.z, p.y / p.z);
        Some([
            self.fx.mul_add(n.x, self.cx),
            self.fy.mul_add(n.y, self.cy),
        ])
    }

    /// Project the 8 corners of an object-centred cuboid of `size` placed at `pose`.
    ///
    /// Corner order follows [`cuboid_corners`]. Returns `None` if any corner
    /// falls behind the camera.
    #[must_use]
    pub fn project_cuboid(&self, pose: &Pose6D, size: [f32; 3]) -> Option<[[f32; 2]; 8]> {
        let mut projected = [[0.0; 2]; 8];
        for (dst, corner) in projected.iter_mut().zip(cuboid_corners(size)) {
            *dst = self.project(pose.transform_point(corner))?;
        }
        Some(projected)
    }
}

/// The 8 corners of a cuboid of `[width, height, depth]` centred on the origin.
///
/// Bottom face (`-z`) first, counter-clockwise from `(-x, -y)`, then the top face.
#[must_use]
pub fn cuboid_corners(size: [f32; 3]) -> [[f32; 3]; 8] {
    let [x, y, z] = size.map(|s| s / 2.0);
    [
        [-x, -y, -z],
        [x, -y, -z],
        [x, y, -z],
        [-x, y, -z],
        [-x, -y, z],
        [x, -y, z],
        [x, y, z],
        [-x, y, z],
    ]
}

/// 3D object sizes `[width, height, depth]` keyed by class name.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObjectExtents {
    sizes: HashMap<String, [f32; 3]>,
}

impl ObjectExtents {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the size of `class_name`.
    ///
    /// # Errors
    ///
    /// Returns [`PostprocessError::ConfigError`] if a dimension is not finite and positive.
    pub fn insert(&mut self, class_name: impl Into<String>, size: [f32; 3]) -> Result<()> {
        let class_name = class_name.into();
        if size.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(PostprocessError::ConfigError(format!(
                "object size for {class_name} must be positive, got {size:?}"
            )));
        }
        self.sizes.insert(class_name, size);
        Ok(())
    }

    /// Add a size, builder style.
    ///
    /// # Errors
    ///
    /// See [`ObjectExtents::insert`].
    pub fn with(mut self, class_name: impl Into<String>, size: [f32; 3]) -> Result<Self> {
        self.insert(class_name, size)?;
        Ok(self)
    }

    /// Size of `class_name`, if known.
    #[must_use]
    pub fn get(&self, class_name: &str) -> Option<[f32; 3]> {
        self.sizes.get(class_name).copied()
    }

    /// Number of classes with a known size.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    /// Check if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    /// Project the cuboid of `pose`'s class into the image.
    ///
    /// Returns `Ok(None)` when a corner falls behind the camera.
    ///
    /// # Errors
    ///
    /// Returns [`PostprocessError::ConfigError`] if the class has no size.
    pub fn project(
        &self,
        pose: &Pose6D,
        camera: &CameraIntrinsics,
    ) -> Result<Option<[[f32; 2]; 8]>> {
        let size = self.get(&pose.class_name).ok_or_else(|| {
            PostprocessError::ConfigError(format!("no object size for class {}", pose.class_name))
        })?;
        Ok(camera.project_cuboid(pose, size))
    }
}
