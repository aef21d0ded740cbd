// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 6D pose assembly from rotation and translation regressions.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use ndarray::{Array2, ArrayView1, ArrayView2, s};

use crate::error::{PostprocessError, Result};
use crate::results::Detections;

/// A rigid-body pose: axis-angle rotation plus translation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Pose6D {
    /// Axis-angle rotation vector in radians.
    pub rotation_vector: [f32; 3],
    /// Translation in model units.
    pub translation: [f32; 3],
    /// Class name of the detected object.
    pub class_name: String,
}

impl Pose6D {
    /// Create a pose from a rotation vector and a translation.
    #[must_use]
    pub fn from_rotation_vector(
        rotation_vector: [f32; 3],
        translation: [f32; 3],
        class_name: impl Into<String>,
    ) -> Self {
        Self {
            rotation_vector,
            translation,
            class_name: class_name.into(),
        }
    }

    /// Rotation angle in radians (norm of the rotation vector).
    #[must_use]
    pub fn angle(&self) -> f32 {
        Vector3::from(self.rotation_vector).norm()
    }

    /// Rotation as a unit quaternion.
    #[must_use]
    pub fn quaternion(&self) -> UnitQuaternion<f32> {
        UnitQuaternion::from_scaled_axis(Vector3::from(self.rotation_vector))
    }

    /// Rotation as a 3x3 matrix.
    #[must_use]
    pub fn rotation_matrix(&self) -> Matrix3<f32> {
        Rotation3::from_scaled_axis(Vector3::from(self.rotation_vector)).into_inner()
    }

    /// Transform a point from object coordinates into camera coordinates.
    #[must_use]
    pub fn transform_point(&self, point: [f32; 3]) -> [f32; 3] {
        let p = self.rotation_matrix() * Vector3::from(point) + Vector3::from(self.translation);
        [p.x, p.y, p.z]
    }
}

fn row3(row: ArrayView1<'_, f32>) -> [f32; 3] {
    [row[0], row[1], row[2]]
}

/// Split `(N, 2d)` pose regressions into `(N, d)` rotations and `(N, d)` translations.
///
/// # Errors
///
/// Returns [`PostprocessError::ShapeMismatch`] if the column count is not `2 * num_pose_dims`.
pub fn split_pose_regressions(
    regressions: ArrayView2<'_, f32>,
    num_pose_dims: usize,
) -> Result<(ArrayView2<'_, f32>, ArrayView2<'_, f32>)> {
    if regressions.ncols() != 2 * num_pose_dims {
        return Err(PostprocessError::shape(
            "pose regression columns",
            2 * num_pose_dims,
            regressions.ncols(),
        ));
    }
    Ok((
        regressions.slice_move(s![.., ..num_pose_dims]),
        regressions.slice_move(s![.., num_pose_dims..]),
    ))
}

/// Builds [`Pose6D`] values for surviving detections.
#[derive(Debug, Clone)]
pub struct PoseAssembler {
    class_names: Vec<String>,
    rotation_scale: f32,
}

impl PoseAssembler {
    /// Create an assembler.
    ///
    /// # Arguments
    ///
    /// * `class_names` - Names indexed by class id (ignored class already removed).
    /// * `rotation_scale` - Factor mapping normalized rotations to radians (π).
    #[must_use]
    pub const fn new(class_names: Vec<String>, rotation_scale: f32) -> Self {
        Self {
            class_names,
            rotation_scale,
        }
    }

    /// Denormalize raw rotation regressions to radians.
    #[must_use]
    pub fn denormalize_rotations(&self, rotations: ArrayView2<'_, f32>) -> Array2<f32> {
        rotations.mapv(|v| v * self.rotation_scale)
    }

    /// Assemble one pose per detection row.
    ///
    /// `rotations` and `translations` are the raw `(M, 3)` regressions already
    /// gathered for the `M` survivors, in survivor order. Rotations are
    /// denormalized here.
    ///
    /// # Errors
    ///
    /// Returns [`PostprocessError::ShapeMismatch`] if the row counts disagree,
    /// a regression does not have 3 columns, or a class id has no name.
    pub fn assemble<'a>(
        &self,
        detections: &Detections,
        rotations: ArrayView2<'a, f32>,
        translations: ArrayView2<'a, f32>,
    ) -> Result<Vec<Pose6D>> {
        if detections.is_empty() {
            return Ok(Vec::new());
        }
        for (what, array) in [("rotations", rotations), ("translations", translations)] {
            if array.nrows() != detections.len() {
                return Err(PostprocessError::shape(
                    &format!("{what} rows"),
                    detections.len(),
                    array.nrows(),
                ));
            }
            if array.ncols() != 3 {
                return Err(PostprocessError::shape(&format!("{what} columns"), 3, array.ncols()));
            }
        }

        let rotations = self.denormalize_rotations(rotations);
        detections
            .class_ids
            .iter()
            .zip(rotations.outer_iter().zip(translations.outer_iter()))
            .map(|(&class_id, (rotation, translation))| {
                let name = self.class_names.get(class_id).ok_or_else(|| {
                    PostprocessError::shape(
                        "class id",
                        format!("below {}", self.class_names.len()),
                        class_id,
                    )
                })?;
                Ok(Pose6D::from_rotation_vector(
                    row3(rotation),
                    row3(translation),
                    name.as_str(),
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::f32::consts::{FRAC_PI_2, PI};

    fn assembler() -> PoseAssembler {
        PoseAssembler::new(vec!["driller".to_string(), "glue".to_string()], PI)
    }

    fn survivors() -> Detections {
        Detections::from_candidates(&[
            ([0.1, 0.1, 0.3, 0.3], 0.9, 1, 5),
            ([0.5, 0.5, 0.7, 0.7], 0.8, 0, 2),
        ])
    }

    #[test]
    fn test_split_pose_regressions() {
        let regressions = array![[0.1, 0.2, 0.3, 1.0, 2.0, 3.0]];
        let (rot, trans) = split_pose_regressions(regressions.view(), 3).unwrap();
        assert_eq!(rot.row(0).to_vec(), vec![0.1, 0.2, 0.3]);
        assert_eq!(trans.row(0).to_vec(), vec![1.0, 2.0, 3.0]);

        assert!(split_pose_regressions(regressions.view(), 2).is_err());
    }

    #[test]
    fn test_assemble_pairs_and_denormalizes() {
        let rotations = array![[0.5, 0.0, 0.0], [0.0, -1.0, 0.25]];
        let translations = array![[0.1, 0.2, 1.5], [0.0, 0.0, 2.0]];
        let poses = assembler()
            .assemble(&survivors(), rotations.view(), translations.view())
            .unwrap();

        assert_eq!(poses.len(), 2);
        assert_eq!(poses[0].class_name, "glue");
        assert_eq!(poses[1].class_name, "driller");
        assert!((poses[0].rotation_vector[0] - FRAC_PI_2).abs() < 1e-6);
        assert!((poses[1].rotation_vector[1] + PI).abs() < 1e-6);
        assert_eq!(poses[1].translation, [0.0, 0.0, 2.0]);
    }

    #[test]
    fn test_assemble_views_of_different_arrays() {
        // rotations borrow the regression array, translations a separate copy
        let regressions = array![[0.5, 0.0, 0.0, 9.0, 9.0, 9.0], [0.0, -1.0, 0.25, 9.0, 9.0, 9.0]];
        let (rotations, _) = split_pose_regressions(regressions.view(), 3).unwrap();
        let translations = array![[0.1, 0.2, 1.5], [0.0, 0.0, 2.0]];
        let poses = assembler()
            .assemble(&survivors(), rotations, translations.view())
            .unwrap();
        assert_eq!(poses[0].translation, [0.1, 0.2, 1.5]);
        assert!((poses[1].rotation_vector[2] - 0.25 * PI).abs() < 1e-6);
    }

    #[test]
    fn test_assemble_empty() {
        let empty = Array2::<f32>::zeros((0, 3));
        let poses = assembler()
            .assemble(&Detections::empty(), empty.view(), empty.view())
            .unwrap();
        assert!(poses.is_empty());
    }

    #[test]
    fn test_assemble_row_mismatch() {
        let rotations = array![[0.5, 0.0, 0.0]];
        let translations = array![[0.1, 0.2, 1.5], [0.0, 0.0, 2.0]];
        let err = assembler()
            .assemble(&survivors(), rotations.view(), translations.view())
            .unwrap_err();
        assert!(matches!(err, PostprocessError::ShapeMismatch(_)));
    }

    #[test]
    fn test_assemble_unknown_class() {
        let detections = Detections::from_candidates(&[([0.0, 0.0, 1.0, 1.0], 0.9, 7, 0)]);
        let zeros = Array2::<f32>::zeros((1, 3));
        assert!(assembler()
            .assemble(&detections, zeros.view(), zeros.view())
            .is_err());
    }

    #[test]
    fn test_rotation_views() {
        let pose = Pose6D::from_rotation_vector([0.0, 0.0, FRAC_PI_2], [1.0, 0.0, 0.0], "driller");
        assert!((pose.angle() - FRAC_PI_2).abs() < 1e-6);

        // 90 degrees about z maps x onto y
        let p = pose.transform_point([1.0, 0.0, 0.0]);
        assert!((p[0] - 1.0).abs() < 1e-6);
        assert!((p[1] - 1.0).abs() < 1e-6);
        assert!(p[2].abs() < 1e-6);

        let q = pose.quaternion();
        assert!((q.angle() - FRAC_PI_2).abs() < 1e-6);
        let m = pose.rotation_matrix();
        assert!((m[(1, 0)] - 1.0).abs() < 1e-6);
    }
}
