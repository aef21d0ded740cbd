// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Mapping between post-NMS detections and pre-NMS anchors.
//!
//! Pose regressions are produced densely, one row per anchor. Once boxes
//! have been filtered and suppressed, each survivor must be traced back to
//! its anchor row so that only the matching pose rows are assembled.

use ndarray::{Array2, ArrayView2, Axis, s};

use crate::error::{PostprocessError, Result};
use crate::results::Detections;

/// Default tolerance when matching survivors against anchors by value.
pub const MATCH_TOLERANCE: f32 = 1e-6;

/// Anchor index of each surviving detection, in survivor order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SelectionIndex {
    indices: Vec<usize>,
}

impl SelectionIndex {
    /// Validate indices carried through filtering and NMS.
    ///
    /// # Errors
    ///
    /// Returns [`PostprocessError::SelectionMismatch`] if an index is not a
    /// valid row of the `num_anchors`-row anchor array.
    pub fn from_carried(indices: &[usize], num_anchors: usize) -> Result<Self> {
        if let Some((pos, &bad)) = indices.iter().enumerate().find(|(_, i)| **i >= num_anchors) {
            return Err(PostprocessError::SelectionMismatch(format!(
                "survivor {pos} refers to anchor {bad}, but only {num_anchors} anchors exist"
            )));
        }
        Ok(Self {
            indices: indices.to_vec(),
        })
    }

    /// Validate the anchor indices carried by a set of survivors.
    ///
    /// # Errors
    ///
    /// See [`SelectionIndex::from_carried`].
    pub fn from_detections(survivors: &Detections, num_anchors: usize) -> Result<Self> {
        Self::from_carried(&survivors.anchor_indices, num_anchors)
    }

    /// Anchor indices in survivor order.
    #[must_use]
    pub fn as_slice(&self) -> &[usize] {
        &self.indices
    }

    /// Number of survivors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Check if there are no survivors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Select the rows of a dense per-anchor array belonging to the survivors.
    ///
    /// # Errors
    ///
    /// Returns [`PostprocessError::SelectionMismatch`] if an index is not a
    /// row of `dense`.
    pub fn gather(&self, dense: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        if let Some(&bad) = self.indices.iter().find(|&&i| i >= dense.nrows()) {
            return Err(PostprocessError::SelectionMismatch(format!(
                "anchor {bad} is out of range for {} regression rows",
                dense.nrows()
            )));
        }
        Ok(dense.select(Axis(0), &self.indices))
    }
}

/// Recover the anchor index of each survivor by matching values.
///
/// `all_box_data` is the `(N, 4 + C)` decoded, class-removed box data seen by
/// the score filter. A survivor matches an anchor row when its box equals the
/// row's box and its score equals the row's score for the survivor's class,
/// both within `tolerance`. When several rows match, the lowest index wins.
///
/// Carrying indices through with [`SelectionIndex::from_detections`] is
/// preferred; this is the fallback for survivors that lost their indices.
///
/// # Errors
///
/// Returns [`PostprocessError::ShapeMismatch`] if `all_box_data` has fewer
/// than 4 columns, and [`PostprocessError::SelectionMismatch`] if any
/// survivor has no matching anchor.
pub fn map_selected(
    all_box_data: ArrayView2<'_, f32>,
    survivors: &Detections,
    tolerance: f32,
) -> Result<SelectionIndex> {
    if all_box_data.ncols() < 4 {
        return Err(PostprocessError::shape(
            "box data columns",
            "at least 4",
            all_box_data.ncols(),
        ));
    }
    let num_classes = all_box_data.ncols() - 4;
    let close = |a: f32, b: f32| (a - b).abs() <= tolerance;

    let mut indices = Vec::with_capacity(survivors.len());
    for k in 0..survivors.len() {
        let (bbox, score, class_id, _) = survivors.candidate(k);
        if class_id >= num_classes {
            return Err(PostprocessError::SelectionMismatch(format!(
                "survivor {k} has class {class_id}, but box data holds {num_classes} classes"
            )));
        }
        let found = all_box_data.outer_iter().position(|row| {
            row.slice(s![0..4])
                .iter()
                .zip(bbox)
                .all(|(&a, b)| close(a, b))
                && close(row[4 + class_id], score)
        });
        match found {
            Some(anchor) => indices.push(anchor),
            None => {
                return Err(PostprocessError::SelectionMismatch(format!(
                    "survivor {k} ({bbox:?}, class {class_id}, score {score}) matches no anchor"
                )));
            }
        }
    }
    Ok(SelectionIndex { indices })
}
