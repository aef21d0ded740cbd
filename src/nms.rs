// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Non-Maximum Suppression (NMS).

use std::collections::BTreeMap;

use ndarray::ArrayView2;

use crate::error::{PostprocessError, Result};
use crate::processor::Processor;
use crate::results::Detections;

/// Calculate `IoU` (Intersection over Union) between two corner boxes.
///
/// # Arguments
///
/// * `box1` - First bounding box [x1, y1, x2, y2]
/// * `box2` - Second bounding box [x1, y1, x2, y2]
///
/// # Returns
///
/// `IoU` value between 0.0 and 1.0; 0.0 when the union is empty.
#[must_use]
pub fn calculate_iou(box1: &[f32; 4], box2: &[f32; 4]) -> f32 {
    let x1 = box1[0].max(box2[0]);
    let y1 = box1[1].max(box2[1]);
    let x2 = box1[2].min(box2[2]);
    let y2 = box1[3].min(box2[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);

    let area1 = (box1[2] - box1[0]).max(0.0) * (box1[3] - box1[1]).max(0.0);
    let area2 = (box2[2] - box2[0]).max(0.0) * (box2[3] - box2[1]).max(0.0);
    let union = area1 + area2 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Greedy Non-Maximum Suppression over a single class.
///
/// Candidates are visited by descending score, ties broken by lower index.
/// Each visited box that is not yet suppressed is kept, and every remaining
/// box whose `IoU` with it exceeds `iou_threshold` is suppressed.
///
/// # Returns
///
/// Positions of the kept boxes in visiting order (descending score).
///
/// # Errors
///
/// Returns [`PostprocessError::ShapeMismatch`] if `boxes` is not `(N, 4)`,
/// `scores` does not have `N` entries, or a score is not finite.
pub fn suppress(
    boxes: ArrayView2<'_, f32>,
    scores: &[f32],
    iou_threshold: f32,
) -> Result<Vec<usize>> {
    if boxes.ncols() != 4 {
        return Err(PostprocessError::shape("box columns", 4, boxes.ncols()));
    }
    if boxes.nrows() != scores.len() {
        return Err(PostprocessError::shape("scores", boxes.nrows(), scores.len()));
    }
    if let Some(pos) = scores.iter().position(|s| !s.is_finite()) {
        return Err(PostprocessError::shape(
            &format!("score {pos}"),
            "a finite value",
            scores[pos],
        ));
    }
    let rows: Vec<[f32; 4]> = boxes
        .outer_iter()
        .map(|r| [r[0], r[1], r[2], r[3]])
        .collect();
    let positions: Vec<usize> = (0..rows.len()).collect();
    Ok(greedy(&rows, scores, &positions, iou_threshold, usize::MAX))
}

/// Greedy suppression restricted to `positions`, keeping at most `top_k`.
///
/// NaN-scored boxes are skipped; they neither survive nor suppress.
fn greedy(
    boxes: &[[f32; 4]],
    scores: &[f32],
    positions: &[usize],
    iou_threshold: f32,
    top_k: usize,
) -> Vec<usize> {
    let mut order: Vec<usize> = positions
        .iter()
        .copied()
        .filter(|&p| !scores[p].is_nan())
        .collect();
    // Stable sort keeps the lower index first among equal scores.
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; order.len()];

    for (rank, &i) in order.iter().enumerate() {
        if suppressed[rank] {
            continue;
        }
        keep.push(i);
        if keep.len() >= top_k {
            break;
        }

        for (later, &j) in order.iter().enumerate().skip(rank + 1) {
            if !suppressed[later] && calculate_iou(&boxes[i], &boxes[j]) > iou_threshold {
                suppressed[later] = true;
            }
        }
    }

    keep
}

/// Per-class Non-Maximum Suppression.
///
/// Only boxes of the same class suppress each other. At most `top_k` boxes
/// are kept per class. Survivors are merged in ascending class order and by
/// descending score within a class; they keep their anchor indices.
#[must_use]
pub fn suppress_per_class(detections: &Detections, iou_threshold: f32, top_k: usize) -> Detections {
    if detections.is_empty() {
        return Detections::empty();
    }

    let boxes: Vec<[f32; 4]> = (0..detections.len()).map(|i| detections.bbox(i)).collect();

    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (pos, &class_id) in detections.class_ids.iter().enumerate() {
        by_class.entry(class_id).or_default().push(pos);
    }

    let mut keep = Vec::new();
    for positions in by_class.values() {
        keep.extend(greedy(
            &boxes,
            &detections.scores,
            positions,
            iou_threshold,
            top_k,
        ));
    }

    detections.select(&keep)
}

/// Limit `detections` to the `max_detections` highest scores.
///
/// The merged order (class, then descending score) of the survivors is preserved.
#[must_use]
pub fn limit_detections(detections: Detections, max_detections: usize) -> Detections {
    if detections.len() <= max_detections {
        return detections;
    }

    let mut ranked: Vec<usize> = (0..detections.len()).collect();
    ranked.sort_by(|&a, &b| detections.scores[b].total_cmp(&detections.scores[a]));
    ranked.truncate(max_detections);
    ranked.sort_unstable();

    detections.select(&ranked)
}

/// Stage applying per-class NMS and the detection limit.
#[derive(Debug, Clone, Copy)]
pub struct NmsStage {
    iou_threshold: f32,
    top_k: usize,
    max_detections: usize,
}

impl NmsStage {
    /// Create the stage.
    #[must_use]
    pub const fn new(iou_threshold: f32, top_k: usize, max_detections: usize) -> Self {
        Self {
            iou_threshold,
            top_k,
            max_detections,
        }
    }
}

impl Processor<Detections> for NmsStage {
    type Output = Detections;

    fn process(&self, input: Detections) -> Result<Detections> {
        let kept = suppress_per_class(&input, self.iou_threshold, self.top_k);
        Ok(limit_detections(kept, self.max_detections))
    }
}
