// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Class removal and score filtering.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis, s};

use crate::error::{PostprocessError, Result};
use crate::processor::Processor;
use crate::results::Detections;

/// Drop one score column (typically background) from an `(N, C)` score array.
///
/// With `renormalize`, each row is divided by the sum of its remaining scores
/// so it again sums to one; rows whose remaining sum is zero are left as-is.
///
/// # Errors
///
/// Returns [`PostprocessError::ShapeMismatch`] if `class_arg` is not a valid column.
pub fn remove_ignored_class(
    scores: ArrayView2<'_, f32>,
    class_arg: Option<usize>,
    renormalize: bool,
) -> Result<Array2<f32>> {
    let Some(arg) = class_arg else {
        return Ok(scores.to_owned());
    };
    if arg >= scores.ncols() {
        return Err(PostprocessError::shape(
            "class_arg",
            format!("index below {}", scores.ncols()),
            arg,
        ));
    }

    let keep: Vec<usize> = (0..scores.ncols()).filter(|&c| c != arg).collect();
    let mut kept = scores.select(Axis(1), &keep);
    if renormalize {
        for mut row in kept.outer_iter_mut() {
            let sum: f32 = row.sum();
            if sum > 0.0 {
                row.mapv_inplace(|v| v / sum);
            }
        }
    }
    Ok(kept)
}

/// Best class of a score row; the first maximum wins and NaN never wins.
fn best_class(scores: ArrayView1<'_, f32>) -> Option<(usize, f32)> {
    scores
        .iter()
        .enumerate()
        .filter(|(_, s)| !s.is_nan())
        .fold(None, |best, (idx, &score)| match best {
            Some((_, best_score)) if best_score >= score => best,
            _ => Some((idx, score)),
        })
}

/// Keep rows whose best class score reaches `threshold`.
///
/// Each surviving row is assigned its argmax class and remembers its row index
/// in `boxes` as the anchor index.
///
/// # Errors
///
/// Returns [`PostprocessError::ShapeMismatch`] if `boxes` is not `(N, 4)` or
/// the row counts differ.
pub fn filter_by_score(
    boxes: ArrayView2<'_, f32>,
    scores: ArrayView2<'_, f32>,
    threshold: f32,
) -> Result<Detections> {
    if boxes.ncols() != 4 {
        return Err(PostprocessError::shape("box columns", 4, boxes.ncols()));
    }
    if boxes.nrows() != scores.nrows() {
        return Err(PostprocessError::shape(
            "score rows vs box rows",
            boxes.nrows(),
            scores.nrows(),
        ));
    }

    let mut candidates = Vec::new();
    for (anchor, (bbox, row)) in boxes.outer_iter().zip(scores.outer_iter()).enumerate() {
        let Some((class_id, score)) = best_class(row) else {
            continue;
        };
        if score < threshold {
            continue;
        }
        candidates.push(([bbox[0], bbox[1], bbox[2], bbox[3]], score, class_id, anchor));
    }
    Ok(Detections::from_candidates(&candidates))
}

/// Stage dropping the ignored class column from decoded `(N, 4 + C)` box data.
#[derive(Debug, Clone, Copy)]
pub struct ClassRemover {
    class_arg: Option<usize>,
    renormalize: bool,
}

impl ClassRemover {
    /// Create the stage; `None` makes it a pass-through.
    #[must_use]
    pub const fn new(class_arg: Option<usize>, renormalize: bool) -> Self {
        Self {
            class_arg,
            renormalize,
        }
    }
}

impl Processor<Array2<f32>> for ClassRemover {
    type Output = Array2<f32>;

    fn process(&self, input: Array2<f32>) -> Result<Array2<f32>> {
        if self.class_arg.is_none() {
            return Ok(input);
        }
        if input.ncols() < 4 {
            return Err(PostprocessError::shape("box data columns", "at least 4", input.ncols()));
        }
        let scores = remove_ignored_class(input.slice(s![.., 4..]), self.class_arg, self.renormalize)?;
        Ok(ndarray::concatenate(Axis(1), &[input.slice(s![.., 0..4]), scores.view()])?)
    }
}

/// Stage turning decoded `(N, 4 + C)` box data into score-filtered candidates.
#[derive(Debug, Clone, Copy)]
pub struct ScoreFilter {
    threshold: f32,
}

impl ScoreFilter {
    /// Create the stage with the given score threshold.
    #[must_use]
    pub const fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl<'a> Processor<ArrayView2<'a, f32>> for ScoreFilter {
    type Output = Detections;

    fn process(&self, input: ArrayView2<'a, f32>) -> Result<Detections> {
        if input.ncols() < 4 {
            return Err(PostprocessError::shape("box data columns", "at least 4", input.ncols()));
        }
        filter_by_score(input.slice(s![.., 0..4]), input.slice(s![.., 4..]), self.threshold)
    }
}
