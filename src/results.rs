// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Result containers for post-processing output.

use std::collections::HashMap;

use ndarray::{Array2, Axis};

use crate::error::{PostprocessError, PostprocessWarning, Result};
use crate::pipeline::PipelineState;
use crate::pose::Pose6D;
use crate::selection::SelectionIndex;

/// Per-stage timing of one pipeline run, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Speed {
    /// Box decoding and class removal.
    pub decode: Option<f64>,
    /// Score filtering and NMS.
    pub nms: Option<f64>,
    /// Rescaling and pose assembly.
    pub assemble: Option<f64>,
}

impl Speed {
    /// Get total post-processing time.
    ///
    /// # Returns
    ///
    /// * Sum of all recorded stage times in milliseconds.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.decode.unwrap_or(0.0) + self.nms.unwrap_or(0.0) + self.assemble.unwrap_or(0.0)
    }
}

/// A candidate row: corner box, score, class id and anchor index.
pub type Candidate = ([f32; 4], f32, usize, usize);

/// Scored corner boxes with their class and originating anchor.
///
/// Used both for score-filtered candidates and for NMS survivors. Boxes are
/// in normalized `[x1, y1, x2, y2]` form.
#[derive(Debug, Clone, PartialEq)]
pub struct Detections {
    /// Box coordinates with shape (M, 4).
    pub boxes: Array2<f32>,
    /// Score of the assigned class.
    pub scores: Vec<f32>,
    /// Assigned class id (after class removal).
    pub class_ids: Vec<usize>,
    /// Row of each detection in the dense pre-filter, pre-NMS anchor array.
    pub anchor_indices: Vec<usize>,
}

impl Detections {
    /// Create a detection set, checking that all columns agree in length.
    ///
    /// # Errors
    ///
    /// Returns [`PostprocessError::ShapeMismatch`] if `boxes` is not `(M, 4)`
    /// or any of the per-row vectors has a different length.
    pub fn new(
        boxes: Array2<f32>,
        scores: Vec<f32>,
        class_ids: Vec<usize>,
        anchor_indices: Vec<usize>,
    ) -> Result<Self> {
        let m = boxes.nrows();
        if boxes.ncols() != 4 {
            return Err(PostprocessError::shape("detection box columns", 4, boxes.ncols()));
        }
        for (what, len) in [
            ("scores", scores.len()),
            ("class ids", class_ids.len()),
            ("anchor indices", anchor_indices.len()),
        ] {
            if len != m {
                return Err(PostprocessError::shape(what, m, len));
            }
        }
        Ok(Self {
            boxes,
            scores,
            class_ids,
            anchor_indices,
        })
    }

    /// An empty detection set.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            boxes: Array2::zeros((0, 4)),
            scores: Vec::new(),
            class_ids: Vec::new(),
            anchor_indices: Vec::new(),
        }
    }

    /// Build a detection set from candidate tuples.
    #[must_use]
    pub fn from_candidates(candidates: &[Candidate]) -> Self {
        let mut boxes = Array2::zeros((candidates.len(), 4));
        let mut scores = Vec::with_capacity(candidates.len());
        let mut class_ids = Vec::with_capacity(candidates.len());
        let mut anchor_indices = Vec::with_capacity(candidates.len());

        for (i, (bbox, score, class, anchor)) in candidates.iter().enumerate() {
            for (k, v) in bbox.iter().enumerate() {
                boxes[[i, k]] = *v;
            }
            scores.push(*score);
            class_ids.push(*class);
            anchor_indices.push(*anchor);
        }

        Self {
            boxes,
            scores,
            class_ids,
            anchor_indices,
        }
    }

    /// Get the number of detections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Check if there are no detections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Corner box of detection `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of bounds.
    #[must_use]
    pub fn bbox(&self, i: usize) -> [f32; 4] {
        let row = self.boxes.row(i);
        [row[0], row[1], row[2], row[3]]
    }

    /// Detection `i` as a candidate tuple.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of bounds.
    #[must_use]
    pub fn candidate(&self, i: usize) -> Candidate {
        (
            self.bbox(i),
            self.scores[i],
            self.class_ids[i],
            self.anchor_indices[i],
        )
    }

    /// Keep the detections at `positions`, in that order.
    ///
    /// # Panics
    ///
    /// Panics if a position is out of bounds.
    #[must_use]
    pub fn select(&self, positions: &[usize]) -> Self {
        Self {
            boxes: self.boxes.select(Axis(0), positions),
            scores: positions.iter().map(|&p| self.scores[p]).collect(),
            class_ids: positions.iter().map(|&p| self.class_ids[p]).collect(),
            anchor_indices: positions.iter().map(|&p| self.anchor_indices[p]).collect(),
        }
    }
}

/// A decoded, filtered, NMS-surviving detection in pixel space.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Box2D {
    /// Pixel corners `[x_min, y_min, x_max, y_max]`.
    pub coordinates: [i32; 4],
    /// Class id after class removal.
    pub class_id: usize,
    /// Class name.
    pub class_name: String,
    /// Score of the assigned class.
    pub score: f32,
}

impl Box2D {
    /// Box width in pixels.
    #[must_use]
    pub const fn width(&self) -> i32 {
        self.coordinates[2] - self.coordinates[0]
    }

    /// Box height in pixels.
    #[must_use]
    pub const fn height(&self) -> i32 {
        self.coordinates[3] - self.coordinates[1]
    }

    /// Box center in pixels.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn center(&self) -> (f32, f32) {
        let [x1, y1, x2, y2] = self.coordinates;
        ((x1 + x2) as f32 / 2.0, (y1 + y2) as f32 / 2.0)
    }
}

/// Values that can appear in a summary dictionary.
#[derive(Debug, Clone, PartialEq)]
pub enum SummaryValue {
    /// String value.
    String(String),
    /// Integer value.
    Int(i64),
    /// Float value.
    Float(f32),
    /// Nested values (box corners, pose vectors).
    Map(HashMap<String, Self>),
}

/// Output of one pipeline run.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PostprocessOutput {
    /// Surviving boxes in pixel space.
    pub boxes2d: Vec<Box2D>,
    /// One pose per box, in the same order, when poses were requested.
    pub poses6d: Vec<Pose6D>,
    /// Anchor index of each surviving box.
    pub selection: SelectionIndex,
    /// Non-fatal conditions met during the run.
    pub warnings: Vec<PostprocessWarning>,
    /// States visited, in order.
    pub states: Vec<PipelineState>,
    /// Stage timings.
    pub speed: Speed,
}

impl PostprocessOutput {
    /// Get the number of detections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.boxes2d.len()
    }

    /// Check if there are no detections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.boxes2d.is_empty()
    }

    /// Whether the pipeline passed through `state`.
    #[must_use]
    pub fn visited(&self, state: PipelineState) -> bool {
        self.states.contains(&state)
    }

    /// Iterate over box/pose pairs.
    pub fn pairs(&self) -> impl Iterator<Item = (&Box2D, &Pose6D)> {
        self.boxes2d.iter().zip(self.poses6d.iter())
    }

    /// Generate a log string describing the results, e.g. `"2 drillers, 1 cat, "`.
    #[must_use]
    pub fn verbose(&self) -> String {
        if self.is_empty() {
            return "(no detections), ".to_string();
        }

        // Class order follows first appearance.
        let mut counts: Vec<(&str, usize)> = Vec::new();
        for b in &self.boxes2d {
            match counts.iter_mut().find(|(name, _)| *name == b.class_name) {
                Some((_, count)) => *count += 1,
                None => counts.push((b.class_name.as_str(), 1)),
            }
        }

        let parts: Vec<String> = counts
            .iter()
            .map(|(name, count)| {
                if *count > 1 {
                    format!("{count} {}", pluralize(name))
                } else {
                    format!("{count} {name}")
                }
            })
            .collect();
        format!("{}, ", parts.join(", "))
    }

    /// Convert results to a list of dictionaries (summary format).
    #[must_use]
    pub fn summary(&self) -> Vec<HashMap<String, SummaryValue>> {
        let mut results = Vec::with_capacity(self.boxes2d.len());

        for (i, b) in self.boxes2d.iter().enumerate() {
            let mut entry = HashMap::new();
            entry.insert("name".to_string(), SummaryValue::String(b.class_name.clone()));
            entry.insert(
                "class".to_string(),
                SummaryValue::Int(i64::try_from(b.class_id).unwrap_or(i64::MAX)),
            );
            entry.insert("confidence".to_string(), SummaryValue::Float(b.score));

            let mut box_coords = HashMap::new();
            for (key, v) in ["x1", "y1", "x2", "y2"].iter().zip(b.coordinates) {
                box_coords.insert((*key).to_string(), SummaryValue::Int(i64::from(v)));
            }
            entry.insert("box".to_string(), SummaryValue::Map(box_coords));

            if let Some(pose) = self.poses6d.get(i) {
                let mut pose_values = HashMap::new();
                for (key, v) in ["rx", "ry", "rz"].iter().zip(pose.rotation_vector) {
                    pose_values.insert((*key).to_string(), SummaryValue::Float(v));
                }
                for (key, v) in ["tx", "ty", "tz"].iter().zip(pose.translation) {
                    pose_values.insert((*key).to_string(), SummaryValue::Float(v));
                }
                entry.insert("pose".to_string(), SummaryValue::Map(pose_values));
            }

            results.push(entry);
        }

        results
    }
}

/// Simple English pluralization for class names.
#[must_use]
pub fn pluralize(word: &str) -> String {
    if word.ends_with('s') || word.ends_with("ch") || word.ends_with("sh") || word.ends_with('x') {
        format!("{word}es")
    } else if word.ends_with('y') && !word.ends_with("ey") && !word.ends_with("ay") {
        format!("{}ies", &word[..word.len() - 1])
    } else {
        format!("{word}s")
    }
}
