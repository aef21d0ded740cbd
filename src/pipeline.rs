// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! End-to-end post-processing pipeline.
//!
//! Runs the fixed stage sequence
//!
//! ```text
//! RawOutput -> Decoded -> ScoreFiltered -> NmsSuppressed -> Rescaled -> [Posed] -> Final
//! ```
//!
//! on the dense output of a single-shot pose estimator and returns pixel-space
//! boxes paired with 6D poses.

use std::fmt;
use std::time::Instant;

use ndarray::ArrayView2;

use crate::codec::{BoxDecoder, PriorBoxes};
use crate::config::PostprocessConfig;
use crate::error::{PostprocessError, PostprocessWarning, Result};
use crate::filter::{ClassRemover, ScoreFilter};
use crate::nms::NmsStage;
use crate::pose::{PoseAssembler, split_pose_regressions};
use crate::processor::{Processor, Sequential};
use crate::rescale::GeometryRescaler;
use crate::results::{PostprocessOutput, Speed};
use crate::selection::SelectionIndex;
use crate::{section, verbose, warn};

/// Pipeline states, in the order they are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PipelineState {
    /// Dense model output received.
    RawOutput,
    /// Boxes decoded against the priors and the ignored class removed.
    Decoded,
    /// Anchors below the score threshold dropped.
    ScoreFiltered,
    /// Per-class NMS applied.
    NmsSuppressed,
    /// Survivors mapped to pixel coordinates.
    Rescaled,
    /// Poses assembled for the survivors.
    Posed,
    /// Output ready.
    Final,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RawOutput => "raw output",
            Self::Decoded => "decoded",
            Self::ScoreFiltered => "score filtered",
            Self::NmsSuppressed => "NMS suppressed",
            Self::Rescaled => "rescaled",
            Self::Posed => "posed",
            Self::Final => "final",
        };
        f.write_str(name)
    }
}

/// View raw `(data, shape)` model output as a 2-D array.
///
/// Accepts `[N, D]` or `[1, N, D]`; a leading batch dimension of 1 is squeezed.
///
/// # Errors
///
/// Returns [`PostprocessError::ShapeMismatch`] for any other rank, a batch
/// larger than 1, or data whose length does not match the shape.
pub fn squeeze_batch<'a>(data: &'a [f32], shape: &[usize]) -> Result<ArrayView2<'a, f32>> {
    let (rows, cols) = match *shape {
        [rows, cols] | [1, rows, cols] => (rows, cols),
        [batch, _, _] => {
            return Err(PostprocessError::shape("batch size", 1, batch));
        }
        _ => {
            return Err(PostprocessError::shape(
                "output rank",
                "2 or 3",
                shape.len(),
            ));
        }
    };
    Ok(ArrayView2::from_shape((rows, cols), data)?)
}

/// Millis since `start`.
fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Detection post-processing and pose recovery pipeline.
///
/// Holds only read-only configuration; a single instance can serve any
/// number of calls, from any thread.
///
/// # Example
///
/// ```rust
/// use ndarray::array;
/// use pose6d_postprocess::{PostprocessConfig, PostprocessPipeline, PriorBoxes};
///
/// let config = PostprocessConfig::new()
///     .with_class_names(["background", "driller"])
///     .with_class_arg(Some(0));
/// let priors = PriorBoxes::from_rows(&[[0.2, 0.2, 0.2, 0.2]])?;
/// let pipeline = PostprocessPipeline::new(config, priors)?;
///
/// let detections = array![[0.0f32, 0.0, 0.0, 0.0, 0.1, 0.9]];
/// let poses = array![[0.5f32, 0.0, 0.0, 0.1, 0.2, 1.5]];
/// let output = pipeline.run(detections.view(), Some(poses.view()), (480, 640), 1.0)?;
///
/// assert_eq!(output.boxes2d[0].coordinates, [64, 48, 192, 144]);
/// assert_eq!(output.poses6d.len(), 1);
/// # Ok::<(), pose6d_postprocess::PostprocessError>(())
/// ```
#[derive(Debug, Clone)]
pub struct PostprocessPipeline {
    config: PostprocessConfig,
    class_names: Vec<String>,
    decoder: Sequential<BoxDecoder, ClassRemover>,
    selector: Sequential<ScoreFilter, NmsStage>,
    assembler: PoseAssembler,
}

impl PostprocessPipeline {
    /// Build a pipeline from a configuration and the model's prior boxes.
    ///
    /// # Errors
    ///
    /// Returns [`PostprocessError::ConfigError`] if the configuration is invalid
    /// or there are no prior boxes.
    pub fn new(config: PostprocessConfig, priors: PriorBoxes) -> Result<Self> {
        config.validate()?;
        if priors.is_empty() {
            return Err(PostprocessError::ConfigError(
                "at least one prior box is required".to_string(),
            ));
        }

        if config.renormalize && config.class_arg.is_none() {
            warn!("renormalize has no effect without class_arg");
        }

        let class_names = config.effective_class_names();
        let decoder = BoxDecoder::new(priors, config.variances)
            .then(ClassRemover::new(config.class_arg, config.renormalize));
        let selector = ScoreFilter::new(config.score_threshold).then(NmsStage::new(
            config.nms_threshold,
            config.top_k,
            config.max_detections,
        ));
        let assembler = PoseAssembler::new(class_names.clone(), config.rotation_scale);

        Ok(Self {
            config,
            class_names,
            decoder,
            selector,
            assembler,
        })
    }

    /// The pipeline configuration.
    #[must_use]
    pub const fn config(&self) -> &PostprocessConfig {
        &self.config
    }

    /// Class names after removal of the ignored class, indexed by class id.
    #[must_use]
    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    /// The prior boxes used for decoding.
    #[must_use]
    pub const fn priors(&self) -> &PriorBoxes {
        self.decoder.first().priors()
    }

    /// Run the pipeline on one image.
    ///
    /// # Arguments
    ///
    /// * `detections` - Raw `(N, 4 + C)` rows of box deltas and class scores.
    /// * `pose_regressions` - Optional `(N, 2 * num_pose_dims)` rows, rotation first.
    /// * `image_shape` - Target image shape as (height, width).
    /// * `image_scale` - Resize factor applied by preprocessing; boxes are
    ///   rescaled by its inverse.
    ///
    /// # Errors
    ///
    /// Returns [`PostprocessError::ShapeMismatch`] on malformed inputs,
    /// [`PostprocessError::ConfigError`] on an invalid image shape or scale and
    /// [`PostprocessError::SelectionMismatch`] if a survivor cannot be traced
    /// back to its anchor.
    pub fn run(
        &self,
        detections: ArrayView2<'_, f32>,
        pose_regressions: Option<ArrayView2<'_, f32>>,
        image_shape: (u32, u32),
        image_scale: f32,
    ) -> Result<PostprocessOutput> {
        let mut states = vec![PipelineState::RawOutput];
        let mut speed = Speed::default();
        let num_anchors = detections.nrows();

        let expected_cols = 4 + self.config.class_names.len();
        if detections.ncols() != expected_cols {
            return Err(PostprocessError::shape(
                "detection columns",
                expected_cols,
                detections.ncols(),
            ));
        }
        let pose_parts = pose_regressions
            .map(|poses| {
                if poses.nrows() != num_anchors {
                    return Err(PostprocessError::shape(
                        "pose regression rows",
                        num_anchors,
                        poses.nrows(),
                    ));
                }
                split_pose_regressions(poses, self.config.num_pose_dims)
            })
            .transpose()?;
        if !image_scale.is_finite() || image_scale <= 0.0 {
            return Err(PostprocessError::ConfigError(format!(
                "image_scale must be finite and positive, got {image_scale}"
            )));
        }
        let rescaler = GeometryRescaler::new(image_shape, 1.0 / image_scale)?;

        section!("Post-processing");
        verbose!("{}: {num_anchors} anchors", PipelineState::RawOutput);

        let start = Instant::now();
        let box_data = self.decoder.process(detections)?;
        speed.decode = Some(elapsed_ms(start));
        states.push(PipelineState::Decoded);
        verbose!("{}: {:?}", PipelineState::Decoded, box_data.dim());

        let start = Instant::now();
        let survivors = self.selector.process(box_data.view())?;
        speed.nms = Some(elapsed_ms(start));
        states.push(PipelineState::ScoreFiltered);
        states.push(PipelineState::NmsSuppressed);
        verbose!("{}: {} survivors", PipelineState::NmsSuppressed, survivors.len());

        let start = Instant::now();
        let selection = SelectionIndex::from_detections(&survivors, num_anchors)?;
        let boxes2d = rescaler.boxes2d(&survivors, &self.class_names)?;
        states.push(PipelineState::Rescaled);
        verbose!("{}: {image_shape:?}", PipelineState::Rescaled);

        let mut warnings = Vec::new();
        let mut poses6d = Vec::new();
        if survivors.is_empty() {
            warnings.push(PostprocessWarning::EmptyDetections);
            verbose!("{}", PostprocessWarning::EmptyDetections);
        } else if let Some((rotations, translations)) = pose_parts {
            let rotations = selection.gather(rotations)?;
            let translations = selection.gather(translations)?;
            poses6d = self
                .assembler
                .assemble(&survivors, rotations.view(), translations.view())?;
            states.push(PipelineState::Posed);
            verbose!("{}: {} poses", PipelineState::Posed, poses6d.len());
        }
        speed.assemble = Some(elapsed_ms(start));
        states.push(PipelineState::Final);

        let output = PostprocessOutput {
            boxes2d,
            poses6d,
            selection,
            warnings,
            states,
            speed,
        };
        verbose!("{}{:.1}ms", output.verbose(), speed.total());
        Ok(output)
    }

    /// Run the pipeline on raw `(data, shape)` outputs.
    ///
    /// Shapes may carry a leading batch dimension of 1, see [`squeeze_batch`].
    ///
    /// # Errors
    ///
    /// See [`PostprocessPipeline::run`] and [`squeeze_batch`].
    pub fn run_raw(
        &self,
        detections: (&[f32], &[usize]),
        pose_regressions: Option<(&[f32], &[usize])>,
        image_shape: (u32, u32),
        image_scale: f32,
    ) -> Result<PostprocessOutput> {
        let detections = squeeze_batch(detections.0, detections.1)?;
        let pose_regressions = pose_regressions
            .map(|(data, shape)| squeeze_batch(data, shape))
            .transpose()?;
        self.run(detections, pose_regressions, image_shape, image_scale)
    }
}
