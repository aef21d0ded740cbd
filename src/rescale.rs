// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Mapping between normalized box corners and integer pixel coordinates.

use ndarray::{Array2, ArrayView2, Zip};

use crate::error::{PostprocessError, Result};
use crate::results::{Box2D, Detections};

/// Converts normalized `[x1, y1, x2, y2]` boxes to pixels of a target image.
///
/// `x_px = round(x * scale * width)`, `y_px = round(y * scale * height)`,
/// rounding half away from zero, then clamped to `[0, dim - 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryRescaler {
    height: u32,
    width: u32,
    scale: f32,
}

impl GeometryRescaler {
    /// Create a rescaler for an image of `shape = (height, width)`.
    ///
    /// # Errors
    ///
    /// Returns [`PostprocessError::ConfigError`] if a dimension is zero or
    /// `scale` is not finite and positive.
    pub fn new(shape: (u32, u32), scale: f32) -> Result<Self> {
        let (height, width) = shape;
        if height == 0 || width == 0 {
            return Err(PostprocessError::ConfigError(format!(
                "image dimensions must be positive, got {height}x{width}"
            )));
        }
        if !scale.is_finite() || scale <= 0.0 {
            return Err(PostprocessError::ConfigError(format!(
                "scale must be finite and positive, got {scale}"
            )));
        }
        Ok(Self {
            height,
            width,
            scale,
        })
    }

    /// Image shape as (height, width).
    #[must_use]
    pub const fn shape(&self) -> (u32, u32) {
        (self.height, self.width)
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn pixel(&self, value: f32, dim: u32) -> i32 {
        let max = (dim - 1) as f32;
        (value * self.scale * dim as f32).round().clamp(0.0, max) as i32
    }

    #[allow(clippy::cast_precision_loss)]
    fn fraction(&self, value: i32, dim: u32) -> f32 {
        value as f32 / (dim as f32 * self.scale)
    }

    /// Rescale one normalized corner box to pixels.
    #[must_use]
    pub fn rescale_box(&self, coords: [f32; 4]) -> [i32; 4] {
        [
            self.pixel(coords[0], self.width),
            self.pixel(coords[1], self.height),
            self.pixel(coords[2], self.width),
            self.pixel(coords[3], self.height),
        ]
    }

    /// Map one pixel box back to normalized coordinates.
    #[must_use]
    pub fn normalize_box(&self, pixels: [i32; 4]) -> [f32; 4] {
        [
            self.fraction(pixels[0], self.width),
            self.fraction(pixels[1], self.height),
            self.fraction(pixels[2], self.width),
            self.fraction(pixels[3], self.height),
        ]
    }

    /// Build [`Box2D`] values for the detections.
    ///
    /// # Errors
    ///
    /// Returns [`PostprocessError::ShapeMismatch`] if a class id has no name
    /// or a box is not finite.
    pub fn boxes2d(&self, detections: &Detections, class_names: &[String]) -> Result<Vec<Box2D>> {
        (0..detections.len())
            .map(|i| {
                let (bbox, score, class_id, _) = detections.candidate(i);
                check_finite(&bbox)?;
                let class_name = class_names.get(class_id).ok_or_else(|| {
                    PostprocessError::shape(
                        "class id",
                        format!("below {}", class_names.len()),
                        class_id,
                    )
                })?;
                Ok(Box2D {
                    coordinates: self.rescale_box(bbox),
                    class_id,
                    class_name: class_name.clone(),
                    score,
                })
            })
            .collect()
    }
}

fn check_box_columns(cols: usize) -> Result<()> {
    if cols != 4 {
        return Err(PostprocessError::shape("box columns", 4, cols));
    }
    Ok(())
}

// NaN would otherwise cast to pixel 0 and infinities to the image edge.
fn check_finite(coords: &[f32]) -> Result<()> {
    if coords.iter().any(|v| !v.is_finite()) {
        return Err(PostprocessError::shape(
            "box coordinates",
            "finite values",
            format!("{coords:?}"),
        ));
    }
    Ok(())
}

/// Rescale `(M, 4)` normalized corner boxes to integer pixel coordinates.
///
/// # Arguments
///
/// * `boxes` - Normalized `[x1, y1, x2, y2]` rows.
/// * `shape` - Target image shape as (height, width).
/// * `scale` - Extra scale factor; the pipeline passes `1 / image_scale`.
///
/// # Errors
///
/// Returns [`PostprocessError::ShapeMismatch`] if `boxes` does not have 4
/// columns or holds a non-finite value, and [`PostprocessError::ConfigError`]
/// on an invalid shape or scale.
pub fn rescale(boxes: ArrayView2<'_, f32>, shape: (u32, u32), scale: f32) -> Result<Array2<i32>> {
    check_box_columns(boxes.ncols())?;
    for row in boxes.rows() {
        check_finite(&[row[0], row[1], row[2], row[3]])?;
    }
    let rescaler = GeometryRescaler::new(shape, scale)?;
    let mut pixels = Array2::zeros(boxes.raw_dim());
    Zip::from(pixels.rows_mut())
        .and(boxes.rows())
        .for_each(|mut out, b| {
            let px = rescaler.rescale_box([b[0], b[1], b[2], b[3]]);
            for (dst, v) in out.iter_mut().zip(px) {
                *dst = v;
            }
        });
    Ok(pixels)
}

/// Inverse of [`rescale`], up to rounding and clamping.
///
/// # Errors
///
/// Returns [`PostprocessError::ShapeMismatch`] if `pixels` does not have 4
/// columns and [`PostprocessError::ConfigError`] on an invalid shape or scale.
pub fn normalize(pixels: ArrayView2<'_, i32>, shape: (u32, u32), scale: f32) -> Result<Array2<f32>> {
    check_box_columns(pixels.ncols())?;
    let rescaler = GeometryRescaler::new(shape, scale)?;
    let mut boxes = Array2::zeros(pixels.raw_dim());
    Zip::from(boxes.rows_mut())
        .and(pixels.rows())
        .for_each(|mut out, p| {
            let normalized = rescaler.normalize_box([p[0], p[1], p[2], p[3]]);
            for (dst, v) in out.iter_mut().zip(normalized) {
                *dst = v;
            }
        });
    Ok(boxes)
}
