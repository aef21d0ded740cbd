// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Anchor-relative box encoding and decoding.
//!
//! Detection heads regress `(dx, dy, dw, dh)` offsets relative to a fixed set
//! of prior boxes. Decoding scales those offsets by the configured variances,
//! applies them to the prior's center/size parameterization and converts the
//! result to normalized corner form `(x_min, y_min, x_max, y_max)`.

use ndarray::{Array2, ArrayView2, Axis, s};

use crate::error::{PostprocessError, Result};
use crate::processor::Processor;

/// Fixed anchor geometry, one `(center_x, center_y, width, height)` row per anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorBoxes {
    data: Array2<f32>,
}

impl PriorBoxes {
    /// Create prior boxes from an `(N, 4)` array in center form.
    ///
    /// # Errors
    ///
    /// Returns [`PostprocessError::ShapeMismatch`] if the array does not have
    /// 4 columns, and [`PostprocessError::ConfigError`] if a value is not
    /// finite or a width/height is not positive.
    pub fn new(data: Array2<f32>) -> Result<Self> {
        if data.ncols() != 4 {
            return Err(PostprocessError::shape("prior box columns", 4, data.ncols()));
        }
        if data.iter().any(|v| !v.is_finite()) {
            return Err(PostprocessError::ConfigError(
                "prior boxes contain non-finite values".to_string(),
            ));
        }
        if data.slice(s![.., 2..4]).iter().any(|&v| v <= 0.0) {
            return Err(PostprocessError::ConfigError(
                "prior box width and height must be positive".to_string(),
            ));
        }
        Ok(Self { data })
    }

    /// Create prior boxes from rows of `[center_x, center_y, width, height]`.
    ///
    /// # Errors
    ///
    /// See [`PriorBoxes::new`].
    pub fn from_rows(rows: &[[f32; 4]]) -> Result<Self> {
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Self::new(Array2::from_shape_vec((rows.len(), 4), flat)?)
    }

    /// Number of anchors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.nrows()
    }

    /// Check if there are no anchors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.nrows() == 0
    }

    /// View of the `(N, 4)` center-form array.
    #[must_use]
    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.data.view()
    }
}

/// Convert a center-form box `[cx, cy, w, h]` to corners `[x1, y1, x2, y2]`.
#[must_use]
pub fn center_to_corner(b: [f32; 4]) -> [f32; 4] {
    let [cx, cy, w, h] = b;
    [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]
}

/// Convert a corner-form box `[x1, y1, x2, y2]` to center form `[cx, cy, w, h]`.
#[must_use]
pub fn corner_to_center(b: [f32; 4]) -> [f32; 4] {
    let [x1, y1, x2, y2] = b;
    [f32::midpoint(x1, x2), f32::midpoint(y1, y2), x2 - x1, y2 - y1]
}

fn check_rows(what: &str, rows: usize, priors: &PriorBoxes, cols: usize) -> Result<()> {
    if cols < 4 {
        return Err(PostprocessError::shape(what, "at least 4 columns", cols));
    }
    if rows != priors.len() {
        return Err(PostprocessError::shape(
            &format!("{what} rows vs prior boxes"),
            priors.len(),
            rows,
        ));
    }
    Ok(())
}

/// Decode `(N, 4)` anchor deltas into `(N, 4)` normalized corner boxes.
///
/// # Errors
///
/// Returns [`PostprocessError::ShapeMismatch`] if `deltas` does not have 4
/// columns, its row count differs from the number of priors, or a decoded
/// box is not finite (NaN deltas, or a size delta whose `exp` overflows).
pub fn decode(
    deltas: ArrayView2<'_, f32>,
    priors: &PriorBoxes,
    variances: [f32; 4],
) -> Result<Array2<f32>> {
    if deltas.ncols() != 4 {
        return Err(PostprocessError::shape("box delta columns", 4, deltas.ncols()));
    }
    check_rows("box deltas", deltas.nrows(), priors, deltas.ncols())?;

    let mut boxes = Array2::zeros((deltas.nrows(), 4));
    for (anchor, ((delta, prior), mut out)) in deltas
        .outer_iter()
        .zip(priors.data.outer_iter())
        .zip(boxes.outer_iter_mut())
        .enumerate()
    {
        let cx = delta[0].mul_add(variances[0] * prior[2], prior[0]);
        let cy = delta[1].mul_add(variances[1] * prior[3], prior[1]);
        let w = prior[2] * (delta[2] * variances[2]).exp();
        let h = prior[3] * (delta[3] * variances[3]).exp();
        let corners = center_to_corner([cx, cy, w, h]);
        if corners.iter().any(|v| !v.is_finite()) {
            return Err(PostprocessError::shape(
                &format!("decoded box of anchor {anchor}"),
                "finite corners",
                format!("{corners:?}"),
            ));
        }
        for (dst, src) in out.iter_mut().zip(corners) {
            *dst = src;
        }
    }
    Ok(boxes)
}

/// Encode `(N, 4)` corner boxes back into anchor deltas.
///
/// This is the inverse of [`decode`]. Boxes with non-positive width or height
/// produce non-finite size deltas.
///
/// # Errors
///
/// Returns [`PostprocessError::ShapeMismatch`] on the same conditions as [`decode`].
pub fn encode(
    boxes: ArrayView2<'_, f32>,
    priors: &PriorBoxes,
    variances: [f32; 4],
) -> Result<Array2<f32>> {
    if boxes.ncols() != 4 {
        return Err(PostprocessError::shape("box columns", 4, boxes.ncols()));
    }
    check_rows("boxes", boxes.nrows(), priors, boxes.ncols())?;

    let mut deltas = Array2::zeros((boxes.nrows(), 4));
    for ((b, prior), mut out) in boxes
        .outer_iter()
        .zip(priors.data.outer_iter())
        .zip(deltas.outer_iter_mut())
    {
        let [cx, cy, w, h] = corner_to_center([b[0], b[1], b[2], b[3]]);
        out[0] = (cx - prior[0]) / (variances[0] * prior[2]);
        out[1] = (cy - prior[1]) / (variances[1] * prior[3]);
        out[2] = (w / prior[2]).ln() / variances[2];
        out[3] = (h / prior[3]).ln() / variances[3];
    }
    Ok(deltas)
}

/// Decode the box columns of a raw `(N, 4 + C)` detection array.
///
/// The first four columns are replaced with decoded corners; the class score
/// columns are copied unchanged.
///
/// # Errors
///
/// Returns [`PostprocessError::ShapeMismatch`] if the array has fewer than 4
/// columns or its row count differs from the number of priors.
pub fn decode_detections(
    detections: ArrayView2<'_, f32>,
    priors: &PriorBoxes,
    variances: [f32; 4],
) -> Result<Array2<f32>> {
    check_rows("detections", detections.nrows(), priors, detections.ncols())?;
    let boxes = decode(detections.slice(s![.., 0..4]), priors, variances)?;
    let scores = detections.slice(s![.., 4..]);
    Ok(ndarray::concatenate(Axis(1), &[boxes.view(), scores])?)
}

/// Stage decoding raw detections against a fixed set of priors.
#[derive(Debug, Clone)]
pub struct BoxDecoder {
    priors: PriorBoxes,
    variances: [f32; 4],
}

impl BoxDecoder {
    /// Create a decoder for the given priors and variances.
    #[must_use]
    pub const fn new(priors: PriorBoxes, variances: [f32; 4]) -> Self {
        Self { priors, variances }
    }

    /// The prior boxes used by this decoder.
    #[must_use]
    pub const fn priors(&self) -> &PriorBoxes {
        &self.priors
    }
}

impl<'a> Processor<ArrayView2<'a, f32>> for BoxDecoder {
    type Output = Array2<f32>;

    fn process(&self, input: ArrayView2<'a, f32>) -> Result<Array2<f32>> {
        decode_detections(input, &self.priors, self.variances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    const VARIANCES: [f32; 4] = [0.1, 0.1, 0.2, 0.2];

    fn priors() -> PriorBoxes {
        PriorBoxes::from_rows(&[[0.2, 0.2, 0.2, 0.2], [0.5, 0.6, 0.3, 0.1]]).unwrap()
    }

    #[test]
    fn test_zero_deltas_decode_to_prior() {
        let deltas = Array2::zeros((2, 4));
        let boxes = decode(deltas.view(), &priors(), VARIANCES).unwrap();
        let expected = [[0.1, 0.1, 0.3, 0.3], [0.35, 0.55, 0.65, 0.65]];
        for (row, exp) in boxes.outer_iter().zip(expected) {
            for (a, b) in row.iter().zip(exp) {
                assert!((a - b).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_decode_applies_variances() {
        let deltas = array![[1.0, -1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]];
        let boxes = decode(deltas.view(), &priors(), VARIANCES).unwrap();
        // center shifted by 0.1 * 0.2 on x and -0.1 * 0.2 on y
        let c = corner_to_center([boxes[[0, 0]], boxes[[0, 1]], boxes[[0, 2]], boxes[[0, 3]]]);
        assert!((c[0] - 0.22).abs() < 1e-6);
        assert!((c[1] - 0.18).abs() < 1e-6);
        // width scaled by exp(0.2)
        let w = boxes[[1, 2]] - boxes[[1, 0]];
        assert!((w - 0.3 * 0.2f32.exp()).abs() < 1e-6);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let deltas = array![[0.3, -0.7, 0.25, -0.4], [-1.2, 0.9, -0.6, 1.1]];
        let p = priors();
        let boxes = decode(deltas.view(), &p, VARIANCES).unwrap();
        let back = encode(boxes.view(), &p, VARIANCES).unwrap();
        for (a, b) in deltas.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn test_decode_rejects_non_finite() {
        let nan = array![[f32::NAN, 0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 0.0]];
        let err = decode(nan.view(), &priors(), VARIANCES).unwrap_err();
        assert!(matches!(err, PostprocessError::ShapeMismatch(_)));

        // exp(1000 * 0.2) overflows f32
        let overflow = array![[0.0, 0.0, 0.0, 0.0], [0.0, 0.0, 1000.0, 0.0]];
        let err = decode(overflow.view(), &priors(), VARIANCES).unwrap_err();
        assert!(err.to_string().contains("anchor 1"));
    }

    #[test]
    fn test_decode_row_mismatch() {
        let deltas = Array2::zeros((3, 4));
        let err = decode(deltas.view(), &priors(), VARIANCES).unwrap_err();
        assert!(matches!(err, PostprocessError::ShapeMismatch(_)));
    }

    #[test]
    fn test_decode_detections_keeps_scores() {
        let detections = array![[0.0, 0.0, 0.0, 0.0, 0.9, 0.1], [0.0, 0.0, 0.0, 0.0, 0.2, 0.8]];
        let decoded = BoxDecoder::new(priors(), VARIANCES)
            .process(detections.view())
            .unwrap();
        assert_eq!(decoded.dim(), (2, 6));
        assert!((decoded[[0, 4]] - 0.9).abs() < f32::EPSILON);
        assert!((decoded[[1, 5]] - 0.8).abs() < f32::EPSILON);
        assert!((decoded[[0, 2]] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_prior_validation() {
        assert!(PriorBoxes::new(Array2::zeros((2, 3))).is_err());
        assert!(PriorBoxes::from_rows(&[[0.5, 0.5, 0.0, 0.1]]).is_err());
        assert!(PriorBoxes::from_rows(&[[f32::NAN, 0.5, 0.1, 0.1]]).is_err());
        assert_eq!(priors().len(), 2);
    }

    #[test]
    fn test_center_corner_conversion() {
        let c = [0.5, 0.4, 0.2, 0.4];
        let back = corner_to_center(center_to_corner(c));
        for (a, b) in c.iter().zip(back) {
            assert!((a - b).abs() < 1e-6);
        }
    }
}
