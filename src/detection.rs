//! Top-1 decoding of raw detector output.
//!
//! Single-class YOLO-style detectors emit a 2-D tensor holding, for every
//! anchor, `[cx, cy, w, h, confidence, ...]`. Exporters disagree on which axis
//! comes first, so the decoder accepts both:
//!
//! - **Channel-major** (`[attributes, anchors]`): each row is one attribute
//!   across all anchors.
//! - **Anchor-major** (`[anchors, attributes]`): each row is one anchor.
//!
//! The layout is inferred from the shape: the larger dimension is taken as the
//! anchor dimension. This relies on the anchor count (thousands) exceeding the
//! attribute count (5 to 84); it is an assumption about real detectors, not a
//! guarantee, and tiny hand-built tensors must respect it too.

use ndarray::{ArrayView2, ArrayViewD, Axis, Ix2};
use tracing::debug;

use crate::error::{Error, Result};

/// Index of the confidence value within an anchor's attributes.
pub const CONFIDENCE_INDEX: usize = 4;

/// Number of attributes consulted per anchor. Trailing values (per-class
/// scores) are ignored.
const ATTRIBUTES: usize = CONFIDENCE_INDEX + 1;

/// Memory layout of a raw detector tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// `[anchors, attributes]`: one row per anchor.
    AnchorMajor,
    /// `[attributes, anchors]`: one row per attribute.
    ChannelMajor,
}

impl TensorLayout {
    /// Resolve the layout of a tensor with shape `(rows, cols)`.
    ///
    /// More rows than columns means the rows are anchors.
    #[must_use]
    pub fn resolve((rows, cols): (usize, usize)) -> Self {
        if rows > cols {
            Self::AnchorMajor
        } else {
            Self::ChannelMajor
        }
    }

    /// View `tensor` as `[anchors, attributes]` without copying.
    fn anchor_rows(self, tensor: ArrayView2<'_, f32>) -> ArrayView2<'_, f32> {
        match self {
            Self::AnchorMajor => tensor,
            Self::ChannelMajor => tensor.reversed_axes(),
        }
    }
}

/// A single detection in model-input pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// Box center x.
    pub cx: f32,
    /// Box center y.
    pub cy: f32,
    /// Box width.
    pub width: f32,
    /// Box height.
    pub height: f32,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f32,
}

/// Return the highest-confidence detection, or `None` if it scores below
/// `confidence_threshold`.
///
/// Runs one pass over the anchors. Ties keep the lowest anchor index. The
/// running maximum starts at zero and only a strictly greater confidence
/// replaces it, so a tensor whose best confidence is `0` yields `None` even
/// with a non-positive threshold. Tensors with fewer than five attributes per
/// anchor are degenerate and also yield `None`.
#[must_use]
pub fn decode(tensor: ArrayView2<'_, f32>, confidence_threshold: f32) -> Option<Detection> {
    let layout = TensorLayout::resolve(tensor.dim());
    let anchors = layout.anchor_rows(tensor);

    if anchors.ncols() < ATTRIBUTES {
        debug!(
            ?layout,
            shape = ?anchors.shape(),
            "tensor carries fewer than {ATTRIBUTES} attributes per anchor"
        );
        return None;
    }

    let mut max_confidence = 0.0_f32;
    let mut best = None;
    for (idx, &confidence) in anchors.column(CONFIDENCE_INDEX).iter().enumerate() {
        if confidence > max_confidence {
            max_confidence = confidence;
            best = Some(idx);
        }
    }

    let Some(idx) = best else {
        debug!(?layout, anchors = anchors.nrows(), "no anchor with positive confidence");
        return None;
    };

    if max_confidence < confidence_threshold {
        debug!(
            ?layout,
            max_confidence, confidence_threshold, "best anchor below threshold"
        );
        return None;
    }

    let row = anchors.row(idx);
    debug!(?layout, anchor = idx, confidence = max_confidence, "selected detection");
    Some(Detection {
        cx: row[0],
        cy: row[1],
        width: row[2],
        height: row[3],
        confidence: max_confidence,
    })
}

/// Drop a leading batch dimension of size one, yielding the 2-D tensor the
/// decoder expects.
///
/// Accepts `[a, b]` and `[1, a, b]`.
///
/// # Errors
///
/// Returns [`Error::TensorShape`] for any other shape.
pub fn squeeze_batch(tensor: ArrayViewD<'_, f32>) -> Result<ArrayView2<'_, f32>> {
    let shape = tensor.shape().to_vec();
    let batch = shape.first().copied();
    let squeezed = match (tensor.ndim(), batch) {
        (2, _) => tensor,
        (3, Some(1)) => tensor.index_axis_move(Axis(0), 0),
        _ => return Err(Error::TensorShape(shape)),
    };
    squeezed
        .into_dimensionality::<Ix2>()
        .map_err(|_| Error::TensorShape(shape))
}
