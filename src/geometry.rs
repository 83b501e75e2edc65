//! Mapping detections from model-input space to image pixels.

use crate::detection::Detection;

/// Extra margin added around a detected box, as a fraction of its size per
/// side.
///
/// Detector boxes around text-like watermarks tend to be tight horizontally,
/// hence the wider horizontal default. Both values are empirical.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Padding {
    /// Fraction of the box width added on the left and on the right.
    pub horizontal: f32,
    /// Fraction of the box height added above and below.
    pub vertical: f32,
}

impl Default for Padding {
    fn default() -> Self {
        Self {
            horizontal: 0.2,
            vertical: 0.1,
        }
    }
}

/// An axis-aligned pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Rect {
    /// Create a rectangle from its top-left corner and size.
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A rectangle with no area marks "nothing to repair".
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the rectangle lies fully inside a `width` x `height` image.
    #[must_use]
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        u64::from(self.x) + u64::from(self.width) <= u64::from(width)
            && u64::from(self.y) + u64::from(self.height) <= u64::from(height)
    }

    /// Whether pixel `(px, py)` lies inside the rectangle.
    #[must_use]
    pub fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x
            && py >= self.y
            && u64::from(px) < u64::from(self.x) + u64::from(self.width)
            && u64::from(py) < u64::from(self.y) + u64::from(self.height)
    }
}

/// Truncate toward zero, saturating at the `i64` range. NaN becomes 0.
#[allow(clippy::cast_possible_truncation)]
fn trunc(v: f64) -> i64 {
    v as i64
}

/// Clamp a signed span `[origin, origin + extent)` to `[0, limit]`.
///
/// The origin is clamped first; the extent is then capped against the clamped
/// origin.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_span(origin: i64, extent: i64, limit: u32) -> (u32, u32) {
    let limit = i64::from(limit);
    let origin = origin.clamp(0, limit);
    let extent = extent.clamp(0, limit - origin);
    (origin as u32, extent as u32)
}

/// Convert a detection into a padded rectangle in image pixel coordinates.
///
/// The square model input is stretched to the image independently on each
/// axis (no letterbox correction). Coordinates are truncated toward zero, then
/// padded by `padding`, then clamped so the result always fits inside the
/// image. Non-finite geometry and a zero `model_input_size` produce an empty
/// rectangle.
#[must_use]
pub fn map_to_image(
    detection: &Detection,
    model_input_size: u32,
    image_width: u32,
    image_height: u32,
    padding: Padding,
) -> Rect {
    let finite = [detection.cx, detection.cy, detection.width, detection.height]
        .iter()
        .all(|v| v.is_finite());
    if !finite || model_input_size == 0 {
        return Rect::default();
    }

    let input = f64::from(model_input_size);
    let scale_x = f64::from(image_width) / input;
    let scale_y = f64::from(image_height) / input;

    let cx = f64::from(detection.cx);
    let cy = f64::from(detection.cy);
    let w = f64::from(detection.width);
    let h = f64::from(detection.height);

    let x = trunc((cx - w / 2.0) * scale_x);
    let y = trunc((cy - h / 2.0) * scale_y);
    let w = trunc(w * scale_x);
    let h = trunc(h * scale_y);

    #[allow(clippy::cast_precision_loss)]
    let pad_w = trunc(w as f64 * f64::from(padding.horizontal));
    #[allow(clippy::cast_precision_loss)]
    let pad_h = trunc(h as f64 * f64::from(padding.vertical));

    let (x, width) = clamp_span(
        x.saturating_sub(pad_w),
        w.saturating_add(pad_w.saturating_mul(2)),
        image_width,
    );
    let (y, height) = clamp_span(
        y.saturating_sub(pad_h),
        h.saturating_add(pad_h.saturating_mul(2)),
        image_height,
    );

    Rect {
        x,
        y,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(cx: f32, cy: f32, width: f32, height: f32) -> Detection {
        Detection {
            cx,
            cy,
            width,
            height,
            confidence: 0.9,
        }
    }

    #[test]
    fn centered_box_at_native_resolution() {
        let r = map_to_image(&det(320.0, 320.0, 100.0, 50.0), 640, 640, 640, Padding::default());
        assert_eq!(r, Rect::new(250, 290, 140, 60));
    }

    #[test]
    fn scales_each_axis_independently() {
        // 2x horizontally, 0.5x vertically.
        let r = map_to_image(&det(320.0, 320.0, 100.0, 100.0), 640, 1280, 320, Padding::default());
        // x = 540, w = 200, pad 40; y = 135, h = 50, pad 5
        assert_eq!(r, Rect::new(500, 130, 280, 60));
    }

    #[test]
    fn truncates_toward_zero() {
        let none = Padding {
            horizontal: 0.0,
            vertical: 0.0,
        };
        // scale 1.5: x = 10.5 * 1.5 = 15.75 -> 15, w = 7 * 1.5 = 10.5 -> 10
        let r = map_to_image(&det(14.0, 14.0, 7.0, 7.0), 100, 150, 150, none);
        assert_eq!(r, Rect::new(15, 15, 10, 10));
    }

    #[test]
    fn negative_origin_clamps_to_zero_and_keeps_far_edge() {
        let r = map_to_image(&det(10.0, 10.0, 100.0, 40.0), 640, 640, 640, Padding::default());
        // x = -40 - 20 -> 0, width 140 capped against origin 0
        assert_eq!(r.x, 0);
        assert_eq!(r.width, 140);
        // y = -10 - 4 -> 0, height 48
        assert_eq!(r.y, 0);
        assert_eq!(r.height, 48);
    }

    #[test]
    fn box_past_far_edge_is_capped() {
        let r = map_to_image(&det(630.0, 630.0, 100.0, 100.0), 640, 640, 480, Padding::default());
        assert!(r.fits_within(640, 480));
        assert_eq!(r.x + r.width, 640);
        assert_eq!(r.y + r.height, 480);
    }

    #[test]
    fn box_past_far_corner_is_empty() {
        let r = map_to_image(&det(2000.0, 2000.0, 50.0, 50.0), 640, 640, 640, Padding::default());
        assert!(r.is_empty());
        assert!(r.fits_within(640, 640));
    }

    #[test]
    fn box_before_origin_keeps_its_extent() {
        // Only the origin is clamped; the padded size survives.
        let r = map_to_image(&det(-500.0, -500.0, 50.0, 50.0), 640, 640, 640, Padding::default());
        assert_eq!(r, Rect::new(0, 0, 70, 60));
    }

    #[test]
    fn invariant_holds_across_a_grid_of_inputs() {
        let values = [-1e6_f32, -700.0, -3.5, 0.0, 1.0, 99.9, 320.0, 639.0, 900.0, 1e9];
        let sizes = [(1, 1), (17, 3), (640, 640), (1920, 1080), (300, 4000)];
        for &(iw, ih) in &sizes {
            for &cx in &values {
                for &w in &values {
                    let r = map_to_image(&det(cx, 640.0 - cx, w, w.abs()), 640, iw, ih, Padding::default());
                    assert!(r.fits_within(iw, ih), "{r:?} escapes {iw}x{ih}");
                }
            }
        }
    }

    #[test]
    fn non_finite_or_zero_input_size_is_empty() {
        let r = map_to_image(&det(f32::NAN, 1.0, 1.0, 1.0), 640, 640, 640, Padding::default());
        assert!(r.is_empty());
        let r = map_to_image(&det(1.0, 1.0, f32::INFINITY, 1.0), 640, 640, 640, Padding::default());
        assert!(r.is_empty());
        let r = map_to_image(&det(320.0, 320.0, 10.0, 10.0), 0, 640, 640, Padding::default());
        assert!(r.is_empty());
    }

    #[test]
    fn zero_sized_image_is_empty() {
        let r = map_to_image(&det(320.0, 320.0, 100.0, 50.0), 640, 0, 0, Padding::default());
        assert_eq!(r, Rect::default());
    }

    #[test]
    fn rect_contains_and_fits() {
        let r = Rect::new(2, 3, 4, 5);
        assert!(r.contains(2, 3));
        assert!(r.contains(5, 7));
        assert!(!r.contains(6, 7));
        assert!(!r.contains(5, 8));
        assert!(r.fits_within(6, 8));
        assert!(!r.fits_within(5, 8));
        assert!(Rect::new(0, 0, 0, 9).is_empty());
    }
}
