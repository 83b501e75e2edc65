//! Patch compositing from a clean reference image.
//!
//! The reference depicts the same scene as the target, possibly at another
//! resolution. It is resampled onto the target's pixel grid and the repair
//! rectangle is copied over verbatim:
//! `output(x, y) = reference'(x, y)` inside the rectangle, `target(x, y)`
//! everywhere else.

use std::borrow::Cow;

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Pixel};

use crate::error::{Error, Result};
use crate::geometry::Rect;

/// An owned image buffer of pixel type `P`.
pub type PixelBuffer<P> = ImageBuffer<P, Vec<<P as Pixel>::Subpixel>>;

/// Resampling filter for the reference image. Nearest and bilinear alias
/// visibly along the patch border.
const RESAMPLE_FILTER: FilterType = FilterType::Lanczos3;

/// Resample `reference` to exactly `width` x `height`.
///
/// Borrows the input when it already has the requested dimensions.
#[must_use]
pub fn resample_to<P>(reference: &PixelBuffer<P>, width: u32, height: u32) -> Cow<'_, PixelBuffer<P>>
where
    P: Pixel + 'static,
    P::Subpixel: 'static,
{
    if reference.dimensions() == (width, height) {
        Cow::Borrowed(reference)
    } else {
        Cow::Owned(imageops::resize(reference, width, height, RESAMPLE_FILTER))
    }
}

/// Return a copy of `target` with `rect` overwritten by the matching pixels of
/// `reference`.
///
/// Neither input is modified. Pixels outside `rect` are copied from `target`
/// unchanged, so the output differs from the target only inside `rect`.
///
/// # Errors
///
/// Returns [`Error::InvalidRegion`] if `rect` is empty or does not lie inside
/// the target image.
pub fn repair<P>(target: &PixelBuffer<P>, reference: &PixelBuffer<P>, rect: Rect) -> Result<PixelBuffer<P>>
where
    P: Pixel + 'static,
    P::Subpixel: 'static,
{
    let (width, height) = target.dimensions();
    if rect.is_empty() || !rect.fits_within(width, height) {
        return Err(Error::InvalidRegion {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            image_width: width,
            image_height: height,
        });
    }

    let resampled = resample_to(reference, width, height);
    let mut output = target.clone();

    for y in rect.y..rect.y + rect.height {
        for x in rect.x..rect.x + rect.width {
            output.put_pixel(x, y, *resampled.get_pixel(x, y));
        }
    }

    Ok(output)
}
