//! The detector seam: model-input preprocessing and inference backends.
//!
//! Model loading and execution live outside this crate. A backend receives the
//! preprocessed input and returns the raw output tensor, which
//! [`crate::detection::decode`] interprets.

use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::RgbaImage;
use ndarray::{Array2, Array4, ArrayD, ArrayView4, IxDyn};
use serde_json::Value;
use tracing::debug;

use crate::detection::squeeze_batch;
use crate::error::{Error, Result};

/// Square input resolution of the stock watermark detector.
pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// A loaded detection model.
///
/// The engine borrows the backend for every task and never takes ownership,
/// so one loaded model serves any number of batches.
pub trait InferenceBackend: Sync {
    /// Error produced by a failed inference call.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Side length of the square model input, in pixels.
    fn input_size(&self) -> u32;

    /// Whether [`infer`](Self::infer) reads the pixel input.
    ///
    /// Backends that replay stored output return `false`; they are then
    /// handed an empty `[1, 0, 0, 3]` view and the resize is skipped.
    fn needs_input(&self) -> bool {
        true
    }

    /// Run the model on one preprocessed `[1, size, size, 3]` input.
    ///
    /// `source` identifies the image the input was built from; backends that
    /// serve precomputed results key on it, live models ignore it.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if inference fails.
    fn infer(
        &self,
        source: &Path,
        input: ArrayView4<'_, f32>,
    ) -> std::result::Result<Array2<f32>, Self::Error>;
}

/// Build the model input for `image`: stretch to `input_size` x `input_size`
/// with a bilinear filter, drop alpha, and scale to `[0, 1]`.
///
/// The result is NHWC, shape `[1, input_size, input_size, 3]`. Aspect ratio is
/// not preserved, matching how the boxes are mapped back.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn preprocess(image: &RgbaImage, input_size: u32) -> Array4<f32> {
    let resized = imageops::resize(image, input_size, input_size, FilterType::Triangle);
    let side = input_size as usize;

    Array4::from_shape_fn((1, side, side, 3), |(_, y, x, c)| {
        f32::from(resized.get_pixel(x as u32, y as u32)[c]) / 255.0
    })
}

/// Backend that replays detector output dumped next to each image.
///
/// For `photo.jpg` it reads `photo.tensor.json`, a JSON array of rows in
/// either layout, optionally wrapped in a batch dimension of one.
#[derive(Debug, Clone)]
pub struct SidecarBackend {
    input_size: u32,
}

impl SidecarBackend {
    /// Create a backend for a model with the given square input size.
    #[must_use]
    pub fn new(input_size: u32) -> Self {
        Self { input_size }
    }

    /// Path of the sidecar file holding the output for `source`.
    #[must_use]
    pub fn sidecar_path(source: &Path) -> PathBuf {
        source.with_extension("tensor.json")
    }
}

impl Default for SidecarBackend {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_SIZE)
    }
}

impl InferenceBackend for SidecarBackend {
    type Error = Error;

    fn input_size(&self) -> u32 {
        self.input_size
    }

    fn needs_input(&self) -> bool {
        false
    }

    fn infer(&self, source: &Path, _input: ArrayView4<'_, f32>) -> Result<Array2<f32>> {
        let path = Self::sidecar_path(source);
        debug!(path = %path.display(), "reading sidecar tensor");
        let file = std::fs::File::open(&path)?;
        let value: Value = serde_json::from_reader(std::io::BufReader::new(file))?;
        parse_tensor(&value)
    }
}

/// Convert a nested JSON array into a 2-D tensor.
///
/// # Errors
///
/// Returns [`Error::InvalidTensor`] for ragged or non-numeric arrays and
/// [`Error::TensorShape`] for shapes other than `[a, b]` or `[1, a, b]`.
pub fn parse_tensor(value: &Value) -> Result<Array2<f32>> {
    let mut shape = Vec::new();
    let mut data = Vec::new();
    let mut leaf_depth = None;
    collect(value, 0, &mut shape, &mut leaf_depth, &mut data)?;

    let tensor = ArrayD::from_shape_vec(IxDyn(&shape), data)
        .map_err(|e| Error::InvalidTensor(e.to_string()))?;
    Ok(squeeze_batch(tensor.view())?.to_owned())
}

fn collect(
    value: &Value,
    depth: usize,
    shape: &mut Vec<usize>,
    leaf_depth: &mut Option<usize>,
    data: &mut Vec<f32>,
) -> Result<()> {
    match value {
        Value::Array(items) => {
            if leaf_depth.is_some_and(|leaf| depth >= leaf) {
                return Err(Error::InvalidTensor(format!("unexpected array at depth {depth}")));
            }
            if depth == shape.len() {
                shape.push(items.len());
            } else if shape[depth] != items.len() {
                return Err(Error::InvalidTensor(format!(
                    "ragged array at depth {depth}: {} vs {}",
                    items.len(),
                    shape[depth]
                )));
            }
            items
                .iter()
                .try_for_each(|item| collect(item, depth + 1, shape, leaf_depth, data))
        }
        Value::Number(n) => {
            let leaf = *leaf_depth.get_or_insert(depth);
            if depth != leaf || depth != shape.len() {
                return Err(Error::InvalidTensor(format!("unexpected number at depth {depth}")));
            }
            let v = n
                .as_f64()
                .ok_or_else(|| Error::InvalidTensor(format!("unrepresentable number {n}")))?;
            #[allow(clippy::cast_possible_truncation)]
            data.push(v as f32);
            Ok(())
        }
        other => Err(Error::InvalidTensor(format!("expected number or array, found {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use serde_json::json;

    #[test]
    fn preprocess_shape_and_range() {
        let img = RgbaImage::from_pixel(33, 17, Rgba([255, 0, 51, 7]));
        let input = preprocess(&img, 64);
        assert_eq!(input.shape(), &[1, 64, 64, 3]);
        assert!((input[[0, 10, 20, 0]] - 1.0).abs() < 1e-6);
        assert!(input[[0, 10, 20, 1]].abs() < 1e-6);
        assert!((input[[0, 63, 63, 2]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn parse_plain_and_batched_tensors() {
        let t = parse_tensor(&json!([[1, 2, 3], [4, 5, 6]])).unwrap();
        assert_eq!(t.dim(), (2, 3));
        assert!((t[[1, 2]] - 6.0).abs() < f32::EPSILON);

        let t = parse_tensor(&json!([[[0.5, 1.5], [2.5, 3.5]]])).unwrap();
        assert_eq!(t.dim(), (2, 2));
        assert!((t[[1, 0]] - 2.5).abs() < f32::EPSILON);
    }

    #[test]
    fn parse_rejects_malformed_tensors() {
        assert!(matches!(
            parse_tensor(&json!([[1, 2], [3]])),
            Err(Error::InvalidTensor(_))
        ));
        assert!(matches!(
            parse_tensor(&json!([[1, 2], 3])),
            Err(Error::InvalidTensor(_))
        ));
        assert!(matches!(
            parse_tensor(&json!([[1, "x"]])),
            Err(Error::InvalidTensor(_))
        ));
        assert!(matches!(
            parse_tensor(&json!([1, 2, 3])),
            Err(Error::TensorShape(_))
        ));
        assert!(matches!(
            parse_tensor(&json!([[[1]], [[2]]])),
            Err(Error::TensorShape(_))
        ));
    }

    #[test]
    fn sidecar_path_replaces_extension() {
        assert_eq!(
            SidecarBackend::sidecar_path(Path::new("/tmp/photo.jpg")),
            PathBuf::from("/tmp/photo.tensor.json")
        );
    }

    #[test]
    fn sidecar_backend_reads_tensor_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("shot.png");
        std::fs::write(
            SidecarBackend::sidecar_path(&source),
            json!([[1, 2, 3, 4, 0.9], [5, 6, 7, 8, 0.1]]).to_string(),
        )
        .unwrap();

        let backend = SidecarBackend::default();
        let input = Array4::zeros((1, 0, 0, 3));
        let t = backend.infer(&source, input.view()).unwrap();
        assert_eq!(t.dim(), (2, 5));
        assert_eq!(backend.input_size(), DEFAULT_INPUT_SIZE);
        assert!(!backend.needs_input());

        let missing = dir.path().join("absent.png");
        assert!(matches!(backend.infer(&missing, input.view()), Err(Error::Io(_))));
    }
}
