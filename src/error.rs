//! Error types for the patch-repair crate.

/// Errors that can occur while decoding detections and repairing images.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The repair rectangle is empty or does not fit inside the target image.
    #[error("invalid repair region {width}x{height} at ({x}, {y}) for {image_width}x{image_height} image")]
    InvalidRegion {
        /// Region x origin.
        x: u32,
        /// Region y origin.
        y: u32,
        /// Region width.
        width: u32,
        /// Region height.
        height: u32,
        /// Target image width.
        image_width: u32,
        /// Target image height.
        image_height: u32,
    },

    /// A raw detector tensor has a shape the decoder cannot interpret.
    #[error("unexpected detector tensor shape {0:?}")]
    TensorShape(Vec<usize>),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A sidecar tensor file is not valid JSON.
    #[error("invalid tensor JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A sidecar tensor file is valid JSON but not a rectangular numeric array.
    #[error("malformed tensor: {0}")]
    InvalidTensor(String),

    /// The image format is not supported.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// An error occurred during image processing (load, save, encode).
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Every task in a non-empty batch failed.
    #[error("no image in the batch was repaired:\n{0}")]
    BatchFailed(String),
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
