//! Image loading and persistence collaborators.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageError, ImageFormat, RgbaImage};
use tracing::debug;

use crate::engine::RepairTask;
use crate::error::{Error, Result};

/// JPEG quality used for repaired outputs.
pub const JPEG_QUALITY: u8 = 98;

/// Default prefix prepended to repaired output file names.
pub const DEFAULT_OUTPUT_PREFIX: &str = "Fixed_";

/// Decodes a source identifier into pixels.
pub trait ImageLoader: Sync {
    /// Load and decode the image at `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read or decoded.
    fn load(&self, source: &Path) -> Result<RgbaImage>;
}

/// Receives each successfully repaired image.
///
/// Called once per repaired task. The returned string identifies where the
/// output went and is reported back in the batch result.
pub trait OutputSink: Sync {
    /// Persist the repaired image for `task`.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be stored.
    fn persist(&self, task: &RepairTask, image: &RgbaImage) -> Result<String>;
}

/// Loads images from the local file system with [`image::open`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLoader;

impl ImageLoader for FsLoader {
    fn load(&self, source: &Path) -> Result<RgbaImage> {
        Ok(image::open(source)?.to_rgba8())
    }
}

/// Writes repaired images into one directory as `<prefix><target file name>`.
///
/// Targets from different directories can share a file name. Within one
/// sink every output path is handed out once: a repeated name gets a numeric
/// suffix before the extension (`Fixed_pic.png`, `Fixed_pic_2.png`, ...).
/// Files already present in the directory from earlier runs are overwritten.
#[derive(Debug)]
pub struct DirectorySink {
    dir: PathBuf,
    prefix: String,
    claimed: Mutex<HashSet<PathBuf>>,
}

impl DirectorySink {
    /// Create a sink writing into `dir` with the default `Fixed_` prefix.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
            claimed: Mutex::new(HashSet::new()),
        }
    }

    /// Replace the file name prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Output path for a given target image, before collision suffixing.
    #[must_use]
    pub fn output_path(&self, target: &Path) -> PathBuf {
        let name = target.file_name().unwrap_or_default().to_string_lossy();
        self.dir.join(format!("{}{name}", self.prefix))
    }

    /// Reserve a unique output path for `target` within this sink.
    fn claim_path(&self, target: &Path) -> PathBuf {
        let base = self.output_path(target);
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        if claimed.insert(base.clone()) {
            return base;
        }

        let stem = base.file_stem().unwrap_or_default().to_string_lossy();
        let ext = base.extension().map(|e| e.to_string_lossy());
        let mut n = 2usize;
        loop {
            let name = match &ext {
                Some(ext) => format!("{stem}_{n}.{ext}"),
                None => format!("{stem}_{n}"),
            };
            let candidate = base.with_file_name(name);
            if claimed.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

impl OutputSink for DirectorySink {
    fn persist(&self, task: &RepairTask, image: &RgbaImage) -> Result<String> {
        if !self.dir.exists() {
            std::fs::create_dir_all(&self.dir)?;
        }
        let path = self.claim_path(&task.target);
        save_image(image, &path)?;
        debug!(path = %path.display(), "saved repaired image");
        Ok(path.display().to_string())
    }
}

/// Check if a file has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(
            ext.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "webp" | "bmp"
        ),
        None => false,
    }
}

/// Save an RGBA image with format-specific settings.
///
/// JPEG drops alpha and is written at [`JPEG_QUALITY`].
///
/// # Errors
///
/// Returns an error if the format is unsupported or writing fails.
pub fn save_image(img: &RgbaImage, path: &Path) -> Result<()> {
    let format =
        ImageFormat::from_path(path).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;
    if !matches!(
        format,
        ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP | ImageFormat::Bmp
    ) {
        return Err(Error::UnsupportedFormat(format!("{format:?}")));
    }

    let dyn_img = DynamicImage::ImageRgba8(img.clone());
    let mut w = BufWriter::new(File::create(path)?);

    if format == ImageFormat::Jpeg {
        let mut encoder = JpegEncoder::new_with_quality(&mut w, JPEG_QUALITY);
        encoder
            .encode_image(&dyn_img.to_rgb8())
            .map_err(encode_error)?;
    } else {
        dyn_img.write_to(&mut w, format).map_err(encode_error)?;
    }

    // Dropping a BufWriter discards its flush error.
    w.flush()?;
    Ok(())
}

/// Encoder I/O failures surface as [`Error::Io`], same as a failed flush.
fn encode_error(err: ImageError) -> Error {
    match err {
        ImageError::IoError(e) => Error::Io(e),
        other => Error::Image(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn is_supported_image_accepts_common_formats() {
        assert!(is_supported_image(Path::new("photo.jpg")));
        assert!(is_supported_image(Path::new("photo.JPEG")));
        assert!(is_supported_image(Path::new("photo.png")));
        assert!(is_supported_image(Path::new("photo.webp")));
        assert!(is_supported_image(Path::new("photo.bmp")));
    }

    #[test]
    fn is_supported_image_rejects_unsupported_formats() {
        assert!(!is_supported_image(Path::new("photo.gif")));
        assert!(!is_supported_image(Path::new("photo.tensor.json")));
        assert!(!is_supported_image(Path::new("photo")));
    }

    #[test]
    fn output_path_prefixes_target_name() {
        let sink = DirectorySink::new("/out");
        assert_eq!(
            sink.output_path(Path::new("/in/a/photo.jpg")),
            PathBuf::from("/out/Fixed_photo.jpg")
        );

        let sink = DirectorySink::new("/out").with_prefix("clean-");
        assert_eq!(
            sink.output_path(Path::new("shot.png")),
            PathBuf::from("/out/clean-shot.png")
        );
    }

    #[test]
    fn directory_sink_creates_dir_and_round_trips_png() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("nested").join("out");
        let sink = DirectorySink::new(&out_dir);
        let task = RepairTask::new("/somewhere/pic.png", "/somewhere/clean.png");
        let img = RgbaImage::from_pixel(6, 4, Rgba([9, 8, 7, 255]));

        let written = sink.persist(&task, &img).unwrap();
        assert_eq!(PathBuf::from(&written), out_dir.join("Fixed_pic.png"));

        let loaded = FsLoader.load(Path::new(&written)).unwrap();
        assert_eq!(loaded, img);
    }

    #[test]
    fn directory_sink_suffixes_repeated_target_names() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());
        let first = RgbaImage::from_pixel(4, 4, Rgba([10, 0, 0, 255]));
        let second = RgbaImage::from_pixel(4, 4, Rgba([0, 20, 0, 255]));

        let a = sink
            .persist(&RepairTask::new("/a/pic.png", "/a/ref.png"), &first)
            .unwrap();
        let b = sink
            .persist(&RepairTask::new("/b/pic.png", "/b/ref.png"), &second)
            .unwrap();

        assert_eq!(PathBuf::from(&a), dir.path().join("Fixed_pic.png"));
        assert_eq!(PathBuf::from(&b), dir.path().join("Fixed_pic_2.png"));
        assert_eq!(FsLoader.load(Path::new(&a)).unwrap(), first);
        assert_eq!(FsLoader.load(Path::new(&b)).unwrap(), second);
    }

    #[test]
    fn jpeg_output_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.jpg");
        save_image(&RgbaImage::from_pixel(8, 8, Rgba([100, 150, 200, 128])), &path).unwrap();
        let loaded = FsLoader.load(&path).unwrap();
        assert_eq!(loaded.dimensions(), (8, 8));
    }

    #[cfg(target_os = "linux")]
    fn assert_full_device_write_fails(name: &str) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::os::unix::fs::symlink("/dev/full", &path).unwrap();
        let img = RgbaImage::from_pixel(64, 64, Rgba([1, 2, 3, 255]));

        let err = save_image(&img, &path).unwrap_err();
        assert!(matches!(err, Error::Io(_)), "got {err:?}");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn jpeg_write_to_full_device_reports_io_error() {
        assert_full_device_write_fails("full.jpg");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn png_write_to_full_device_reports_io_error() {
        assert_full_device_write_fails("full.png");
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.tga");
        let err = save_image(&RgbaImage::new(2, 2), &path).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
        assert!(!path.exists());
    }

    #[test]
    fn loader_reports_missing_file() {
        assert!(FsLoader.load(Path::new("/definitely/not/here.png")).is_err());
    }
}
