//! Remove watermarks located by an object detector, by patching the region
//! from a clean reference image of the same scene.
//!
//! For each (target, reference) pair the engine:
//!
//! 1. runs the detector on the target and keeps the single most confident
//!    box ([`detection::decode`]),
//! 2. maps it to target pixels with padding and clamping
//!    ([`geometry::map_to_image`]),
//! 3. resamples the reference onto the target grid and copies the region over
//!    ([`patch::repair`]),
//! 4. hands the result to an [`OutputSink`].
//!
//! Outcomes are collected per task; a non-empty batch in which nothing was
//! repaired is reported as failed.
//!
//! # Quick Start
//!
//! ```no_run
//! use patch_repair::{DirectorySink, FsLoader, RepairEngine, RepairTask, SidecarBackend};
//!
//! let engine = RepairEngine::new(SidecarBackend::default(), FsLoader, DirectorySink::new("fixed"));
//! let tasks = vec![RepairTask::new("shot.jpg", "shot_clean.jpg")];
//! let result = engine.run_batch(&tasks, 0.5);
//! println!("repaired {} of {}", result.succeeded(), tasks.len());
//! ```
//!
//! # Single pair
//!
//! The stages are usable on their own when images are already in memory.
//!
//! ```
//! use image::{Rgba, RgbaImage};
//! use patch_repair::geometry::Rect;
//!
//! let target = RgbaImage::from_pixel(32, 32, Rgba([0, 0, 0, 255]));
//! let reference = RgbaImage::from_pixel(64, 64, Rgba([255, 255, 255, 255]));
//! let fixed = patch_repair::patch::repair(&target, &reference, Rect::new(4, 4, 8, 8)).unwrap();
//! assert_eq!(fixed.get_pixel(0, 0), target.get_pixel(0, 0));
//! ```

#![deny(missing_docs)]

pub mod detection;
mod engine;
pub mod error;
pub mod geometry;
pub mod inference;
pub mod io;
pub mod patch;

pub use detection::{Detection, TensorLayout};
pub use engine::{
    BatchResult, BatchStatus, DetectedRegion, RepairEngine, RepairOptions, RepairTask,
    TaskOutcome, TaskReport, DEFAULT_CONFIDENCE_THRESHOLD,
};
pub use error::{Error, Result};
pub use geometry::{Padding, Rect};
pub use inference::{InferenceBackend, SidecarBackend, DEFAULT_INPUT_SIZE};
pub use io::{DirectorySink, FsLoader, ImageLoader, OutputSink};
