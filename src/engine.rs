//! Batch repair engine.

use std::fmt;
use std::path::{Path, PathBuf};

use image::RgbaImage;
use ndarray::Array4;
use tracing::{debug, info, warn};

use crate::detection::{self, Detection};
use crate::error::{Error, Result};
use crate::geometry::{self, Padding, Rect};
use crate::inference::{self, InferenceBackend};
use crate::io::{ImageLoader, OutputSink};
use crate::patch;

/// Confidence threshold applied when the caller has no preference.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// One target image and the clean reference to patch it from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairTask {
    /// The watermarked image.
    pub target: PathBuf,
    /// The clean image of the same scene.
    pub reference: PathBuf,
}

impl RepairTask {
    /// Create a task from a target and a reference path.
    pub fn new(target: impl Into<PathBuf>, reference: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            reference: reference.into(),
        }
    }

    /// Short display name: the target's file name.
    #[must_use]
    pub fn name(&self) -> String {
        self.target.file_name().map_or_else(
            || self.target.display().to_string(),
            |f| f.to_string_lossy().to_string(),
        )
    }
}

/// What happened to a single task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// The image was repaired and handed to the output sink.
    Repaired {
        /// Identifier returned by the sink.
        output: String,
    },
    /// No anchor reached the confidence threshold.
    NoDetection,
    /// The detected box mapped to an empty region.
    InvalidRegion,
    /// The target or the reference could not be read.
    DecodeFailure(String),
    /// Inference, compositing, or persistence failed.
    InternalError(String),
}

impl TaskOutcome {
    /// Whether the task produced a repaired image.
    #[must_use]
    pub fn is_repaired(&self) -> bool {
        matches!(self, Self::Repaired { .. })
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Repaired { output } => write!(f, "repaired -> {output}"),
            Self::NoDetection => f.write_str("no watermark above the confidence threshold"),
            Self::InvalidRegion => f.write_str("detected region is empty after clamping"),
            Self::DecodeFailure(reason) => write!(f, "unreadable image: {reason}"),
            Self::InternalError(reason) => write!(f, "internal error: {reason}"),
        }
    }
}

/// A task together with its outcome.
#[derive(Debug, Clone)]
pub struct TaskReport {
    /// The task as submitted.
    pub task: RepairTask,
    /// What happened to it.
    pub outcome: TaskOutcome,
}

/// Aggregate verdict for a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchStatus {
    /// At least one task was repaired, or the batch was empty.
    Completed {
        /// Number of repaired tasks.
        repaired: usize,
        /// Sink identifiers of the repaired outputs, in task order.
        outputs: Vec<String>,
    },
    /// The batch was non-empty and nothing was repaired.
    Failed {
        /// One `name: reason` line per task.
        diagnostics: String,
    },
}

/// Per-task outcomes of one batch, in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    /// One report per submitted task.
    pub reports: Vec<TaskReport>,
}

impl BatchResult {
    /// Number of repaired tasks.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.outcome.is_repaired()).count()
    }

    /// Number of tasks that were not repaired.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded()
    }

    /// A non-empty batch in which nothing was repaired.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        !self.reports.is_empty() && self.succeeded() == 0
    }

    /// Sink identifiers of the repaired outputs, in task order.
    #[must_use]
    pub fn outputs(&self) -> Vec<String> {
        self.reports
            .iter()
            .filter_map(|r| match &r.outcome {
                TaskOutcome::Repaired { output } => Some(output.clone()),
                _ => None,
            })
            .collect()
    }

    /// One `name: outcome` line per task.
    #[must_use]
    pub fn diagnostics(&self) -> String {
        self.reports
            .iter()
            .map(|r| format!("{}: {}", r.task.name(), r.outcome))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Aggregate verdict.
    #[must_use]
    pub fn status(&self) -> BatchStatus {
        if self.is_failed() {
            BatchStatus::Failed {
                diagnostics: self.diagnostics(),
            }
        } else {
            BatchStatus::Completed {
                repaired: self.succeeded(),
                outputs: self.outputs(),
            }
        }
    }

    /// Return the repaired outputs, or the diagnostics of a failed batch.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BatchFailed`] if the batch was non-empty and nothing
    /// was repaired.
    pub fn into_result(self) -> Result<Vec<String>> {
        match self.status() {
            BatchStatus::Completed { outputs, .. } => Ok(outputs),
            BatchStatus::Failed { diagnostics } => Err(Error::BatchFailed(diagnostics)),
        }
    }
}

/// Options controlling repair behavior.
#[derive(Debug, Clone, Default)]
pub struct RepairOptions {
    /// Margin added around detected boxes.
    pub padding: Padding,
    /// Process tasks on the rayon pool (requires the `parallel` feature).
    pub parallel: bool,
}

/// A detection together with the image region it maps to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedRegion {
    /// The winning detection in model-input coordinates.
    pub detection: Detection,
    /// The padded, clamped region in image pixels.
    pub rect: Rect,
}

/// Runs detection, mapping, and compositing over batches of image pairs.
///
/// The engine borrows its collaborators for every call and keeps no state
/// between batches, so one instance can serve any number of them.
pub struct RepairEngine<B, L, S> {
    backend: B,
    loader: L,
    sink: S,
    options: RepairOptions,
}

impl<B, L, S> RepairEngine<B, L, S>
where
    B: InferenceBackend,
    L: ImageLoader,
    S: OutputSink,
{
    /// Create an engine with default options.
    pub fn new(backend: B, loader: L, sink: S) -> Self {
        Self {
            backend,
            loader,
            sink,
            options: RepairOptions::default(),
        }
    }

    /// Replace the engine options.
    #[must_use]
    pub fn with_options(mut self, options: RepairOptions) -> Self {
        self.options = options;
        self
    }

    /// Current options.
    #[must_use]
    pub fn options(&self) -> &RepairOptions {
        &self.options
    }

    /// Locate the watermark in `image`.
    ///
    /// Returns `Ok(None)` when no anchor reaches `confidence_threshold`.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if inference fails.
    pub fn detect(
        &self,
        source: &Path,
        image: &RgbaImage,
        confidence_threshold: f32,
    ) -> std::result::Result<Option<DetectedRegion>, B::Error> {
        let input_size = self.backend.input_size();
        let input = if self.backend.needs_input() {
            inference::preprocess(image, input_size)
        } else {
            Array4::zeros((1, 0, 0, 3))
        };
        let raw = self.backend.infer(source, input.view())?;

        let Some(detection) = detection::decode(raw.view(), confidence_threshold) else {
            return Ok(None);
        };
        let rect = geometry::map_to_image(
            &detection,
            input_size,
            image.width(),
            image.height(),
            self.options.padding,
        );
        debug!(?detection, ?rect, "mapped detection to image");
        Ok(Some(DetectedRegion { detection, rect }))
    }

    /// Run one task through load, detect, repair, and persist.
    ///
    /// Never fails: every problem is reported as a [`TaskOutcome`].
    #[must_use]
    pub fn process_task(&self, task: &RepairTask, confidence_threshold: f32) -> TaskOutcome {
        let target = match self.loader.load(&task.target) {
            Ok(img) => img,
            Err(e) => {
                return TaskOutcome::DecodeFailure(format!("{}: {e}", task.target.display()));
            }
        };
        let reference = match self.loader.load(&task.reference) {
            Ok(img) => img,
            Err(e) => {
                return TaskOutcome::DecodeFailure(format!("{}: {e}", task.reference.display()));
            }
        };

        let region = match self.detect(&task.target, &target, confidence_threshold) {
            Ok(Some(region)) => region,
            Ok(None) => return TaskOutcome::NoDetection,
            Err(e) => return TaskOutcome::InternalError(format!("inference failed: {e}")),
        };

        let repaired = match patch::repair(&target, &reference, region.rect) {
            Ok(img) => img,
            Err(Error::InvalidRegion { .. }) => return TaskOutcome::InvalidRegion,
            Err(e) => return TaskOutcome::InternalError(e.to_string()),
        };

        match self.sink.persist(task, &repaired) {
            Ok(output) => TaskOutcome::Repaired { output },
            Err(e) => TaskOutcome::InternalError(format!("failed to save: {e}")),
        }
    }

    /// Process every task and collect the outcomes in input order.
    ///
    /// Tasks are independent: a failure is recorded and the batch moves on.
    /// With `parallel` set (and the `parallel` feature enabled) tasks run on
    /// the rayon pool; the result order still matches `tasks`.
    #[must_use]
    pub fn run_batch(&self, tasks: &[RepairTask], confidence_threshold: f32) -> BatchResult {
        info!(tasks = tasks.len(), confidence_threshold, "starting batch");

        let outcomes = self.process_all(tasks, confidence_threshold);
        let result = BatchResult {
            reports: tasks
                .iter()
                .cloned()
                .zip(outcomes)
                .map(|(task, outcome)| TaskReport { task, outcome })
                .collect(),
        };

        for report in &result.reports {
            if report.outcome.is_repaired() {
                debug!(task = %report.task.name(), outcome = %report.outcome, "task done");
            } else {
                warn!(task = %report.task.name(), outcome = %report.outcome, "task not repaired");
            }
        }
        info!(
            succeeded = result.succeeded(),
            failed = result.failed(),
            "batch finished"
        );

        result
    }

    fn process_all(&self, tasks: &[RepairTask], confidence_threshold: f32) -> Vec<TaskOutcome> {
        #[cfg(feature = "parallel")]
        {
            if self.options.parallel {
                use rayon::prelude::*;
                return tasks
                    .par_iter()
                    .map(|task| self.process_task(task, confidence_threshold))
                    .collect();
            }
        }

        tasks
            .iter()
            .map(|task| self.process_task(task, confidence_threshold))
            .collect()
    }
}

impl<T: InferenceBackend + ?Sized> InferenceBackend for &T {
    type Error = T::Error;

    fn input_size(&self) -> u32 {
        (**self).input_size()
    }

    fn needs_input(&self) -> bool {
        (**self).needs_input()
    }

    fn infer(
        &self,
        source: &Path,
        input: ndarray::ArrayView4<'_, f32>,
    ) -> std::result::Result<ndarray::Array2<f32>, Self::Error> {
        (**self).infer(source, input)
    }
}
