//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! ```rust
//! # use vectrace_pipeline::{LayerPolicy, Pipeline, PipelineError, RawMask, VectorConfig};
//! # fn run(masks: Vec<RawMask>) -> Result<(), PipelineError> {
//! let result = Pipeline::new(masks, VectorConfig::default())
//!     .post_process()?
//!     .extract_contours()
//!     .simplify()
//!     .classify(LayerPolicy::BySize, "VECTRACE")
//!     .into_result();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state, so a
//! caller that wants to stop between stages (the worker polling its
//! cancellation flag, for example) simply drops the value it holds.
//! Only [`Pending::post_process`] can fail: it validates the
//! configuration before touching any mask.

use std::time::Instant;

use crate::classify::{LayerAssignment, LayerPolicy, assign_layers};
use crate::stats::{PipelineDiagnostics, ProcessingStats, StageDiagnostics};
use crate::types::{
    ContourRecord, Dimensions, PipelineError, ProcessedMask, RawMask, SimplifiedContour,
    VectorConfig,
};

/// Entry point for the staged pipeline.
pub struct Pipeline;

impl Pipeline {
    /// Store the masks and configuration without processing anything.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(masks: Vec<RawMask>, config: VectorConfig) -> Pending {
        Pending { config, masks }
    }
}

fn stage(start: Instant, items_in: usize, items_out: usize) -> Option<StageDiagnostics> {
    Some(StageDiagnostics {
        duration: start.elapsed(),
        items_in,
        items_out,
    })
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Masks and configuration, untouched.
#[must_use = "pipeline stages are consumed by advancing; call .post_process() to continue"]
pub struct Pending {
    config: VectorConfig,
    masks: Vec<RawMask>,
}

impl Pending {
    #[must_use]
    pub fn masks(&self) -> &[RawMask] {
        &self.masks
    }

    /// Validate the configuration and clean every mask.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the configuration
    /// fails [`VectorConfig::validate`].
    pub fn post_process(self) -> Result<PostProcessed, PipelineError> {
        self.config.validate()?;
        let dimensions = self.masks.first().map(RawMask::dimensions);
        let start = Instant::now();
        let processed = crate::mask::process(&self.masks, &self.config.cleaning);
        let stats = ProcessingStats::from_masks(self.masks.len(), &processed);
        let diagnostics = PipelineDiagnostics {
            post_process: stage(start, self.masks.len(), processed.len()),
            stats,
            ..PipelineDiagnostics::default()
        };
        Ok(PostProcessed {
            config: self.config,
            dimensions,
            processed,
            diagnostics,
        })
    }
}

// ───────────────────────── Stage 1: PostProcessed ────────────────────

/// Cleaned masks with recomputed area and bounding box.
#[must_use = "pipeline stages are consumed by advancing; call .extract_contours() to continue"]
pub struct PostProcessed {
    config: VectorConfig,
    dimensions: Option<Dimensions>,
    processed: Vec<ProcessedMask>,
    diagnostics: PipelineDiagnostics,
}

impl PostProcessed {
    #[must_use]
    pub fn masks(&self) -> &[ProcessedMask] {
        &self.processed
    }

    #[must_use]
    pub const fn stats(&self) -> &ProcessingStats {
        &self.diagnostics.stats
    }

    pub fn extract_contours(self) -> Extracted {
        let start = Instant::now();
        let records = crate::contour::extract(&self.processed, self.config.contour_mode);
        let mut diagnostics = self.diagnostics;
        diagnostics.extraction = stage(start, self.processed.len(), records.len());
        Extracted {
            config: self.config,
            dimensions: self.dimensions,
            records,
            diagnostics,
        }
    }
}

// ───────────────────────── Stage 2: Extracted ────────────────────────

/// One contour record per mask that had a usable outer border.
#[must_use = "pipeline stages are consumed by advancing; call .simplify() to continue"]
pub struct Extracted {
    config: VectorConfig,
    dimensions: Option<Dimensions>,
    records: Vec<ContourRecord>,
    diagnostics: PipelineDiagnostics,
}

impl Extracted {
    #[must_use]
    pub fn records(&self) -> &[ContourRecord] {
        &self.records
    }

    pub fn simplify(self) -> Simplified {
        let start = Instant::now();
        let count = self.records.len();
        let contours = crate::simplify::simplify(self.records, self.config.epsilon_factor);
        let mut diagnostics = self.diagnostics;
        diagnostics.simplification = stage(start, count, contours.len());
        Simplified {
            dimensions: self.dimensions,
            contours,
            diagnostics,
        }
    }
}

// ───────────────────────── Stage 3: Simplified ───────────────────────

/// Simplified contours, not yet assigned to layers.
#[must_use = "pipeline stages are consumed by advancing; call .classify() to continue"]
pub struct Simplified {
    dimensions: Option<Dimensions>,
    contours: Vec<SimplifiedContour>,
    diagnostics: PipelineDiagnostics,
}

impl Simplified {
    #[must_use]
    pub fn contours(&self) -> &[SimplifiedContour] {
        &self.contours
    }

    pub fn classify(self, policy: LayerPolicy, prefix: &str) -> Classified {
        let start = Instant::now();
        let assignments = assign_layers(&self.contours, policy, prefix);
        let mut diagnostics = self.diagnostics;
        diagnostics.classification = stage(start, self.contours.len(), assignments.len());
        Classified {
            result: VectorizedResult {
                dimensions: self.dimensions,
                contours: self.contours,
                assignments,
                diagnostics,
            },
        }
    }
}

// ───────────────────────── Stage 4: Classified ───────────────────────

/// Final stage: every contour has a layer.
#[must_use = "call .into_result() to take the vectorized output"]
pub struct Classified {
    result: VectorizedResult,
}

impl Classified {
    #[must_use]
    pub fn contours(&self) -> &[SimplifiedContour] {
        &self.result.contours
    }

    #[must_use]
    pub fn assignments(&self) -> &[LayerAssignment] {
        &self.result.assignments
    }

    #[must_use]
    pub const fn diagnostics(&self) -> &PipelineDiagnostics {
        &self.result.diagnostics
    }

    #[must_use]
    pub fn into_result(self) -> VectorizedResult {
        self.result
    }
}

/// Output of a complete pipeline run.
#[derive(Debug, Clone)]
pub struct VectorizedResult {
    /// Grid size of the first input mask, if there was one.
    pub dimensions: Option<Dimensions>,
    pub contours: Vec<SimplifiedContour>,
    /// Parallel to `contours`.
    pub assignments: Vec<LayerAssignment>,
    pub diagnostics: PipelineDiagnostics,
}
