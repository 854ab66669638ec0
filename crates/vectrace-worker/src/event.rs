//! Typed task events delivered from the worker thread to listeners.
//!
//! Every task run produces exactly one [`EventKind::Started`], zero or
//! more [`EventKind::Progress`] events with non-decreasing percentages,
//! and exactly one terminal event ([`EventKind::Finished`] or
//! [`EventKind::Failed`]), in that order.

use std::fmt;
use std::path::PathBuf;

use vectrace_export::DocumentStats;
use vectrace_pipeline::{Dimensions, RawMask, VectorizedResult};

/// The kinds of work an orchestrator runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Model acquisition.
    LoadModel,
    /// Mask generation on one image.
    Segment,
    /// Vectorize masks and write a drawing.
    Export,
}

impl TaskKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::LoadModel => "load-model",
            Self::Segment => "segment",
            Self::Export => "export",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Successful result of a task.
#[derive(Debug, Clone)]
pub enum TaskOutput {
    ModelLoaded {
        /// Name of the device the model ended up on.
        device: String,
    },
    Masks {
        /// Validated masks, ordered and capped.
        masks: Vec<RawMask>,
        /// Size of the image handed to the task.
        original: Dimensions,
        /// Size of the image the oracle saw; mask grids have this size.
        resized: Dimensions,
    },
    Exported {
        path: PathBuf,
        stats: DocumentStats,
        result: VectorizedResult,
    },
}

/// What happened.
#[derive(Debug, Clone)]
pub enum EventKind {
    Started,
    Progress {
        /// Percentage in `[0, 100]`.
        percent: u8,
        message: String,
    },
    Finished(TaskOutput),
    Failed {
        /// Human-readable summary.
        message: String,
        /// Raw text of the underlying error, if any.
        detail: String,
    },
}

impl EventKind {
    /// Whether this event ends a task run.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished(_) | Self::Failed { .. })
    }
}

/// An event tagged with the task it belongs to.
#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub task: TaskKind,
    pub kind: EventKind,
}
