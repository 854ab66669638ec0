//! vectrace-worker: Background task orchestration.
//!
//! An [`Orchestrator`] owns one worker thread that runs model loading,
//! segmentation and drawing export one at a time. Callers submit
//! requests (which are rejected while a task is active), receive typed
//! [`TaskEvent`]s over channels, and may ask the active task to stop.
//! Cancellation is cooperative: tasks poll a stop flag between stages.
//!
//! The segmentation model itself is behind the [`ModelLoader`] and
//! [`SegmentationOracle`] traits, so nothing here depends on how masks
//! are actually produced.

pub mod event;
pub mod oracle;
pub mod orchestrator;
mod progress;
pub mod tasks;

pub use event::{EventKind, TaskEvent, TaskKind, TaskOutput};
pub use oracle::{ModelLoader, OracleError, SegmentationOracle, SegmentationParams};
pub use orchestrator::{Orchestrator, OrchestratorError, WorkerState};
pub use tasks::{ExportConfig, ExportRequest};
