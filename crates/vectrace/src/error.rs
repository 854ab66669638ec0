use std::path::PathBuf;

use vectrace_worker::{OrchestratorError, TaskKind};

/// Everything that can stop a conversion.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Config {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("cannot open image {}: {source}", path.display())]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("{task} failed: {message} ({detail})")]
    Task {
        task: TaskKind,
        message: String,
        detail: String,
    },

    #[error("{task} ended without a result")]
    Unexpected { task: TaskKind },

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error(transparent)]
    Export(#[from] vectrace_export::ExportError),

    #[error("cannot write preview: {0}")]
    Preview(#[source] image::ImageError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
