//! Processing statistics and per-stage timings.
//!
//! [`ProcessingStats`] summarizes the masks that survived post-processing.
//! [`StageDiagnostics`] records how long a stage took and how many items
//! went in and came out; the staged [`Pipeline`](crate::Pipeline) fills
//! one in for every stage it runs.
//!
//! Durations are serialized as fractional seconds (`f64`), since
//! `std::time::Duration` does not implement serde traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::ProcessedMask;

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Summary of a post-processing run.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessingStats {
    /// Masks handed to the post-processor.
    pub original_count: usize,
    /// Masks that came out.
    pub total_masks: usize,
    pub min_area: u64,
    pub max_area: u64,
    pub mean_area: f64,
    pub total_area: u64,
}

impl ProcessingStats {
    /// Summarize `processed`, the output of a run over `original_count`
    /// masks. Area fields are zero when nothing survived.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_masks(original_count: usize, processed: &[ProcessedMask]) -> Self {
        if processed.is_empty() {
            return Self {
                original_count,
                ..Self::default()
            };
        }
        let total_area: u64 = processed.iter().map(|m| m.area).sum();
        Self {
            original_count,
            total_masks: processed.len(),
            min_area: processed.iter().map(|m| m.area).min().unwrap_or(0),
            max_area: processed.iter().map(|m| m.area).max().unwrap_or(0),
            mean_area: total_area as f64 / processed.len() as f64,
            total_area,
        }
    }

    /// Number of masks the post-processor dropped.
    #[must_use]
    pub const fn dropped(&self) -> usize {
        self.original_count.saturating_sub(self.total_masks)
    }
}

/// Timing and throughput of one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    pub items_in: usize,
    pub items_out: usize,
}

/// Diagnostics for a full pipeline run, filled in stage by stage.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    pub post_process: Option<StageDiagnostics>,
    pub extraction: Option<StageDiagnostics>,
    pub simplification: Option<StageDiagnostics>,
    pub classification: Option<StageDiagnostics>,
    pub stats: ProcessingStats,
}

impl PipelineDiagnostics {
    /// Sum of the recorded stage durations.
    #[must_use]
    pub fn total_duration(&self) -> Duration {
        [
            self.post_process,
            self.extraction,
            self.simplification,
            self.classification,
        ]
        .iter()
        .flatten()
        .map(|s| s.duration)
        .sum()
    }
}
