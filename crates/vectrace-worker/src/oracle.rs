//! Seams to the external segmentation model.
//!
//! The orchestrator never knows what the model is. A [`ModelLoader`]
//! walks through the acquisition steps and hands back a boxed
//! [`SegmentationOracle`], which the worker thread owns until the model
//! is unloaded, replaced or released by a cancellation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vectrace_pipeline::{MaskOrdering, RawMaskRecord, RgbImage};

/// Failure reported by a model loader or oracle.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("model artifact not found: {}", path.display())]
    MissingArtifact { path: PathBuf },

    #[error("missing dependency: {0}")]
    Dependency(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Mask generation parameters.
///
/// The density and threshold fields are forwarded to the oracle when it
/// is built; the rest shape how the worker prepares images and packages
/// results.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationParams {
    /// Sampling grid density along each image side.
    pub points_per_side: u32,
    pub pred_iou_thresh: f64,
    pub stability_score_thresh: f64,
    /// Oracles drop masks with fewer foreground pixels than this.
    pub min_mask_region_area: u64,
    pub crop_n_layers: u32,
    /// Images are downscaled so their longest side is at most this.
    /// Zero disables resizing.
    pub max_image_side: u32,
    pub ordering: MaskOrdering,
    pub max_masks: Option<usize>,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            points_per_side: 32,
            pred_iou_thresh: 0.88,
            stability_score_thresh: 0.95,
            min_mask_region_area: 100,
            crop_n_layers: 0,
            max_image_side: 1024,
            ordering: MaskOrdering::Area,
            max_masks: None,
        }
    }
}

/// Produces mask records for an image.
pub trait SegmentationOracle {
    /// Generate masks for `image`. No ordering is promised.
    ///
    /// # Errors
    ///
    /// Returns an [`OracleError`] if inference fails.
    fn generate(&mut self, image: &RgbImage) -> Result<Vec<RawMaskRecord>, OracleError>;
}

/// Step-by-step model acquisition, run on the worker thread.
///
/// The steps are called in declaration order; the worker checks for
/// cancellation between them.
pub trait ModelLoader: Send {
    /// Verify the model artifact exists and looks usable.
    ///
    /// # Errors
    ///
    /// Usually [`OracleError::MissingArtifact`].
    fn check_file(&mut self, path: &Path) -> Result<(), OracleError>;

    /// Verify the runtime the model needs is present.
    ///
    /// # Errors
    ///
    /// Usually [`OracleError::Dependency`].
    fn check_dependencies(&mut self) -> Result<(), OracleError>;

    /// Build the model from the artifact.
    ///
    /// # Errors
    ///
    /// Any [`OracleError`].
    fn construct(&mut self, path: &Path) -> Result<(), OracleError>;

    /// Move the constructed model to its compute device and return the
    /// device name.
    ///
    /// # Errors
    ///
    /// Usually [`OracleError::Device`].
    fn transfer_to_device(&mut self) -> Result<String, OracleError>;

    /// Wrap the model in a mask generator configured with `params`.
    ///
    /// # Errors
    ///
    /// Any [`OracleError`].
    fn build_generator(
        &mut self,
        params: &SegmentationParams,
    ) -> Result<Box<dyn SegmentationOracle>, OracleError>;
}
