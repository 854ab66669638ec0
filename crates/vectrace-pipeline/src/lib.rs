//! vectrace-pipeline: Pure mask-to-vector pipeline (sans-IO).
//!
//! Converts binary segmentation masks into layered polygon contours
//! through:
//! ingest -> order -> post-process (denoise, close, smooth) ->
//! contour extraction -> simplification -> layer classification.
//!
//! This crate has **no I/O dependencies**: it operates on in-memory grids
//! and returns structured data. Drawing files live in `vectrace-export`;
//! threads and the segmentation model live in `vectrace-worker`.

pub mod blur;
pub mod classify;
pub mod contour;
pub mod ingest;
pub mod mask;
pub mod pipeline;
pub mod simplify;
pub mod stats;
pub mod types;

pub use classify::{LayerAssignment, LayerPolicy, LayerStyle, SizeClass, classify};
pub use ingest::{MaskCell, MaskOrdering, RawMaskRecord, filter_by_area, ingest_records};
pub use pipeline::{Pipeline, VectorizedResult};
pub use stats::{PipelineDiagnostics, ProcessingStats, StageDiagnostics};
pub use types::{
    BBox, Contour, ContourMode, ContourRecord, ContourSource, Dimensions, GrayImage, MaskQuality,
    PipelineError, Point, PostProcessOptions, ProcessedMask, RawMask, RgbImage, SimplifiedContour,
    VectorConfig,
};

/// Run the full pipeline over a batch of masks.
///
/// # Pipeline steps
///
/// 1. Validate `config`
/// 2. Post-process each mask (min-area pre-check, noise removal,
///    hole filling, smoothing)
/// 3. Extract the largest outer contour of each mask
/// 4. Douglas-Peucker simplification at `epsilon_factor * perimeter`
/// 5. Assign layers under `policy`
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `config` is invalid. An
/// empty result is not an error.
pub fn vectorize(
    masks: Vec<RawMask>,
    config: &VectorConfig,
    policy: LayerPolicy,
    layer_prefix: &str,
) -> Result<VectorizedResult, PipelineError> {
    Ok(Pipeline::new(masks, *config)
        .post_process()?
        .extract_contours()
        .simplify()
        .classify(policy, layer_prefix)
        .into_result())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::Luma;

    fn rect_mask(w: u32, h: u32, rect_w: u32, rect_h: u32) -> RawMask {
        let grid = GrayImage::from_fn(w, h, |x, y| {
            if (1..=rect_w).contains(&x) && (1..=rect_h).contains(&y) {
                Luma([types::FOREGROUND])
            } else {
                Luma([0])
            }
        });
        RawMask::from_luma(&grid, MaskQuality::default())
    }

    #[test]
    fn three_masks_end_to_end() {
        // Areas 50, 5000 and 150000 on a shared 520×320 frame.
        let masks = vec![
            rect_mask(520, 320, 10, 5),
            rect_mask(520, 320, 100, 50),
            rect_mask(520, 320, 500, 300),
        ];
        assert_eq!(
            masks.iter().map(RawMask::area).collect::<Vec<_>>(),
            vec![50, 5_000, 150_000]
        );
        let result = vectorize(masks, &VectorConfig::default(), LayerPolicy::BySize, "VT").unwrap();

        assert_eq!(result.diagnostics.stats.original_count, 3);
        assert_eq!(result.diagnostics.stats.total_masks, 2);
        assert_eq!(result.contours.len(), 2);
        let layers: Vec<&str> = result
            .assignments
            .iter()
            .map(|a| a.layer.name.as_str())
            .collect();
        assert_eq!(layers, vec!["VT_MEDIUM", "VT_XLARGE"]);
    }

    #[test]
    fn rectangle_simplifies_to_four_corners() {
        let result = vectorize(
            vec![rect_mask(200, 200, 120, 80)],
            &VectorConfig::default(),
            LayerPolicy::BySize,
            "VT",
        )
        .unwrap();
        assert_eq!(result.contours[0].simplified.len(), 4);
    }
}
