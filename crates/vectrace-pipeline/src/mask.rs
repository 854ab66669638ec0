//! Mask post-processing: denoise, fill holes, smooth.
//!
//! [`process`] turns oracle masks into [`ProcessedMask`]s. Each mask goes
//! through the same fixed sequence:
//!
//! 1. normalize the grid to `0`/`255`
//! 2. drop the mask if its foreground count is below `min_area`
//! 3. remove connected components smaller than `min_area` (8-connected)
//! 4. morphological closing with a 5×5 square
//! 5. Gaussian blur and re-binarize at the midpoint
//!
//! Noise removal runs before smoothing so the blur cannot smear specks
//! into real regions, and holes are closed before the edges are softened.
//! Steps 3-5 are individually switchable through [`PostProcessOptions`].
//!
//! Inputs are never modified; every step produces a new grid.

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::region_labelling::{Connectivity, connected_components};

use crate::blur::smooth_mask;
use crate::types::{BBox, FOREGROUND, PostProcessOptions, ProcessedMask, RawMask};

/// Radius (in the L∞ norm) of the closing element: a 5×5 square.
const CLOSING_RADIUS: u8 = 2;

/// Map every non-zero pixel to [`FOREGROUND`].
#[must_use = "returns the normalized grid"]
pub fn binarize(grid: &GrayImage) -> GrayImage {
    let mut out = grid.clone();
    for p in out.pixels_mut() {
        if p.0[0] != 0 {
            p.0[0] = FOREGROUND;
        }
    }
    out
}

/// Number of foreground pixels.
#[must_use]
pub fn foreground_count(grid: &GrayImage) -> u64 {
    grid.as_raw().iter().filter(|&&v| v != 0).count() as u64
}

/// Tight bounding box of the foreground, or the zero box if empty.
#[must_use]
pub fn bounding_box(grid: &GrayImage) -> BBox {
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0;
    let mut max_y = 0;
    let mut any = false;
    for (x, y, p) in grid.enumerate_pixels() {
        if p.0[0] != 0 {
            any = true;
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
    }
    if !any {
        return BBox::default();
    }
    BBox {
        x: min_x,
        y: min_y,
        width: max_x - min_x,
        height: max_y - min_y,
    }
}

/// Remove 8-connected foreground components with fewer than `min_area`
/// pixels.
#[must_use = "returns the denoised grid"]
pub fn remove_small_components(grid: &GrayImage, min_area: u64) -> GrayImage {
    if min_area <= 1 {
        return grid.clone();
    }
    let labels = connected_components(grid, Connectivity::Eight, Luma([0u8]));

    let label_count = labels.pixels().map(|p| p.0[0]).max().unwrap_or(0) as usize;
    let mut sizes = vec![0u64; label_count + 1];
    for p in labels.pixels() {
        sizes[p.0[0] as usize] += 1;
    }

    let mut out = GrayImage::new(grid.width(), grid.height());
    for (x, y, p) in labels.enumerate_pixels() {
        let label = p.0[0] as usize;
        if label != 0 && sizes[label] >= min_area {
            out.put_pixel(x, y, Luma([FOREGROUND]));
        }
    }
    out
}

/// Close small interior gaps with a dilate-then-erode over a 5×5 square.
///
/// Closing is idempotent: applying it to an already-closed grid returns
/// the same grid.
#[must_use = "returns the closed grid"]
pub fn fill_holes(grid: &GrayImage) -> GrayImage {
    imageproc::morphology::close(grid, Norm::LInf, CLOSING_RADIUS)
}

/// Clean one mask. Returns `None` when it fails the `min_area` pre-check.
#[must_use]
pub fn process_one(
    mask: &RawMask,
    source_index: usize,
    options: &PostProcessOptions,
) -> Option<ProcessedMask> {
    let mut grid = binarize(&mask.grid);

    let initial = foreground_count(&grid);
    if initial < options.min_area {
        tracing::debug!(
            source_index,
            area = initial,
            min_area = options.min_area,
            "dropping mask below min_area"
        );
        return None;
    }

    if options.noise_removal {
        grid = remove_small_components(&grid, options.min_area);
    }
    if options.fill_holes {
        grid = fill_holes(&grid);
    }
    if options.smoothing {
        grid = smooth_mask(&grid, options.smoothing_strength);
    }

    let area = foreground_count(&grid);
    let bbox = bounding_box(&grid);
    Some(ProcessedMask {
        grid,
        area,
        bbox,
        quality: mask.quality,
        source_index,
    })
}

/// Clean a batch of masks.
///
/// Masks that fail the `min_area` pre-check are left out; the survivors
/// keep their input order and record their input position in
/// [`ProcessedMask::source_index`]. Empty grids are skipped with a
/// warning. The output is never longer than the input.
#[must_use = "returns the processed masks"]
pub fn process(masks: &[RawMask], options: &PostProcessOptions) -> Vec<ProcessedMask> {
    let mut out = Vec::with_capacity(masks.len());
    for (index, mask) in masks.iter().enumerate() {
        if mask.grid.width() == 0 || mask.grid.height() == 0 {
            tracing::warn!(index, "skipping mask with an empty grid");
            continue;
        }
        if let Some(processed) = process_one(mask, index, options) {
            out.push(processed);
        }
    }
    tracing::debug!(
        input = masks.len(),
        output = out.len(),
        "post-processing complete"
    );
    out
}
