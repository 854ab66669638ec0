//! Contour extraction: one closed polygon per processed mask.
//!
//! Borders are traced with Suzuki-Abe border following
//! (`imageproc::contours::find_contours`). Of the top-level outer borders
//! only the one with the largest enclosed area is kept, so every mask maps
//! to at most one polygon even if it fell apart into several islands
//! during cleaning. Equal areas keep the border found first in raster
//! scan order.
//!
//! Traced borders list every boundary pixel. Straight runs are collapsed
//! to their endpoints before any measurement (see [`compress_chain`]),
//! which leaves area and perimeter unchanged.

use image::GrayImage;
use imageproc::contours::BorderType;

use crate::types::{Contour, ContourMode, ContourRecord, Point, ProcessedMask};

/// Drop interior points of horizontal, vertical and diagonal runs.
///
/// The ring is treated as closed: a point is removed when the step into
/// it equals the step out of it, wrapping around at the ends.
#[must_use]
pub fn compress_chain(points: &[Point]) -> Vec<Point> {
    let n = points.len();
    if n < 3 {
        return points.to_vec();
    }
    let step = |a: Point, b: Point| (b.x - a.x, b.y - a.y);
    let kept: Vec<Point> = (0..n)
        .filter(|&i| {
            let prev = points[(i + n - 1) % n];
            let cur = points[i];
            let next = points[(i + 1) % n];
            step(prev, cur) != step(cur, next)
        })
        .map(|i| points[i])
        .collect();
    // A ring whose every step is identical cannot enclose anything.
    if kept.is_empty() {
        return points.to_vec();
    }
    kept
}

fn to_points(raw: &[imageproc::point::Point<u32>]) -> Vec<Point> {
    raw.iter()
        .map(|p| Point::new(f64::from(p.x), f64::from(p.y)))
        .collect()
}

/// Extract the contour record for a single mask grid, if it has one.
#[must_use]
pub fn extract_one(
    grid: &GrayImage,
    mask_index: usize,
    mode: ContourMode,
) -> Option<(Contour, Vec<Contour>)> {
    let traced: Vec<imageproc::contours::Contour<u32>> =
        imageproc::contours::find_contours(grid);

    let mut best: Option<(usize, Contour, f64)> = None;
    for (i, c) in traced.iter().enumerate() {
        if c.border_type != BorderType::Outer || c.parent.is_some() {
            continue;
        }
        let ring = Contour::new(compress_chain(&to_points(&c.points)));
        if ring.distinct_len() < 3 {
            continue;
        }
        let area = ring.area();
        if best.as_ref().is_none_or(|(_, _, a)| area > *a) {
            best = Some((i, ring, area));
        }
    }

    let Some((outer_index, outer, _)) = best else {
        tracing::debug!(mask_index, "mask has no usable outer contour");
        return None;
    };

    let holes = match mode {
        ContourMode::External => Vec::new(),
        ContourMode::WithHoles => traced
            .iter()
            .filter(|c| c.border_type == BorderType::Hole && c.parent == Some(outer_index))
            .map(|c| Contour::new(compress_chain(&to_points(&c.points))))
            .filter(|ring| ring.distinct_len() >= 3)
            .collect(),
    };

    Some((outer, holes))
}

/// Extract one [`ContourRecord`] per mask that has a usable outer border.
///
/// `mask_index` on each record is the mask's position in `masks`. Masks
/// whose foreground is empty or too thin to enclose area produce nothing.
#[must_use = "returns the extracted contour records"]
pub fn extract(masks: &[ProcessedMask], mode: ContourMode) -> Vec<ContourRecord> {
    let records: Vec<ContourRecord> = masks
        .iter()
        .enumerate()
        .filter_map(|(mask_index, mask)| {
            let (contour, holes) = extract_one(&mask.grid, mask_index, mode)?;
            Some(ContourRecord {
                mask_index,
                area: contour.area(),
                perimeter: contour.perimeter(),
                bbox: contour.bbox(),
                contour,
                holes,
                quality: mask.quality,
            })
        })
        .collect();
    tracing::debug!(
        masks = masks.len(),
        contours = records.len(),
        "contour extraction complete"
    );
    records
}
