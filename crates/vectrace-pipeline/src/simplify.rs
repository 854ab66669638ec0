//! Contour simplification using the Ramer-Douglas-Peucker algorithm.
//!
//! Contours are closed rings, so the classic open-polyline algorithm is
//! run on two halves: the ring is split at its first point and at the
//! point farthest from it, each half is reduced independently, and the
//! results are joined back into a ring. Both split points always survive.
//!
//! The tolerance for each contour is `epsilon_factor * perimeter`, so
//! large shapes lose proportionally the same amount of detail as small
//! ones.

use crate::types::{Contour, ContourRecord, Point, SimplifiedContour};

/// Reduce a closed ring with the given tolerance.
///
/// Rings with fewer than 4 points are returned unchanged. The output is
/// always a subsequence of the input, in the same order.
#[must_use = "returns the simplified ring"]
pub fn simplify_ring(points: &[Point], tolerance: f64) -> Vec<Point> {
    let n = points.len();
    if n < 4 {
        return points.to_vec();
    }

    let anchor = points[0];
    let far = (1..n)
        .max_by(|&a, &b| {
            anchor
                .distance_squared(points[a])
                .total_cmp(&anchor.distance_squared(points[b]))
        })
        .unwrap_or(n / 2);

    let mut kept = vec![false; n];
    kept[0] = true;
    kept[far] = true;
    rdp_recurse(points, 0, far, tolerance, &mut kept);

    // Second half wraps back to the anchor: indices far..n then 0.
    let tail: Vec<Point> = points[far..].iter().copied().chain([anchor]).collect();
    let mut tail_kept = vec![false; tail.len()];
    let last = tail.len() - 1;
    rdp_recurse(&tail, 0, last, tolerance, &mut tail_kept);
    for (offset, &k) in tail_kept[..last].iter().enumerate() {
        if k {
            kept[far + offset] = true;
        }
    }

    points
        .iter()
        .zip(&kept)
        .filter(|&(_, k)| *k)
        .map(|(&p, _)| p)
        .collect()
}

/// Recursive step of the Ramer-Douglas-Peucker algorithm.
///
/// Finds the point between `start` and `end` that is farthest from the
/// line segment between them. If that distance exceeds `tolerance`, the
/// point is kept and both sub-segments are processed recursively.
fn rdp_recurse(points: &[Point], start: usize, end: usize, tolerance: f64, kept: &mut [bool]) {
    if end <= start + 1 {
        return;
    }

    let mut max_dist = 0.0;
    let mut max_idx = start;

    for i in (start + 1)..end {
        let d = perpendicular_distance(points[i], points[start], points[end]);
        if d > max_dist {
            max_dist = d;
            max_idx = i;
        }
    }

    if max_dist > tolerance {
        kept[max_idx] = true;
        rdp_recurse(points, start, max_idx, tolerance, kept);
        rdp_recurse(points, max_idx, end, tolerance, kept);
    }
}

/// Perpendicular distance from point `p` to the line defined by `a` and `b`.
///
/// When `a` and `b` coincide, returns the distance from `p` to `a`.
fn perpendicular_distance(p: Point, a: Point, b: Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let length_sq = dx.mul_add(dx, dy * dy);

    if length_sq == 0.0 {
        return p.distance(a);
    }

    let cross = dx.mul_add(a.y - p.y, -(dy * (a.x - p.x)));
    cross.abs() / length_sq.sqrt()
}

/// Simplify one ring, falling back to the input when the tolerance is not
/// finite or the result would no longer enclose area.
fn simplify_or_keep(ring: &Contour, epsilon: f64) -> Option<Contour> {
    if !epsilon.is_finite() {
        return None;
    }
    let reduced = Contour::new(simplify_ring(ring.points(), epsilon));
    (reduced.distinct_len() >= 3).then_some(reduced)
}

/// Simplify a single record.
///
/// The outer ring and each hole use their own perimeter-scaled tolerance.
/// A ring that cannot be simplified is passed through as-is and logged.
#[must_use]
pub fn simplify_record(record: ContourRecord, epsilon_factor: f64) -> SimplifiedContour {
    let epsilon = epsilon_factor * record.perimeter;

    let simplified = simplify_or_keep(&record.contour, epsilon).unwrap_or_else(|| {
        tracing::warn!(
            mask_index = record.mask_index,
            epsilon,
            "simplification failed, keeping contour as extracted"
        );
        record.contour.clone()
    });

    let simplified_holes = record
        .holes
        .iter()
        .map(|hole| {
            simplify_or_keep(hole, epsilon_factor * hole.perimeter())
                .unwrap_or_else(|| hole.clone())
        })
        .collect();

    SimplifiedContour {
        points_original: record.contour.len(),
        points_simplified: simplified.len(),
        simplified,
        simplified_holes,
        epsilon,
        record,
    }
}

/// Simplify every record. Never drops a record.
#[must_use = "returns the simplified contours"]
pub fn simplify(records: Vec<ContourRecord>, epsilon_factor: f64) -> Vec<SimplifiedContour> {
    let out: Vec<SimplifiedContour> = records
        .into_iter()
        .map(|r| simplify_record(r, epsilon_factor))
        .collect();
    let before: usize = out.iter().map(|s| s.points_original).sum();
    let after: usize = out.iter().map(|s| s.points_simplified).sum();
    tracing::debug!(
        contours = out.len(),
        points_before = before,
        points_after = after,
        "simplification complete"
    );
    out
}
