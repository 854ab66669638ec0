//! Raster preview: classified contours drawn over the source image.
//!
//! Each contour is stroked with its layer's color so the classification
//! can be checked by eye before a drawing is written. `tiny-skia` handles
//! anti-aliasing and sub-pixel positioning.

use image::{Rgba, RgbaImage};
use tiny_skia::{LineCap, LineJoin, Paint, PathBuilder, Pixmap, Stroke, Transform};
use vectrace_pipeline::{ContourSource, LayerAssignment, Point, RgbImage};

use crate::types::ExportError;

/// RGB for an AutoCAD Color Index value. Only the standard colors 1-9
/// are mapped; everything else renders white.
#[must_use]
pub const fn aci_to_rgb(color: u8) -> [u8; 3] {
    match color {
        1 => [255, 0, 0],
        2 => [255, 255, 0],
        3 => [0, 255, 0],
        4 => [0, 255, 255],
        5 => [0, 0, 255],
        6 => [255, 0, 255],
        8 => [128, 128, 128],
        9 => [192, 192, 192],
        _ => [255, 255, 255],
    }
}

#[allow(clippy::cast_possible_truncation)]
fn ring_path(ring: &[Point]) -> Option<tiny_skia::Path> {
    let (first, rest) = ring.split_first()?;
    let mut pb = PathBuilder::new();
    pb.move_to(first.x as f32, first.y as f32);
    for p in rest {
        pb.line_to(p.x as f32, p.y as f32);
    }
    pb.close();
    pb.finish()
}

/// Stroke every contour (outer ring and holes) over a copy of `image`.
///
/// `assignments` supplies each contour's layer color by index; contours
/// without an assignment are drawn white.
///
/// # Errors
///
/// Returns [`ExportError::NoPreview`] if the image has a zero dimension.
pub fn render_preview<C: ContourSource>(
    image: &RgbImage,
    contours: &[C],
    assignments: &[LayerAssignment],
    line_width: f32,
) -> Result<RgbaImage, ExportError> {
    let (width, height) = image.dimensions();
    let Some(mut pixmap) = Pixmap::new(width, height) else {
        return Err(ExportError::NoPreview(format!(
            "image is {width}x{height}"
        )));
    };

    // The source is opaque, so premultiplied and straight RGBA coincide.
    for (dst, src) in pixmap.data_mut().chunks_exact_mut(4).zip(image.pixels()) {
        dst.copy_from_slice(&[src.0[0], src.0[1], src.0[2], 255]);
    }

    let stroke = Stroke {
        width: line_width,
        line_cap: LineCap::Round,
        line_join: LineJoin::Round,
        ..Stroke::default()
    };

    for (index, contour) in contours.iter().enumerate() {
        let color = assignments
            .iter()
            .find(|a| a.contour_index == index)
            .map_or(7, |a| a.layer.color);
        let [r, g, b] = aci_to_rgb(color);
        let mut paint = Paint::default();
        paint.set_color_rgba8(r, g, b, 255);
        paint.anti_alias = true;

        let mut rings = vec![contour.ring()];
        rings.extend(contour.hole_rings());
        for ring in rings {
            if let Some(path) = ring_path(ring) {
                pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
            }
        }
    }

    // Convert the pixmap (premultiplied RGBA) to an `RgbaImage` (straight RGBA).
    let data = pixmap.data();
    let mut out = RgbaImage::new(width, height);
    for (i, pixel) in out.pixels_mut().enumerate() {
        let off = i * 4;
        let a = data[off + 3];
        if a == 0 {
            *pixel = Rgba([0, 0, 0, 0]);
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let unmul = |c: u8| (u16::from(c) * 255 / u16::from(a)) as u8;
            *pixel = Rgba([unmul(data[off]), unmul(data[off + 1]), unmul(data[off + 2]), a]);
        }
    }
    Ok(out)
}
