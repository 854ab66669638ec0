//! Gaussian edge smoothing for binary masks.
//!
//! A mask is blurred with a square Gaussian kernel and then re-binarized
//! at the midpoint, which rounds off staircase edges and one-pixel spurs
//! without moving the boundary by more than a pixel or so.
//!
//! The kernel size is derived from the strength (`max(3, round(5 * s))`,
//! bumped to the next odd number) and sigma equals the strength. Borders
//! are handled by reflecting about the edge pixel without repeating it
//! (`dcb|abcd|cba`), so a mask touching the frame stays attached to it.

use image::{GrayImage, Luma};

use crate::types::FOREGROUND;

/// Blurred values at or above this become foreground.
const REBINARIZE_THRESHOLD: f32 = 128.0;

/// Side length of the square kernel for a given smoothing strength.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn kernel_size(strength: f64) -> usize {
    let size = ((strength * 5.0).round() as usize).max(3);
    if size % 2 == 0 { size + 1 } else { size }
}

/// Normalized 1-D Gaussian weights of the given odd length.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn gaussian_kernel(size: usize, sigma: f64) -> Vec<f32> {
    let center = (size / 2) as f64;
    let denom = 2.0 * sigma * sigma;
    let raw: Vec<f64> = (0..size)
        .map(|i| {
            let d = i as f64 - center;
            (-(d * d) / denom).exp()
        })
        .collect();
    let sum: f64 = raw.iter().sum();
    raw.iter().map(|w| (w / sum) as f32).collect()
}

/// Reflect an out-of-range index back into `0..len` without repeating
/// the edge sample.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
const fn reflect(mut i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let n = len as isize;
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * n - 2 - i;
        } else {
            return i as usize;
        }
    }
}

/// Smooth a binary mask and re-binarize it.
///
/// Non-positive or non-finite strengths return the grid unchanged.
#[must_use = "returns the smoothed mask"]
#[allow(clippy::cast_possible_wrap)]
pub fn smooth_mask(grid: &GrayImage, strength: f64) -> GrayImage {
    if !strength.is_finite() || strength <= 0.0 {
        return grid.clone();
    }
    let (w, h) = (grid.width() as usize, grid.height() as usize);
    if w == 0 || h == 0 {
        return grid.clone();
    }

    let size = kernel_size(strength);
    let kernel = gaussian_kernel(size, strength);
    let half = (size / 2) as isize;

    let src: Vec<f32> = grid.as_raw().iter().map(|&v| f32::from(v)).collect();

    // Horizontal pass.
    let mut horiz = vec![0.0_f32; w * h];
    for y in 0..h {
        let row = &src[y * w..(y + 1) * w];
        for x in 0..w {
            let mut acc = 0.0_f32;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = reflect(x as isize + k as isize - half, w);
                acc = weight.mul_add(row[sx], acc);
            }
            horiz[y * w + x] = acc;
        }
    }

    // Vertical pass, rounded to 8 bits before thresholding.
    let mut out = GrayImage::new(grid.width(), grid.height());
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0_f32;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = reflect(y as isize + k as isize - half, h);
                acc = weight.mul_add(horiz[sy * w + x], acc);
            }
            let value = acc.round().clamp(0.0, 255.0);
            if value >= REBINARIZE_THRESHOLD {
                #[allow(clippy::cast_possible_truncation)]
                out.put_pixel(x as u32, y as u32, Luma([FOREGROUND]));
            }
        }
    }
    out
}
