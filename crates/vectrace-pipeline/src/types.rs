//! Shared types for the vectrace mask-to-vector pipeline.

use serde::{Deserialize, Serialize};

/// Re-export `GrayImage` so downstream crates can reference mask grids
/// without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage` so downstream crates can hand source images to
/// the segmentation oracle without depending on `image` directly.
pub use image::RgbImage;

/// Pixel value of a foreground cell in a normalized mask grid.
pub const FOREGROUND: u8 = 255;

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another point.
    #[must_use]
    pub fn distance_squared(self, other: Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx.mul_add(dx, dy * dy)
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Axis-aligned bounding box in pixel space.
///
/// `width` and `height` are the extent between the outermost foreground
/// pixels (`max - min`), so a single-pixel region has a zero-size box
/// at its position. The empty box is `[0, 0, 0, 0]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BBox {
    /// The `[x, y, width, height]` array form.
    #[must_use]
    pub const fn to_array(self) -> [u32; 4] {
        [self.x, self.y, self.width, self.height]
    }
}

/// Oracle-supplied quality estimates for a mask.
///
/// Both scores are in `[0, 1]` when present. Oracles are not required to
/// provide them.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MaskQuality {
    pub predicted_iou: Option<f64>,
    pub stability_score: Option<f64>,
}

/// A binary mask exactly as the segmentation oracle produced it.
///
/// The grid is normalized to `0`/[`FOREGROUND`] on construction. Never
/// mutated afterwards: post-processing produces a new grid.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMask {
    pub(crate) grid: GrayImage,
    pub(crate) area: u64,
    pub(crate) quality: MaskQuality,
    pub(crate) bbox: BBox,
}

impl RawMask {
    /// Build a mask from a grayscale grid where any non-zero pixel is
    /// foreground. Area and bounding box are derived from the grid.
    #[must_use]
    pub fn from_luma(grid: &GrayImage, quality: MaskQuality) -> Self {
        let grid = crate::mask::binarize(grid);
        let area = crate::mask::foreground_count(&grid);
        let bbox = crate::mask::bounding_box(&grid);
        Self {
            grid,
            area,
            quality,
            bbox,
        }
    }

    /// The normalized `0`/`255` grid.
    #[must_use]
    pub const fn grid(&self) -> &GrayImage {
        &self.grid
    }

    /// Area as reported by the oracle (or counted, if it reported none).
    #[must_use]
    pub const fn area(&self) -> u64 {
        self.area
    }

    #[must_use]
    pub const fn quality(&self) -> MaskQuality {
        self.quality
    }

    #[must_use]
    pub const fn bbox(&self) -> BBox {
        self.bbox
    }

    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.grid.width(),
            height: self.grid.height(),
        }
    }
}

/// A mask after cleaning, with area and bounding box recomputed from the
/// cleaned grid.
///
/// Carries the originating mask's quality scores and its position in the
/// input batch, but not the original grid.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedMask {
    pub grid: GrayImage,
    pub area: u64,
    pub bbox: BBox,
    pub quality: MaskQuality,
    /// Index of the originating [`RawMask`] in the post-processor input.
    pub source_index: usize,
}

/// A closed polygonal boundary in image pixel space.
///
/// The closing edge from the last point back to the first is implicit;
/// the first point is not repeated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contour(Vec<Point>);

impl Contour {
    #[must_use]
    pub const fn new(points: Vec<Point>) -> Self {
        Self(points)
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.0
    }

    #[must_use]
    pub fn into_points(self) -> Vec<Point> {
        self.0
    }

    /// Enclosed area (shoelace formula), always non-negative.
    #[must_use]
    pub fn area(&self) -> f64 {
        use geo::Area;
        if self.0.len() < 3 {
            return 0.0;
        }
        self.to_geo_polygon().unsigned_area()
    }

    /// Length of the closed boundary, including the closing edge.
    #[must_use]
    pub fn perimeter(&self) -> f64 {
        let n = self.0.len();
        if n < 2 {
            return 0.0;
        }
        (0..n)
            .map(|i| self.0[i].distance(self.0[(i + 1) % n]))
            .sum()
    }

    /// Bounding box of the points, truncated to whole pixels.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn bbox(&self) -> BBox {
        use geo::BoundingRect;
        let line = geo::LineString::from(
            self.0
                .iter()
                .map(|p| geo::Coord { x: p.x, y: p.y })
                .collect::<Vec<_>>(),
        );
        line.bounding_rect().map_or_else(BBox::default, |rect| {
            let min = rect.min();
            BBox {
                x: min.x.max(0.0) as u32,
                y: min.y.max(0.0) as u32,
                width: rect.width() as u32,
                height: rect.height() as u32,
            }
        })
    }

    /// Number of distinct points anywhere in the ring.
    #[must_use]
    pub fn distinct_len(&self) -> usize {
        let mut keys: Vec<(u64, u64)> = self
            .0
            .iter()
            .map(|p| (p.x.to_bits(), p.y.to_bits()))
            .collect();
        keys.sort_unstable();
        keys.dedup();
        keys.len()
    }

    fn to_geo_polygon(&self) -> geo::Polygon<f64> {
        let exterior: Vec<geo::Coord<f64>> = self
            .0
            .iter()
            .map(|p| geo::Coord { x: p.x, y: p.y })
            .collect();
        geo::Polygon::new(geo::LineString::from(exterior), Vec::new())
    }
}

/// One polygon extracted from one processed mask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContourRecord {
    /// Position of the source mask in the extractor input.
    pub mask_index: usize,
    /// Largest-area outer boundary of the mask.
    pub contour: Contour,
    /// Hole rings directly inside `contour`. Empty unless extracted with
    /// [`ContourMode::WithHoles`].
    pub holes: Vec<Contour>,
    pub area: f64,
    pub perimeter: f64,
    pub bbox: BBox,
    pub quality: MaskQuality,
}

/// A [`ContourRecord`] after Douglas-Peucker reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimplifiedContour {
    /// The record as extracted; `area`, `perimeter` and `bbox` describe
    /// the unsimplified boundary.
    pub record: ContourRecord,
    /// The reduced outer ring.
    pub simplified: Contour,
    /// Reduced hole rings, parallel to `record.holes`.
    pub simplified_holes: Vec<Contour>,
    /// Tolerance used: `epsilon_factor * record.perimeter`.
    pub epsilon: f64,
    pub points_original: usize,
    pub points_simplified: usize,
}

/// Read access to anything the document builder can place as a polygon.
pub trait ContourSource {
    /// Outer ring in image pixel space.
    fn ring(&self) -> &[Point];

    /// Hole rings in image pixel space.
    fn hole_rings(&self) -> Vec<&[Point]>;

    /// Area used for layer classification.
    fn area(&self) -> f64;

    /// Quality score used by the size-and-quality layer policy.
    fn predicted_iou(&self) -> Option<f64>;
}

impl ContourSource for ContourRecord {
    fn ring(&self) -> &[Point] {
        self.contour.points()
    }

    fn hole_rings(&self) -> Vec<&[Point]> {
        self.holes.iter().map(Contour::points).collect()
    }

    fn area(&self) -> f64 {
        self.area
    }

    fn predicted_iou(&self) -> Option<f64> {
        self.quality.predicted_iou
    }
}

impl ContourSource for SimplifiedContour {
    fn ring(&self) -> &[Point] {
        self.simplified.points()
    }

    fn hole_rings(&self) -> Vec<&[Point]> {
        self.simplified_holes.iter().map(Contour::points).collect()
    }

    fn area(&self) -> f64 {
        self.record.area
    }

    fn predicted_iou(&self) -> Option<f64> {
        self.record.quality.predicted_iou
    }
}

/// Which boundaries the extractor keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContourMode {
    /// Only the largest outer boundary of each mask.
    #[default]
    External,
    /// The largest outer boundary plus the holes directly inside it.
    WithHoles,
}

/// Post-processor switches. Each step is independently toggleable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessOptions {
    /// Blur-then-rebinarize edge softening.
    pub smoothing: bool,
    /// Gaussian sigma; also sets the kernel size. Must be positive.
    pub smoothing_strength: f64,
    /// Drop connected components smaller than `min_area`.
    pub noise_removal: bool,
    /// Morphological closing with a 5×5 square.
    pub fill_holes: bool,
    /// Masks with fewer foreground pixels than this (before cleaning) are
    /// dropped. Also the component threshold for noise removal.
    pub min_area: u64,
}

impl PostProcessOptions {
    pub const DEFAULT_SMOOTHING_STRENGTH: f64 = 1.0;
    pub const DEFAULT_MIN_AREA: u64 = 100;
}

impl Default for PostProcessOptions {
    fn default() -> Self {
        Self {
            smoothing: true,
            smoothing_strength: Self::DEFAULT_SMOOTHING_STRENGTH,
            noise_removal: true,
            fill_holes: false,
            min_area: Self::DEFAULT_MIN_AREA,
        }
    }
}

/// Vector post-processing configuration consumed by the pipeline.
///
/// Constructed once by the caller and passed in; the pipeline never
/// persists or looks up configuration on its own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    #[serde(flatten)]
    pub cleaning: PostProcessOptions,
    /// Fraction of a contour's perimeter used as its simplification
    /// tolerance. Must lie in `(0, 1)`.
    pub epsilon_factor: f64,
    pub contour_mode: ContourMode,
}

impl VectorConfig {
    pub const DEFAULT_EPSILON_FACTOR: f64 = 0.02;

    /// Check the invariants the pipeline relies on.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] when `smoothing_strength`
    /// is not a positive finite number or `epsilon_factor` is outside
    /// `(0, 1)`.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let strength = self.cleaning.smoothing_strength;
        if !strength.is_finite() || strength <= 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "smoothing_strength must be > 0, got {strength}"
            )));
        }
        let eps = self.epsilon_factor;
        if !eps.is_finite() || eps <= 0.0 || eps >= 1.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "epsilon_factor must be in (0, 1), got {eps}"
            )));
        }
        Ok(())
    }
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            cleaning: PostProcessOptions::default(),
            epsilon_factor: Self::DEFAULT_EPSILON_FACTOR,
            contour_mode: ContourMode::default(),
        }
    }
}

/// Errors that can occur in the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// An oracle record was malformed (wrong rank, ragged rows, bad scores).
    #[error("invalid mask record: {0}")]
    InvalidMask(String),

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// A mask image could not be decoded.
    #[error("failed to decode mask image: {0}")]
    ImageDecode(#[from] image::ImageError),
}
