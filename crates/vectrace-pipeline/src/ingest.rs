//! Oracle record ingestion: turn loosely-typed segmentation output into
//! validated [`RawMask`]s.
//!
//! Segmentation oracles emit one record per mask with a nested
//! `segmentation` grid and optional quality metadata. Everything is
//! checked here, once, so later stages only ever see rectangular
//! `0`/`255` grids with scores in `[0, 1]`. A bad record is an input
//! error: [`ingest_records`] logs it and moves on.

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

use crate::types::{BBox, FOREGROUND, MaskQuality, PipelineError, RawMask};

/// One cell of a serialized segmentation grid.
///
/// Oracles disagree on whether masks are boolean or numeric, so both are
/// accepted. Any non-zero number is foreground.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaskCell {
    Flag(bool),
    Value(f64),
}

impl MaskCell {
    fn is_foreground(self) -> Result<bool, PipelineError> {
        match self {
            Self::Flag(b) => Ok(b),
            Self::Value(v) if v.is_finite() => Ok(v != 0.0),
            Self::Value(v) => Err(PipelineError::InvalidMask(format!(
                "non-finite segmentation value {v}"
            ))),
        }
    }
}

impl From<bool> for MaskCell {
    fn from(b: bool) -> Self {
        Self::Flag(b)
    }
}

/// A mask as a segmentation oracle reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMaskRecord {
    /// Row-major grid, `segmentation[y][x]`.
    pub segmentation: Vec<Vec<MaskCell>>,
    /// Foreground pixel count. Counted from the grid when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_iou: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stability_score: Option<f64>,
    /// `[x, y, width, height]`. Derived from the grid when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
}

impl RawMaskRecord {
    /// Encode a grayscale grid (non-zero = foreground) as a record.
    #[must_use]
    pub fn from_luma(grid: &GrayImage, quality: MaskQuality) -> Self {
        let segmentation = grid
            .rows()
            .map(|row| row.map(|p| MaskCell::Flag(p.0[0] != 0)).collect())
            .collect();
        Self {
            segmentation,
            area: None,
            predicted_iou: quality.predicted_iou,
            stability_score: quality.stability_score,
            bbox: None,
        }
    }
}

fn check_score(name: &str, score: Option<f64>) -> Result<Option<f64>, PipelineError> {
    match score {
        Some(s) if !s.is_finite() || !(0.0..=1.0).contains(&s) => Err(
            PipelineError::InvalidMask(format!("{name} must be in [0, 1], got {s}")),
        ),
        other => Ok(other),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn check_bbox(bbox: [f64; 4]) -> Result<BBox, PipelineError> {
    if bbox.iter().any(|v| !v.is_finite() || *v < 0.0 || *v > f64::from(u32::MAX)) {
        return Err(PipelineError::InvalidMask(format!(
            "bbox values must be finite and non-negative, got {bbox:?}"
        )));
    }
    Ok(BBox {
        x: bbox[0] as u32,
        y: bbox[1] as u32,
        width: bbox[2] as u32,
        height: bbox[3] as u32,
    })
}

impl RawMask {
    /// Validate an oracle record.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidMask`] when the grid is empty or
    /// ragged, a cell is not finite, a quality score lies outside `[0, 1]`,
    /// or the bounding box is malformed.
    pub fn from_record(record: &RawMaskRecord) -> Result<Self, PipelineError> {
        let height = record.segmentation.len();
        let width = record.segmentation.first().map_or(0, Vec::len);
        if height == 0 || width == 0 {
            return Err(PipelineError::InvalidMask(
                "segmentation grid is empty".to_owned(),
            ));
        }
        if let Some((y, row)) = record
            .segmentation
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != width)
        {
            return Err(PipelineError::InvalidMask(format!(
                "segmentation row {y} has {} cells, expected {width}",
                row.len()
            )));
        }
        let (Ok(w), Ok(h)) = (u32::try_from(width), u32::try_from(height)) else {
            return Err(PipelineError::InvalidMask(format!(
                "segmentation grid {width}x{height} is too large"
            )));
        };

        let mut grid = GrayImage::new(w, h);
        for (y, row) in (0..h).zip(&record.segmentation) {
            for (x, cell) in (0..w).zip(row) {
                if cell.is_foreground()? {
                    grid.put_pixel(x, y, Luma([FOREGROUND]));
                }
            }
        }

        let quality = MaskQuality {
            predicted_iou: check_score("predicted_iou", record.predicted_iou)?,
            stability_score: check_score("stability_score", record.stability_score)?,
        };
        let bbox = match record.bbox {
            Some(b) => check_bbox(b)?,
            None => crate::mask::bounding_box(&grid),
        };
        let area = record
            .area
            .unwrap_or_else(|| crate::mask::foreground_count(&grid));

        Ok(Self {
            grid,
            area,
            quality,
            bbox,
        })
    }
}

/// Validate a batch of records, skipping (and logging) the bad ones.
#[must_use = "returns the valid masks"]
pub fn ingest_records(records: &[RawMaskRecord]) -> Vec<RawMask> {
    let masks: Vec<RawMask> = records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| match RawMask::from_record(record) {
            Ok(mask) => Some(mask),
            Err(e) => {
                tracing::warn!(index, error = %e, "skipping malformed mask record");
                None
            }
        })
        .collect();
    if masks.len() < records.len() {
        tracing::info!(
            accepted = masks.len(),
            rejected = records.len() - masks.len(),
            "ingested oracle records"
        );
    }
    masks
}

/// Decode an encoded mask image (PNG, JPEG, ...) into a grayscale grid.
///
/// # Errors
///
/// Returns [`PipelineError::ImageDecode`] if the bytes are not a
/// supported image.
pub fn decode_mask_image(bytes: &[u8]) -> Result<GrayImage, PipelineError> {
    Ok(image::load_from_memory(bytes)?.to_luma8())
}

/// Order in which masks enter the pipeline.
///
/// Oracles make no ordering promise, so masks are sorted before anything
/// else looks at them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskOrdering {
    /// Largest area first.
    #[default]
    Area,
    /// Highest stability score first, then largest area. Missing scores
    /// sort last.
    StabilityThenArea,
}

/// Sort masks (stably) and optionally keep only the first `max_masks`.
pub fn order_masks(masks: &mut Vec<RawMask>, ordering: MaskOrdering, max_masks: Option<usize>) {
    match ordering {
        MaskOrdering::Area => masks.sort_by(|a, b| b.area.cmp(&a.area)),
        MaskOrdering::StabilityThenArea => masks.sort_by(|a, b| {
            let sa = a.quality.stability_score.unwrap_or(f64::NEG_INFINITY);
            let sb = b.quality.stability_score.unwrap_or(f64::NEG_INFINITY);
            sb.total_cmp(&sa).then_with(|| b.area.cmp(&a.area))
        }),
    }
    if let Some(limit) = max_masks
        && masks.len() > limit
    {
        tracing::debug!(kept = limit, dropped = masks.len() - limit, "capping masks");
        masks.truncate(limit);
    }
}

/// Keep masks whose recorded area lies in `[min_area, max_area]`.
#[must_use = "returns the filtered masks"]
pub fn filter_by_area(masks: Vec<RawMask>, min_area: u64, max_area: u64) -> Vec<RawMask> {
    masks
        .into_iter()
        .filter(|m| (min_area..=max_area).contains(&m.area))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(rows: &[&[u8]]) -> RawMaskRecord {
        RawMaskRecord {
            segmentation: rows
                .iter()
                .map(|r| r.iter().map(|&v| MaskCell::Value(f64::from(v))).collect())
                .collect(),
            area: None,
            predicted_iou: None,
            stability_score: None,
            bbox: None,
        }
    }

    fn mask_with(area: u64, stability: Option<f64>) -> RawMask {
        RawMask {
            grid: GrayImage::new(1, 1),
            area,
            quality: MaskQuality {
                predicted_iou: None,
                stability_score: stability,
            },
            bbox: BBox::default(),
        }
    }

    // --- record validation tests ---

    #[test]
    fn valid_record_is_normalized() {
        let mask = RawMask::from_record(&record(&[&[0, 1, 1], &[0, 1, 0]])).unwrap();
        assert_eq!(mask.grid().as_raw(), &vec![0, 255, 255, 0, 255, 0]);
        assert_eq!(mask.area(), 3);
        assert_eq!(mask.bbox().to_array(), [1, 0, 1, 1]);
    }

    #[test]
    fn reported_area_is_kept() {
        let mut r = record(&[&[1, 1]]);
        r.area = Some(7);
        assert_eq!(RawMask::from_record(&r).unwrap().area(), 7);
    }

    #[test]
    fn empty_grid_is_rejected() {
        let r = record(&[]);
        assert!(matches!(
            RawMask::from_record(&r),
            Err(PipelineError::InvalidMask(_))
        ));
        let r = record(&[&[]]);
        assert!(RawMask::from_record(&r).is_err());
    }

    #[test]
    fn ragged_grid_is_rejected() {
        let err = RawMask::from_record(&record(&[&[0, 1], &[1]])).unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn out_of_range_scores_are_rejected() {
        let mut r = record(&[&[1]]);
        r.predicted_iou = Some(1.5);
        assert!(RawMask::from_record(&r).is_err());
        r.predicted_iou = Some(0.5);
        r.stability_score = Some(f64::NAN);
        assert!(RawMask::from_record(&r).is_err());
    }

    #[test]
    fn negative_bbox_is_rejected() {
        let mut r = record(&[&[1]]);
        r.bbox = Some([0.0, -1.0, 1.0, 1.0]);
        assert!(RawMask::from_record(&r).is_err());
    }

    #[test]
    fn record_parses_from_json_with_bools_and_numbers() {
        let json = r#"{
            "segmentation": [[false, true], [1, 0]],
            "predicted_iou": 0.91,
            "stability_score": 0.96
        }"#;
        let r: RawMaskRecord = serde_json::from_str(json).unwrap();
        let mask = RawMask::from_record(&r).unwrap();
        assert_eq!(mask.area(), 2);
        assert_eq!(mask.quality().predicted_iou, Some(0.91));
    }

    #[test]
    fn from_luma_round_trips_through_record() {
        let grid = GrayImage::from_raw(2, 2, vec![0, 9, 9, 0]).unwrap();
        let r = RawMaskRecord::from_luma(&grid, MaskQuality::default());
        let mask = RawMask::from_record(&r).unwrap();
        assert_eq!(mask.grid().as_raw(), &vec![0, 255, 255, 0]);
    }

    #[test]
    fn ingest_skips_bad_records() {
        let records = vec![
            record(&[&[1, 1]]),
            record(&[&[1], &[1, 1]]),
            record(&[&[0, 1]]),
        ];
        let masks = ingest_records(&records);
        assert_eq!(masks.len(), 2);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            decode_mask_image(b"not an image"),
            Err(PipelineError::ImageDecode(_))
        ));
    }

    // --- ordering tests ---

    #[test]
    fn area_ordering_is_descending_and_stable() {
        let mut masks = vec![
            mask_with(10, Some(0.1)),
            mask_with(30, None),
            mask_with(10, Some(0.9)),
        ];
        order_masks(&mut masks, MaskOrdering::Area, None);
        let areas: Vec<u64> = masks.iter().map(RawMask::area).collect();
        assert_eq!(areas, vec![30, 10, 10]);
        assert_eq!(masks[1].quality().stability_score, Some(0.1));
    }

    #[test]
    fn stability_then_area_ordering() {
        let mut masks = vec![
            mask_with(500, Some(0.90)),
            mask_with(100, Some(0.99)),
            mask_with(900, None),
            mask_with(200, Some(0.90)),
        ];
        order_masks(&mut masks, MaskOrdering::StabilityThenArea, None);
        let areas: Vec<u64> = masks.iter().map(RawMask::area).collect();
        assert_eq!(areas, vec![100, 500, 200, 900]);
    }

    #[test]
    fn max_masks_caps_after_sorting() {
        let mut masks = vec![mask_with(1, None), mask_with(3, None), mask_with(2, None)];
        order_masks(&mut masks, MaskOrdering::Area, Some(2));
        let areas: Vec<u64> = masks.iter().map(RawMask::area).collect();
        assert_eq!(areas, vec![3, 2]);
    }

    // --- size filter tests ---

    #[test]
    fn filter_by_area_is_inclusive() {
        let masks = vec![mask_with(99, None), mask_with(100, None), mask_with(500, None)];
        let kept = filter_by_area(masks, 100, 500);
        assert_eq!(kept.len(), 2);
    }
}
