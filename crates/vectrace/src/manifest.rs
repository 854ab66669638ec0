//! File-backed segmentation: masks precomputed elsewhere, listed in a
//! JSON manifest.
//!
//! The manifest is either a bare array of records or `{"masks": [...]}`.
//! Each record's `segmentation` is a nested 0/1/bool array or a path to
//! a mask image (relative paths resolve against the manifest's
//! directory); `predicted_iou` and `stability_score` are optional.
//!
//! ```json
//! { "masks": [
//!     { "segmentation": "masks/wall.png", "predicted_iou": 0.93 },
//!     { "segmentation": [[0, 1], [1, 1]], "stability_score": 0.97 }
//! ] }
//! ```

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use serde::Deserialize;
use vectrace_pipeline::ingest::decode_mask_image;
use vectrace_pipeline::{GrayImage, MaskCell, MaskQuality, RawMask, RawMaskRecord, RgbImage};
use vectrace_worker::{ModelLoader, OracleError, SegmentationOracle, SegmentationParams};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Segmentation {
    Path(PathBuf),
    Grid(Vec<Vec<MaskCell>>),
}

#[derive(Debug, Deserialize)]
struct Entry {
    segmentation: Segmentation,
    #[serde(default)]
    area: Option<u64>,
    #[serde(default)]
    predicted_iou: Option<f64>,
    #[serde(default)]
    stability_score: Option<f64>,
    #[serde(default)]
    bbox: Option<[f64; 4]>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Manifest {
    List(Vec<Entry>),
    Wrapped { masks: Vec<Entry> },
}

impl Manifest {
    fn into_entries(self) -> Vec<Entry> {
        match self {
            Self::List(entries) | Self::Wrapped { masks: entries } => entries,
        }
    }
}

/// A validated mask grid at its recorded resolution.
#[derive(Debug, Clone)]
struct StoredMask {
    grid: GrayImage,
    quality: MaskQuality,
}

fn load_entry(entry: Entry, base: &Path) -> Result<StoredMask, String> {
    let quality = MaskQuality {
        predicted_iou: entry.predicted_iou,
        stability_score: entry.stability_score,
    };
    let record = match entry.segmentation {
        Segmentation::Path(rel) => {
            let path = base.join(rel);
            let bytes = std::fs::read(&path).map_err(|e| format!("{}: {e}", path.display()))?;
            let grid =
                decode_mask_image(&bytes).map_err(|e| format!("{}: {e}", path.display()))?;
            RawMaskRecord {
                area: entry.area,
                bbox: entry.bbox,
                ..RawMaskRecord::from_luma(&grid, quality)
            }
        }
        Segmentation::Grid(segmentation) => RawMaskRecord {
            segmentation,
            area: entry.area,
            predicted_iou: entry.predicted_iou,
            stability_score: entry.stability_score,
            bbox: entry.bbox,
        },
    };
    let mask = RawMask::from_record(&record).map_err(|e| e.to_string())?;
    Ok(StoredMask {
        grid: mask.grid().clone(),
        quality,
    })
}

/// Read and validate every mask in the manifest at `path`. Bad entries
/// are logged and skipped.
fn read_manifest(path: &Path) -> Result<Vec<StoredMask>, OracleError> {
    let text = std::fs::read_to_string(path)?;
    let manifest: Manifest = serde_json::from_str(&text).map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{}: {e}", path.display()),
        )
    })?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));

    let entries = manifest.into_entries();
    let total = entries.len();
    let masks: Vec<StoredMask> = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match load_entry(entry, base) {
            Ok(mask) => Some(mask),
            Err(reason) => {
                tracing::warn!(index, %reason, "skipping manifest entry");
                None
            }
        })
        .collect();
    tracing::debug!(accepted = masks.len(), total, "read mask manifest");
    Ok(masks)
}

/// Loads a manifest in place of a model.
#[derive(Debug, Default)]
pub struct FileModelLoader {
    masks: Option<Vec<StoredMask>>,
}

impl ModelLoader for FileModelLoader {
    fn check_file(&mut self, path: &Path) -> Result<(), OracleError> {
        if path.is_file() {
            Ok(())
        } else {
            Err(OracleError::MissingArtifact {
                path: path.to_owned(),
            })
        }
    }

    fn check_dependencies(&mut self) -> Result<(), OracleError> {
        Ok(())
    }

    fn construct(&mut self, path: &Path) -> Result<(), OracleError> {
        self.masks = Some(read_manifest(path)?);
        Ok(())
    }

    fn transfer_to_device(&mut self) -> Result<String, OracleError> {
        Ok("cpu".to_owned())
    }

    fn build_generator(
        &mut self,
        params: &SegmentationParams,
    ) -> Result<Box<dyn SegmentationOracle>, OracleError> {
        let masks = self
            .masks
            .take()
            .ok_or_else(|| OracleError::Inference("manifest not loaded".to_owned()))?;
        tracing::debug!(
            points_per_side = params.points_per_side,
            crop_n_layers = params.crop_n_layers,
            "grid parameters have no effect on precomputed masks"
        );
        Ok(Box::new(FileOracle {
            masks,
            pred_iou_thresh: params.pred_iou_thresh,
            stability_score_thresh: params.stability_score_thresh,
            min_region_area: params.min_mask_region_area,
        }))
    }
}

/// Serves the manifest's masks, scaled to whatever image it is asked
/// about and filtered by the quality thresholds and minimum region area.
#[derive(Debug)]
pub struct FileOracle {
    masks: Vec<StoredMask>,
    pred_iou_thresh: f64,
    stability_score_thresh: f64,
    min_region_area: u64,
}

impl FileOracle {
    fn passes(&self, quality: MaskQuality) -> bool {
        quality.predicted_iou.is_none_or(|v| v >= self.pred_iou_thresh)
            && quality
                .stability_score
                .is_none_or(|v| v >= self.stability_score_thresh)
    }
}

impl SegmentationOracle for FileOracle {
    fn generate(&mut self, image: &RgbImage) -> Result<Vec<RawMaskRecord>, OracleError> {
        let (width, height) = image.dimensions();
        let records: Vec<RawMaskRecord> = self
            .masks
            .iter()
            .filter(|m| self.passes(m.quality))
            .filter_map(|m| {
                let resized;
                let grid = if m.grid.dimensions() == (width, height) {
                    &m.grid
                } else {
                    resized = image::imageops::resize(&m.grid, width, height, FilterType::Nearest);
                    &resized
                };
                // Area is measured at the served size, as a model would see it.
                let area = grid.pixels().filter(|p| p.0[0] != 0).count() as u64;
                (area >= self.min_region_area).then(|| RawMaskRecord {
                    area: Some(area),
                    ..RawMaskRecord::from_luma(grid, m.quality)
                })
            })
            .collect();
        tracing::debug!(
            served = records.len(),
            filtered = self.masks.len() - records.len(),
            "served manifest masks"
        );
        Ok(records)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::Luma;

    fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    /// Defaults with no region-area floor, for tiny fixture grids.
    fn any_area() -> SegmentationParams {
        SegmentationParams {
            min_mask_region_area: 0,
            ..SegmentationParams::default()
        }
    }

    fn loaded(path: &Path, params: &SegmentationParams) -> Box<dyn SegmentationOracle> {
        let mut loader = FileModelLoader::default();
        loader.check_file(path).unwrap();
        loader.construct(path).unwrap();
        loader.build_generator(params).unwrap()
    }

    #[test]
    fn missing_manifest_is_a_missing_artifact() {
        let mut loader = FileModelLoader::default();
        let err = loader.check_file(Path::new("/no/such/masks.json")).unwrap_err();
        assert!(matches!(err, OracleError::MissingArtifact { .. }));
    }

    #[test]
    fn grids_and_images_both_load() {
        let dir = tempfile::tempdir().unwrap();
        let png = GrayImage::from_fn(4, 3, |x, _| Luma([if x < 2 { 255 } else { 0 }]));
        std::fs::create_dir(dir.path().join("m")).unwrap();
        png.save(dir.path().join("m/left.png")).unwrap();
        let path = write(
            dir.path(),
            "masks.json",
            r#"{ "masks": [
                { "segmentation": "m/left.png", "predicted_iou": 0.95 },
                { "segmentation": [[0, 0, 1, 1], [0, 0, 1, 1], [0, 0, 1, 1]] }
            ] }"#,
        );

        let mut oracle = loaded(&path, &any_area());
        let records = oracle.generate(&RgbImage::new(4, 3)).unwrap();
        assert_eq!(records.len(), 2);
        let masks: Vec<RawMask> = records
            .iter()
            .map(|r| RawMask::from_record(r).unwrap())
            .collect();
        assert_eq!(masks[0].area(), 6);
        assert_eq!(masks[0].quality().predicted_iou, Some(0.95));
        assert_eq!(masks[1].area(), 6);
    }

    #[test]
    fn bare_array_and_bad_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "masks.json",
            r#"[
                { "segmentation": [[1, 1], [1, 1]] },
                { "segmentation": [[1, 1], [1]] },
                { "segmentation": "missing.png" }
            ]"#,
        );
        let mut oracle = loaded(&path, &any_area());
        let records = oracle.generate(&RgbImage::new(2, 2)).unwrap();
        assert_eq!(records.len(), 1, "ragged and missing entries are skipped");
    }

    #[test]
    fn low_quality_masks_are_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "masks.json",
            r#"[
                { "segmentation": [[1]], "predicted_iou": 0.5 },
                { "segmentation": [[1]], "stability_score": 0.99 },
                { "segmentation": [[1]], "stability_score": 0.5 },
                { "segmentation": [[1]] }
            ]"#,
        );
        let mut oracle = loaded(&path, &any_area());
        assert_eq!(oracle.generate(&RgbImage::new(1, 1)).unwrap().len(), 2);
    }

    #[test]
    fn masks_follow_the_image_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "masks.json",
            r#"[ { "segmentation": [[1, 1, 0, 0], [1, 1, 0, 0], [0, 0, 0, 0], [0, 0, 0, 0]] } ]"#,
        );
        let mut oracle = loaded(&path, &any_area());
        let records = oracle.generate(&RgbImage::new(2, 2)).unwrap();
        let mask = RawMask::from_record(&records[0]).unwrap();
        assert_eq!(mask.dimensions().width, 2);
        assert_eq!(mask.area(), 1);
    }

    #[test]
    fn generator_needs_a_constructed_manifest() {
        let mut loader = FileModelLoader::default();
        assert!(
            loader
                .build_generator(&SegmentationParams::default())
                .is_err()
        );
    }

    #[test]
    fn unparseable_manifest_fails_construction() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "masks.json", r#"{ "nope": 1 }"#);
        let mut loader = FileModelLoader::default();
        assert!(loader.construct(&path).is_err());
    }

    #[test]
    fn small_regions_are_dropped_at_the_served_size() {
        let dir = tempfile::tempdir().unwrap();
        // 4×4 mask with a 2×2 block: 4 px as stored, 1 px at 2×2.
        let path = write(
            dir.path(),
            "masks.json",
            r#"[
                { "segmentation": [[1, 1, 0, 0], [1, 1, 0, 0], [0, 0, 0, 0], [0, 0, 0, 0]] },
                { "segmentation": [[1, 1, 1, 1], [1, 1, 1, 1], [0, 0, 0, 0], [0, 0, 0, 0]] }
            ]"#,
        );
        let params = SegmentationParams {
            min_mask_region_area: 2,
            ..SegmentationParams::default()
        };
        let mut oracle = loaded(&path, &params);
        assert_eq!(oracle.generate(&RgbImage::new(4, 4)).unwrap().len(), 2);
        let small = oracle.generate(&RgbImage::new(2, 2)).unwrap();
        assert_eq!(small.len(), 1);
        assert_eq!(small[0].area, Some(2));
    }
}
