//! Task bodies, run on the worker thread.
//!
//! Each body polls the stop flag between coarse stages through its
//! [`Reporter`]. Nothing here touches the orchestrator state; the worker
//! loop turns the returned outcome into a state change and a terminal
//! event.

use std::path::{Path, PathBuf};

use image::DynamicImage;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use vectrace_export::{DrawingDocument, TextAnnotation};
use vectrace_pipeline::ingest::order_masks;
use vectrace_pipeline::{
    Dimensions, LayerPolicy, Pipeline, RawMask, RgbImage, VectorConfig, ingest_records,
};

use crate::event::TaskOutput;
use crate::oracle::{ModelLoader, SegmentationOracle, SegmentationParams};
use crate::progress::{Reporter, TaskError};

/// Drawing output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Format version name, e.g. `"R2018"`.
    pub version: String,
    /// Unit system name: `mm`, `cm`, `m` or `inch`.
    pub units: String,
    /// Drawing units per source pixel.
    pub scale: f64,
    /// Place the source image on its own layer under the polylines.
    pub add_image_reference: bool,
    pub layer_prefix: String,
    pub layer_policy: LayerPolicy,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            version: "R2018".to_owned(),
            units: "mm".to_owned(),
            scale: 1.0,
            add_image_reference: false,
            layer_prefix: vectrace_export::DEFAULT_LAYER_PREFIX.to_owned(),
            layer_policy: LayerPolicy::BySize,
        }
    }
}

/// Everything an export run needs, handed over by value.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub masks: Vec<RawMask>,
    pub vector: VectorConfig,
    pub export: ExportConfig,
    pub output: PathBuf,
    /// Height of the mask grids, for the Y flip. `None` keeps raster Y.
    pub source_height: Option<u32>,
    /// Extra factor applied on top of `export.scale`, e.g. to undo a
    /// resize before segmentation.
    pub pixel_scale: f64,
    /// Source image to reference when `export.add_image_reference` is set.
    pub image_path: Option<PathBuf>,
    pub annotations: Vec<TextAnnotation>,
}

impl ExportRequest {
    /// A request with default settings for `masks`.
    #[must_use]
    pub fn new(masks: Vec<RawMask>, output: impl Into<PathBuf>) -> Self {
        let source_height = masks.first().map(|m| m.dimensions().height);
        Self {
            masks,
            vector: VectorConfig::default(),
            export: ExportConfig::default(),
            output: output.into(),
            source_height,
            pixel_scale: 1.0,
            image_path: None,
            annotations: Vec::new(),
        }
    }
}

/// A model ready to generate masks, owned by the worker thread.
pub(crate) struct LoadedModel {
    pub(crate) oracle: Box<dyn SegmentationOracle>,
    pub(crate) params: SegmentationParams,
}

// ─────────────────────────── Model acquisition ───────────────────────────

pub(crate) fn load_model(
    rep: &mut Reporter<'_>,
    loader: &mut dyn ModelLoader,
    path: &Path,
    params: SegmentationParams,
) -> Result<(LoadedModel, TaskOutput), TaskError> {
    rep.stage(10, "checking model file")?;
    loader
        .check_file(path)
        .map_err(|e| TaskError::failed("model file is missing or unreadable", &e))?;

    rep.stage(30, "checking dependencies")?;
    loader
        .check_dependencies()
        .map_err(|e| TaskError::failed("model dependencies are not available", &e))?;

    rep.stage(40, "constructing model")?;
    loader
        .construct(path)
        .map_err(|e| TaskError::failed("could not construct the model", &e))?;

    rep.stage(70, "moving model to device")?;
    let device = loader
        .transfer_to_device()
        .map_err(|e| TaskError::failed("could not move the model to its device", &e))?;

    rep.stage(90, "building mask generator")?;
    let oracle = loader
        .build_generator(&params)
        .map_err(|e| TaskError::failed("could not build the mask generator", &e))?;

    rep.checkpoint()?;
    rep.progress(100, "model ready");
    tracing::info!(path = %path.display(), %device, "model loaded");
    Ok((LoadedModel { oracle, params }, TaskOutput::ModelLoaded { device }))
}

// ───────────────────────────── Segmentation ──────────────────────────────

/// Downscale so the longest side is at most `max_side`, keeping the
/// aspect ratio. Zero means no limit.
pub(crate) fn fit_within(image: RgbImage, max_side: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    if max_side == 0 || w.max(h) <= max_side {
        return image;
    }
    DynamicImage::ImageRgb8(image)
        .resize(max_side, max_side, FilterType::Triangle)
        .to_rgb8()
}

pub(crate) fn segment(
    rep: &mut Reporter<'_>,
    model: &mut LoadedModel,
    image: RgbImage,
) -> Result<TaskOutput, TaskError> {
    let (width, height) = image.dimensions();
    let original = Dimensions { width, height };

    rep.stage(10, "resizing image")?;
    let image = fit_within(image, model.params.max_image_side);
    let (width, height) = image.dimensions();
    let resized = Dimensions { width, height };

    rep.stage(30, "running inference")?;
    let records = model
        .oracle
        .generate(&image)
        .map_err(|e| TaskError::failed("segmentation failed", &e))?;

    rep.stage(90, "packaging masks")?;
    let mut masks = ingest_records(&records);
    order_masks(&mut masks, model.params.ordering, model.params.max_masks);
    if masks.is_empty() {
        return Err(TaskError::Failed {
            message: "no masks produced".to_owned(),
            detail: format!("{} records from the oracle, none usable", records.len()),
        });
    }

    rep.checkpoint()?;
    rep.progress(100, "masks ready");
    tracing::info!(
        masks = masks.len(),
        records = records.len(),
        width,
        height,
        "segmentation finished"
    );
    Ok(TaskOutput::Masks {
        masks,
        original,
        resized,
    })
}

// ──────────────────────────────── Export ─────────────────────────────────

pub(crate) fn export(rep: &mut Reporter<'_>, request: ExportRequest) -> Result<TaskOutput, TaskError> {
    let ExportRequest {
        masks,
        vector,
        export,
        output,
        source_height,
        pixel_scale,
        image_path,
        annotations,
    } = request;

    // Everything that can be rejected up front is, before any work.
    rep.checkpoint()?;
    let mut doc = DrawingDocument::new_document(&export.version, &export.units)
        .map_err(|e| TaskError::failed("unsupported drawing format", &e))?;
    vector
        .validate()
        .map_err(|e| TaskError::failed("invalid vectorization settings", &e))?;
    let scale = export.scale * pixel_scale;
    if !scale.is_finite() || scale <= 0.0 {
        return Err(TaskError::Failed {
            message: "invalid export scale".to_owned(),
            detail: format!("scale {} x {pixel_scale}", export.scale),
        });
    }

    rep.stage(10, "post-processing masks")?;
    let processed = Pipeline::new(masks, vector)
        .post_process()
        .map_err(|e| TaskError::failed("invalid vectorization settings", &e))?;

    rep.stage(35, "extracting contours")?;
    let extracted = processed.extract_contours();

    rep.stage(55, "simplifying contours")?;
    let simplified = extracted.simplify();

    rep.stage(75, "classifying and building drawing")?;
    let result = simplified
        .classify(export.layer_policy, &export.layer_prefix)
        .into_result();
    doc.set_layer_prefix(&export.layer_prefix);
    // The reference is sized from the source file, which is already in
    // original pixels.
    if export.add_image_reference
        && let Some(path) = &image_path
        && !doc.add_image_reference(path, export.scale, (0.0, 0.0))
    {
        tracing::warn!(path = %path.display(), "image reference skipped");
    }
    doc.add_contours_with_policy(
        &result.contours,
        export.layer_policy,
        scale,
        source_height,
        &export.layer_prefix,
    );
    doc.add_text(&annotations);

    rep.stage(90, "saving drawing")?;
    doc.save(&output)
        .map_err(|e| TaskError::failed("could not save drawing", &e))?;

    rep.progress(100, "drawing saved");
    Ok(TaskOutput::Exported {
        path: output,
        stats: doc.stats(),
        result,
    })
}
