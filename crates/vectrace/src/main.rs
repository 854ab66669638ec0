//! vectrace: turn an image and its segmentation masks into a layered DXF.
//!
//! Masks come from a JSON manifest (see [`manifest`]) that stands in for
//! a segmentation model. The run goes through the background
//! orchestrator exactly as an interactive front end would: load the
//! "model", segment the image, export the drawing. Progress is logged to
//! stderr; a summary goes to stdout.
//!
//! # Usage
//!
//! ```text
//! vectrace photo.jpg --masks masks.json -o plan.dxf [--config config.json] [--preview preview.png] [--json]
//! ```
//!
//! Set `RUST_LOG` (e.g. `RUST_LOG=debug`) for more detail.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod config;
mod error;
mod manifest;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use crossbeam_channel::Receiver;
use image::imageops::FilterType;
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use vectrace_export::DocumentStats;
use vectrace_pipeline::{
    ContourMode, Dimensions, LayerPolicy, MaskOrdering, ProcessingStats, RgbImage,
    VectorizedResult,
};
use vectrace_worker::{
    EventKind, ExportRequest, Orchestrator, OrchestratorError, TaskEvent, TaskKind, TaskOutput,
};

use crate::config::AppConfig;
use crate::error::CliError;
use crate::manifest::FileModelLoader;

/// Convert segmentation masks into a layered DXF drawing.
///
/// Every flag overrides the matching field of `--config`.
#[derive(Parser)]
#[command(name = "vectrace", version)]
struct Cli {
    /// Source image (PNG, JPEG, BMP, WebP).
    image: PathBuf,

    /// Mask manifest (JSON).
    #[arg(long)]
    masks: PathBuf,

    /// Output drawing.
    #[arg(short, long)]
    output: PathBuf,

    /// Configuration file (JSON).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Drawing format version (R2000, R2004, R2007, R2010, R2013, R2018).
    #[arg(long)]
    dxf_version: Option<String>,

    /// Drawing units (mm, cm, m, inch).
    #[arg(long)]
    units: Option<String>,

    /// Drawing units per source image pixel.
    #[arg(long)]
    scale: Option<f64>,

    /// Prefix for every layer name.
    #[arg(long)]
    layer_prefix: Option<String>,

    /// How contours are assigned to layers.
    #[arg(long, value_enum)]
    layers: Option<Layers>,

    /// Simplification tolerance as a fraction of each contour's perimeter.
    #[arg(long)]
    epsilon_factor: Option<f64>,

    /// Minimum mask area in pixels.
    #[arg(long)]
    min_area: Option<u64>,

    /// Skip edge smoothing.
    #[arg(long)]
    no_smoothing: bool,

    /// Smoothing strength (Gaussian sigma).
    #[arg(long)]
    smoothing_strength: Option<f64>,

    /// Keep small disconnected specks.
    #[arg(long)]
    no_noise_removal: bool,

    /// Close small gaps inside masks.
    #[arg(long)]
    fill_holes: bool,

    /// Also emit the holes inside each contour.
    #[arg(long)]
    keep_holes: bool,

    /// Order in which masks are processed.
    #[arg(long, value_enum)]
    ordering: Option<Ordering>,

    /// Keep at most this many masks after ordering.
    #[arg(long)]
    max_masks: Option<usize>,

    /// Longest image side handed to the segmenter.
    #[arg(long)]
    max_image_side: Option<u32>,

    /// Reference the source image in the drawing.
    #[arg(long)]
    image_reference: bool,

    /// Write a PNG of the contours drawn over the image.
    #[arg(long)]
    preview: Option<PathBuf>,

    /// Print the summary as JSON.
    #[arg(long)]
    json: bool,
}

/// Layer assignment selection.
#[derive(Clone, Copy, ValueEnum)]
enum Layers {
    /// One layer per size class.
    Size,
    /// One layer per contour, named by size and quality.
    SizeAndQuality,
}

/// Mask ordering selection.
#[derive(Clone, Copy, ValueEnum)]
enum Ordering {
    /// Largest area first.
    Area,
    /// Most stable first, then largest.
    Stability,
}

impl Cli {
    /// Apply the flags that were given on top of `config`.
    fn apply(&self, config: &mut AppConfig) {
        let seg = &mut config.segmentation;
        if let Some(ordering) = self.ordering {
            seg.ordering = match ordering {
                Ordering::Area => MaskOrdering::Area,
                Ordering::Stability => MaskOrdering::StabilityThenArea,
            };
        }
        if self.max_masks.is_some() {
            seg.max_masks = self.max_masks;
        }
        if let Some(side) = self.max_image_side {
            seg.max_image_side = side;
        }

        let vector = &mut config.vector;
        if let Some(eps) = self.epsilon_factor {
            vector.epsilon_factor = eps;
        }
        if let Some(area) = self.min_area {
            vector.cleaning.min_area = area;
        }
        if let Some(strength) = self.smoothing_strength {
            vector.cleaning.smoothing_strength = strength;
        }
        if self.no_smoothing {
            vector.cleaning.smoothing = false;
        }
        if self.no_noise_removal {
            vector.cleaning.noise_removal = false;
        }
        if self.fill_holes {
            vector.cleaning.fill_holes = true;
        }
        if self.keep_holes {
            vector.contour_mode = ContourMode::WithHoles;
        }

        let export = &mut config.export;
        if let Some(version) = &self.dxf_version {
            export.version.clone_from(version);
        }
        if let Some(units) = &self.units {
            export.units.clone_from(units);
        }
        if let Some(scale) = self.scale {
            export.scale = scale;
        }
        if let Some(prefix) = &self.layer_prefix {
            export.layer_prefix.clone_from(prefix);
        }
        if let Some(layers) = self.layers {
            export.layer_policy = match layers {
                Layers::Size => LayerPolicy::BySize,
                Layers::SizeAndQuality => LayerPolicy::BySizeAndQuality,
            };
        }
        if self.image_reference {
            export.add_image_reference = true;
        }
    }
}

/// What a run produced.
#[derive(Debug, Serialize)]
struct Summary {
    output: PathBuf,
    device: String,
    drawing: DocumentStats,
    masks: ProcessingStats,
    contours: usize,
    points_original: usize,
    points_simplified: usize,
}

impl Summary {
    fn report(&self) -> String {
        let d = &self.drawing;
        let m = &self.masks;
        format!(
            "Drawing: {} ({}, {})\n  \
             polylines: {}  texts: {}  images: {}  layers: {}\n\
             Masks: {} in, {} kept (area min {} / mean {:.0} / max {})\n\
             Contours: {}  points {} -> {}",
            self.output.display(),
            d.dxf_version,
            d.units,
            d.polylines,
            d.texts,
            d.images,
            d.layers,
            m.original_count,
            m.total_masks,
            m.min_area,
            m.mean_area,
            m.max_area,
            self.contours,
            self.points_original,
            self.points_simplified,
        )
    }
}

/// Block until the current task ends, logging its progress.
fn wait(events: &Receiver<TaskEvent>) -> Result<TaskOutput, CliError> {
    for event in events {
        let task = event.task;
        match event.kind {
            EventKind::Started => tracing::debug!(%task, "started"),
            EventKind::Progress { percent, message } => {
                tracing::info!(%task, percent, "{message}");
            }
            EventKind::Finished(output) => return Ok(output),
            EventKind::Failed { message, detail } => {
                return Err(CliError::Task {
                    task,
                    message,
                    detail,
                });
            }
        }
    }
    Err(OrchestratorError::WorkerGone.into())
}

fn write_preview(
    image: &RgbImage,
    resized: Dimensions,
    result: &VectorizedResult,
    path: &Path,
) -> Result<(), CliError> {
    let base = if image.dimensions() == (resized.width, resized.height) {
        image.clone()
    } else {
        image::imageops::resize(image, resized.width, resized.height, FilterType::Triangle)
    };
    let preview =
        vectrace_export::render_preview(&base, &result.contours, &result.assignments, 2.0)?;
    preview.save(path).map_err(CliError::Preview)?;
    tracing::info!(path = %path.display(), "wrote preview");
    Ok(())
}

fn run(cli: &Cli) -> Result<Summary, CliError> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    tracing::debug!(?config, "effective configuration");

    let image = image::open(&cli.image)
        .map_err(|source| CliError::Image {
            path: cli.image.clone(),
            source,
        })?
        .to_rgb8();

    let orchestrator = Orchestrator::new(FileModelLoader::default())?;
    let events = orchestrator.subscribe();

    orchestrator.load_model(&cli.masks, config.segmentation)?;
    let TaskOutput::ModelLoaded { device } = wait(&events)? else {
        return Err(CliError::Unexpected {
            task: TaskKind::LoadModel,
        });
    };

    orchestrator.segment(image.clone())?;
    let TaskOutput::Masks {
        masks,
        original,
        resized,
    } = wait(&events)?
    else {
        return Err(CliError::Unexpected {
            task: TaskKind::Segment,
        });
    };

    let request = ExportRequest {
        vector: config.vector,
        export: config.export,
        source_height: Some(resized.height),
        pixel_scale: f64::from(original.width) / f64::from(resized.width.max(1)),
        image_path: Some(cli.image.clone()),
        ..ExportRequest::new(masks, &cli.output)
    };
    orchestrator.export(request)?;
    let TaskOutput::Exported {
        path,
        stats,
        result,
    } = wait(&events)?
    else {
        return Err(CliError::Unexpected {
            task: TaskKind::Export,
        });
    };
    orchestrator.shutdown();

    if let Some(preview) = &cli.preview {
        write_preview(&image, resized, &result, preview)?;
    }

    Ok(Summary {
        output: path,
        device,
        drawing: stats,
        masks: result.diagnostics.stats,
        contours: result.contours.len(),
        points_original: result.contours.iter().map(|c| c.points_original).sum(),
        points_simplified: result.contours.iter().map(|c| c.points_simplified).sum(),
    })
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let summary = match run(&cli) {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if cli.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing summary: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("{}", summary.report());
    }
    ExitCode::SUCCESS
}
