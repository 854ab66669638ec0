//! In-memory drawing document.
//!
//! A [`DrawingDocument`] is built once per export: contours, text and
//! image references are appended in processing order, then the whole
//! document is serialized by [`save`](DrawingDocument::save). Nothing
//! touches the filesystem before that call except
//! [`add_image_reference`](DrawingDocument::add_image_reference), which
//! reads the referenced image's header for its size.
//!
//! ## Coordinates
//!
//! Contour points arrive in image pixel space (origin top-left, Y down).
//! Drawing space has its origin bottom-left with Y up, so each point
//! `(px, py)` becomes `(px * scale, h * scale - py * scale)` where `h` is
//! the source image height. Without a height, Y is only scaled.

use std::path::Path;

use vectrace_pipeline::{ContourSource, LayerPolicy, Point};

use crate::types::{
    CONTINUOUS, DocumentStats, DrawingPoint, DxfVersion, Entity, ExportError, Layer, Metadata,
    TextAnnotation, Units,
};

/// Default text height in drawing units.
pub const DEFAULT_TEXT_HEIGHT: f64 = 2.5;

/// Default prefix for layer names.
pub const DEFAULT_LAYER_PREFIX: &str = "VECTRACE";

/// ACI colors of the annotation layers.
const TEXT_LAYER_COLOR: u8 = 7;
const IMAGE_LAYER_COLOR: u8 = 8;

/// Map an image-space point to drawing space.
#[must_use]
pub fn to_drawing(p: Point, scale: f64, source_image_height: Option<u32>) -> DrawingPoint {
    let x = p.x * scale;
    let y = source_image_height.map_or(p.y * scale, |h| f64::from(h) * scale - p.y * scale);
    (x, y)
}

/// The drawing being assembled.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawingDocument {
    version: DxfVersion,
    units: Units,
    layer_prefix: String,
    layers: Vec<Layer>,
    entities: Vec<Entity>,
    metadata: Metadata,
}

impl DrawingDocument {
    /// An empty document.
    #[must_use]
    pub fn new(version: DxfVersion, units: Units) -> Self {
        Self {
            version,
            units,
            layer_prefix: DEFAULT_LAYER_PREFIX.to_owned(),
            layers: Vec::new(),
            entities: Vec::new(),
            metadata: Metadata::default(),
        }
    }

    /// Parse `version` and `units` and create an empty document.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::UnsupportedFormat`] when either string is
    /// not a writable version or known unit system.
    pub fn new_document(version: &str, units: &str) -> Result<Self, ExportError> {
        let unsupported = || ExportError::UnsupportedFormat {
            version: version.to_owned(),
            units: units.to_owned(),
        };
        let v: DxfVersion = version.parse().map_err(|e: String| {
            tracing::warn!(version, reason = %e, "rejecting drawing version");
            unsupported()
        })?;
        let u: Units = units.parse().map_err(|e: String| {
            tracing::warn!(units, reason = %e, "rejecting unit system");
            unsupported()
        })?;
        Ok(Self::new(v, u))
    }

    /// Prefix for the text and image layers. Contour layers take their
    /// prefix per call.
    pub fn set_layer_prefix(&mut self, prefix: &str) {
        prefix.clone_into(&mut self.layer_prefix);
    }

    pub fn set_metadata(&mut self, title: &str, author: &str, subject: &str) {
        self.metadata = Metadata {
            title: title.to_owned(),
            author: author.to_owned(),
            subject: subject.to_owned(),
        };
    }

    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    #[must_use]
    pub const fn version(&self) -> DxfVersion {
        self.version
    }

    #[must_use]
    pub const fn units(&self) -> Units {
        self.units
    }

    #[must_use]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    #[must_use]
    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Create a layer unless one with this name exists. The first
    /// creation decides color and line type. Returns `true` if created.
    pub fn ensure_layer(&mut self, name: &str, color: u8) -> bool {
        if name == "0" || self.layer(name).is_some() {
            return false;
        }
        self.layers.push(Layer {
            name: name.to_owned(),
            color,
            linetype: CONTINUOUS.to_owned(),
        });
        true
    }

    /// Add contours on size-classified layers. See
    /// [`add_contours_with_policy`](Self::add_contours_with_policy).
    pub fn add_contours<C: ContourSource>(
        &mut self,
        contours: &[C],
        scale: f64,
        source_image_height: Option<u32>,
        layer_prefix: &str,
    ) -> usize {
        self.add_contours_with_policy(
            contours,
            LayerPolicy::BySize,
            scale,
            source_image_height,
            layer_prefix,
        )
    }

    /// Add each contour (and its holes, if any) as closed polylines.
    ///
    /// Rings with fewer than 3 points are skipped. Returns the number of
    /// polylines added.
    pub fn add_contours_with_policy<C: ContourSource>(
        &mut self,
        contours: &[C],
        policy: LayerPolicy,
        scale: f64,
        source_image_height: Option<u32>,
        layer_prefix: &str,
    ) -> usize {
        let mut added = 0;
        for (index, contour) in contours.iter().enumerate() {
            let style = policy.layer_for(contour, index, layer_prefix);
            let mut rings = vec![contour.ring()];
            rings.extend(contour.hole_rings());
            for ring in rings {
                if ring.len() < 3 {
                    tracing::debug!(index, points = ring.len(), "skipping degenerate ring");
                    continue;
                }
                self.ensure_layer(&style.name, style.color);
                let points = ring
                    .iter()
                    .map(|&p| to_drawing(p, scale, source_image_height))
                    .collect();
                self.entities.push(Entity::Polyline {
                    layer: style.name.clone(),
                    points,
                });
                added += 1;
            }
        }
        tracing::debug!(added, contours = contours.len(), "added contour polylines");
        added
    }

    /// Add text annotations on the `<PREFIX>_TEXT` layer. Empty strings
    /// are skipped. Returns the number added.
    pub fn add_text(&mut self, annotations: &[TextAnnotation]) -> usize {
        let layer = format!("{}_TEXT", self.layer_prefix);
        let mut added = 0;
        for note in annotations {
            if note.text.is_empty() {
                continue;
            }
            self.ensure_layer(&layer, TEXT_LAYER_COLOR);
            self.entities.push(Entity::Text {
                layer: layer.clone(),
                position: note.position,
                height: note.height.unwrap_or(DEFAULT_TEXT_HEIGHT),
                text: note.text.clone(),
            });
            added += 1;
        }
        added
    }

    /// Reference a raster image, placed at `position` and sized
    /// `width * scale` by `height * scale` drawing units, on the
    /// `<PREFIX>_IMAGE` layer.
    ///
    /// Returns `false` (and adds nothing) when the image's dimensions
    /// cannot be read.
    pub fn add_image_reference(&mut self, path: &Path, scale: f64, position: DrawingPoint) -> bool {
        let (w, h) = match image::image_dimensions(path) {
            Ok(dims) => dims,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot reference image");
                return false;
            }
        };
        let layer = format!("{}_IMAGE", self.layer_prefix);
        self.ensure_layer(&layer, IMAGE_LAYER_COLOR);
        self.entities.push(Entity::Image {
            layer,
            path: path.display().to_string(),
            position,
            size: (f64::from(w) * scale, f64::from(h) * scale),
            pixels: (w, h),
        });
        true
    }

    /// Append an already-built entity, creating its layer (color 7) if it
    /// does not exist yet.
    pub(crate) fn push_entity(&mut self, entity: Entity) {
        self.ensure_layer(entity.layer(), TEXT_LAYER_COLOR);
        self.entities.push(entity);
    }

    pub(crate) fn push_layer(&mut self, layer: Layer) {
        if layer.name != "0" && self.layer(&layer.name).is_none() {
            self.layers.push(layer);
        }
    }

    #[must_use]
    pub fn stats(&self) -> DocumentStats {
        let count = |f: fn(&Entity) -> bool| self.entities.iter().filter(|e| f(e)).count();
        DocumentStats {
            total_entities: self.entities.len(),
            polylines: count(|e| matches!(e, Entity::Polyline { .. })),
            texts: count(|e| matches!(e, Entity::Text { .. })),
            images: count(|e| matches!(e, Entity::Image { .. })),
            layers: self.layers.len(),
            dxf_version: self.version.to_string(),
            units: self.units.to_string(),
        }
    }

    /// Serialize to DXF text.
    #[must_use]
    pub fn to_dxf(&self) -> String {
        crate::dxf::to_dxf(self)
    }

    /// Parse DXF text written by [`to_dxf`](Self::to_dxf).
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Parse`] on malformed input and
    /// [`ExportError::UnsupportedFormat`] for versions this crate cannot
    /// represent.
    pub fn from_dxf(text: &str) -> Result<Self, ExportError> {
        crate::reader::from_dxf(text)
    }

    /// Write the document to `path`.
    ///
    /// The parent directory is created if missing. The file is written
    /// next to the target under a temporary name and renamed into place,
    /// so a failed write never leaves a partial file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Io`] if the directory cannot be created or
    /// the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), ExportError> {
        use std::io::Write;

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(self.to_dxf().as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;

        let stats = self.stats();
        tracing::info!(
            path = %path.display(),
            entities = stats.total_entities,
            layers = stats.layers,
            "saved drawing"
        );
        Ok(())
    }

    /// Read a DXF file written by [`save`](Self::save).
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Io`] if the file cannot be read, otherwise
    /// as [`from_dxf`](Self::from_dxf).
    pub fn read(path: &Path) -> Result<Self, ExportError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_dxf(&text)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use vectrace_pipeline::{BBox, Contour, ContourRecord, MaskQuality};

    fn record(points: &[(f64, f64)], area: f64) -> ContourRecord {
        let contour = Contour::new(points.iter().map(|&(x, y)| Point::new(x, y)).collect());
        ContourRecord {
            mask_index: 0,
            perimeter: contour.perimeter(),
            contour,
            holes: Vec::new(),
            area,
            bbox: BBox::default(),
            quality: MaskQuality::default(),
        }
    }

    fn triangle(area: f64) -> ContourRecord {
        record(&[(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)], area)
    }

    // --- construction tests ---

    #[test]
    fn new_document_accepts_known_formats() {
        let doc = DrawingDocument::new_document("R2010", "cm").unwrap();
        assert_eq!(doc.version(), DxfVersion::R2010);
        assert_eq!(doc.units(), Units::Cm);
    }

    #[test]
    fn new_document_rejects_unknown_formats() {
        for (v, u) in [("R12", "mm"), ("R9000", "mm"), ("R2018", "parsec")] {
            assert!(matches!(
                DrawingDocument::new_document(v, u),
                Err(ExportError::UnsupportedFormat { .. })
            ));
        }
    }

    // --- coordinate tests ---

    #[test]
    fn transform_scales_then_flips() {
        let p = to_drawing(Point::new(10.0, 20.0), 2.0, Some(100));
        assert_eq!(p, (20.0, 160.0));
    }

    #[test]
    fn transform_without_height_does_not_flip() {
        let p = to_drawing(Point::new(10.0, 20.0), 2.0, None);
        assert_eq!(p, (20.0, 40.0));
    }

    #[test]
    fn transform_is_bit_exact() {
        let (px, py, s, h) = (123.0, 45.0, 0.1, 480_u32);
        let (x, y) = to_drawing(Point::new(px, py), s, Some(h));
        assert_eq!(x.to_bits(), (px * s).to_bits());
        assert_eq!(y.to_bits(), (f64::from(h) * s - py * s).to_bits());
    }

    // --- contour tests ---

    #[test]
    fn contours_land_on_size_layers() {
        let mut doc = DrawingDocument::new(DxfVersion::R2018, Units::Mm);
        let added = doc.add_contours(&[triangle(500.0), triangle(50_000.0)], 1.0, Some(10), "P");
        assert_eq!(added, 2);
        let names: Vec<&str> = doc.layers().iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["P_SMALL", "P_LARGE"]);
        assert_eq!(doc.layer("P_SMALL").unwrap().color, 5);
        assert_eq!(doc.layer("P_LARGE").unwrap().linetype, CONTINUOUS);
    }

    #[test]
    fn degenerate_contours_are_skipped() {
        let mut doc = DrawingDocument::new(DxfVersion::R2018, Units::Mm);
        let line = record(&[(0.0, 0.0), (5.0, 5.0)], 2_000.0);
        let added = doc.add_contours(&[line, triangle(2_000.0)], 1.0, None, "P");
        assert_eq!(added, 1);
        assert_eq!(doc.stats().polylines, 1);
    }

    #[test]
    fn layer_creation_is_idempotent_first_wins() {
        let mut doc = DrawingDocument::new(DxfVersion::R2018, Units::Mm);
        assert!(doc.ensure_layer("A", 1));
        assert!(!doc.ensure_layer("A", 3));
        assert_eq!(doc.layer("A").unwrap().color, 1);
        assert_eq!(doc.layers().len(), 1);
    }

    #[test]
    fn holes_become_extra_polylines_on_same_layer() {
        let mut rec = record(
            &[(0.0, 0.0), (100.0, 0.0), (100.0, 100.0), (0.0, 100.0)],
            10_000.0,
        );
        rec.holes = vec![Contour::new(vec![
            Point::new(40.0, 40.0),
            Point::new(60.0, 40.0),
            Point::new(50.0, 60.0),
        ])];
        let mut doc = DrawingDocument::new(DxfVersion::R2018, Units::Mm);
        assert_eq!(doc.add_contours(&[rec], 1.0, Some(100), "P"), 2);
        assert!(doc.entities().iter().all(|e| e.layer() == "P_LARGE"));
    }

    #[test]
    fn quality_policy_makes_one_layer_per_contour() {
        let mut doc = DrawingDocument::new(DxfVersion::R2018, Units::Mm);
        doc.add_contours_with_policy(
            &[triangle(5_000.0), triangle(5_000.0)],
            LayerPolicy::BySizeAndQuality,
            1.0,
            None,
            "P",
        );
        assert_eq!(doc.stats().layers, 2);
    }

    // --- annotation tests ---

    #[test]
    fn text_uses_default_height_and_text_layer() {
        let mut doc = DrawingDocument::new(DxfVersion::R2018, Units::Mm);
        let added = doc.add_text(&[
            TextAnnotation {
                text: "Wall A".to_owned(),
                position: (5.0, 5.0),
                height: None,
            },
            TextAnnotation {
                text: String::new(),
                position: (0.0, 0.0),
                height: Some(1.0),
            },
        ]);
        assert_eq!(added, 1);
        let Entity::Text { layer, height, .. } = &doc.entities()[0] else {
            unreachable!("expected text entity");
        };
        assert_eq!(layer, "VECTRACE_TEXT");
        assert!((height - DEFAULT_TEXT_HEIGHT).abs() < f64::EPSILON);
        assert_eq!(doc.layer("VECTRACE_TEXT").unwrap().color, 7);
    }

    #[test]
    fn missing_image_is_not_referenced() {
        let mut doc = DrawingDocument::new(DxfVersion::R2018, Units::Mm);
        assert!(!doc.add_image_reference(Path::new("/nonexistent/source.png"), 1.0, (0.0, 0.0)));
        assert!(doc.entities().is_empty());
        assert!(doc.layers().is_empty());
    }

    #[test]
    fn image_reference_is_sized_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("source.png");
        image::RgbImage::new(40, 30).save(&path).unwrap();

        let mut doc = DrawingDocument::new(DxfVersion::R2018, Units::Mm);
        doc.set_layer_prefix("W");
        assert!(doc.add_image_reference(&path, 0.5, (1.0, 2.0)));
        let Entity::Image {
            layer,
            size,
            pixels,
            ..
        } = &doc.entities()[0]
        else {
            unreachable!("expected image entity");
        };
        assert_eq!(layer, "W_IMAGE");
        assert_eq!(*size, (20.0, 15.0));
        assert_eq!(*pixels, (40, 30));
        assert_eq!(doc.layer("W_IMAGE").unwrap().color, 8);
    }

    // --- stats tests ---

    #[test]
    fn stats_report_format() {
        let mut doc = DrawingDocument::new(DxfVersion::R2004, Units::Inch);
        doc.add_contours(&[triangle(5.0)], 1.0, None, "P");
        let stats = doc.stats();
        assert_eq!(stats.total_entities, 1);
        assert_eq!(stats.layers, 1);
        assert_eq!(stats.dxf_version, "R2004");
        assert_eq!(stats.units, "inch");
    }
}
