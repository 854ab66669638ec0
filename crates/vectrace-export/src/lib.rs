//! vectrace-export: Layered drawing documents.
//!
//! Assembles classified contours, text annotations and image references
//! into a [`DrawingDocument`], serializes it as DXF and reads it back.
//! Also renders raster previews of a classification.
//!
//! Serialization ([`dxf`]) and parsing ([`reader`]) are pure; only
//! [`DrawingDocument::save`], [`DrawingDocument::read`] and
//! [`DrawingDocument::add_image_reference`] touch the filesystem.

pub mod document;
pub mod dxf;
pub mod preview;
pub mod reader;
pub mod types;

pub use document::{DEFAULT_LAYER_PREFIX, DEFAULT_TEXT_HEIGHT, DrawingDocument, to_drawing};
pub use preview::render_preview;
pub use types::{
    DocumentStats, DrawingPoint, DxfVersion, Entity, ExportError, Layer, Metadata, TextAnnotation,
    Units,
};
