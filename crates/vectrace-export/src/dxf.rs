//! DXF serializer.
//!
//! Produces an ASCII DXF (R2000 or later) containing:
//!
//! - `HEADER`: `$ACADVER`, `$HANDSEED`, `$INSUNITS`, `$MEASUREMENT`, and
//!   the document title/author/subject as custom properties
//! - `CLASSES`: the raster image classes, only when images are present
//! - `TABLES`: `LTYPE` (`ByBlock`, `ByLayer`, `CONTINUOUS`), `LAYER`
//!   (layer `0` plus every document layer) and `BLOCK_RECORD`
//! - `BLOCKS`: the model and paper space blocks
//! - `ENTITIES`: `LWPOLYLINE` (closed), `TEXT`, `IMAGE`
//! - `OBJECTS`: the root dictionary, `ACAD_IMAGE_DICT` and one `IMAGEDEF`
//!   per image
//!
//! Coordinates are written with Rust's shortest round-trip float
//! formatting, so reading a file back yields bit-identical values.
//!
//! This is a pure function with no I/O; it returns a `String`.

use std::fmt::{Display, Write};

use crate::document::DrawingDocument;
use crate::types::{CONTINUOUS, Entity, Layer};

/// First handle handed out. Handles below this are left free.
const FIRST_HANDLE: u64 = 0x20;

/// Sequential hexadecimal entity handles.
struct Handles(u64);

impl Handles {
    fn next(&mut self) -> String {
        let h = self.0;
        self.0 += 1;
        format!("{h:X}")
    }

    fn seed(&self) -> String {
        format!("{:X}", self.0)
    }
}

/// Append one group code / value pair.
fn pair(out: &mut String, code: u16, value: impl Display) {
    let _ = writeln!(out, "{code:>3}");
    let _ = writeln!(out, "{value}");
}

fn begin_section(out: &mut String, name: &str) {
    pair(out, 0, "SECTION");
    pair(out, 2, name);
}

fn end_section(out: &mut String) {
    pair(out, 0, "ENDSEC");
}

/// Handles of table records that entities and blocks refer back to.
struct Owners {
    model_space: String,
    paper_space: String,
    root_dict: String,
    image_dict: String,
}

/// Serialize a document to DXF text.
#[must_use]
pub fn to_dxf(doc: &DrawingDocument) -> String {
    let mut handles = Handles(FIRST_HANDLE);
    let owners = Owners {
        model_space: handles.next(),
        paper_space: handles.next(),
        root_dict: handles.next(),
        image_dict: handles.next(),
    };
    let has_images = doc
        .entities()
        .iter()
        .any(|e| matches!(e, Entity::Image { .. }));

    // The header needs the final handle seed, so the body is written
    // first and the header prepended.
    let mut body = String::new();
    if has_images {
        write_classes(&mut body);
    }
    write_tables(&mut body, doc, &mut handles, &owners);
    write_blocks(&mut body, &mut handles, &owners);
    let image_defs = write_entities(&mut body, doc, &mut handles, &owners);
    write_objects(&mut body, &image_defs, has_images, &owners);
    pair(&mut body, 0, "EOF");

    let mut out = String::with_capacity(body.len() + 512);
    write_header(&mut out, doc, &handles);
    out.push_str(&body);
    out
}

fn write_header(out: &mut String, doc: &DrawingDocument, handles: &Handles) {
    begin_section(out, "HEADER");
    pair(out, 9, "$ACADVER");
    pair(out, 1, doc.version().acad_tag());
    pair(out, 9, "$HANDSEED");
    pair(out, 5, handles.seed());
    pair(out, 9, "$INSUNITS");
    pair(out, 70, doc.units().insunits());
    pair(out, 9, "$MEASUREMENT");
    pair(out, 70, doc.units().measurement());
    let meta = doc.metadata();
    for (tag, value) in [
        ("Title", &meta.title),
        ("Author", &meta.author),
        ("Subject", &meta.subject),
    ] {
        pair(out, 9, "$CUSTOMPROPERTYTAG");
        pair(out, 1, tag);
        pair(out, 9, "$CUSTOMPROPERTY");
        pair(out, 1, single_line(value));
    }
    end_section(out);
}

fn write_classes(out: &mut String) {
    begin_section(out, "CLASSES");
    for (name, cpp, flags, is_entity) in [
        ("IMAGEDEF", "AcDbRasterImageDef", 0, 0),
        ("IMAGE", "AcDbRasterImage", 127, 1),
    ] {
        pair(out, 0, "CLASS");
        pair(out, 1, name);
        pair(out, 2, cpp);
        pair(out, 3, "ISM");
        pair(out, 90, flags);
        pair(out, 280, 0);
        pair(out, 281, is_entity);
    }
    end_section(out);
}

fn begin_table(out: &mut String, name: &str, handle: &str, count: usize) {
    pair(out, 0, "TABLE");
    pair(out, 2, name);
    pair(out, 5, handle);
    pair(out, 330, 0);
    pair(out, 100, "AcDbSymbolTable");
    pair(out, 70, count);
}

fn write_tables(out: &mut String, doc: &DrawingDocument, handles: &mut Handles, owners: &Owners) {
    begin_section(out, "TABLES");

    // Line types.
    let table = handles.next();
    begin_table(out, "LTYPE", &table, 3);
    for (name, description) in [
        ("ByBlock", ""),
        ("ByLayer", ""),
        (CONTINUOUS, "Solid line"),
    ] {
        pair(out, 0, "LTYPE");
        pair(out, 5, handles.next());
        pair(out, 330, &table);
        pair(out, 100, "AcDbSymbolTableRecord");
        pair(out, 100, "AcDbLinetypeTableRecord");
        pair(out, 2, name);
        pair(out, 70, 0);
        pair(out, 3, description);
        pair(out, 72, 65);
        pair(out, 73, 0);
        pair(out, 40, "0.0");
    }
    pair(out, 0, "ENDTAB");

    // Layers, with the mandatory layer 0 first.
    let table = handles.next();
    let zero = Layer {
        name: "0".to_owned(),
        color: 7,
        linetype: CONTINUOUS.to_owned(),
    };
    begin_table(out, "LAYER", &table, doc.layers().len() + 1);
    for layer in std::iter::once(&zero).chain(doc.layers()) {
        pair(out, 0, "LAYER");
        pair(out, 5, handles.next());
        pair(out, 330, &table);
        pair(out, 100, "AcDbSymbolTableRecord");
        pair(out, 100, "AcDbLayerTableRecord");
        pair(out, 2, &layer.name);
        pair(out, 70, 0);
        pair(out, 62, layer.color);
        pair(out, 6, &layer.linetype);
    }
    pair(out, 0, "ENDTAB");

    // Block records for model and paper space.
    let table = handles.next();
    begin_table(out, "BLOCK_RECORD", &table, 2);
    for (handle, name) in [
        (&owners.model_space, "*Model_Space"),
        (&owners.paper_space, "*Paper_Space"),
    ] {
        pair(out, 0, "BLOCK_RECORD");
        pair(out, 5, handle);
        pair(out, 330, &table);
        pair(out, 100, "AcDbSymbolTableRecord");
        pair(out, 100, "AcDbBlockTableRecord");
        pair(out, 2, name);
    }
    pair(out, 0, "ENDTAB");

    end_section(out);
}

fn write_blocks(out: &mut String, handles: &mut Handles, owners: &Owners) {
    begin_section(out, "BLOCKS");
    for (owner, name) in [
        (&owners.model_space, "*Model_Space"),
        (&owners.paper_space, "*Paper_Space"),
    ] {
        pair(out, 0, "BLOCK");
        pair(out, 5, handles.next());
        pair(out, 330, owner);
        pair(out, 100, "AcDbEntity");
        pair(out, 8, "0");
        pair(out, 100, "AcDbBlockBegin");
        pair(out, 2, name);
        pair(out, 70, 0);
        pair(out, 10, "0.0");
        pair(out, 20, "0.0");
        pair(out, 30, "0.0");
        pair(out, 3, name);
        pair(out, 1, "");
        pair(out, 0, "ENDBLK");
        pair(out, 5, handles.next());
        pair(out, 330, owner);
        pair(out, 100, "AcDbEntity");
        pair(out, 8, "0");
        pair(out, 100, "AcDbBlockEnd");
    }
    end_section(out);
}

/// Image definitions referenced from `ENTITIES`: `(handle, path, pixels)`.
type ImageDefs = Vec<(String, String, (u32, u32))>;

fn entity_common(out: &mut String, kind: &str, handles: &mut Handles, owner: &str, layer: &str) {
    pair(out, 0, kind);
    pair(out, 5, handles.next());
    pair(out, 330, owner);
    pair(out, 100, "AcDbEntity");
    pair(out, 8, layer);
}

fn write_entities(
    out: &mut String,
    doc: &DrawingDocument,
    handles: &mut Handles,
    owners: &Owners,
) -> ImageDefs {
    let mut image_defs = ImageDefs::new();
    begin_section(out, "ENTITIES");
    for entity in doc.entities() {
        match entity {
            Entity::Polyline { layer, points } => {
                entity_common(out, "LWPOLYLINE", handles, &owners.model_space, layer);
                pair(out, 100, "AcDbPolyline");
                pair(out, 90, points.len());
                pair(out, 70, 1);
                for (x, y) in points {
                    pair(out, 10, x);
                    pair(out, 20, y);
                }
            }
            Entity::Text {
                layer,
                position,
                height,
                text,
            } => {
                entity_common(out, "TEXT", handles, &owners.model_space, layer);
                pair(out, 100, "AcDbText");
                pair(out, 10, position.0);
                pair(out, 20, position.1);
                pair(out, 30, "0.0");
                pair(out, 40, height);
                pair(out, 1, single_line(text));
                pair(out, 100, "AcDbText");
            }
            Entity::Image {
                layer,
                path,
                position,
                size,
                pixels,
            } => {
                let def_handle = handles.next();
                entity_common(out, "IMAGE", handles, &owners.model_space, layer);
                pair(out, 100, "AcDbRasterImage");
                pair(out, 90, 0);
                pair(out, 10, position.0);
                pair(out, 20, position.1);
                pair(out, 30, "0.0");
                // U and V are the size of one pixel along each axis.
                pair(out, 11, size.0 / f64::from(pixels.0.max(1)));
                pair(out, 21, "0.0");
                pair(out, 31, "0.0");
                pair(out, 12, "0.0");
                pair(out, 22, size.1 / f64::from(pixels.1.max(1)));
                pair(out, 32, "0.0");
                pair(out, 13, pixels.0);
                pair(out, 23, pixels.1);
                pair(out, 340, &def_handle);
                pair(out, 70, 7);
                pair(out, 280, 0);
                pair(out, 281, 50);
                pair(out, 282, 50);
                pair(out, 283, 0);
                image_defs.push((def_handle, path.clone(), *pixels));
            }
        }
    }
    end_section(out);
    image_defs
}

fn write_objects(
    out: &mut String,
    image_defs: &ImageDefs,
    has_images: bool,
    owners: &Owners,
) {
    begin_section(out, "OBJECTS");

    pair(out, 0, "DICTIONARY");
    pair(out, 5, &owners.root_dict);
    pair(out, 330, 0);
    pair(out, 100, "AcDbDictionary");
    pair(out, 281, 1);
    if has_images {
        pair(out, 3, "ACAD_IMAGE_DICT");
        pair(out, 350, &owners.image_dict);

        pair(out, 0, "DICTIONARY");
        pair(out, 5, &owners.image_dict);
        pair(out, 330, &owners.root_dict);
        pair(out, 100, "AcDbDictionary");
        pair(out, 281, 1);
        for (i, (handle, _, _)) in image_defs.iter().enumerate() {
            pair(out, 3, format!("IMAGE_{i}"));
            pair(out, 350, handle);
        }

        for (handle, path, (w, h)) in image_defs {
            pair(out, 0, "IMAGEDEF");
            pair(out, 5, handle);
            pair(out, 330, &owners.image_dict);
            pair(out, 100, "AcDbRasterImageDef");
            pair(out, 90, 0);
            pair(out, 1, path);
            pair(out, 10, w);
            pair(out, 20, h);
            pair(out, 11, "1.0");
            pair(out, 21, "1.0");
            pair(out, 280, 1);
            pair(out, 281, 0);
        }
    }
    end_section(out);
}

/// DXF values cannot span lines.
fn single_line(s: &str) -> String {
    s.replace(['\r', '\n'], " ")
}
