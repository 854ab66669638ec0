//! DXF reader for the subset [`dxf`](crate::dxf) writes.
//!
//! The file is read as group code / value pairs and split into records,
//! each starting at a code-0 pair. Only what the document model holds is
//! interpreted: header version, units and custom properties, the layer
//! table, `LWPOLYLINE`/`TEXT`/`IMAGE` entities, and `IMAGEDEF` paths.
//! Everything else is skipped, so files touched by other CAD tools still
//! load as long as those parts are intact.

use std::collections::HashMap;

use crate::document::DrawingDocument;
use crate::types::{CONTINUOUS, DxfVersion, Entity, ExportError, Layer, Metadata, Units};

/// One group code / value pair and the 1-based line of its code.
#[derive(Debug, Clone, Copy)]
struct Pair<'a> {
    code: u16,
    value: &'a str,
    line: usize,
}

/// A code-0 pair and every pair up to the next one.
struct Record<'a> {
    kind: &'a str,
    fields: &'a [Pair<'a>],
}

fn parse_error(line: usize, message: impl Into<String>) -> ExportError {
    ExportError::Parse {
        line,
        message: message.into(),
    }
}

fn tokenize(text: &str) -> Result<Vec<Pair<'_>>, ExportError> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() % 2 != 0 {
        return Err(parse_error(lines.len(), "group code without a value"));
    }
    lines
        .chunks_exact(2)
        .enumerate()
        .map(|(i, chunk)| {
            let line = i * 2 + 1;
            let code = chunk[0]
                .trim()
                .parse::<u16>()
                .map_err(|_| parse_error(line, format!("invalid group code {:?}", chunk[0])))?;
            Ok(Pair {
                code,
                value: chunk[1],
                line,
            })
        })
        .collect()
}

fn records<'a>(pairs: &'a [Pair<'a>]) -> Result<Vec<Record<'a>>, ExportError> {
    if let Some(first) = pairs.first()
        && first.code != 0
    {
        return Err(parse_error(first.line, "file must start with a code 0 pair"));
    }
    let mut out = Vec::new();
    let mut start = 0;
    for i in 1..=pairs.len() {
        if i == pairs.len() || pairs[i].code == 0 {
            out.push(Record {
                kind: pairs[start].value.trim(),
                fields: &pairs[start + 1..i],
            });
            start = i;
        }
    }
    Ok(out)
}

fn number(p: &Pair<'_>) -> Result<f64, ExportError> {
    p.value
        .trim()
        .parse::<f64>()
        .map_err(|_| parse_error(p.line + 1, format!("expected a number, got {:?}", p.value)))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn count(p: &Pair<'_>) -> Result<u32, ExportError> {
    let v = number(p)?;
    if !(0.0..=f64::from(u32::MAX)).contains(&v) {
        return Err(parse_error(p.line + 1, format!("{v} is not a pixel count")));
    }
    Ok(v as u32)
}

fn field<'a>(fields: &'a [Pair<'a>], code: u16) -> Option<&'a Pair<'a>> {
    fields.iter().find(|p| p.code == code)
}

fn layer_of(fields: &[Pair<'_>]) -> String {
    field(fields, 8).map_or_else(|| "0".to_owned(), |p| p.value.to_owned())
}

#[derive(Default)]
struct Header {
    version: Option<String>,
    units: Option<u8>,
    metadata: Metadata,
}

fn parse_header(fields: &[Pair<'_>]) -> Result<Header, ExportError> {
    let mut header = Header::default();
    let mut variable = "";
    let mut property_tag = String::new();
    for p in fields {
        if p.code == 9 {
            variable = p.value.trim();
            continue;
        }
        match variable {
            "$ACADVER" => header.version = Some(p.value.trim().to_owned()),
            "$INSUNITS" => {
                let code = p.value.trim().parse::<u8>().map_err(|_| {
                    parse_error(p.line + 1, format!("invalid $INSUNITS {:?}", p.value))
                })?;
                header.units = Some(code);
            }
            "$CUSTOMPROPERTYTAG" => p.value.clone_into(&mut property_tag),
            "$CUSTOMPROPERTY" => match property_tag.as_str() {
                "Title" => p.value.clone_into(&mut header.metadata.title),
                "Author" => p.value.clone_into(&mut header.metadata.author),
                "Subject" => p.value.clone_into(&mut header.metadata.subject),
                _ => {}
            },
            _ => {}
        }
    }
    Ok(header)
}

fn parse_layer(fields: &[Pair<'_>]) -> Result<Option<Layer>, ExportError> {
    let Some(name) = field(fields, 2) else {
        return Ok(None);
    };
    let color = match field(fields, 62) {
        Some(p) => {
            let raw = p.value.trim().parse::<i16>().map_err(|_| {
                parse_error(p.line + 1, format!("invalid layer color {:?}", p.value))
            })?;
            // Negative colors mark a layer as switched off.
            u8::try_from(raw.unsigned_abs()).unwrap_or(7)
        }
        None => 7,
    };
    let linetype = field(fields, 6).map_or_else(|| CONTINUOUS.to_owned(), |p| p.value.to_owned());
    Ok(Some(Layer {
        name: name.value.to_owned(),
        color,
        linetype,
    }))
}

fn parse_polyline(fields: &[Pair<'_>]) -> Result<Entity, ExportError> {
    let mut points: Vec<(f64, Option<f64>)> = Vec::new();
    for p in fields {
        match p.code {
            10 => points.push((number(p)?, None)),
            20 => {
                let y = number(p)?;
                match points.last_mut() {
                    Some(last) if last.1.is_none() => last.1 = Some(y),
                    _ => return Err(parse_error(p.line, "y coordinate without x")),
                }
            }
            _ => {}
        }
    }
    let points = points
        .into_iter()
        .map(|(x, y)| y.map(|y| (x, y)))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| {
            parse_error(
                fields.first().map_or(0, |p| p.line),
                "x coordinate without y",
            )
        })?;
    Ok(Entity::Polyline {
        layer: layer_of(fields),
        points,
    })
}

fn required<'a>(fields: &'a [Pair<'a>], code: u16, kind: &str) -> Result<&'a Pair<'a>, ExportError> {
    field(fields, code).ok_or_else(|| {
        parse_error(
            fields.first().map_or(0, |p| p.line),
            format!("{kind} is missing group code {code}"),
        )
    })
}

fn parse_text(fields: &[Pair<'_>]) -> Result<Entity, ExportError> {
    let x = number(required(fields, 10, "TEXT")?)?;
    let y = number(required(fields, 20, "TEXT")?)?;
    let height = number(required(fields, 40, "TEXT")?)?;
    let text = required(fields, 1, "TEXT")?.value.to_owned();
    Ok(Entity::Text {
        layer: layer_of(fields),
        position: (x, y),
        height,
        text,
    })
}

/// An `IMAGE` entity whose path lives in an `IMAGEDEF` not yet seen.
struct PendingImage {
    layer: String,
    def_handle: String,
    position: (f64, f64),
    size: (f64, f64),
    pixels: (u32, u32),
}

fn parse_image(fields: &[Pair<'_>]) -> Result<PendingImage, ExportError> {
    let x = number(required(fields, 10, "IMAGE")?)?;
    let y = number(required(fields, 20, "IMAGE")?)?;
    let u = number(required(fields, 11, "IMAGE")?)?;
    let v = number(required(fields, 22, "IMAGE")?)?;
    let w = count(required(fields, 13, "IMAGE")?)?;
    let h = count(required(fields, 23, "IMAGE")?)?;
    let def_handle = required(fields, 340, "IMAGE")?.value.trim().to_owned();
    Ok(PendingImage {
        layer: layer_of(fields),
        def_handle,
        position: (x, y),
        size: (u * f64::from(w), v * f64::from(h)),
        pixels: (w, h),
    })
}

/// Parse DXF text into a document.
///
/// # Errors
///
/// Returns [`ExportError::Parse`] for malformed pairs, numbers or missing
/// required fields, and [`ExportError::UnsupportedFormat`] when the
/// version or units cannot be represented.
pub fn from_dxf(text: &str) -> Result<DrawingDocument, ExportError> {
    let pairs = tokenize(text)?;
    let records = records(&pairs)?;

    let mut header = Header::default();
    let mut section = "";
    let mut layers = Vec::new();
    // Entities in file order; images wait for their definitions.
    let mut entities: Vec<Result<Entity, PendingImage>> = Vec::new();
    let mut image_paths: HashMap<String, String> = HashMap::new();

    for record in &records {
        match (section, record.kind) {
            (_, "SECTION") => {
                section = field(record.fields, 2).map_or("", |p| p.value.trim());
                if section == "HEADER" {
                    header = parse_header(record.fields)?;
                }
            }
            (_, "ENDSEC") => section = "",
            (_, "EOF") => break,
            ("TABLES", "LAYER") => {
                if let Some(layer) = parse_layer(record.fields)? {
                    layers.push(layer);
                }
            }
            ("ENTITIES", "LWPOLYLINE") => entities.push(Ok(parse_polyline(record.fields)?)),
            ("ENTITIES", "TEXT") => entities.push(Ok(parse_text(record.fields)?)),
            ("ENTITIES", "IMAGE") => entities.push(Err(parse_image(record.fields)?)),
            ("OBJECTS", "IMAGEDEF") => {
                if let (Some(handle), Some(path)) = (field(record.fields, 5), field(record.fields, 1)) {
                    image_paths.insert(handle.value.trim().to_owned(), path.value.to_owned());
                }
            }
            _ => {}
        }
    }

    let version_tag = header
        .version
        .ok_or_else(|| parse_error(1, "header has no $ACADVER"))?;
    let units_code = header.units.unwrap_or_else(|| Units::default().insunits());
    let unsupported = || ExportError::UnsupportedFormat {
        version: version_tag.clone(),
        units: units_code.to_string(),
    };
    let version = DxfVersion::from_acad_tag(&version_tag).ok_or_else(unsupported)?;
    let units = Units::from_insunits(units_code).ok_or_else(unsupported)?;

    let mut doc = DrawingDocument::new(version, units);
    let meta = &header.metadata;
    doc.set_metadata(&meta.title, &meta.author, &meta.subject);
    for layer in layers {
        doc.push_layer(layer);
    }
    for entity in entities {
        let entity = match entity {
            Ok(e) => e,
            Err(img) => Entity::Image {
                path: image_paths.remove(&img.def_handle).unwrap_or_default(),
                layer: img.layer,
                position: img.position,
                size: img.size,
                pixels: img.pixels,
            },
        };
        doc.push_entity(entity);
    }
    tracing::debug!(
        entities = doc.entities().len(),
        layers = doc.layers().len(),
        "parsed DXF"
    );
    Ok(doc)
}
