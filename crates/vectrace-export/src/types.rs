//! Drawing model types: format versions, units, layers and entities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// DXF format versions that can be written.
///
/// `R12` is recognized so that it can be rejected with a clear message:
/// it has neither lightweight polylines nor `$INSUNITS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DxfVersion {
    R2000,
    R2004,
    R2007,
    R2010,
    R2013,
    #[default]
    R2018,
}

impl DxfVersion {
    /// The `$ACADVER` tag, e.g. `AC1032`.
    #[must_use]
    pub const fn acad_tag(self) -> &'static str {
        match self {
            Self::R2000 => "AC1015",
            Self::R2004 => "AC1018",
            Self::R2007 => "AC1021",
            Self::R2010 => "AC1024",
            Self::R2013 => "AC1027",
            Self::R2018 => "AC1032",
        }
    }

    /// Inverse of [`acad_tag`](Self::acad_tag).
    #[must_use]
    pub fn from_acad_tag(tag: &str) -> Option<Self> {
        [
            Self::R2000,
            Self::R2004,
            Self::R2007,
            Self::R2010,
            Self::R2013,
            Self::R2018,
        ]
        .into_iter()
        .find(|v| v.acad_tag() == tag)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::R2000 => "R2000",
            Self::R2004 => "R2004",
            Self::R2007 => "R2007",
            Self::R2010 => "R2010",
            Self::R2013 => "R2013",
            Self::R2018 => "R2018",
        }
    }
}

impl fmt::Display for DxfVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DxfVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "R2000" | "AC1015" => Ok(Self::R2000),
            "R2004" | "AC1018" => Ok(Self::R2004),
            "R2007" | "AC1021" => Ok(Self::R2007),
            "R2010" | "AC1024" => Ok(Self::R2010),
            "R2013" | "AC1027" => Ok(Self::R2013),
            "R2018" | "AC1032" => Ok(Self::R2018),
            "R12" | "AC1009" => Err(format!(
                "{s} is not supported: it lacks lightweight polylines and drawing units"
            )),
            _ => Err(format!("unknown DXF version {s:?}")),
        }
    }
}

/// Drawing unit system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Units {
    #[default]
    Mm,
    Cm,
    M,
    Inch,
}

impl Units {
    /// The `$INSUNITS` code.
    #[must_use]
    pub const fn insunits(self) -> u8 {
        match self {
            Self::Inch => 1,
            Self::Mm => 4,
            Self::Cm => 5,
            Self::M => 6,
        }
    }

    #[must_use]
    pub const fn from_insunits(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Inch),
            4 => Some(Self::Mm),
            5 => Some(Self::Cm),
            6 => Some(Self::M),
            _ => None,
        }
    }

    /// `$MEASUREMENT`: 0 for imperial, 1 for metric.
    #[must_use]
    pub const fn measurement(self) -> u8 {
        match self {
            Self::Inch => 0,
            Self::Mm | Self::Cm | Self::M => 1,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mm => "mm",
            Self::Cm => "cm",
            Self::M => "m",
            Self::Inch => "inch",
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Units {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mm" => Ok(Self::Mm),
            "cm" => Ok(Self::Cm),
            "m" => Ok(Self::M),
            "inch" | "in" => Ok(Self::Inch),
            _ => Err(format!("unknown unit system {s:?}")),
        }
    }
}

/// Line type every layer is created with.
pub const CONTINUOUS: &str = "CONTINUOUS";

/// A named layer with a display color (ACI) and line type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub name: String,
    pub color: u8,
    pub linetype: String,
}

/// A point in drawing units (Y up).
pub type DrawingPoint = (f64, f64);

/// A drawable item. Every entity references exactly one layer by name.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    /// Closed lightweight polyline.
    Polyline {
        layer: String,
        points: Vec<DrawingPoint>,
    },
    Text {
        layer: String,
        position: DrawingPoint,
        height: f64,
        text: String,
    },
    /// Raster image placed by reference.
    Image {
        layer: String,
        path: String,
        position: DrawingPoint,
        /// Placed size in drawing units.
        size: (f64, f64),
        /// Source image size in pixels.
        pixels: (u32, u32),
    },
}

impl Entity {
    #[must_use]
    pub fn layer(&self) -> &str {
        match self {
            Self::Polyline { layer, .. } | Self::Text { layer, .. } | Self::Image { layer, .. } => {
                layer
            }
        }
    }
}

/// A text annotation to place in the drawing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextAnnotation {
    pub text: String,
    /// Insertion point in drawing units.
    pub position: DrawingPoint,
    /// Text height in drawing units; the document default when `None`.
    #[serde(default)]
    pub height: Option<f64>,
}

/// Document header metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: String,
    pub author: String,
    pub subject: String,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            title: "Vectrace Export".to_owned(),
            author: "vectrace".to_owned(),
            subject: "Segmentation Vector Export".to_owned(),
        }
    }
}

/// Entity and layer counts plus format information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub total_entities: usize,
    pub polylines: usize,
    pub texts: usize,
    pub images: usize,
    /// Layers created by the document, excluding the implicit layer `0`.
    pub layers: usize,
    pub dxf_version: String,
    pub units: String,
}

/// Errors that can occur while building, saving, reading or rendering a
/// drawing.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The requested version/unit combination cannot be written.
    #[error("unsupported drawing format: version {version:?}, units {units:?}")]
    UnsupportedFormat { version: String, units: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A DXF file could not be parsed.
    #[error("DXF parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// The preview could not be rendered.
    #[error("cannot render preview: {0}")]
    NoPreview(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_strings_parse() {
        assert_eq!("R2018".parse::<DxfVersion>(), Ok(DxfVersion::R2018));
        assert_eq!("r2000".parse::<DxfVersion>(), Ok(DxfVersion::R2000));
        assert_eq!("AC1027".parse::<DxfVersion>(), Ok(DxfVersion::R2013));
    }

    #[test]
    fn r12_is_recognized_but_rejected() {
        let err = "R12".parse::<DxfVersion>().unwrap_err();
        assert!(err.contains("not supported"));
    }

    #[test]
    fn acad_tags_round_trip() {
        for v in [DxfVersion::R2000, DxfVersion::R2010, DxfVersion::R2018] {
            assert_eq!(DxfVersion::from_acad_tag(v.acad_tag()), Some(v));
        }
        assert_eq!(DxfVersion::from_acad_tag("AC1009"), None);
    }

    #[test]
    fn unit_codes() {
        assert_eq!(Units::Mm.insunits(), 4);
        assert_eq!(Units::Cm.insunits(), 5);
        assert_eq!(Units::M.insunits(), 6);
        assert_eq!(Units::Inch.insunits(), 1);
        assert_eq!(Units::from_insunits(5), Some(Units::Cm));
        assert_eq!(Units::from_insunits(0), None);
    }

    #[test]
    fn unit_strings_parse() {
        assert_eq!("MM".parse::<Units>(), Ok(Units::Mm));
        assert_eq!("in".parse::<Units>(), Ok(Units::Inch));
        assert!("furlong".parse::<Units>().is_err());
    }
}
