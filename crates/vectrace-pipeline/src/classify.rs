//! Layer classification: map a contour to a named, colored layer.
//!
//! Two policies exist. [`LayerPolicy::BySize`] buckets by area alone into
//! four shared layers. [`LayerPolicy::BySizeAndQuality`] crosses a coarser
//! size bucket with the oracle's predicted IoU and appends the contour's
//! index, so every contour lands on its own layer.
//!
//! Colors are AutoCAD Color Index (ACI) values.

use serde::{Deserialize, Serialize};

use crate::types::ContourSource;

/// ACI color for layers whose color carries no meaning.
pub const NEUTRAL_COLOR: u8 = 7;

/// Area bucket used by [`LayerPolicy::BySize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SizeClass {
    Small,
    Medium,
    Large,
    XLarge,
}

impl SizeClass {
    pub const SMALL_LIMIT: f64 = 1_000.0;
    pub const MEDIUM_LIMIT: f64 = 10_000.0;
    pub const LARGE_LIMIT: f64 = 100_000.0;

    /// Bucket an area. Thresholds are exclusive upper bounds.
    #[must_use]
    pub fn from_area(area: f64) -> Self {
        if area < Self::SMALL_LIMIT {
            Self::Small
        } else if area < Self::MEDIUM_LIMIT {
            Self::Medium
        } else if area < Self::LARGE_LIMIT {
            Self::Large
        } else {
            Self::XLarge
        }
    }

    /// Layer-name suffix.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Small => "SMALL",
            Self::Medium => "MEDIUM",
            Self::Large => "LARGE",
            Self::XLarge => "XLARGE",
        }
    }

    /// Blue, green, yellow, red.
    #[must_use]
    pub const fn color(self) -> u8 {
        match self {
            Self::Small => 5,
            Self::Medium => 3,
            Self::Large => 2,
            Self::XLarge => 1,
        }
    }
}

/// Name and display color of an output layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerStyle {
    pub name: String,
    pub color: u8,
}

/// Size-only classification: `(label, color)` for an area.
#[must_use]
pub fn classify(area: f64) -> (&'static str, u8) {
    let class = SizeClass::from_area(area);
    (class.label(), class.color())
}

/// Size-only classification with the layer prefix applied.
#[must_use]
pub fn size_layer(area: f64, prefix: &str) -> LayerStyle {
    let (label, color) = classify(area);
    LayerStyle {
        name: format!("{prefix}_{label}"),
        color,
    }
}

fn composite_size(area: f64) -> &'static str {
    if area > 10_000.0 {
        "Large"
    } else if area > 1_000.0 {
        "Medium"
    } else {
        "Small"
    }
}

fn composite_quality(predicted_iou: Option<f64>) -> &'static str {
    match predicted_iou {
        Some(iou) if iou > 0.9 => "High",
        Some(iou) if iou > 0.7 => "Med",
        _ => "Low",
    }
}

/// Size × quality classification with a per-contour index suffix, e.g.
/// `VECTRACE_Large_High_004`. A missing IoU counts as low quality.
#[must_use]
pub fn classify_with_quality(
    area: f64,
    predicted_iou: Option<f64>,
    index: usize,
    prefix: &str,
) -> LayerStyle {
    LayerStyle {
        name: format!(
            "{prefix}_{}_{}_{index:03}",
            composite_size(area),
            composite_quality(predicted_iou)
        ),
        color: NEUTRAL_COLOR,
    }
}

/// Which classifier the document builder applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerPolicy {
    /// Four shared layers by area.
    #[default]
    BySize,
    /// One layer per contour, named by size and quality.
    BySizeAndQuality,
}

impl LayerPolicy {
    /// Layer for the contour at position `index` in its batch.
    #[must_use]
    pub fn layer_for<C: ContourSource + ?Sized>(
        self,
        contour: &C,
        index: usize,
        prefix: &str,
    ) -> LayerStyle {
        match self {
            Self::BySize => size_layer(contour.area(), prefix),
            Self::BySizeAndQuality => {
                classify_with_quality(contour.area(), contour.predicted_iou(), index, prefix)
            }
        }
    }
}

/// A contour's position in its batch paired with its layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerAssignment {
    pub contour_index: usize,
    pub layer: LayerStyle,
}

/// Classify a batch under one policy.
#[must_use]
pub fn assign_layers<C: ContourSource>(
    contours: &[C],
    policy: LayerPolicy,
    prefix: &str,
) -> Vec<LayerAssignment> {
    contours
        .iter()
        .enumerate()
        .map(|(contour_index, c)| LayerAssignment {
            contour_index,
            layer: policy.layer_for(c, contour_index, prefix),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BBox, Contour, ContourRecord, MaskQuality, Point};

    fn record(area: f64, iou: Option<f64>) -> ContourRecord {
        ContourRecord {
            mask_index: 0,
            contour: Contour::new(vec![
                Point::new(0.0, 0.0),
                Point::new(1.0, 0.0),
                Point::new(0.0, 1.0),
            ]),
            holes: Vec::new(),
            area,
            perimeter: 0.0,
            bbox: BBox::default(),
            quality: MaskQuality {
                predicted_iou: iou,
                stability_score: None,
            },
        }
    }

    // --- size classifier tests ---

    #[test]
    fn default_thresholds() {
        assert_eq!(classify(500.0), ("SMALL", 5));
        assert_eq!(classify(5_000.0), ("MEDIUM", 3));
        assert_eq!(classify(50_000.0), ("LARGE", 2));
        assert_eq!(classify(500_000.0), ("XLARGE", 1));
    }

    #[test]
    fn thresholds_are_exclusive_upper_bounds() {
        assert_eq!(SizeClass::from_area(999.999), SizeClass::Small);
        assert_eq!(SizeClass::from_area(1_000.0), SizeClass::Medium);
        assert_eq!(SizeClass::from_area(10_000.0), SizeClass::Large);
        assert_eq!(SizeClass::from_area(100_000.0), SizeClass::XLarge);
    }

    #[test]
    fn size_layer_applies_prefix() {
        let style = size_layer(5_000.0, "VECTRACE");
        assert_eq!(style.name, "VECTRACE_MEDIUM");
        assert_eq!(style.color, 3);
    }

    // --- quality classifier tests ---

    #[test]
    fn composite_buckets() {
        assert_eq!(
            classify_with_quality(20_000.0, Some(0.95), 4, "V").name,
            "V_Large_High_004"
        );
        assert_eq!(
            classify_with_quality(5_000.0, Some(0.8), 12, "V").name,
            "V_Medium_Med_012"
        );
        assert_eq!(
            classify_with_quality(1_000.0, Some(0.7), 0, "V").name,
            "V_Small_Low_000"
        );
    }

    #[test]
    fn missing_iou_is_low_quality() {
        let style = classify_with_quality(50_000.0, None, 1, "V");
        assert_eq!(style.name, "V_Large_Low_001");
        assert_eq!(style.color, NEUTRAL_COLOR);
    }

    // --- policy tests ---

    #[test]
    fn by_size_shares_layers() {
        let contours = vec![record(5_000.0, None), record(6_000.0, None)];
        let assigned = assign_layers(&contours, LayerPolicy::BySize, "P");
        assert_eq!(assigned[0].layer, assigned[1].layer);
    }

    #[test]
    fn by_size_and_quality_is_unique_per_contour() {
        let contours = vec![record(5_000.0, Some(0.95)), record(5_000.0, Some(0.95))];
        let assigned = assign_layers(&contours, LayerPolicy::BySizeAndQuality, "P");
        assert_ne!(assigned[0].layer.name, assigned[1].layer.name);
        assert_eq!(assigned[1].contour_index, 1);
    }

    #[test]
    fn classification_is_deterministic() {
        let r = record(42_000.0, Some(0.8));
        for policy in [LayerPolicy::BySize, LayerPolicy::BySizeAndQuality] {
            assert_eq!(policy.layer_for(&r, 3, "X"), policy.layer_for(&r, 3, "X"));
        }
    }
}
