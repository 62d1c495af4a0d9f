//! Conversion from the detector's native pixel boxes to normalized detections.
//!
//! The detector reports center + size in pixels. Downstream stages work in
//! corner coordinates expressed as percentages of the image, which keeps
//! boxes valid for any resized copy of the image.

use crate::{BoundingBox, DamageType, RawDetection, Severity};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Confidence/area thresholds for the coarse severity seed.
/// Area is in squared percentage units (width% * height%).
const SEVERE_CONFIDENCE: f64 = 0.8;
const SEVERE_AREA: f64 = 10.0;
const MODERATE_CONFIDENCE: f64 = 0.6;
const MODERATE_AREA: f64 = 5.0;

/// Native detector output for one region, in pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelDetection {
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
    pub class_label: String,
    pub confidence: f64,
    pub image_width: f64,
    pub image_height: f64,
}

/// Normalize pixel detections into `RawDetection`s
///
/// Detections on a degenerate image (width or height <= 0) are dropped, so a
/// response with no usable image dimensions yields an empty list. Boxes that
/// violate the corner invariant or confidences outside [0, 1] are rejected and
/// logged, never clamped. Indices are assigned densely over the survivors.
pub fn normalize_detections(detections: &[PixelDetection]) -> Vec<RawDetection> {
    let mut normalized = Vec::with_capacity(detections.len());

    for (position, det) in detections.iter().enumerate() {
        if !(det.image_width > 0.0 && det.image_height > 0.0) {
            warn!(
                "Dropping detection {}: degenerate image dimensions {}x{}",
                position, det.image_width, det.image_height
            );
            continue;
        }

        if !(0.0..=1.0).contains(&det.confidence) {
            warn!(
                "Rejecting detection {}: confidence {} outside [0, 1]",
                position, det.confidence
            );
            continue;
        }

        let half_w = det.width / 2.0;
        let half_h = det.height / 2.0;
        let bbox = match BoundingBox::new(
            (det.center_x - half_w) / det.image_width * 100.0,
            (det.center_y - half_h) / det.image_height * 100.0,
            (det.center_x + half_w) / det.image_width * 100.0,
            (det.center_y + half_h) / det.image_height * 100.0,
        ) {
            Ok(bbox) => bbox,
            Err(e) => {
                warn!("Rejecting detection {} ({}): {}", position, det.class_label, e);
                continue;
            }
        };

        normalized.push(RawDetection {
            index: normalized.len(),
            bbox,
            confidence: det.confidence,
            class_label: det.class_label.clone(),
            coarse_type: coarse_type(&det.class_label),
            coarse_severity: coarse_severity(det.confidence, &bbox),
            coarse_description: format!("{} detected by Roboflow model", det.class_label),
        });
    }

    normalized
}

/// Seed severity from detector confidence and box size.
/// Large, confidently detected regions start out more severe.
pub fn coarse_severity(confidence: f64, bbox: &BoundingBox) -> Severity {
    let area = bbox.area();
    if confidence > SEVERE_CONFIDENCE && area > SEVERE_AREA {
        Severity::Severe
    } else if confidence > MODERATE_CONFIDENCE && area > MODERATE_AREA {
        Severity::Moderate
    } else {
        Severity::Minor
    }
}

/// The hosted model is single-class, so every detection seeds as generic
/// roof damage unless its label already names a known type.
pub fn coarse_type(class_label: &str) -> DamageType {
    DamageType::parse(class_label).unwrap_or(DamageType::RoofDamage)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pixel(cx: f64, cy: f64, w: f64, h: f64, confidence: f64) -> PixelDetection {
        PixelDetection {
            center_x: cx,
            center_y: cy,
            width: w,
            height: h,
            class_label: "damage".to_string(),
            confidence,
            image_width: 1000.0,
            image_height: 500.0,
        }
    }

    fn assert_bbox_close(bbox: &BoundingBox, expected: [f64; 4]) {
        for (actual, expected) in bbox.as_array().iter().zip(expected.iter()) {
            assert!((actual - expected).abs() < 1e-9, "{:?} != {:?}", bbox, expected);
        }
    }

    #[test]
    fn test_center_size_to_corner_percentages() {
        let detections = normalize_detections(&[pixel(500.0, 250.0, 200.0, 100.0, 0.9)]);

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].index, 0);
        assert_bbox_close(&detections[0].bbox, [40.0, 40.0, 60.0, 60.0]);
        assert_eq!(detections[0].confidence, 0.9);
        assert_eq!(detections[0].coarse_type, DamageType::RoofDamage);
        assert_eq!(detections[0].coarse_description, "damage detected by Roboflow model");
    }

    #[test]
    fn test_degenerate_image_dimensions_yield_empty_list() {
        let mut zero_width = pixel(10.0, 10.0, 5.0, 5.0, 0.9);
        zero_width.image_width = 0.0;
        let mut negative_height = pixel(10.0, 10.0, 5.0, 5.0, 0.9);
        negative_height.image_height = -4.0;

        assert!(normalize_detections(&[zero_width, negative_height]).is_empty());
    }

    #[test]
    fn test_invalid_boxes_are_rejected_not_clamped() {
        let detections = normalize_detections(&[
            pixel(500.0, 250.0, 0.0, 100.0, 0.9),   // zero width
            pixel(980.0, 250.0, 100.0, 100.0, 0.9), // spills past the right edge
            pixel(100.0, 100.0, 50.0, 50.0, 1.4),   // confidence out of range
            pixel(100.0, 100.0, 50.0, 50.0, 0.5),   // valid
        ]);

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].index, 0);
        assert_bbox_close(&detections[0].bbox, [7.5, 15.0, 12.5, 25.0]);
    }

    #[test]
    fn test_coarse_severity_heuristic() {
        let large = BoundingBox::new(0.0, 0.0, 20.0, 20.0).unwrap(); // area 400
        let medium = BoundingBox::new(0.0, 0.0, 3.0, 2.0).unwrap(); // area 6
        let small = BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap(); // area 1

        assert_eq!(coarse_severity(0.85, &large), Severity::Severe);
        assert_eq!(coarse_severity(0.75, &large), Severity::Moderate);
        assert_eq!(coarse_severity(0.85, &medium), Severity::Moderate);
        assert_eq!(coarse_severity(0.95, &small), Severity::Minor);
        assert_eq!(coarse_severity(0.5, &large), Severity::Minor);
    }

    #[test]
    fn test_coarse_type_uses_known_labels() {
        assert_eq!(coarse_type("hail_damage"), DamageType::HailDamage);
        assert_eq!(coarse_type("damage"), DamageType::RoofDamage);
    }
}
