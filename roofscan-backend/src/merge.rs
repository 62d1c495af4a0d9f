use damage_detector::{BoundingBox, DamageType, RawDetection, Severity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};
use vision_reasoner::RefinedAssessment;

/// Final per-region record: detector geometry plus the best available semantics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedDamage {
    pub index: usize,
    pub bbox: BoundingBox,
    pub confidence: f64,
    #[serde(rename = "type")]
    pub damage_type: DamageType,
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub severity_reasoning: String,
    #[serde(default)]
    pub confidence_assessment: String,
    pub source: DamageSource,
}

/// Where a record's type and severity came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageSource {
    /// Heuristic seed from the detector; never final on its own
    Detector,
    /// Refined by the reasoning model
    Reasoner,
}

impl MergedDamage {
    /// Record carrying only the detector's coarse fields
    pub fn coarse(detection: &RawDetection) -> Self {
        Self {
            index: detection.index,
            bbox: detection.bbox,
            confidence: detection.confidence,
            damage_type: detection.coarse_type,
            severity: detection.coarse_severity,
            description: detection.coarse_description.clone(),
            severity_reasoning: String::new(),
            confidence_assessment: String::new(),
            source: DamageSource::Detector,
        }
    }

    /// Overlay refined semantics; geometry and confidence stay the detector's
    fn refined(detection: &RawDetection, assessment: &RefinedAssessment) -> Self {
        let description = if assessment.description.trim().is_empty() {
            detection.coarse_description.clone()
        } else {
            assessment.description.clone()
        };

        Self {
            index: detection.index,
            bbox: detection.bbox,
            confidence: detection.confidence,
            damage_type: assessment.damage_type,
            severity: assessment.severity,
            description,
            severity_reasoning: assessment.severity_reasoning.clone(),
            confidence_assessment: assessment.confidence_note.clone(),
            source: if assessment.refined {
                DamageSource::Reasoner
            } else {
                DamageSource::Detector
            },
        }
    }
}

/// Phase-one view of a detection list: every record coarse
pub fn coarse_damages(detections: &[RawDetection]) -> Vec<MergedDamage> {
    detections.iter().map(MergedDamage::coarse).collect()
}

/// Merge detector output with reasoning output
///
/// Output has exactly one record per detection, in detection order.
/// Assessments are matched by their `index`, or by position when they carry
/// none. The first assessment claiming an index wins; assessments matching
/// no detection are dropped.
pub fn merge(detections: &[RawDetection], assessments: &[RefinedAssessment]) -> Vec<MergedDamage> {
    let mut overlay: HashMap<usize, &RefinedAssessment> = HashMap::with_capacity(assessments.len());
    for (position, assessment) in assessments.iter().enumerate() {
        let key = assessment.index.unwrap_or(position);
        if overlay.contains_key(&key) {
            warn!("Duplicate assessment for region {}, keeping the first", key);
            continue;
        }
        overlay.insert(key, assessment);
    }

    let merged: Vec<MergedDamage> = detections
        .iter()
        .map(|detection| match overlay.remove(&detection.index) {
            Some(assessment) => MergedDamage::refined(detection, assessment),
            None => MergedDamage::coarse(detection),
        })
        .collect();

    if !overlay.is_empty() {
        let mut orphans: Vec<usize> = overlay.keys().copied().collect();
        orphans.sort_unstable();
        warn!("Discarding assessments with no matching detection: {:?}", orphans);
    }

    info!(
        "Merge complete: {} damages ({} refined)",
        merged.len(),
        merged
            .iter()
            .filter(|d| d.source == DamageSource::Reasoner)
            .count()
    );

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(index: usize, severity: Severity) -> RawDetection {
        let offset = index as f64 * 10.0;
        RawDetection {
            index,
            bbox: BoundingBox::new(offset, offset, offset + 5.0, offset + 5.0).unwrap(),
            confidence: 0.5 + index as f64 / 10.0,
            class_label: "damage".to_string(),
            coarse_type: DamageType::RoofDamage,
            coarse_severity: severity,
            coarse_description: format!("coarse {}", index),
        }
    }

    fn assessment(index: Option<usize>, severity: Severity) -> RefinedAssessment {
        RefinedAssessment {
            index,
            damage_type: DamageType::HailDamage,
            severity,
            description: format!("refined {:?}", index),
            severity_reasoning: "dents".to_string(),
            confidence_note: "high".to_string(),
            refined: true,
        }
    }

    #[test]
    fn test_merge_is_total_and_ordered() {
        let detections: Vec<_> = (0..4).map(|i| detection(i, Severity::Minor)).collect();
        let assessments = vec![assessment(Some(2), Severity::Severe)];

        let merged = merge(&detections, &assessments);
        assert_eq!(merged.len(), detections.len());
        assert_eq!(
            merged.iter().map(|d| d.index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        assert_eq!(merged[2].severity, Severity::Severe);
        assert_eq!(merged[2].source, DamageSource::Reasoner);
        assert_eq!(merged[0], MergedDamage::coarse(&detections[0]));
    }

    #[test]
    fn test_geometry_always_from_detector() {
        let detections = vec![detection(0, Severity::Minor)];
        let merged = merge(&detections, &[assessment(Some(0), Severity::Moderate)]);

        assert_eq!(merged[0].bbox, detections[0].bbox);
        assert_eq!(merged[0].confidence, detections[0].confidence);
        assert_eq!(merged[0].damage_type, DamageType::HailDamage);
        assert_eq!(merged[0].confidence_assessment, "high");
    }

    #[test]
    fn test_positional_fallback_when_index_missing() {
        let detections: Vec<_> = (0..2).map(|i| detection(i, Severity::Minor)).collect();
        let assessments = vec![
            assessment(None, Severity::Moderate),
            assessment(None, Severity::Severe),
        ];

        let merged = merge(&detections, &assessments);
        assert_eq!(merged[0].severity, Severity::Moderate);
        assert_eq!(merged[1].severity, Severity::Severe);
    }

    #[test]
    fn test_unmatched_assessments_are_discarded() {
        let detections = vec![detection(0, Severity::Minor)];
        let assessments = vec![
            assessment(Some(7), Severity::Severe),
            assessment(Some(0), Severity::Moderate),
        ];

        let merged = merge(&detections, &assessments);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].severity, Severity::Moderate);
    }

    #[test]
    fn test_duplicate_index_keeps_first() {
        let detections = vec![detection(0, Severity::Minor)];
        let assessments = vec![
            assessment(Some(0), Severity::Moderate),
            assessment(Some(0), Severity::Severe),
        ];

        assert_eq!(merge(&detections, &assessments)[0].severity, Severity::Moderate);
    }

    #[test]
    fn test_fallback_assessment_stays_detector_sourced() {
        let det = detection(0, Severity::Moderate);
        let fallback = RefinedAssessment::fallback(&det, "timed out");

        let merged = merge(&[det.clone()], &[fallback]);
        assert_eq!(merged[0].source, DamageSource::Detector);
        assert_eq!(merged[0].severity, det.coarse_severity);
        assert_eq!(merged[0].description, det.coarse_description);
        assert_eq!(merged[0].severity_reasoning, "timed out");
    }

    #[test]
    fn test_empty_description_keeps_coarse_text() {
        let det = detection(0, Severity::Minor);
        let mut refined = assessment(Some(0), Severity::Moderate);
        refined.description = "  ".to_string();

        let merged = merge(&[det.clone()], &[refined]);
        assert_eq!(merged[0].description, det.coarse_description);
        assert_eq!(merged[0].severity, Severity::Moderate);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(merge(&[], &[assessment(Some(0), Severity::Severe)]).is_empty());
        let detections = vec![detection(0, Severity::Minor)];
        assert_eq!(merge(&detections, &[]), coarse_damages(&detections));
    }

    #[test]
    fn test_merged_damage_json_shape() {
        let merged = MergedDamage::coarse(&detection(1, Severity::Minor));
        let json = serde_json::to_value(&merged).unwrap();

        assert_eq!(json["type"], "roof_damage");
        assert_eq!(json["severity"], "minor");
        assert_eq!(json["source"], "detector");
        assert_eq!(json["bbox"], serde_json::json!([10.0, 10.0, 15.0, 15.0]));
    }
}
