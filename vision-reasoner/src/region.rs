use crate::{parse_json_object, VisionClient};
use damage_detector::{DamageType, ImageInput, RawDetection, Severity};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const REGION_MAX_TOKENS: u32 = 600;

/// Semantic refinement of one detection by the reasoning model
///
/// `index` is whatever the model echoed back; the orchestrator reassigns it
/// positionally when missing or inconsistent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinedAssessment {
    pub index: Option<usize>,
    pub damage_type: DamageType,
    pub severity: Severity,
    pub description: String,
    pub severity_reasoning: String,
    pub confidence_note: String,
    /// False when this assessment is the detector's coarse data standing in
    /// for a failed reasoning call
    pub refined: bool,
}

impl RefinedAssessment {
    /// Assessment built from the detector's coarse fields plus a diagnostic note
    pub fn fallback(detection: &RawDetection, reason: impl Into<String>) -> Self {
        Self {
            index: Some(detection.index),
            damage_type: detection.coarse_type,
            severity: detection.coarse_severity,
            description: detection.coarse_description.clone(),
            severity_reasoning: reason.into(),
            confidence_note: String::new(),
            refined: false,
        }
    }
}

/// Per-region reasoning seam. Implementations never fail: every error path
/// must come back as `RefinedAssessment::fallback`.
#[async_trait::async_trait]
pub trait RegionReasoner: Send + Sync {
    async fn assess(&self, detection: &RawDetection, image: &ImageInput) -> RefinedAssessment;
}

#[derive(Debug, Default, Deserialize)]
struct RegionReply {
    /// Kept loose: a malformed echo must not cost the rest of the reply
    #[serde(default, alias = "index")]
    original_index: Option<serde_json::Value>,
    #[serde(default, rename = "type")]
    damage_type: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    severity_reasoning: Option<String>,
    #[serde(default)]
    confidence_assessment: Option<String>,
}

/// Build an assessment from the model's reply text, or `None` if the reply
/// holds no usable JSON object.
///
/// Labels outside the closed vocabularies fall back to the detector's coarse
/// values; the remaining fields are kept.
pub fn parse_region_reply(detection: &RawDetection, content: &str) -> Option<RefinedAssessment> {
    let reply: RegionReply = parse_json_object(content)?;

    let severity = match reply.severity.as_deref().map(Severity::parse) {
        Some(Some(severity)) => severity,
        Some(None) => {
            warn!(
                "Region {}: invalid severity label {:?}, keeping detector severity {}",
                detection.index, reply.severity, detection.coarse_severity
            );
            detection.coarse_severity
        }
        None => detection.coarse_severity,
    };

    let damage_type = match reply.damage_type.as_deref().map(DamageType::parse) {
        Some(Some(damage_type)) => damage_type,
        Some(None) => {
            warn!(
                "Region {}: unknown damage type {:?}, keeping detector type {}",
                detection.index, reply.damage_type, detection.coarse_type
            );
            detection.coarse_type
        }
        None => detection.coarse_type,
    };

    // Only a non-negative integer counts as an echoed index
    let index = reply
        .original_index
        .as_ref()
        .and_then(serde_json::Value::as_u64)
        .and_then(|i| usize::try_from(i).ok());

    Some(RefinedAssessment {
        index,
        damage_type,
        severity,
        description: reply.description.unwrap_or_default(),
        severity_reasoning: reply.severity_reasoning.unwrap_or_default(),
        confidence_note: reply.confidence_assessment.unwrap_or_default(),
        refined: true,
    })
}

/// Focused prompt for a single detection
pub fn region_prompt(detection: &RawDetection) -> String {
    let [x1, y1, x2, y2] = detection.bbox.as_array();
    let types = DamageType::REFINED
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join("|");

    format!(
        r#"You are an expert roof inspector analyzing this roof photograph.

Focus ONLY on damage region #{index}. A damage detector flagged it with {confidence:.0}% confidence.
Its bounding box is [x1, y1, x2, y2] = [{x1:.1}, {y1:.1}, {x2:.1}, {y2:.1}] as PERCENTAGES of the image,
where (0, 0) is the top-left corner and (100, 100) the bottom-right corner.

1. Type: classify the damage you see inside that box:
   - missing_shingles: complete absence of shingles
   - cracked_shingles: visible cracks or splits
   - hail_damage: circular dents or bruising
   - wind_damage: lifted or curled shingles
   - torn_underlayment: tears in the protective layer
   - damaged_shingles: general shingle damage

2. Severity: default to "minor". Use "moderate" for functional damage that needs repair soon.
   Use "severe" ONLY when you see evidence of structural compromise (holes, exposed decking,
   sections open to water infiltration).

3. Description: what you observe in this region, written as an inspection report line.

4. Reasoning: why you chose that severity, and your confidence (high/medium/low) with a brief reason.

Return ONLY valid JSON with NO markdown formatting:
{{
  "original_index": {index},
  "type": "{types}",
  "severity": "minor|moderate|severe",
  "description": "What you observe in this region",
  "severity_reasoning": "Why you assigned this severity",
  "confidence_assessment": "high|medium|low and brief reason"
}}"#,
        index = detection.index,
        confidence = detection.confidence * 100.0,
        x1 = x1,
        y1 = y1,
        x2 = x2,
        y2 = y2,
        types = types,
    )
}

/// Region reasoner backed by a generative vision model
#[derive(Clone)]
pub struct VisionRegionReasoner {
    client: VisionClient,
}

impl VisionRegionReasoner {
    pub fn new(client: VisionClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl RegionReasoner for VisionRegionReasoner {
    async fn assess(&self, detection: &RawDetection, image: &ImageInput) -> RefinedAssessment {
        if !self.client.has_credential() {
            warn!(
                "Region {}: {} not set, skipping reasoning",
                detection.index,
                crate::API_KEY_ENV
            );
            return RefinedAssessment::fallback(
                detection,
                "Reasoning skipped (no API key); detector estimate used",
            );
        }

        let prompt = region_prompt(detection);
        let content = match self
            .client
            .complete(&prompt, Some(image), REGION_MAX_TOKENS)
            .await
        {
            Ok(content) => content,
            Err(e) => {
                warn!("Region {}: reasoning call failed: {}", detection.index, e);
                return RefinedAssessment::fallback(
                    detection,
                    format!("Reasoning failed ({}); detector estimate used", e),
                );
            }
        };

        match parse_region_reply(detection, &content) {
            Some(assessment) => {
                info!(
                    "Region {}: refined to {} / {}",
                    detection.index, assessment.damage_type, assessment.severity
                );
                assessment
            }
            None => {
                warn!(
                    "Region {}: failed to parse reasoning response: {}",
                    detection.index, content
                );
                RefinedAssessment::fallback(
                    detection,
                    "Failed to parse reasoning response; detector estimate used",
                )
            }
        }
    }
}
