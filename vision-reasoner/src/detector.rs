//! Damage detector that asks the vision model itself for boxes.
//!
//! Used when no dedicated detection model is configured. The reply goes
//! through the same validation as the hosted detector's output, so invalid
//! boxes and confidences are rejected, never clamped.

use crate::{parse_json_object, VisionClient, API_KEY_ENV};
use damage_detector::normalize::{coarse_severity, coarse_type};
use damage_detector::{
    BoundingBox, DamageDetector, DamageType, DetectorError, ImageInput, RawDetection, Severity,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

const DETECTION_MAX_TOKENS: u32 = 3000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Deserialize)]
struct DetectionReply {
    damages: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct VisionDamage {
    #[serde(default, rename = "type")]
    damage_type: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    bbox: [f64; 4],
    confidence: f64,
    #[serde(default)]
    description: Option<String>,
}

/// Prompt asking for every damaged area with a percentage bounding box
pub fn detection_prompt() -> String {
    let types = DamageType::REFINED
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join("|");

    format!(
        r#"You are an expert roof inspector analyzing this photograph for damage.

Damage types to identify:
- missing_shingles: areas where shingles are completely absent, exposing underlayment or wood
- cracked_shingles: visible cracks, splits, or fractures in shingles
- hail_damage: circular dents, bruising, or impact marks on shingles
- wind_damage: lifted, curled, or partially blown-off shingle sections
- torn_underlayment: rips or tears in the protective membrane beneath shingles
- damaged_shingles: general shingle damage that fits none of the above

Severity:
- minor: small cosmetic damage, no immediate risk
- moderate: functional damage that needs repair soon
- severe: major damage requiring immediate attention to prevent water infiltration

Bounding boxes are [x1, y1, x2, y2] as PERCENTAGES (0-100) of the image, where (0, 0) is the
top-left corner and (100, 100) the bottom-right corner. x1 < x2 and y1 < y2.
Make each box slightly larger than the damage so it is fully covered. For example, damage in
the center covering 20% of the width and 15% of the height is [40, 42.5, 60, 57.5].

Return ONLY valid JSON with NO markdown formatting:
{{
  "damages": [
    {{
      "type": "{types}",
      "severity": "minor|moderate|severe",
      "bbox": [x1, y1, x2, y2],
      "confidence": 0.0-1.0,
      "description": "brief description of what you see"
    }}
  ]
}}

If no damage is visible, return: {{"damages": []}}"#,
        types = types,
    )
}

/// Convert the model's reply into detections, or `None` if the reply has no
/// `damages` list at all
///
/// Individual entries that don't deserialize, carry an invalid box, or have a
/// confidence outside [0, 1] are dropped with a warning. Indices are dense
/// over the survivors.
pub fn parse_detection_reply(content: &str) -> Option<Vec<RawDetection>> {
    let reply: DetectionReply = parse_json_object(content)?;
    let mut detections = Vec::with_capacity(reply.damages.len());

    for (position, entry) in reply.damages.into_iter().enumerate() {
        let damage: VisionDamage = match serde_json::from_value(entry) {
            Ok(damage) => damage,
            Err(e) => {
                warn!("Rejecting vision detection {}: {}", position, e);
                continue;
            }
        };

        if !(0.0..=1.0).contains(&damage.confidence) {
            warn!(
                "Rejecting vision detection {}: confidence {} outside [0, 1]",
                position, damage.confidence
            );
            continue;
        }

        let bbox = match BoundingBox::try_from(damage.bbox) {
            Ok(bbox) => bbox,
            Err(e) => {
                warn!("Rejecting vision detection {}: {}", position, e);
                continue;
            }
        };

        let class_label = damage.damage_type.unwrap_or_else(|| "damage".to_string());
        let coarse_type = coarse_type(&class_label);
        let coarse_severity = damage
            .severity
            .as_deref()
            .and_then(Severity::parse)
            .unwrap_or_else(|| coarse_severity(damage.confidence, &bbox));
        let coarse_description = damage
            .description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("{} detected by vision model", class_label));

        detections.push(RawDetection {
            index: detections.len(),
            bbox,
            confidence: damage.confidence,
            class_label,
            coarse_type,
            coarse_severity,
            coarse_description,
        });
    }

    Some(detections)
}

/// `DamageDetector` backed by the generative vision model
#[derive(Clone)]
pub struct VisionDetector {
    client: VisionClient,
    max_attempts: u32,
}

impl VisionDetector {
    pub fn new(client: VisionClient) -> Self {
        Self {
            client,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

#[async_trait::async_trait]
impl DamageDetector for VisionDetector {
    /// Each failed call or unparsable reply is logged and retried, up to
    /// `max_attempts` in total
    async fn detect(&self, image: &ImageInput) -> Result<Vec<RawDetection>, DetectorError> {
        if !self.client.has_credential() {
            return Err(DetectorError::MissingCredential(API_KEY_ENV));
        }

        let prompt = detection_prompt();
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            let content = match self
                .client
                .complete(&prompt, Some(image), DETECTION_MAX_TOKENS)
                .await
            {
                Ok(content) => content,
                Err(e) => {
                    warn!("Vision detection attempt {}/{} failed: {}", attempt, self.max_attempts, e);
                    last_error = e.to_string();
                    continue;
                }
            };

            match parse_detection_reply(&content) {
                Some(detections) => {
                    info!("Vision model found {} damage regions", detections.len());
                    return Ok(detections);
                }
                None => {
                    warn!(
                        "Vision detection attempt {}/{}: reply has no damages list: {}",
                        attempt, self.max_attempts, content
                    );
                    last_error = "reply has no damages list".to_string();
                }
            }
        }

        Err(DetectorError::Exhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }

    fn model_info(&self) -> String {
        format!("vision:{}", self.client.model())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Client;

    fn png() -> ImageInput {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([0, 0, 0]));
        let mut buffer = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buffer, image::ImageFormat::Png)
            .unwrap();
        ImageInput::from_bytes(buffer.into_inner()).unwrap()
    }

    #[test]
    fn test_parse_detection_reply() {
        let reply = r#"```json
{
  "damages": [
    {"type": "missing_shingles", "severity": "severe", "bbox": [55, 15, 85, 45], "confidence": 0.9, "description": "Large hole near the ridge"},
    {"type": "hail_damage", "severity": "minor", "bbox": [5, 30, 25, 60], "confidence": 0.6, "description": "Scattered bruising"}
  ]
}
```"#;

        let detections = parse_detection_reply(reply).unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].index, 0);
        assert_eq!(detections[0].coarse_type, DamageType::MissingShingles);
        assert_eq!(detections[0].coarse_severity, Severity::Severe);
        assert_eq!(detections[0].bbox.as_array(), [55.0, 15.0, 85.0, 45.0]);
        assert_eq!(detections[0].coarse_description, "Large hole near the ridge");
        assert_eq!(detections[1].index, 1);
        assert_eq!(detections[1].class_label, "hail_damage");
    }

    #[test]
    fn test_invalid_entries_are_dropped_with_dense_indices() {
        let reply = r#"{"damages": [
            {"type": "wind_damage", "bbox": [60, 10, 20, 30], "confidence": 0.8},
            {"type": "wind_damage", "bbox": [10, 10, 20, 30], "confidence": 1.7},
            {"type": "wind_damage", "bbox": [10, 10, 20], "confidence": 0.5},
            {"type": "wind_damage", "severity": "minor", "bbox": [10, 10, 20, 30], "confidence": 0.5}
        ]}"#;

        let detections = parse_detection_reply(reply).unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].index, 0);
        assert_eq!(detections[0].coarse_type, DamageType::WindDamage);
    }

    #[test]
    fn test_unknown_labels_fall_back() {
        let reply = r#"{"damages": [
            {"type": "moss", "severity": "catastrophic", "bbox": [0, 0, 50, 50], "confidence": 0.9}
        ]}"#;

        let detections = parse_detection_reply(reply).unwrap();
        assert_eq!(detections[0].coarse_type, DamageType::RoofDamage);
        // 2500 sq-% at 0.9 confidence seeds as severe
        assert_eq!(detections[0].coarse_severity, Severity::Severe);
        assert_eq!(detections[0].coarse_description, "moss detected by vision model");
    }

    #[test]
    fn test_no_damage_and_malformed_replies() {
        assert_eq!(parse_detection_reply(r#"{"damages": []}"#).unwrap().len(), 0);
        assert!(parse_detection_reply(r#"{"regions": []}"#).is_none());
        assert!(parse_detection_reply("I see no roof here.").is_none());
    }

    #[tokio::test]
    async fn test_detect_without_key_is_missing_credential() {
        let detector = VisionDetector::new(VisionClient::new(Client::new(), None, None));
        let result = detector.detect(&png()).await;
        assert!(matches!(result, Err(DetectorError::MissingCredential(API_KEY_ENV))));
    }

    #[tokio::test]
    async fn test_detect_gives_up_after_max_attempts() {
        // nothing listens on port 9; every attempt fails to connect
        let client = VisionClient::new(Client::new(), Some("sk-test".to_string()), None)
            .with_endpoint("http://127.0.0.1:9");
        let detector = VisionDetector::new(client).with_max_attempts(2);

        match detector.detect(&png()).await {
            Err(DetectorError::Exhausted { attempts, last_error }) => {
                assert_eq!(attempts, 2);
                assert!(!last_error.is_empty());
            }
            other => panic!("expected exhausted attempts, got {:?}", other),
        }
        assert_eq!(detector.model_info(), "vision:gpt-4o-2024-11-20");
    }

    #[test]
    fn test_detection_prompt_lists_types_and_empty_form() {
        let prompt = detection_prompt();
        assert!(prompt.contains("torn_underlayment"));
        assert!(prompt.contains("PERCENTAGES"));
        assert!(prompt.contains(r#"{"damages": []}"#));
    }
}
