use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod image_input;
pub mod normalize;
pub mod roboflow;

pub use image_input::{ImageInput, ImageInputError};
pub use normalize::{normalize_detections, PixelDetection};

/// Per-region severity, ordered `Minor < Moderate < Severe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Moderate,
    Severe,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::Minor, Severity::Moderate, Severity::Severe];

    /// Parse a model-supplied label. Anything outside the three tiers is rejected.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "minor" => Some(Self::Minor),
            "moderate" => Some(Self::Moderate),
            "severe" => Some(Self::Severe),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minor => "minor",
            Self::Moderate => "moderate",
            Self::Severe => "severe",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed damage vocabulary shared by the detector and the reasoning model
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageType {
    MissingShingles,
    CrackedShingles,
    HailDamage,
    WindDamage,
    TornUnderlayment,
    DamagedShingles,
    /// Generic seed type assigned by the detector before refinement
    RoofDamage,
}

impl DamageType {
    /// Types the reasoning model is allowed to choose from
    pub const REFINED: [DamageType; 6] = [
        DamageType::MissingShingles,
        DamageType::CrackedShingles,
        DamageType::HailDamage,
        DamageType::WindDamage,
        DamageType::TornUnderlayment,
        DamageType::DamagedShingles,
    ];

    pub fn parse(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "missing_shingles" => Some(Self::MissingShingles),
            "cracked_shingles" => Some(Self::CrackedShingles),
            "hail_damage" => Some(Self::HailDamage),
            "wind_damage" => Some(Self::WindDamage),
            "torn_underlayment" => Some(Self::TornUnderlayment),
            "damaged_shingles" => Some(Self::DamagedShingles),
            "roof_damage" => Some(Self::RoofDamage),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingShingles => "missing_shingles",
            Self::CrackedShingles => "cracked_shingles",
            Self::HailDamage => "hail_damage",
            Self::WindDamage => "wind_damage",
            Self::TornUnderlayment => "torn_underlayment",
            Self::DamagedShingles => "damaged_shingles",
            Self::RoofDamage => "roof_damage",
        }
    }

    /// Human readable label, e.g. "Hail Damage"
    pub fn label(&self) -> String {
        self.as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for DamageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BoundingBoxError {
    #[error("bounding box has non-finite coordinates")]
    NonFinite,
    #[error("bounding box coordinate out of 0-100 range: {0:?}")]
    OutOfRange([f64; 4]),
    #[error("bounding box is degenerate (x1 >= x2 or y1 >= y2): {0:?}")]
    Degenerate([f64; 4]),
}

/// Axis-aligned box in percentages of the image, `[x1, y1, x2, y2]`
///
/// Construction enforces `0 <= x1 < x2 <= 100` and `0 <= y1 < y2 <= 100`.
/// Serialized as a plain four element array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "[f64; 4]", try_from = "[f64; 4]")]
pub struct BoundingBox {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Result<Self, BoundingBoxError> {
        let coords = [x1, y1, x2, y2];
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(BoundingBoxError::NonFinite);
        }
        if coords.iter().any(|c| !(0.0..=100.0).contains(c)) {
            return Err(BoundingBoxError::OutOfRange(coords));
        }
        if x1 >= x2 || y1 >= y2 {
            return Err(BoundingBoxError::Degenerate(coords));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    /// Area in squared percentage units (a full-frame box is 10_000)
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// Corner coordinates in pixels for an image of the given size
    pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let w = width as f64;
        let h = height as f64;
        (
            (self.x1 / 100.0 * w) as u32,
            (self.y1 / 100.0 * h) as u32,
            (self.x2 / 100.0 * w) as u32,
            (self.y2 / 100.0 * h) as u32,
        )
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(bbox: BoundingBox) -> Self {
        bbox.as_array()
    }
}

impl TryFrom<[f64; 4]> for BoundingBox {
    type Error = BoundingBoxError;

    fn try_from(coords: [f64; 4]) -> Result<Self, Self::Error> {
        Self::new(coords[0], coords[1], coords[2], coords[3])
    }
}

/// One damage region reported by the geometric detector, before refinement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    /// Position in detection order, used as merge identity downstream
    pub index: usize,
    pub bbox: BoundingBox,
    /// Detector confidence in [0, 1]
    pub confidence: f64,
    /// Class label as reported by the detector model
    pub class_label: String,
    pub coarse_type: DamageType,
    pub coarse_severity: Severity,
    pub coarse_description: String,
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("{0} not set; the damage detector cannot run without it")]
    MissingCredential(&'static str),
    #[error("detector request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("detector API error: {status} - {body}")]
    Api { status: u16, body: String },
    #[error("detector returned a malformed response: {0}")]
    MalformedResponse(String),
    #[error("detector did not respond within {0:?}")]
    Timeout(Duration),
    #[error("detector gave no usable answer after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// Geometric damage detector seam. Implementations wrap a remote model.
#[async_trait::async_trait]
pub trait DamageDetector: Send + Sync {
    /// Detect damage regions. An empty list is a valid "no damage" result.
    async fn detect(&self, image: &ImageInput) -> Result<Vec<RawDetection>, DetectorError>;

    /// Get model info
    fn model_info(&self) -> String;
}
