//! Roboflow hosted-inference detector adapter
//!
//! Sends the image to a hosted YOLO model and converts its predictions into
//! normalized `RawDetection`s. Any transport or credential problem is a hard
//! error: without geometry no later stage has anything to work on.

use crate::{normalize_detections, DamageDetector, DetectorError, ImageInput, PixelDetection, RawDetection};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const API_KEY_ENV: &str = "ROBOFLOW_API_KEY";

/// Roboflow detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoboflowConfig {
    /// Base URL of the hosted inference API
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Project/version model id, e.g. "roof-dmg-a1b1a/3"
    #[serde(default = "default_model_id")]
    pub model_id: String,
    /// Minimum confidence on the service's 0-100 scale
    #[serde(default = "default_confidence")]
    pub confidence: u8,
}

fn default_api_url() -> String {
    "https://detect.roboflow.com".to_string()
}

fn default_model_id() -> String {
    "roof-dmg-a1b1a/3".to_string()
}

fn default_confidence() -> u8 {
    40
}

impl Default for RoboflowConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            model_id: default_model_id(),
            confidence: default_confidence(),
        }
    }
}

impl RoboflowConfig {
    /// Default config overridden by ROBOFLOW_API_URL, ROBOFLOW_MODEL_ID and ROBOFLOW_CONFIDENCE
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_url: std::env::var("ROBOFLOW_API_URL").unwrap_or(defaults.api_url),
            model_id: std::env::var("ROBOFLOW_MODEL_ID").unwrap_or(defaults.model_id),
            confidence: std::env::var("ROBOFLOW_CONFIDENCE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.confidence),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RoboflowResponse {
    #[serde(default)]
    predictions: Vec<RoboflowPrediction>,
    #[serde(default)]
    image: Option<RoboflowImage>,
    #[serde(default)]
    width: Option<f64>,
    #[serde(default)]
    height: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RoboflowPrediction {
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    width: f64,
    #[serde(default)]
    height: f64,
    #[serde(default)]
    confidence: f64,
    #[serde(rename = "class", default = "default_class")]
    class_label: String,
}

fn default_class() -> String {
    "unknown".to_string()
}

#[derive(Debug, Deserialize)]
struct RoboflowImage {
    #[serde(default)]
    width: f64,
    #[serde(default)]
    height: f64,
}

impl RoboflowResponse {
    /// Image dimensions live under "image" but some deployments report them at top level
    fn image_dimensions(&self) -> (f64, f64) {
        let nested = self
            .image
            .as_ref()
            .map(|img| (img.width, img.height))
            .unwrap_or((0.0, 0.0));

        if nested.0 > 0.0 && nested.1 > 0.0 {
            nested
        } else {
            (self.width.unwrap_or(0.0), self.height.unwrap_or(0.0))
        }
    }

    fn into_pixel_detections(self) -> Vec<PixelDetection> {
        let (image_width, image_height) = self.image_dimensions();
        self.predictions
            .into_iter()
            .map(|p| PixelDetection {
                center_x: p.x,
                center_y: p.y,
                width: p.width,
                height: p.height,
                class_label: p.class_label,
                confidence: p.confidence,
                image_width,
                image_height,
            })
            .collect()
    }
}

/// Parse a raw Roboflow JSON body into pixel detections
pub fn parse_response(body: &str) -> Result<Vec<PixelDetection>, DetectorError> {
    let response: RoboflowResponse = serde_json::from_str(body)
        .map_err(|e| DetectorError::MalformedResponse(format!("{}. Response: {}", e, body)))?;
    Ok(response.into_pixel_detections())
}

pub struct RoboflowDetector {
    client: Client,
    api_key: Option<String>,
    config: RoboflowConfig,
}

impl RoboflowDetector {
    /// Create a new detector. A missing key is reported on the first `detect` call.
    pub fn new(client: Client, api_key: Option<String>, config: RoboflowConfig) -> Self {
        Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            config,
        }
    }

    /// Create from environment variables
    pub fn from_env(client: Client) -> Self {
        Self::new(client, std::env::var(API_KEY_ENV).ok(), RoboflowConfig::from_env())
    }

    pub fn config(&self) -> &RoboflowConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl DamageDetector for RoboflowDetector {
    async fn detect(&self, image: &ImageInput) -> Result<Vec<RawDetection>, DetectorError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(DetectorError::MissingCredential(API_KEY_ENV))?;

        let url = format!(
            "{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.model_id
        );

        info!(
            "Running Roboflow inference (model: {}, {} bytes)",
            self.config.model_id,
            image.len()
        );

        let response = self
            .client
            .post(&url)
            .query(&[
                ("api_key", api_key.clone()),
                ("confidence", self.config.confidence.to_string()),
            ])
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(image.to_base64())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!("Roboflow API error: {} - {}", status, body);
            return Err(DetectorError::Api {
                status: status.as_u16(),
                body,
            });
        }

        debug!("Roboflow raw result: {}", body);

        let pixel_detections = parse_response(&body)?;
        let detections = normalize_detections(&pixel_detections);

        info!(
            "Roboflow returned {} predictions, {} usable detections",
            pixel_detections.len(),
            detections.len()
        );

        Ok(detections)
    }

    fn model_info(&self) -> String {
        format!("Roboflow hosted model {}", self.config.model_id)
    }
}
