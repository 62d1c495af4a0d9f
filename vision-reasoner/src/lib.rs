use damage_detector::ImageInput;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

pub mod detector;
pub mod narrative;
pub mod region;

pub use detector::VisionDetector;
pub use narrative::{ConfidenceLabel, Narrative, NarrativeModel, SeverityCounts, VisionNarrator};
pub use region::{RefinedAssessment, RegionReasoner, VisionRegionReasoner};

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const DEFAULT_MODEL: &str = "gpt-4o-2024-11-20";
const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";

/// Client for an OpenAI-compatible chat-completions vision API
///
/// The key is optional: callers decide what "no credential" means for them
/// (the reasoning stages degrade to detector defaults instead of failing).
#[derive(Clone)]
pub struct VisionClient {
    client: Client,
    api_key: Option<String>,
    model: String,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl VisionClient {
    /// Create a new vision client
    ///
    /// # Arguments
    /// * `api_key` - OpenAI API key (from OPENAI_API_KEY environment variable)
    /// * `model` - Model to use (default: "gpt-4o-2024-11-20")
    pub fn new(client: Client, api_key: Option<String>, model: Option<String>) -> Self {
        Self {
            client,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    /// Create from OPENAI_API_KEY, VISION_MODEL and OPENAI_BASE_URL
    pub fn from_env(client: Client) -> Self {
        let vision = Self::new(
            client,
            std::env::var(API_KEY_ENV).ok(),
            std::env::var("VISION_MODEL").ok(),
        );
        match std::env::var("OPENAI_BASE_URL") {
            Ok(base) => vision.with_endpoint(base),
            Err(_) => vision,
        }
    }

    pub fn with_endpoint(mut self, base_url: impl Into<String>) -> Self {
        self.endpoint = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one prompt (optionally with an image) and return the raw reply text
    pub async fn complete(
        &self,
        prompt: &str,
        image: Option<&ImageInput>,
        max_tokens: u32,
    ) -> anyhow::Result<String> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("{} environment variable not set", API_KEY_ENV))?;

        let mut content = Vec::new();
        if let Some(image) = image {
            content.push(serde_json::json!({
                "type": "image_url",
                "image_url": {
                    "url": image.to_data_url()
                }
            }));
        }
        content.push(serde_json::json!({
            "type": "text",
            "text": prompt
        }));

        let mut request_body = serde_json::json!({
            "model": self.model.clone(),
            "messages": vec![serde_json::json!({
                "role": "user",
                "content": content
            })]
        });

        // Use max_completion_tokens for newer models, max_tokens for older ones
        if self.model.starts_with("gpt-5") || self.model.starts_with("o1") {
            request_body["max_completion_tokens"] = serde_json::json!(max_tokens);
        } else {
            request_body["max_tokens"] = serde_json::json!(max_tokens);
        }

        debug!("Sending request to vision API (model: {})", self.model);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            warn!("Vision API error: {} - {}", status, error_text);
            return Err(anyhow::anyhow!("Vision API error: {} - {}", status, error_text));
        }

        let api_response: OpenAIResponse = response.json().await?;

        let content = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow::anyhow!("No response content from vision API"))?;

        info!("Received vision response ({} chars)", content.len());

        Ok(content)
    }
}

/// Strip surrounding markdown code fences (with or without a language tag)
pub fn extract_json_from_response(content: &str) -> String {
    let mut text = content.trim();

    if let Some(rest) = text.strip_prefix("```") {
        let tag_len = rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        text = &rest[tag_len..];
    }

    let text = text.trim_end();
    let text = text.strip_suffix("```").unwrap_or(text);

    text.trim().to_string()
}

/// Extract and deserialize one JSON object from possibly fenced model text
///
/// Returns `None` instead of an error so every caller treats malformed model
/// output the same way. Anything besides the (optionally fenced) JSON itself,
/// such as surrounding prose, makes the reply invalid.
pub fn parse_json_object<T: DeserializeOwned>(content: &str) -> Option<T> {
    let json_str = extract_json_from_response(content);
    serde_json::from_str(&json_str).ok()
}
