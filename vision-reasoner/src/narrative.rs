use crate::{parse_json_object, VisionClient};
use damage_detector::Severity;
use serde::{Deserialize, Serialize};
use tracing::info;

const NARRATIVE_MAX_TOKENS: u32 = 400;

/// Number of findings per severity tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub severe: usize,
    pub moderate: usize,
    pub minor: usize,
}

impl SeverityCounts {
    pub fn from_severities<I: IntoIterator<Item = Severity>>(severities: I) -> Self {
        let mut counts = Self::default();
        for severity in severities {
            match severity {
                Severity::Severe => counts.severe += 1,
                Severity::Moderate => counts.moderate += 1,
                Severity::Minor => counts.minor += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.severe + self.moderate + self.minor
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLabel {
    High,
    Medium,
    Low,
}

impl ConfidenceLabel {
    /// Accepts "high", "Medium - two regions unclear", etc.
    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim().to_ascii_lowercase();
        if label.starts_with("high") {
            Some(Self::High)
        } else if label.starts_with("medium") {
            Some(Self::Medium)
        } else if label.starts_with("low") {
            Some(Self::Low)
        } else {
            None
        }
    }
}

/// Advisory overall write-up from the reasoning model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Narrative {
    pub reasoning: String,
    pub confidence: ConfidenceLabel,
}

/// Secondary reasoning call that turns tier counts into a narrative
#[async_trait::async_trait]
pub trait NarrativeModel: Send + Sync {
    async fn narrate(&self, counts: &SeverityCounts) -> anyhow::Result<Narrative>;
}

#[derive(Debug, Deserialize)]
struct NarrativeReply {
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    confidence: String,
}

pub fn narrative_prompt(counts: &SeverityCounts) -> String {
    format!(
        r#"You are an expert roof inspector writing the overall assessment for an inspection report.

The inspection found {total} damaged areas:
- severe: {severe}
- moderate: {moderate}
- minor: {minor}

Write 2-3 sentences describing the overall roof condition and what the homeowner should do next.

Return ONLY valid JSON with NO markdown formatting:
{{
  "reasoning": "Overall roof condition assessment",
  "confidence": "high|medium|low"
}}"#,
        total = counts.total(),
        severe = counts.severe,
        moderate = counts.moderate,
        minor = counts.minor,
    )
}

/// Parse the narrative reply; an unknown confidence label reads as medium
pub fn parse_narrative_reply(content: &str) -> anyhow::Result<Narrative> {
    let reply: NarrativeReply = parse_json_object(content)
        .ok_or_else(|| anyhow::anyhow!("Failed to parse narrative response: {}", content))?;

    if reply.reasoning.trim().is_empty() {
        return Err(anyhow::anyhow!("Narrative response has no reasoning: {}", content));
    }

    Ok(Narrative {
        reasoning: reply.reasoning.trim().to_string(),
        confidence: ConfidenceLabel::parse(&reply.confidence).unwrap_or(ConfidenceLabel::Medium),
    })
}

/// Narrative model backed by the same chat-completions API as region reasoning
#[derive(Clone)]
pub struct VisionNarrator {
    client: VisionClient,
}

impl VisionNarrator {
    pub fn new(client: VisionClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl NarrativeModel for VisionNarrator {
    async fn narrate(&self, counts: &SeverityCounts) -> anyhow::Result<Narrative> {
        info!("Requesting overall narrative for {} findings", counts.total());
        let content = self
            .client
            .complete(&narrative_prompt(counts), None, NARRATIVE_MAX_TOKENS)
            .await?;
        parse_narrative_reply(&content)
    }
}
