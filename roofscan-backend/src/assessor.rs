use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use vision_reasoner::{ConfidenceLabel, NarrativeModel, RefinedAssessment, SeverityCounts};

/// Overall roof verdict. `Unknown` only when nothing was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallSeverity {
    Unknown,
    Minor,
    Moderate,
    Severe,
}

impl OverallSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallSeverity::Unknown => "unknown",
            OverallSeverity::Minor => "minor",
            OverallSeverity::Moderate => "moderate",
            OverallSeverity::Severe => "severe",
        }
    }
}

impl std::fmt::Display for OverallSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic tiering rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityPolicy {
    /// Moderate findings beyond this count escalate the roof to severe
    #[serde(default = "default_moderate_escalation_count")]
    pub moderate_escalation_count: usize,
}

fn default_moderate_escalation_count() -> usize {
    2
}

impl Default for SeverityPolicy {
    fn default() -> Self {
        Self {
            moderate_escalation_count: default_moderate_escalation_count(),
        }
    }
}

/// Output of the deterministic rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tier {
    pub overall_severity: OverallSeverity,
    pub immediate_action_needed: bool,
    /// Severe only because of accumulated moderate findings
    pub escalated: bool,
}

impl SeverityPolicy {
    /// Rules apply in priority order:
    /// any severe, then too many moderates, then any moderate, then minor.
    pub fn tier(&self, counts: &SeverityCounts) -> Tier {
        let (overall_severity, immediate_action_needed, escalated) = if counts.total() == 0 {
            (OverallSeverity::Unknown, false, false)
        } else if counts.severe > 0 {
            (OverallSeverity::Severe, true, false)
        } else if counts.moderate > self.moderate_escalation_count {
            (OverallSeverity::Severe, true, true)
        } else if counts.moderate > 0 {
            (OverallSeverity::Moderate, false, false)
        } else {
            (OverallSeverity::Minor, false, false)
        };

        Tier {
            overall_severity,
            immediate_action_needed,
            escalated,
        }
    }
}

/// Where the narrative text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeSource {
    Model,
    Template,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateAssessment {
    pub overall_severity: OverallSeverity,
    pub immediate_action_needed: bool,
    pub narrative: String,
    pub confidence: ConfidenceLabel,
    pub narrative_source: NarrativeSource,
}

impl AggregateAssessment {
    /// Verdict for an image with no detections
    pub fn no_damage() -> Self {
        Self {
            overall_severity: OverallSeverity::Unknown,
            immediate_action_needed: false,
            narrative: "No roof damage was detected in this image.".to_string(),
            confidence: ConfidenceLabel::High,
            narrative_source: NarrativeSource::Template,
        }
    }
}

/// Narrative used when the model is unavailable, derived from counts only
pub fn template_narrative(counts: &SeverityCounts, tier: &Tier) -> String {
    let mut text = format!(
        "Identified {} damaged area{}: {} severe, {} moderate, {} minor.",
        counts.total(),
        if counts.total() == 1 { "" } else { "s" },
        counts.severe,
        counts.moderate,
        counts.minor
    );
    text.push(' ');
    text.push_str(match tier.overall_severity {
        OverallSeverity::Severe if tier.escalated => {
            "Multiple moderate issues add up to severe overall damage; arrange a professional inspection promptly."
        }
        OverallSeverity::Severe => {
            "Severe damage is present; arrange a professional inspection and repair promptly."
        }
        OverallSeverity::Moderate => {
            "Moderate damage is present; schedule an inspection within the next few weeks."
        }
        OverallSeverity::Minor | OverallSeverity::Unknown => {
            "Only minor wear was found; regular maintenance is sufficient."
        }
    });
    text
}

/// Deterministic tier plus an advisory narrative from a secondary model call
pub struct AggregateAssessor {
    narrator: Arc<dyn NarrativeModel>,
    policy: SeverityPolicy,
    timeout: Duration,
}

impl AggregateAssessor {
    pub fn new(narrator: Arc<dyn NarrativeModel>, policy: SeverityPolicy, timeout: Duration) -> Self {
        Self {
            narrator,
            policy,
            timeout,
        }
    }

    pub fn policy(&self) -> &SeverityPolicy {
        &self.policy
    }

    pub async fn summarize(&self, assessments: &[RefinedAssessment]) -> AggregateAssessment {
        let counts = SeverityCounts::from_severities(assessments.iter().map(|a| a.severity));
        self.summarize_counts(&counts).await
    }

    /// The narrative outcome never changes the deterministic fields
    pub async fn summarize_counts(&self, counts: &SeverityCounts) -> AggregateAssessment {
        if counts.total() == 0 {
            return AggregateAssessment::no_damage();
        }

        let tier = self.policy.tier(counts);
        info!(
            "Overall severity {} (severe={}, moderate={}, minor={})",
            tier.overall_severity, counts.severe, counts.moderate, counts.minor
        );

        let narrative = match tokio::time::timeout(self.timeout, self.narrator.narrate(counts)).await {
            Ok(Ok(narrative)) => Some(narrative),
            Ok(Err(e)) => {
                warn!("Narrative generation failed: {}", e);
                None
            }
            Err(_) => {
                warn!("Narrative generation timed out after {:?}", self.timeout);
                None
            }
        };

        let (narrative, confidence, narrative_source) = match narrative {
            Some(n) => (n.reasoning, n.confidence, NarrativeSource::Model),
            None => (
                template_narrative(counts, &tier),
                ConfidenceLabel::Low,
                NarrativeSource::Template,
            ),
        };

        AggregateAssessment {
            overall_severity: tier.overall_severity,
            immediate_action_needed: tier.immediate_action_needed,
            narrative,
            confidence,
            narrative_source,
        }
    }
}
