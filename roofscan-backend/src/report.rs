use crate::assessor::{OverallSeverity, SeverityPolicy};
use crate::merge::MergedDamage;
use crate::summary::DamageSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const REPORT_TITLE: &str = "Roof Damage Assessment Report";
const DESCRIPTION_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, Deserialize)]
pub struct ReportRequest {
    pub damages: Vec<MergedDamage>,
    /// Rendered image to embed, typically the data URL from `/api/analyze`
    #[serde(default)]
    pub annotated_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub heading: String,
    pub text: String,
}

/// One line of the damage details table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub number: usize,
    pub damage_type: String,
    pub severity: String,
    pub confidence: String,
    pub description: String,
}

/// Structured inspection report; page layout is left to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionReport {
    pub title: String,
    pub generated_at: DateTime<Utc>,
    pub summary: DamageSummary,
    pub overall_severity: OverallSeverity,
    pub immediate_action_needed: bool,
    pub recommendation: Recommendation,
    pub rows: Vec<ReportRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotated_image: Option<String>,
}

/// Recommendation text for a roof verdict
pub fn recommendation(overall: OverallSeverity, escalated: bool) -> Recommendation {
    let (heading, text) = match overall {
        OverallSeverity::Severe if escalated => (
            "Immediate Action Required",
            "Multiple moderate issues detected. Recommend immediate professional inspection and repair to prevent further deterioration.",
        ),
        OverallSeverity::Severe => (
            "Immediate Action Required",
            "Severe damage detected. Recommend immediate professional inspection and repair to prevent further deterioration.",
        ),
        OverallSeverity::Moderate => (
            "Recommended Action",
            "Moderate damage detected. Schedule professional inspection within 2-4 weeks to assess repair needs.",
        ),
        OverallSeverity::Minor | OverallSeverity::Unknown => (
            "Status",
            "Minor or no significant damage detected. Regular maintenance recommended to maintain roof integrity.",
        ),
    };

    Recommendation {
        heading: heading.to_string(),
        text: text.to_string(),
    }
}

pub fn build_report(
    damages: &[MergedDamage],
    annotated_image: Option<String>,
    policy: &SeverityPolicy,
    generated_at: DateTime<Utc>,
) -> InspectionReport {
    let summary = DamageSummary::from_damages(damages);
    let tier = policy.tier(&summary.severity_counts());

    let rows = damages
        .iter()
        .enumerate()
        .map(|(i, damage)| ReportRow {
            number: i + 1,
            damage_type: damage.damage_type.label(),
            severity: capitalize(damage.severity.as_str()),
            confidence: format!("{:.0}%", damage.confidence * 100.0),
            description: truncate(&damage.description, DESCRIPTION_MAX_CHARS),
        })
        .collect();

    InspectionReport {
        title: REPORT_TITLE.to_string(),
        generated_at,
        summary,
        overall_severity: tier.overall_severity,
        immediate_action_needed: tier.immediate_action_needed,
        recommendation: recommendation(tier.overall_severity, tier.escalated),
        rows,
        annotated_image,
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.trim().is_empty() {
        return "-".to_string();
    }
    text.chars().take(max_chars).collect()
}
