use crate::merge::MergedDamage;
use damage_detector::{DamageType, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use vision_reasoner::SeverityCounts;

/// Counts derived from a damage list; recompute whenever the list changes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageSummary {
    pub total_damages: usize,
    pub by_type: BTreeMap<DamageType, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
}

impl DamageSummary {
    pub fn from_damages(damages: &[MergedDamage]) -> Self {
        let mut summary = Self {
            total_damages: damages.len(),
            ..Self::default()
        };
        for damage in damages {
            *summary.by_type.entry(damage.damage_type).or_insert(0) += 1;
            *summary.by_severity.entry(damage.severity).or_insert(0) += 1;
        }
        summary
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.by_severity.get(&severity).copied().unwrap_or(0)
    }

    pub fn severity_counts(&self) -> SeverityCounts {
        SeverityCounts {
            severe: self.count(Severity::Severe),
            moderate: self.count(Severity::Moderate),
            minor: self.count(Severity::Minor),
        }
    }
}
