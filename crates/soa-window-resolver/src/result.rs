//! Resolution result types.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use chrono::NaiveDate;
use soa_protocol::EvidenceWindow;

use crate::traits::{ResourceKind, Subject};

/// Compliance classification of a visit's evidence.
///
/// Derived from the window kind and the corroborating count; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MatchTier {
    /// Records found on the exact expected date.
    Green,
    /// Records found inside the predicted range.
    Orange,
    /// No record in the applicable predicate.
    Red,
}

impl MatchTier {
    /// Classifies a window given the total corroborating count.
    ///
    /// Returns `None` for skipped visits, which are excluded from tiering.
    pub fn classify(window: &EvidenceWindow, corroborating: u64) -> Option<Self> {
        if window.is_skipped() {
            return None;
        }
        if corroborating == 0 || window.predicate().is_none() {
            return Some(MatchTier::Red);
        }
        if window.is_exact() {
            Some(MatchTier::Green)
        } else {
            Some(MatchTier::Orange)
        }
    }
}

impl fmt::Display for MatchTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchTier::Green => write!(f, "GREEN"),
            MatchTier::Orange => write!(f, "ORANGE"),
            MatchTier::Red => write!(f, "RED"),
        }
    }
}

/// Resolution of one visit for one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VisitOutcome {
    /// The visit.
    pub visit_id: String,
    /// Declared position of the visit.
    pub ordinal: usize,
    /// Whether the visit is the protocol's index.
    pub is_index: bool,
    /// Compliance tier (`None` when skipped).
    pub tier: Option<MatchTier>,
    /// The window the evidence was queried in.
    pub window: EvidenceWindow,
    /// Corroborating record counts per kind.
    pub counts: BTreeMap<ResourceKind, u64>,
    /// The visit's own encounter, when located.
    pub encounter_id: Option<String>,
}

impl VisitOutcome {
    /// Returns true if the visit's encounter could not be located.
    pub fn skipped(&self) -> bool {
        self.window.is_skipped()
    }

    /// Total corroborating records across all kinds.
    pub fn corroborating_total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// FHIR search description of the queried predicate.
    pub fn datequery_description(&self) -> String {
        self.window.to_string()
    }
}

/// Tier totals across the visits of one or more subjects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierSummary {
    /// Visits classified GREEN.
    pub green: usize,
    /// Visits classified ORANGE.
    pub orange: usize,
    /// Visits classified RED.
    pub red: usize,
    /// Visits skipped.
    pub skipped: usize,
}

impl TierSummary {
    /// Tallies a set of outcomes.
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a VisitOutcome>) -> Self {
        let mut summary = Self::default();
        for outcome in outcomes {
            summary.record(outcome.tier);
        }
        summary
    }

    /// Tallies one tier.
    pub fn record(&mut self, tier: Option<MatchTier>) {
        match tier {
            Some(MatchTier::Green) => self.green += 1,
            Some(MatchTier::Orange) => self.orange += 1,
            Some(MatchTier::Red) => self.red += 1,
            None => self.skipped += 1,
        }
    }

    /// Total visits tallied.
    pub fn total(&self) -> usize {
        self.green + self.orange + self.red + self.skipped
    }
}

impl fmt::Display for TierSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "green={} orange={} red={} skipped={}",
            self.green, self.orange, self.red, self.skipped
        )
    }
}

/// Statistics from resolving one subject.
#[derive(Debug, Clone, Default)]
pub struct ResolutionStats {
    /// Total resolution duration.
    pub duration: Duration,
    /// Subject and encounter lookups sent to the gateway.
    pub gateway_lookups: usize,
    /// Lookups served from the cache.
    pub cache_hits: usize,
    /// Count queries sent to the gateway.
    pub count_queries: usize,
}

/// Resolution of every visit of the protocol for one subject.
#[derive(Debug, Clone)]
pub struct SubjectResolution {
    /// The resolved subject.
    pub subject: Subject,
    /// The index visit.
    pub index_visit_id: String,
    /// Anchor date from the index encounter.
    pub anchor: NaiveDate,
    /// Outcomes in declared visit order.
    pub outcomes: Vec<VisitOutcome>,
    /// Execution statistics.
    pub stats: ResolutionStats,
}

impl SubjectResolution {
    /// Gets the outcome of a visit.
    pub fn get(&self, visit_id: &str) -> Option<&VisitOutcome> {
        self.outcomes.iter().find(|o| o.visit_id == visit_id)
    }

    /// Returns the tier of a visit (`None` if unknown or skipped).
    pub fn tier(&self, visit_id: &str) -> Option<MatchTier> {
        self.get(visit_id).and_then(|o| o.tier)
    }

    /// Tier totals for this subject.
    pub fn summary(&self) -> TierSummary {
        TierSummary::from_outcomes(&self.outcomes)
    }

    /// Iterates outcomes in declared visit order.
    pub fn iter(&self) -> impl Iterator<Item = &VisitOutcome> {
        self.outcomes.iter()
    }

    /// Consumes the resolution into a map keyed by visit.
    pub fn into_map(self) -> HashMap<String, VisitOutcome> {
        self.outcomes
            .into_iter()
            .map(|o| (o.visit_id.clone(), o))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn outcome(visit_id: &str, window: EvidenceWindow, count: u64) -> VisitOutcome {
        let mut counts = BTreeMap::new();
        counts.insert(ResourceKind::Observation, count);
        VisitOutcome {
            visit_id: visit_id.to_string(),
            ordinal: 0,
            is_index: false,
            tier: MatchTier::classify(&window, count),
            window,
            counts,
            encounter_id: None,
        }
    }

    #[test]
    fn test_classify_exact() {
        let window = EvidenceWindow::from_encounter(date(2024, 1, 17));
        assert_eq!(MatchTier::classify(&window, 2), Some(MatchTier::Green));
        assert_eq!(MatchTier::classify(&window, 0), Some(MatchTier::Red));
    }

    #[test]
    fn test_classify_range() {
        let window = EvidenceWindow::Range {
            lower: Some(date(2024, 1, 24)),
            upper: Some(date(2024, 1, 31)),
        };
        assert_eq!(MatchTier::classify(&window, 1), Some(MatchTier::Orange));
        assert_eq!(MatchTier::classify(&window, 0), Some(MatchTier::Red));
    }

    #[test]
    fn test_classify_unconstrained_and_skipped() {
        assert_eq!(
            MatchTier::classify(&EvidenceWindow::Unconstrained, 0),
            Some(MatchTier::Red)
        );
        assert_eq!(MatchTier::classify(&EvidenceWindow::Skipped, 0), None);
    }

    #[test]
    fn test_outcome_description() {
        let o = outcome("V2", EvidenceWindow::from_encounter(date(2024, 1, 17)), 3);
        assert_eq!(o.datequery_description(), "date=2024-01-17");
        assert_eq!(o.corroborating_total(), 3);
        assert!(!o.skipped());
    }

    #[test]
    fn test_tier_summary() {
        let outcomes = vec![
            outcome("V1", EvidenceWindow::from_encounter(date(2024, 1, 10)), 1),
            outcome(
                "V2",
                EvidenceWindow::Range {
                    lower: Some(date(2024, 1, 24)),
                    upper: None,
                },
                1,
            ),
            outcome("V3", EvidenceWindow::Unconstrained, 0),
            outcome("V4", EvidenceWindow::Skipped, 0),
        ];
        let summary = TierSummary::from_outcomes(&outcomes);
        assert_eq!(
            summary,
            TierSummary {
                green: 1,
                orange: 1,
                red: 1,
                skipped: 1
            }
        );
        assert_eq!(summary.total(), 4);
        assert_eq!(summary.to_string(), "green=1 orange=1 red=1 skipped=1");
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(MatchTier::Green.to_string(), "GREEN");
        assert_eq!(MatchTier::Orange.to_string(), "ORANGE");
        assert_eq!(MatchTier::Red.to_string(), "RED");
    }
}
