//! Visit window arithmetic.
//!
//! Offsets are magnitudes and the relationship supplies the direction. Under
//! `Before` the larger magnitude gives the earlier calendar date, so the high
//! offset becomes the lower bound and the low offset the upper bound. Every
//! produced range keeps `lower <= upper`.

use std::fmt;

use chrono::{Duration, NaiveDate};

use crate::action::Relationship;
use crate::graph::VisitPlan;

/// A calendar predicate used to query for corroborating records.
///
/// All bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DatePredicate {
    /// The record date equals the given date.
    On(NaiveDate),
    /// The record date is on or after the given date.
    OnOrAfter(NaiveDate),
    /// The record date is on or before the given date.
    OnOrBefore(NaiveDate),
    /// The record date lies within the closed interval.
    Between {
        /// Inclusive lower bound.
        low: NaiveDate,
        /// Inclusive upper bound.
        high: NaiveDate,
    },
}

impl DatePredicate {
    /// Returns the inclusive lower bound, if any.
    pub fn lower(&self) -> Option<NaiveDate> {
        match *self {
            DatePredicate::On(date) | DatePredicate::OnOrAfter(date) => Some(date),
            DatePredicate::Between { low, .. } => Some(low),
            DatePredicate::OnOrBefore(_) => None,
        }
    }

    /// Returns the inclusive upper bound, if any.
    pub fn upper(&self) -> Option<NaiveDate> {
        match *self {
            DatePredicate::On(date) | DatePredicate::OnOrBefore(date) => Some(date),
            DatePredicate::Between { high, .. } => Some(high),
            DatePredicate::OnOrAfter(_) => None,
        }
    }

    /// Returns true for the exact-date form.
    pub fn is_exact(&self) -> bool {
        matches!(self, DatePredicate::On(_))
    }

    /// Checks whether a date satisfies the predicate.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.lower().map_or(true, |low| date >= low)
            && self.upper().map_or(true, |high| date <= high)
    }
}

/// Renders the predicate as FHIR search `date` parameters.
impl fmt::Display for DatePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatePredicate::On(date) => write!(f, "date={date}"),
            DatePredicate::OnOrAfter(date) => write!(f, "date=ge{date}"),
            DatePredicate::OnOrBefore(date) => write!(f, "date=le{date}"),
            DatePredicate::Between { low, high } => write!(f, "date=ge{low}&date=le{high}"),
        }
    }
}

/// Where an exact-date window came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExactSource {
    /// The visit's own encounter is a single point in time.
    Encounter,
    /// The visit is the index; its date is the anchor.
    Anchor,
}

/// The expected calendar window of one visit for one subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EvidenceWindow {
    /// A single expected date.
    Exact {
        /// The expected date.
        date: NaiveDate,
        /// Origin of the date.
        source: ExactSource,
    },
    /// A predicted range. At least one bound is present.
    Range {
        /// Inclusive lower bound.
        lower: Option<NaiveDate>,
        /// Inclusive upper bound.
        upper: Option<NaiveDate>,
    },
    /// The plan carries no offsets, so nothing constrains the visit date.
    Unconstrained,
    /// The visit's own encounter could not be located.
    Skipped,
}

impl EvidenceWindow {
    /// Creates an exact window from a point-in-time encounter.
    pub fn from_encounter(date: NaiveDate) -> Self {
        EvidenceWindow::Exact {
            date,
            source: ExactSource::Encounter,
        }
    }

    /// Returns the query predicate, or `None` for unconstrained and skipped windows.
    pub fn predicate(&self) -> Option<DatePredicate> {
        match *self {
            EvidenceWindow::Exact { date, .. } => Some(DatePredicate::On(date)),
            EvidenceWindow::Range {
                lower: Some(low),
                upper: Some(high),
            } => Some(DatePredicate::Between { low, high }),
            EvidenceWindow::Range {
                lower: Some(low),
                upper: None,
            } => Some(DatePredicate::OnOrAfter(low)),
            EvidenceWindow::Range {
                lower: None,
                upper: Some(high),
            } => Some(DatePredicate::OnOrBefore(high)),
            EvidenceWindow::Range {
                lower: None,
                upper: None,
            }
            | EvidenceWindow::Unconstrained
            | EvidenceWindow::Skipped => None,
        }
    }

    /// Returns the inclusive lower bound, if any.
    pub fn lower(&self) -> Option<NaiveDate> {
        self.predicate().and_then(|p| p.lower())
    }

    /// Returns the inclusive upper bound, if any.
    pub fn upper(&self) -> Option<NaiveDate> {
        self.predicate().and_then(|p| p.upper())
    }

    /// Returns true for exact-date windows.
    pub fn is_exact(&self) -> bool {
        matches!(self, EvidenceWindow::Exact { .. })
    }

    /// Returns true if the visit was skipped.
    pub fn is_skipped(&self) -> bool {
        matches!(self, EvidenceWindow::Skipped)
    }

    /// Returns true if nothing constrains the visit date.
    pub fn is_unconstrained(&self) -> bool {
        matches!(
            self,
            EvidenceWindow::Unconstrained
                | EvidenceWindow::Range {
                    lower: None,
                    upper: None
                }
        )
    }
}

impl fmt::Display for EvidenceWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self, self.predicate()) {
            (_, Some(predicate)) => write!(f, "{predicate}"),
            (EvidenceWindow::Skipped, None) => write!(f, "skipped"),
            (_, None) => write!(f, "unconstrained"),
        }
    }
}

/// Computes the expected window of a visit relative to the anchor date.
///
/// Offset magnitudes are read as days; unit validation happens when the
/// protocol graph is built.
pub fn compute_window(anchor: NaiveDate, plan: &VisitPlan) -> EvidenceWindow {
    if plan.is_index {
        return EvidenceWindow::Exact {
            date: anchor,
            source: ExactSource::Anchor,
        };
    }
    let Some(relationship) = plan.relationship else {
        return EvidenceWindow::Unconstrained;
    };

    let low = plan.offset_low.as_ref().map(|o| o.value);
    let high = plan.offset_high.as_ref().map(|o| o.value);

    let (lower, upper) = match relationship {
        Relationship::After => (
            low.map(|days| shift(anchor, days)),
            high.map(|days| shift(anchor, days)),
        ),
        Relationship::Before => (
            high.map(|days| shift_back(anchor, days)),
            low.map(|days| shift_back(anchor, days)),
        ),
    };

    if lower.is_none() && upper.is_none() {
        return EvidenceWindow::Unconstrained;
    }
    EvidenceWindow::Range { lower, upper }
}

/// Moves a date back by a number of days, saturating at the calendar limits.
fn shift_back(anchor: NaiveDate, days: i64) -> NaiveDate {
    shift(anchor, days.checked_neg().unwrap_or(i64::MAX))
}

/// Moves a date by a number of days, saturating at the calendar limits.
fn shift(anchor: NaiveDate, days: i64) -> NaiveDate {
    Duration::try_days(days)
        .and_then(|delta| anchor.checked_add_signed(delta))
        .unwrap_or(if days < 0 {
            NaiveDate::MIN
        } else {
            NaiveDate::MAX
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn anchor() -> NaiveDate {
        date(2024, 1, 10)
    }

    #[test]
    fn test_index_is_exact_anchor() {
        let window = compute_window(anchor(), &VisitPlan::index("V1", 0));
        assert_eq!(
            window,
            EvidenceWindow::Exact {
                date: anchor(),
                source: ExactSource::Anchor
            }
        );
        assert_eq!(window.predicate(), Some(DatePredicate::On(anchor())));
    }

    #[test]
    fn test_after_window() {
        let plan = VisitPlan::related("V2", 1, "V1", Relationship::After, Some(14), Some(21));
        let window = compute_window(anchor(), &plan);

        assert_eq!(window.lower(), Some(date(2024, 1, 24)));
        assert_eq!(window.upper(), Some(date(2024, 1, 31)));
        assert_eq!(window.to_string(), "date=ge2024-01-24&date=le2024-01-31");
    }

    #[test]
    fn test_before_window_crosses_bounds() {
        let plan = VisitPlan::related("V0", 0, "V1", Relationship::Before, Some(7), Some(14));
        let window = compute_window(anchor(), &plan);

        // high -> lower bound, low -> upper bound
        assert_eq!(window.lower(), Some(date(2023, 12, 27)));
        assert_eq!(window.upper(), Some(date(2024, 1, 3)));
        assert!(window.lower() <= window.upper());
    }

    #[test]
    fn test_bounds_ordered_for_both_directions() {
        for relationship in [Relationship::Before, Relationship::After] {
            for (low, high) in [(0, 0), (1, 3), (7, 7), (14, 60), (0, 365)] {
                let plan = VisitPlan::related("V", 1, "I", relationship, Some(low), Some(high));
                let window = compute_window(anchor(), &plan);
                let (lower, upper) = (window.lower().unwrap(), window.upper().unwrap());
                assert!(lower <= upper, "{relationship} {low}..{high}");
            }
        }
    }

    #[test]
    fn test_open_ended_windows() {
        let after = VisitPlan::related("V", 1, "I", Relationship::After, Some(28), None);
        let window = compute_window(anchor(), &after);
        assert_eq!(window.predicate(), Some(DatePredicate::OnOrAfter(date(2024, 2, 7))));
        assert_eq!(window.to_string(), "date=ge2024-02-07");

        let before = VisitPlan::related("V", 1, "I", Relationship::Before, Some(3), None);
        let window = compute_window(anchor(), &before);
        assert_eq!(window.predicate(), Some(DatePredicate::OnOrBefore(date(2024, 1, 7))));
        assert_eq!(window.to_string(), "date=le2024-01-07");

        let high_only = VisitPlan::related("V", 1, "I", Relationship::Before, None, Some(3));
        let window = compute_window(anchor(), &high_only);
        assert_eq!(window.predicate(), Some(DatePredicate::OnOrAfter(date(2024, 1, 7))));
    }

    #[test]
    fn test_no_offsets_is_flagged_unconstrained() {
        let plan = VisitPlan::related("V", 1, "I", Relationship::After, None, None);
        let window = compute_window(anchor(), &plan);
        assert!(window.is_unconstrained());
        assert!(window.predicate().is_none());
        assert_eq!(window.to_string(), "unconstrained");

        let unrelated = VisitPlan::new("V", 1);
        assert_eq!(compute_window(anchor(), &unrelated), EvidenceWindow::Unconstrained);
    }

    #[test]
    fn test_shift_saturates() {
        assert_eq!(shift(anchor(), i64::MAX), NaiveDate::MAX);
        assert_eq!(shift(anchor(), i64::MIN + 1), NaiveDate::MIN);
        assert_eq!(shift(anchor(), i64::MIN), NaiveDate::MIN);
        assert_eq!(shift_back(anchor(), i64::MAX), NaiveDate::MIN);
        assert_eq!(shift_back(anchor(), i64::MIN), NaiveDate::MAX);
    }

    #[test]
    fn test_extreme_before_offsets_saturate() {
        let plan = VisitPlan::related("V2", 1, "V1", Relationship::Before, Some(i64::MIN), None);
        assert_eq!(
            compute_window(anchor(), &plan),
            EvidenceWindow::Range {
                lower: None,
                upper: Some(NaiveDate::MAX),
            }
        );

        let plan = VisitPlan::related("V2", 1, "V1", Relationship::Before, Some(7), Some(i64::MAX));
        assert_eq!(
            compute_window(anchor(), &plan),
            EvidenceWindow::Range {
                lower: Some(NaiveDate::MIN),
                upper: Some(date(2024, 1, 3)),
            }
        );
    }

    #[test]
    fn test_predicate_contains() {
        let between = DatePredicate::Between {
            low: date(2024, 1, 24),
            high: date(2024, 1, 31),
        };
        assert!(between.contains(date(2024, 1, 24)));
        assert!(between.contains(date(2024, 1, 31)));
        assert!(!between.contains(date(2024, 2, 1)));

        assert!(DatePredicate::On(anchor()).contains(anchor()));
        assert!(!DatePredicate::On(anchor()).contains(date(2024, 1, 11)));
        assert!(DatePredicate::OnOrBefore(anchor()).contains(date(1999, 1, 1)));
        assert!(!DatePredicate::OnOrAfter(anchor()).contains(date(2024, 1, 9)));
    }

    #[test]
    fn test_skipped_window() {
        let window = EvidenceWindow::Skipped;
        assert!(window.is_skipped());
        assert!(window.predicate().is_none());
        assert_eq!(window.to_string(), "skipped");
    }
}
