//! Concept-level grouping of incidences.
//!
//! Groups are keyed by `(concept_type, concept_label)`. A backend aggregate
//! record supplies the group summary verbatim; without one the summary is
//! synthesized from the individual children. When both exist, both numbers
//! are kept: they come from independent computations and are not reconciled.

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::model::{ComparisonKind, Incidence};
use crate::error::{CloseError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    /// Classifies by absolute variation: ≥75 critical, ≥50 high, ≥30 medium.
    pub fn from_delta(delta_pct: Decimal) -> Self {
        let abs = delta_pct.abs();
        if abs >= Decimal::from(75) {
            Priority::Critical
        } else if abs >= Decimal::from(50) {
            Priority::High
        } else if abs >= Decimal::from(30) {
            Priority::Medium
        } else {
            Priority::Low
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// Percentage variation from `prior` to `current`.
///
/// A zero prior yields 100 when the current amount grew and 0 otherwise.
/// Amounts too large for `Decimal` arithmetic are a validation error.
pub fn variation_pct(prior: Decimal, current: Decimal) -> Result<Decimal> {
    if prior.is_zero() {
        return Ok(if current > Decimal::ZERO {
            Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        });
    }
    current
        .checked_sub(prior)
        .and_then(|diff| diff.checked_mul(Decimal::ONE_HUNDRED))
        .and_then(|scaled| scaled.checked_div(prior.abs()))
        .ok_or_else(|| out_of_range(&format!("variation from {prior} to {current}")))
}

fn out_of_range(what: &str) -> CloseError {
    CloseError::Validation(format!("{what} is out of range"))
}

fn checked_total(mut amounts: impl Iterator<Item = Decimal>, what: &str) -> Result<Decimal> {
    amounts
        .try_fold(Decimal::ZERO, |acc, amount| acc.checked_add(amount))
        .ok_or_else(|| out_of_range(what))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub concept_type: String,
    pub concept_label: String,
}

impl GroupKey {
    pub fn of(incidence: &Incidence) -> Self {
        Self {
            concept_type: incidence.concept_type.clone(),
            concept_label: incidence.concept_label.clone(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.concept_type, self.concept_label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarySource {
    Backend,
    Synthesized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub prior: Decimal,
    pub current: Decimal,
    pub delta_pct: Decimal,
    pub source: SummarySource,
}

impl GroupSummary {
    fn from_aggregate(incidence: &Incidence) -> Result<Self> {
        Ok(Self {
            prior: incidence.prior_amount,
            current: incidence.current_amount,
            delta_pct: incidence.variation_pct()?,
            source: SummarySource::Backend,
        })
    }

    fn synthesize(key: &GroupKey, children: &[Incidence]) -> Result<Self> {
        let prior = checked_total(
            children.iter().map(|c| c.prior_amount),
            &format!("prior total of {key}"),
        )?;
        let current = checked_total(
            children.iter().map(|c| c.current_amount),
            &format!("current total of {key}"),
        )?;
        Ok(Self {
            prior,
            current,
            delta_pct: variation_pct(prior, current)?,
            source: SummarySource::Synthesized,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidenceGroup {
    pub key: GroupKey,
    /// The summary shown for the group.
    pub summary: GroupSummary,
    /// Sum of the children, also present when `summary` came from the backend.
    pub synthesized: Option<GroupSummary>,
    pub priority: Priority,
    pub aggregate: Option<Incidence>,
    /// Per-employee drill-down, sorted by incidence id.
    pub children: Vec<Incidence>,
}

impl IncidenceGroup {
    pub fn resolved_children(&self) -> usize {
        self.children
            .iter()
            .filter(|c| c.state().is_resolved())
            .count()
    }

    /// Backend aggregate and children sums both exist and disagree on the variation.
    pub fn has_divergent_sources(&self) -> bool {
        match (&self.synthesized, self.summary.source) {
            (Some(synth), SummarySource::Backend) => synth.delta_pct != self.summary.delta_pct,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PriorityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl PriorityCounts {
    fn add(&mut self, priority: Priority) {
        match priority {
            Priority::Critical => self.critical += 1,
            Priority::High => self.high += 1,
            Priority::Medium => self.medium += 1,
            Priority::Low => self.low += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }
}

/// Caller-selected presentation order for groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GroupOrder {
    #[default]
    Key,
    DeltaDesc,
    PriorityDesc,
    CurrentDesc,
}

#[derive(Debug, Clone, Default)]
pub struct AggregatedView {
    pub groups: BTreeMap<GroupKey, IncidenceGroup>,
    /// Legacy records, ungrouped and sorted by id.
    pub legacy: Vec<Incidence>,
    /// No-action notices, excluded from every number above.
    pub informational: Vec<Incidence>,
    pub priority_counts: PriorityCounts,
}

impl AggregatedView {
    pub fn group(&self, key: &GroupKey) -> Option<&IncidenceGroup> {
        self.groups.get(key)
    }

    /// Groups in the requested order; ties fall back to key order.
    pub fn sorted(&self, order: GroupOrder) -> Vec<&IncidenceGroup> {
        let mut groups: Vec<&IncidenceGroup> = self.groups.values().collect();
        match order {
            GroupOrder::Key => {}
            GroupOrder::DeltaDesc => {
                groups.sort_by(|a, b| b.summary.delta_pct.abs().cmp(&a.summary.delta_pct.abs()))
            }
            GroupOrder::PriorityDesc => groups.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then_with(|| b.summary.delta_pct.abs().cmp(&a.summary.delta_pct.abs()))
            }),
            GroupOrder::CurrentDesc => {
                groups.sort_by(|a, b| b.summary.current.cmp(&a.summary.current))
            }
        }
        groups
    }
}

/// Groups `incidences` by concept. The result does not depend on input order.
pub fn group_incidences(incidences: &[Incidence]) -> Result<AggregatedView> {
    let mut sorted: Vec<&Incidence> = incidences.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut view = AggregatedView::default();
    let mut buckets: BTreeMap<GroupKey, (Option<Incidence>, Vec<Incidence>)> = BTreeMap::new();

    for incidence in sorted {
        if incidence.informational {
            view.informational.push(incidence.clone());
            continue;
        }
        match incidence.kind {
            ComparisonKind::Legacy => view.legacy.push(incidence.clone()),
            ComparisonKind::Individual => {
                buckets
                    .entry(GroupKey::of(incidence))
                    .or_default()
                    .1
                    .push(incidence.clone());
            }
            ComparisonKind::Aggregate => {
                let key = GroupKey::of(incidence);
                let slot = &mut buckets.entry(key.clone()).or_default().0;
                // Ids are visited in ascending order, so the first one wins.
                if let Some(kept) = slot.as_ref() {
                    warn!(
                        group = %key,
                        kept = %kept.id,
                        ignored = %incidence.id,
                        "duplicate aggregate incidence"
                    );
                } else {
                    *slot = Some(incidence.clone());
                }
            }
        }
    }

    for (key, (aggregate, children)) in buckets {
        let synthesized = if children.is_empty() {
            None
        } else {
            Some(GroupSummary::synthesize(&key, &children)?)
        };
        let summary = match (&aggregate, &synthesized) {
            (Some(agg), _) => GroupSummary::from_aggregate(agg)?,
            (None, Some(synth)) => synth.clone(),
            (None, None) => continue,
        };
        let priority = Priority::from_delta(summary.delta_pct);
        view.priority_counts.add(priority);
        view.groups.insert(
            key.clone(),
            IncidenceGroup {
                key,
                summary,
                synthesized,
                priority,
                aggregate,
                children,
            },
        );
    }

    Ok(view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn inc(id: &str, kind: ComparisonKind, label: &str, prior: Decimal, current: Decimal) -> Incidence {
        Incidence {
            id: id.into(),
            closing_id: "c-1".into(),
            kind,
            concept_type: "haber".into(),
            concept_label: label.into(),
            employee_id: None,
            prior_amount: prior,
            current_amount: current,
            delta_pct: None,
            informational: false,
            backend_status: None,
            resolutions: Vec::new(),
        }
    }

    fn key(label: &str) -> GroupKey {
        GroupKey {
            concept_type: "haber".into(),
            concept_label: label.into(),
        }
    }

    #[test]
    fn priority_boundaries() {
        assert_eq!(Priority::from_delta(dec!(75)), Priority::Critical);
        assert_eq!(Priority::from_delta(dec!(50)), Priority::High);
        assert_eq!(Priority::from_delta(dec!(30)), Priority::Medium);
        assert_eq!(Priority::from_delta(dec!(29.999)), Priority::Low);
        assert_eq!(Priority::from_delta(dec!(-80)), Priority::Critical);
    }

    #[test]
    fn variation_with_zero_prior() {
        assert_eq!(variation_pct(dec!(0), dec!(500)).unwrap(), dec!(100));
        assert_eq!(variation_pct(dec!(0), dec!(0)).unwrap(), dec!(0));
        assert_eq!(variation_pct(dec!(0), dec!(-10)).unwrap(), dec!(0));
        assert_eq!(variation_pct(dec!(-200), dec!(-100)).unwrap(), dec!(50));
    }

    #[test]
    fn aggregate_record_summarizes_group() {
        let view = group_incidences(&[inc(
            "a-1",
            ComparisonKind::Aggregate,
            "Sueldo base",
            dec!(100000),
            dec!(130000),
        )])
        .unwrap();
        let group = view.group(&key("Sueldo base")).unwrap();
        assert_eq!(group.summary.delta_pct, dec!(30));
        assert_eq!(group.summary.source, SummarySource::Backend);
        assert_eq!(group.priority, Priority::Medium);
        assert!(group.children.is_empty());
        assert!(group.synthesized.is_none());
    }

    #[test]
    fn synthesized_summary_from_children() {
        let view = group_incidences(&[
            inc("i-1", ComparisonKind::Individual, "Bono", dec!(1000), dec!(1500)),
            inc("i-2", ComparisonKind::Individual, "Bono", dec!(1000), dec!(1700)),
        ])
        .unwrap();
        let group = view.group(&key("Bono")).unwrap();
        assert_eq!(group.summary.prior, dec!(2000));
        assert_eq!(group.summary.current, dec!(3200));
        assert_eq!(group.summary.delta_pct, dec!(60));
        assert_eq!(group.summary.source, SummarySource::Synthesized);
        assert_eq!(group.priority, Priority::High);
        assert_eq!(group.children.len(), 2);
    }

    #[test]
    fn backend_aggregate_wins_but_both_sources_are_kept() {
        let mut agg = inc("a-1", ComparisonKind::Aggregate, "Bono", dec!(2000), dec!(2100));
        agg.delta_pct = Some(dec!(5));
        let view = group_incidences(&[
            agg,
            inc("i-1", ComparisonKind::Individual, "Bono", dec!(1000), dec!(1500)),
        ])
        .unwrap();
        let group = view.group(&key("Bono")).unwrap();
        assert_eq!(group.summary.delta_pct, dec!(5));
        assert_eq!(group.priority, Priority::Low);
        assert_eq!(group.synthesized.as_ref().unwrap().delta_pct, dec!(50));
        assert!(group.has_divergent_sources());
        assert_eq!(group.children.len(), 1);
    }

    #[test]
    fn legacy_and_informational_are_kept_apart() {
        let mut notice = inc("n-1", ComparisonKind::Individual, "Bono", dec!(0), dec!(900000));
        notice.informational = true;
        let view = group_incidences(&[
            inc("l-1", ComparisonKind::Legacy, "Bono", dec!(10), dec!(90)),
            notice,
            inc("i-1", ComparisonKind::Individual, "Bono", dec!(1000), dec!(1100)),
        ])
        .unwrap();

        assert_eq!(view.legacy.len(), 1);
        assert_eq!(view.informational.len(), 1);
        let group = view.group(&key("Bono")).unwrap();
        assert_eq!(group.children.len(), 1);
        assert_eq!(group.summary.current, dec!(1100));
        assert_eq!(view.priority_counts.total(), 1);
        assert_eq!(view.priority_counts.low, 1);
    }

    #[test]
    fn grouping_is_order_independent() {
        let records = vec![
            inc("i-3", ComparisonKind::Individual, "Bono", dec!(333.33), dec!(400.01)),
            inc("a-1", ComparisonKind::Aggregate, "Sueldo base", dec!(100000), dec!(180000)),
            inc("i-1", ComparisonKind::Individual, "Bono", dec!(100.10), dec!(50.05)),
            inc("l-1", ComparisonKind::Legacy, "Horas extra", dec!(5), dec!(6)),
            inc("i-2", ComparisonKind::Individual, "Colación", dec!(0), dec!(20)),
            inc("i-4", ComparisonKind::Individual, "Bono", dec!(7.77), dec!(9.99)),
        ];
        let baseline = group_incidences(&records).unwrap();

        let mut reversed = records.clone();
        reversed.reverse();
        let mut rotated = records.clone();
        rotated.rotate_left(2);

        for shuffled in [reversed, rotated] {
            let view = group_incidences(&shuffled).unwrap();
            assert_eq!(view.groups, baseline.groups);
            assert_eq!(view.legacy, baseline.legacy);
            assert_eq!(view.priority_counts, baseline.priority_counts);
        }
    }

    #[test]
    fn duplicate_aggregates_keep_lowest_id() {
        let view = group_incidences(&[
            inc("a-2", ComparisonKind::Aggregate, "Bono", dec!(100), dec!(200)),
            inc("a-1", ComparisonKind::Aggregate, "Bono", dec!(100), dec!(110)),
        ])
        .unwrap();
        let group = view.group(&key("Bono")).unwrap();
        assert_eq!(group.aggregate.as_ref().unwrap().id, "a-1");
        assert_eq!(group.summary.delta_pct, dec!(10));
    }

    #[test]
    fn sorted_orders() {
        let view = group_incidences(&[
            inc("i-1", ComparisonKind::Individual, "A", dec!(100), dec!(110)),
            inc("i-2", ComparisonKind::Individual, "B", dec!(100), dec!(190)),
            inc("i-3", ComparisonKind::Individual, "C", dec!(100), dec!(40)),
        ])
        .unwrap();
        let labels = |order| {
            view.sorted(order)
                .iter()
                .map(|g| g.key.concept_label.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(labels(GroupOrder::Key), ["A", "B", "C"]);
        assert_eq!(labels(GroupOrder::DeltaDesc), ["B", "C", "A"]);
        assert_eq!(labels(GroupOrder::PriorityDesc), ["B", "C", "A"]);
        assert_eq!(labels(GroupOrder::CurrentDesc), ["B", "A", "C"]);
    }

    #[test]
    fn amounts_beyond_decimal_range_are_rejected() {
        let err = group_incidences(&[
            inc("i-1", ComparisonKind::Individual, "Bono", dec!(1), Decimal::MAX),
            inc("i-2", ComparisonKind::Individual, "Bono", dec!(1), Decimal::MAX),
        ])
        .unwrap_err();
        assert!(matches!(err, CloseError::Validation(ref m) if m.contains("current total")));

        assert!(matches!(
            variation_pct(dec!(-1), Decimal::MAX),
            Err(CloseError::Validation(_))
        ));
    }
}
