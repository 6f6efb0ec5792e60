//! Item selection strategies.
//!
//! Every strategy is deterministic: identical candidates, mastery state and
//! constraints yield the same item. Selectors only read exposure counters;
//! recording an exposure is the caller's job.

pub mod information;
pub mod irt;
pub mod rule_tree;
pub mod sequential;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::diagnostic::catalog::Candidate;
use crate::diagnostic::config::{DiagnosticConfig, MasteryThresholds, SelectionStrategy};
use crate::diagnostic::mastery::is_uncertain;
use crate::diagnostic::types::SkillMastery;

pub use information::InformationSelector;
pub use rule_tree::RuleTreeSelector;
pub use sequential::SequentialSelector;

#[derive(Debug, Clone)]
pub struct SelectionConstraints {
    /// When non-empty, only items touching at least one of these skills qualify.
    pub target_skills: BTreeSet<String>,
    /// Items already presented in this session.
    pub excluded_items: HashSet<String>,
    pub max_exposure: Option<u64>,
    pub thresholds: MasteryThresholds,
    pub off_focus_weight: f64,
    pub tie_epsilon: f64,
}

impl SelectionConstraints {
    pub fn from_config(config: &DiagnosticConfig) -> Self {
        Self {
            target_skills: BTreeSet::new(),
            excluded_items: HashSet::new(),
            max_exposure: config.selection.max_item_exposure,
            thresholds: config.thresholds,
            off_focus_weight: config.selection.off_focus_weight,
            tie_epsilon: config.selection.tie_epsilon,
        }
    }
}

pub trait Selector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Best candidate under the constraints, or `None` when nothing qualifies.
    fn select_next<'a>(
        &self,
        candidates: &[Candidate<'a>],
        mastery: &BTreeMap<String, SkillMastery>,
        constraints: &SelectionConstraints,
    ) -> Option<Candidate<'a>>;
}

pub fn selector_for(strategy: SelectionStrategy, adaptive: bool) -> Box<dyn Selector> {
    if !adaptive {
        return Box::new(SequentialSelector);
    }
    match strategy {
        SelectionStrategy::Information => Box::new(InformationSelector),
        SelectionStrategy::RuleTree => Box::new(RuleTreeSelector),
    }
}

/// Candidates that survive repetition, exposure and targeting rules, in input order.
pub fn eligible<'a>(
    candidates: &[Candidate<'a>],
    constraints: &SelectionConstraints,
) -> Vec<Candidate<'a>> {
    candidates
        .iter()
        .filter(|c| !constraints.excluded_items.contains(&c.item.id))
        .filter(|c| constraints.max_exposure.map_or(true, |cap| c.exposure < cap))
        .filter(|c| {
            constraints.target_skills.is_empty()
                || c.item
                    .skill_ids
                    .iter()
                    .any(|s| constraints.target_skills.contains(s))
        })
        .copied()
        .collect()
}

/// Skills eligible to be the focus, lowest mastery first, ties by skill id.
///
/// Restricted to target skills when set. Uncertain skills rank ahead of
/// settled ones.
pub fn focus_order<'m>(
    mastery: &'m BTreeMap<String, SkillMastery>,
    constraints: &SelectionConstraints,
) -> Vec<&'m SkillMastery> {
    let mut skills: Vec<&SkillMastery> = mastery
        .values()
        .filter(|m| {
            constraints.target_skills.is_empty() || constraints.target_skills.contains(&m.skill_id)
        })
        .collect();
    skills.sort_by(|a, b| {
        let a_settled = !is_uncertain(a.probability, &constraints.thresholds);
        let b_settled = !is_uncertain(b.probability, &constraints.thresholds);
        a_settled
            .cmp(&b_settled)
            .then_with(|| {
                a.probability
                    .partial_cmp(&b.probability)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.skill_id.cmp(&b.skill_id))
    });
    skills
}

/// Weakest-estimated uncertain skill, or weakest overall when none is uncertain.
pub fn focus_skill<'m>(
    mastery: &'m BTreeMap<String, SkillMastery>,
    constraints: &SelectionConstraints,
) -> Option<&'m SkillMastery> {
    focus_order(mastery, constraints).into_iter().next()
}

/// Tie-break: fewer exposures, then shorter average response time, then catalog order.
pub fn tie_break(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    a.exposure
        .cmp(&b.exposure)
        .then_with(|| a.item.avg_response_time_ms.cmp(&b.item.avg_response_time_ms))
        .then_with(|| a.order.cmp(&b.order))
}

/// Highest-scoring candidate; scores within `epsilon` are resolved by [`tie_break`].
pub fn pick_best<'a>(
    scored: impl IntoIterator<Item = (Candidate<'a>, f64)>,
    epsilon: f64,
) -> Option<Candidate<'a>> {
    let mut best: Option<(Candidate<'a>, f64)> = None;
    for (candidate, score) in scored {
        best = match best {
            None => Some((candidate, score)),
            Some((current, current_score)) => {
                if score > current_score + epsilon {
                    Some((candidate, score))
                } else if (score - current_score).abs() <= epsilon
                    && tie_break(&candidate, &current) == Ordering::Less
                {
                    Some((candidate, score))
                } else {
                    Some((current, current_score))
                }
            }
        };
    }
    best.map(|(c, _)| c)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::diagnostic::types::{AnswerKey, BktParams, IrtParams, Item};

    pub fn item(id: &str, skills: &[&str], b: f64, rt_ms: u64) -> Item {
        Item {
            id: id.to_string(),
            skill_ids: skills.iter().map(|s| s.to_string()).collect(),
            irt: IrtParams {
                discrimination: 1.0,
                difficulty: b,
                guessing: 0.0,
            },
            answer: AnswerKey::Numeric {
                value: 1.0,
                tolerance: 0.0,
            },
            avg_response_time_ms: rt_ms,
            error_signatures: vec![],
        }
    }

    pub fn candidates<'a>(items: &'a [Item], exposures: &[u64]) -> Vec<Candidate<'a>> {
        items
            .iter()
            .enumerate()
            .map(|(order, item)| Candidate {
                item,
                exposure: exposures.get(order).copied().unwrap_or(0),
                order,
            })
            .collect()
    }

    pub fn mastery_map(entries: &[(&str, f64)]) -> BTreeMap<String, SkillMastery> {
        entries
            .iter()
            .map(|(id, p)| {
                (
                    id.to_string(),
                    SkillMastery {
                        skill_id: id.to_string(),
                        probability: *p,
                        params: BktParams::default(),
                        observations: 0,
                    },
                )
            })
            .collect()
    }

    pub fn constraints() -> SelectionConstraints {
        SelectionConstraints::from_config(&DiagnosticConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_eligible_filters() {
        let items = vec![
            item("a", &["s1"], 0.0, 1000),
            item("b", &["s2"], 0.0, 1000),
            item("c", &["s1", "s2"], 0.0, 1000),
        ];
        let cands = candidates(&items, &[5, 0, 0]);
        let mut cons = constraints();
        cons.max_exposure = Some(5);
        cons.excluded_items.insert("c".to_string());
        let ids: Vec<_> = eligible(&cands, &cons)
            .iter()
            .map(|c| c.item.id.clone())
            .collect();
        assert_eq!(ids, vec!["b"]);

        let mut cons = constraints();
        cons.target_skills.insert("s1".to_string());
        let ids: Vec<_> = eligible(&cands, &cons)
            .iter()
            .map(|c| c.item.id.clone())
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_focus_prefers_uncertain_weakest() {
        let mastery = mastery_map(&[("low", 0.1), ("mid", 0.5), ("midlow", 0.35), ("high", 0.95)]);
        let focus = focus_skill(&mastery, &constraints()).unwrap();
        assert_eq!(focus.skill_id, "midlow");

        let settled = mastery_map(&[("a", 0.9), ("b", 0.2)]);
        let focus = focus_skill(&settled, &constraints()).unwrap();
        assert_eq!(focus.skill_id, "b");
    }

    #[test]
    fn test_tie_break_order() {
        let items = vec![
            item("slow", &["s"], 0.0, 5000),
            item("fast", &["s"], 0.0, 1000),
            item("fast2", &["s"], 0.0, 1000),
        ];
        let cands = candidates(&items, &[0, 0, 0]);
        let best = pick_best(cands.iter().map(|c| (*c, 1.0)), 1e-9).unwrap();
        assert_eq!(best.item.id, "fast");

        let cands = candidates(&items, &[0, 3, 3]);
        let best = pick_best(cands.iter().map(|c| (*c, 1.0)), 1e-9).unwrap();
        assert_eq!(best.item.id, "slow");
    }

    #[test]
    fn test_non_adaptive_uses_sequential() {
        assert_eq!(
            selector_for(SelectionStrategy::Information, false).name(),
            "sequential"
        );
        assert_eq!(
            selector_for(SelectionStrategy::RuleTree, true).name(),
            "rule_tree"
        );
    }
}
