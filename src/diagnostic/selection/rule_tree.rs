use std::collections::BTreeMap;

use crate::diagnostic::catalog::Candidate;
use crate::diagnostic::mastery::classify;
use crate::diagnostic::types::{MasteryBand, SkillMastery};

use super::irt::ability_from_mastery;
use super::{eligible, focus_order, pick_best, SelectionConstraints, Selector};

/// Deterministic branching over mastery bands.
///
/// Walks skills weakest-first and, for the first skill with an eligible item:
/// - low mastery: easiest item, to confirm the gap;
/// - high mastery: hardest item, to confirm the strength;
/// - uncertain: item whose difficulty sits closest to the current ability.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleTreeSelector;

impl Selector for RuleTreeSelector {
    fn name(&self) -> &'static str {
        "rule_tree"
    }

    fn select_next<'a>(
        &self,
        candidates: &[Candidate<'a>],
        mastery: &BTreeMap<String, SkillMastery>,
        constraints: &SelectionConstraints,
    ) -> Option<Candidate<'a>> {
        let pool = eligible(candidates, constraints);
        if pool.is_empty() {
            return None;
        }

        for skill in focus_order(mastery, constraints) {
            let theta = ability_from_mastery(skill.probability);
            let band = classify(skill.probability, &constraints.thresholds);
            let scored = pool
                .iter()
                .filter(|c| c.item.touches(&skill.skill_id))
                .map(|c| {
                    let b = c.item.irt.difficulty;
                    let score = match band {
                        MasteryBand::Low => -b,
                        MasteryBand::High => b,
                        MasteryBand::Uncertain => -(b - theta).abs(),
                    };
                    (*c, score)
                });
            if let Some(chosen) = pick_best(scored, constraints.tie_epsilon) {
                return Some(chosen);
            }
        }

        pick_best(pool.into_iter().map(|c| (c, 0.0)), constraints.tie_epsilon)
    }
}
