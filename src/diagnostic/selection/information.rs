use std::collections::BTreeMap;

use crate::diagnostic::catalog::Candidate;
use crate::diagnostic::types::SkillMastery;

use super::irt::{ability_from_mastery, fisher_information};
use super::{eligible, focus_skill, pick_best, SelectionConstraints, Selector};

/// Maximum Fisher information at the mastery-derived ability, weighted toward the focus skill.
#[derive(Debug, Clone, Copy, Default)]
pub struct InformationSelector;

impl InformationSelector {
    pub fn score(
        candidate: &Candidate<'_>,
        mastery: &BTreeMap<String, SkillMastery>,
        focus: Option<&str>,
        off_focus_weight: f64,
    ) -> f64 {
        candidate
            .item
            .skill_ids
            .iter()
            .filter_map(|skill_id| mastery.get(skill_id))
            .map(|m| {
                let info = fisher_information(&candidate.item.irt, ability_from_mastery(m.probability));
                if focus == Some(m.skill_id.as_str()) {
                    info
                } else {
                    info * off_focus_weight
                }
            })
            .fold(0.0, f64::max)
    }
}

impl Selector for InformationSelector {
    fn name(&self) -> &'static str {
        "information"
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
        let focus = focus_skill(mastery, constraints).map(|m| m.skill_id.as_str());
        let scored = pool.into_iter().map(|c| {
            let score = Self::score(&c, mastery, focus, constraints.off_focus_weight);
            (c, score)
        });
        pick_best(scored, constraints.tie_epsilon)
    }
}
