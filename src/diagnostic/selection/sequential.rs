use std::collections::BTreeMap;

use crate::diagnostic::catalog::Candidate;
use crate::diagnostic::types::SkillMastery;

use super::{eligible, SelectionConstraints, Selector};

/// Fixed-form delivery for non-adaptive sessions: first eligible item in catalog order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialSelector;

impl Selector for SequentialSelector {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn select_next<'a>(
        &self,
        candidates: &[Candidate<'a>],
        _mastery: &BTreeMap<String, SkillMastery>,
        constraints: &SelectionConstraints,
    ) -> Option<Candidate<'a>> {
        eligible(candidates, constraints)
            .into_iter()
            .min_by_key(|c| c.order)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_catalog_order_ignores_exposure() {
        let items = vec![item("a", &["s"], 3.0, 9000), item("b", &["s"], 0.0, 1000)];
        let cands = candidates(&items, &[10, 0]);
        let mastery = mastery_map(&[("s", 0.5)]);
        let mut cons = constraints();
        let chosen = SequentialSelector.select_next(&cands, &mastery, &cons).unwrap();
        assert_eq!(chosen.item.id, "a");

        cons.excluded_items.insert("a".into());
        let chosen = SequentialSelector.select_next(&cands, &mastery, &cons).unwrap();
        assert_eq!(chosen.item.id, "b");
    }
}
