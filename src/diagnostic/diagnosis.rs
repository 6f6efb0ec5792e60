//! Final diagnosis synthesis from the session's mastery map and detection log.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::diagnostic::catalog::Catalog;
use crate::diagnostic::config::{DiagnosticConfig, LevelCutoffs};
use crate::diagnostic::mastery::classify;
use crate::diagnostic::types::{
    DiagnosticSession, FinalDiagnosis, MasteryBand, MisconceptionSummary, OverallLevel,
    SkillMastery, SkillStrength, SkillWeakness, TerminationReason,
};

pub fn synthesize(
    session: &DiagnosticSession,
    catalog: &Catalog,
    config: &DiagnosticConfig,
    termination: TerminationReason,
    now_ms: i64,
) -> FinalDiagnosis {
    let thresholds = &config.thresholds;
    let params = &config.diagnosis;
    let skills: Vec<&SkillMastery> = session.mastery.values().collect();

    let mean_mastery = if skills.is_empty() {
        0.0
    } else {
        skills.iter().map(|m| m.probability).sum::<f64>() / skills.len() as f64
    };

    let mut strong: Vec<&SkillMastery> = skills
        .iter()
        .copied()
        .filter(|m| classify(m.probability, thresholds) == MasteryBand::High)
        .collect();
    strong.sort_by(|a, b| by_probability(b, a).then_with(|| a.skill_id.cmp(&b.skill_id)));

    let mut weak: Vec<&SkillMastery> = skills
        .iter()
        .copied()
        .filter(|m| classify(m.probability, thresholds) == MasteryBand::Low)
        .collect();
    weak.sort_by(|a, b| by_probability(a, b).then_with(|| a.skill_id.cmp(&b.skill_id)));

    let mut uncertain: Vec<&SkillMastery> = skills
        .iter()
        .copied()
        .filter(|m| classify(m.probability, thresholds) == MasteryBand::Uncertain)
        .collect();
    uncertain.sort_by(|a, b| by_probability(a, b).then_with(|| a.skill_id.cmp(&b.skill_id)));

    let strengths = strong
        .iter()
        .map(|m| SkillStrength {
            skill_id: m.skill_id.clone(),
            confidence: m.probability,
            observations: m.observations,
        })
        .collect();

    let weaknesses = weak
        .iter()
        .map(|m| SkillWeakness {
            skill_id: m.skill_id.clone(),
            confidence: m.probability,
            observations: m.observations,
            remediation: remediation_for(catalog, &m.skill_id),
        })
        .collect();

    let mut misconceptions: Vec<MisconceptionSummary> = session
        .misconceptions_detected
        .iter()
        .map(|d| MisconceptionSummary {
            error_type: d.error_type.clone(),
            description: d.description.clone(),
            frequency: d.frequency,
            example_item_ids: d
                .item_ids
                .iter()
                .take(params.misconception_examples)
                .cloned()
                .collect(),
        })
        .collect();
    misconceptions.sort_by(|a, b| {
        b.frequency
            .cmp(&a.frequency)
            .then_with(|| a.error_type.cmp(&b.error_type))
    });

    let recommended_next_path = if weak.is_empty() {
        uncertain
            .iter()
            .take(params.next_path_length)
            .map(|m| m.skill_id.clone())
            .collect()
    } else {
        prerequisite_order(catalog, &weak, params.next_path_length)
    };

    let estimated_minutes_to_mastery = (weak.len() as u32)
        .saturating_mul(params.minutes_per_weak_skill)
        .saturating_add((uncertain.len() as u32).saturating_mul(params.minutes_per_uncertain_skill));

    FinalDiagnosis {
        overall_level: overall_level(mean_mastery, &params.level_cutoffs),
        mean_mastery,
        strengths,
        weaknesses,
        misconceptions,
        recommended_next_path,
        estimated_minutes_to_mastery,
        termination,
        items_administered: session.responses.len(),
        computed_at: now_ms,
    }
}

pub fn overall_level(mean_mastery: f64, cutoffs: &LevelCutoffs) -> OverallLevel {
    if mean_mastery >= cutoffs.advanced {
        OverallLevel::Advanced
    } else if mean_mastery >= cutoffs.proficient {
        OverallLevel::Proficient
    } else if mean_mastery >= cutoffs.developing {
        OverallLevel::Developing
    } else {
        OverallLevel::Beginner
    }
}

fn by_probability(a: &SkillMastery, b: &SkillMastery) -> Ordering {
    a.probability
        .partial_cmp(&b.probability)
        .unwrap_or(Ordering::Equal)
}

fn remediation_for(catalog: &Catalog, skill_id: &str) -> String {
    match catalog.skills.get_skill(skill_id) {
        Ok(skill) => skill
            .remediation
            .clone()
            .unwrap_or_else(|| format!("Targeted practice on {}", skill.name)),
        Err(_) => format!("Targeted practice on {skill_id}"),
    }
}

/// Weak skills with their weak prerequisites placed first; otherwise weakest first.
fn prerequisite_order(catalog: &Catalog, weak: &[&SkillMastery], limit: usize) -> Vec<String> {
    let rank: HashMap<&str, usize> = weak
        .iter()
        .enumerate()
        .map(|(i, m)| (m.skill_id.as_str(), i))
        .collect();

    fn visit<'a>(
        skill_id: &'a str,
        catalog: &'a Catalog,
        rank: &HashMap<&'a str, usize>,
        visited: &mut HashSet<&'a str>,
        out: &mut Vec<String>,
    ) {
        if !visited.insert(skill_id) {
            return;
        }
        if let Ok(skill) = catalog.skills.get_skill(skill_id) {
            let mut prerequisites: Vec<&str> = skill
                .prerequisites
                .iter()
                .map(String::as_str)
                .filter(|p| rank.contains_key(p))
                .collect();
            prerequisites.sort_by_key(|p| rank.get(p).copied().unwrap_or(usize::MAX));
            for prerequisite in prerequisites {
                visit(prerequisite, catalog, rank, visited, out);
            }
        }
        out.push(skill_id.to_string());
    }

    let mut visited = HashSet::new();
    let mut out = Vec::with_capacity(weak.len());
    for m in weak {
        visit(m.skill_id.as_str(), catalog, &rank, &mut visited, &mut out);
    }
    out.truncate(limit);
    out
}
