//! Read-only skill and item catalogs.
//!
//! Loaded once and validated up front; afterwards the only mutable state is
//! the per-item exposure counter, which is shared across sessions and
//! incremented atomically.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::diagnostic::error::DiagnosticError;
use crate::diagnostic::scoring::CompiledSignature;
use crate::diagnostic::types::{AnswerKey, BktParams, IrtParams, Item, Skill};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate skill id: {0}")]
    DuplicateSkill(String),
    #[error("duplicate item id: {0}")]
    DuplicateItem(String),
    #[error("skill {skill_id} lists unknown prerequisite {prerequisite}")]
    UnknownPrerequisite {
        skill_id: String,
        prerequisite: String,
    },
    #[error("item {item_id} references unknown skill {skill_id}")]
    UnknownSkill { item_id: String, skill_id: String },
    #[error("item {item_id} lists skill {skill_id} more than once")]
    RepeatedSkill { item_id: String, skill_id: String },
    #[error("item {0} probes no skills")]
    ItemWithoutSkills(String),
    #[error("skill {skill_id} has invalid BKT parameters: {reason}")]
    InvalidBkt { skill_id: String, reason: String },
    #[error("item {item_id} has invalid IRT parameters: {reason}")]
    InvalidIrt { item_id: String, reason: String },
    #[error("item {item_id} has an invalid answer key: {reason}")]
    InvalidAnswerKey { item_id: String, reason: String },
    #[error("item {item_id} has an invalid error signature: {reason}")]
    InvalidSignature { item_id: String, reason: String },
}

/// On-disk catalog layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogDocument {
    pub skills: Vec<Skill>,
    pub items: Vec<Item>,
}

#[derive(Debug)]
pub struct SkillCatalog {
    skills: Vec<Skill>,
    index: HashMap<String, usize>,
}

impl SkillCatalog {
    pub fn get_skill(&self, id: &str) -> Result<&Skill, DiagnosticError> {
        self.index
            .get(id)
            .map(|&i| &self.skills[i])
            .ok_or_else(|| DiagnosticError::UnknownSkill(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn skills(&self) -> &[Skill] {
        &self.skills
    }

    /// Skills in catalog order whose domain is listed; every skill when `domains` is empty.
    pub fn in_domains(&self, domains: &[String]) -> Vec<&Skill> {
        self.skills
            .iter()
            .filter(|s| domains.is_empty() || domains.iter().any(|d| d == &s.domain))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

/// Item plus the read-only view of its shared exposure counter.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub item: &'a Item,
    pub exposure: u64,
    /// Position in catalog insertion order.
    pub order: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    /// Items touching at least one of these skills; `None` means no restriction.
    pub skills: Option<BTreeSet<String>>,
}

#[derive(Debug)]
pub struct ItemCatalog {
    items: Vec<Item>,
    index: HashMap<String, usize>,
    exposures: Vec<AtomicU64>,
    signatures: Vec<Vec<CompiledSignature>>,
}

impl ItemCatalog {
    pub fn get(&self, id: &str) -> Option<&Item> {
        self.index.get(id).map(|&i| &self.items[i])
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Candidates in stable catalog order.
    pub fn list_candidates(&self, filter: &CandidateFilter) -> Vec<Candidate<'_>> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| match &filter.skills {
                Some(skills) => item.skill_ids.iter().any(|s| skills.contains(s)),
                None => true,
            })
            .map(|(order, item)| Candidate {
                item,
                exposure: self.exposures[order].load(Ordering::Relaxed),
                order,
            })
            .collect()
    }

    pub fn exposure(&self, id: &str) -> Option<u64> {
        self.index
            .get(id)
            .map(|&i| self.exposures[i].load(Ordering::Relaxed))
    }

    /// Returns the new exposure count.
    pub fn record_exposure(&self, id: &str) -> Option<u64> {
        self.index
            .get(id)
            .map(|&i| self.exposures[i].fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn signatures(&self, id: &str) -> &[CompiledSignature] {
        self.index
            .get(id)
            .map(|&i| self.signatures[i].as_slice())
            .unwrap_or(&[])
    }
}

#[derive(Debug)]
pub struct Catalog {
    pub skills: SkillCatalog,
    pub items: ItemCatalog,
}

impl Catalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, CatalogError> {
        let document: CatalogDocument = serde_json::from_str(raw)?;
        Self::from_document(document)
    }

    pub fn from_document(document: CatalogDocument) -> Result<Self, CatalogError> {
        let CatalogDocument { skills, items } = document;

        let mut skill_index = HashMap::with_capacity(skills.len());
        for (i, skill) in skills.iter().enumerate() {
            if skill_index.insert(skill.id.clone(), i).is_some() {
                return Err(CatalogError::DuplicateSkill(skill.id.clone()));
            }
        }
        for skill in &skills {
            for prerequisite in &skill.prerequisites {
                if !skill_index.contains_key(prerequisite) {
                    return Err(CatalogError::UnknownPrerequisite {
                        skill_id: skill.id.clone(),
                        prerequisite: prerequisite.clone(),
                    });
                }
            }
            if let Some(params) = &skill.bkt {
                validate_bkt(params).map_err(|reason| CatalogError::InvalidBkt {
                    skill_id: skill.id.clone(),
                    reason,
                })?;
            }
        }

        let mut item_index = HashMap::with_capacity(items.len());
        let mut signatures = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            if item_index.insert(item.id.clone(), i).is_some() {
                return Err(CatalogError::DuplicateItem(item.id.clone()));
            }
            if item.skill_ids.is_empty() {
                return Err(CatalogError::ItemWithoutSkills(item.id.clone()));
            }
            let mut seen = HashSet::new();
            for skill_id in &item.skill_ids {
                if !skill_index.contains_key(skill_id) {
                    return Err(CatalogError::UnknownSkill {
                        item_id: item.id.clone(),
                        skill_id: skill_id.clone(),
                    });
                }
                if !seen.insert(skill_id) {
                    return Err(CatalogError::RepeatedSkill {
                        item_id: item.id.clone(),
                        skill_id: skill_id.clone(),
                    });
                }
            }
            validate_irt(&item.irt).map_err(|reason| CatalogError::InvalidIrt {
                item_id: item.id.clone(),
                reason,
            })?;
            validate_answer_key(&item.answer).map_err(|reason| {
                CatalogError::InvalidAnswerKey {
                    item_id: item.id.clone(),
                    reason,
                }
            })?;

            let compiled = item
                .error_signatures
                .iter()
                .map(CompiledSignature::compile)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| CatalogError::InvalidSignature {
                    item_id: item.id.clone(),
                    reason: e.to_string(),
                })?;
            signatures.push(compiled);
        }

        let exposures = items.iter().map(|_| AtomicU64::new(0)).collect();

        tracing::debug!(
            skills = skills.len(),
            items = items.len(),
            "catalog loaded"
        );

        Ok(Self {
            skills: SkillCatalog {
                skills,
                index: skill_index,
            },
            items: ItemCatalog {
                items,
                index: item_index,
                exposures,
                signatures,
            },
        })
    }

    /// BKT parameters configured for a skill, or `default` when the skill has none.
    pub fn bkt_params(&self, skill_id: &str, default: &BktParams) -> Result<BktParams, DiagnosticError> {
        let skill = self.skills.get_skill(skill_id)?;
        Ok(skill.bkt.unwrap_or(*default))
    }
}

pub(crate) fn validate_bkt(params: &BktParams) -> Result<(), String> {
    let unit = |name: &str, v: f64| -> Result<(), String> {
        if (0.0..=1.0).contains(&v) {
            Ok(())
        } else {
            Err(format!("{name}={v} outside [0,1]"))
        }
    };
    unit("prior", params.prior)?;
    unit("learn", params.learn)?;
    if !(0.0..1.0).contains(&params.guess) {
        return Err(format!("guess={} outside [0,1)", params.guess));
    }
    if !(0.0..1.0).contains(&params.slip) {
        return Err(format!("slip={} outside [0,1)", params.slip));
    }
    if params.is_degenerate() {
        return Err(format!(
            "guess {} >= 1 - slip {}",
            params.guess,
            1.0 - params.slip
        ));
    }
    Ok(())
}

fn validate_irt(params: &IrtParams) -> Result<(), String> {
    if !(params.discrimination.is_finite() && params.discrimination > 0.0) {
        return Err(format!(
            "discrimination must be positive, got {}",
            params.discrimination
        ));
    }
    if !params.difficulty.is_finite() {
        return Err("difficulty must be finite".to_string());
    }
    if !(0.0..1.0).contains(&params.guessing) {
        return Err(format!("guessing {} outside [0,1)", params.guessing));
    }
    Ok(())
}

fn validate_answer_key(key: &AnswerKey) -> Result<(), String> {
    match key {
        AnswerKey::MultipleChoice { choices, correct } => {
            if !choices.is_empty() && !choices.iter().any(|c| c == correct) {
                return Err(format!("correct choice {correct} not among choices"));
            }
        }
        AnswerKey::Numeric { value, tolerance } => {
            if !value.is_finite() || !tolerance.is_finite() || *tolerance < 0.0 {
                return Err("numeric key needs finite value and non-negative tolerance".to_string());
            }
        }
        AnswerKey::MultiStep { steps, min_correct } => {
            if steps.is_empty() {
                return Err("multi-step rubric has no steps".to_string());
            }
            if let Some(min) = min_correct {
                if *min == 0 || *min > steps.len() {
                    return Err(format!("min_correct {min} not within 1..={}", steps.len()));
                }
            }
        }
        AnswerKey::FreeText { accepted } => {
            if accepted.is_empty() {
                return Err("free-text key accepts nothing".to_string());
            }
        }
    }
    Ok(())
}
