use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Bayesian Knowledge Tracing parameters for a single skill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BktParams {
    /// P(L0): probability the skill is already known before any evidence.
    pub prior: f64,
    /// P(T): probability of moving from unknown to known after an opportunity.
    pub learn: f64,
    /// P(G): probability of a correct answer while the skill is unknown.
    pub guess: f64,
    /// P(S): probability of an incorrect answer while the skill is known.
    pub slip: f64,
}

impl BktParams {
    /// A correct answer must be more likely when known than when unknown.
    pub fn is_degenerate(&self) -> bool {
        self.guess >= 1.0 - self.slip
    }
}

impl Default for BktParams {
    fn default() -> Self {
        Self {
            prior: 0.3,
            learn: 0.1,
            guess: 0.2,
            slip: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skill {
    pub id: String,
    pub name: String,
    pub domain: String,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bkt: Option<BktParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

/// 3PL response model parameters: discrimination (a), difficulty (b), guessing floor (c).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IrtParams {
    pub discrimination: f64,
    pub difficulty: f64,
    #[serde(default)]
    pub guessing: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemFormat {
    MultipleChoice,
    Numeric,
    MultiStep,
    FreeText,
}

impl ItemFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MultipleChoice => "multipleChoice",
            Self::Numeric => "numeric",
            Self::MultiStep => "multiStep",
            Self::FreeText => "freeText",
        }
    }
}

/// Answer key or rubric supplied by the item author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AnswerKey {
    #[serde(rename_all = "camelCase")]
    MultipleChoice {
        #[serde(default)]
        choices: Vec<String>,
        correct: String,
    },
    #[serde(rename_all = "camelCase")]
    Numeric {
        value: f64,
        #[serde(default)]
        tolerance: f64,
    },
    /// Ordered step selection; correct when at least `min_correct` positions match.
    #[serde(rename_all = "camelCase")]
    MultiStep {
        steps: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min_correct: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    FreeText { accepted: Vec<String> },
}

impl AnswerKey {
    pub fn format(&self) -> ItemFormat {
        match self {
            Self::MultipleChoice { .. } => ItemFormat::MultipleChoice,
            Self::Numeric { .. } => ItemFormat::Numeric,
            Self::MultiStep { .. } => ItemFormat::MultiStep,
            Self::FreeText { .. } => ItemFormat::FreeText,
        }
    }
}

/// How an error signature is matched against an incorrect answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MatchRule {
    /// Normalized answer text equals `value`.
    Choice { value: String },
    /// Regex evaluated against the normalized answer text.
    Pattern { regex: String },
    NumericNear { value: f64, tolerance: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSignature {
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub rule: MatchRule,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub skill_ids: Vec<String>,
    pub irt: IrtParams,
    pub answer: AnswerKey,
    #[serde(default = "default_response_time_ms")]
    pub avg_response_time_ms: u64,
    #[serde(default)]
    pub error_signatures: Vec<ErrorSignature>,
}

fn default_response_time_ms() -> u64 {
    60_000
}

impl Item {
    pub fn format(&self) -> ItemFormat {
        self.answer.format()
    }

    pub fn touches(&self, skill_id: &str) -> bool {
        self.skill_ids.iter().any(|s| s == skill_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillMastery {
    pub skill_id: String,
    pub probability: f64,
    pub params: BktParams,
    pub observations: u32,
}

/// Write-once audit record appended after every scored response, one per touched skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryUpdate {
    pub skill_id: String,
    pub item_id: String,
    pub prior_mastery: f64,
    pub posterior_mastery: f64,
    pub observed_correct: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ResponseAnswer {
    Choice(String),
    Numeric(f64),
    Steps(Vec<String>),
    Text(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub item_id: String,
    pub answer: ResponseAnswer,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub min_items: usize,
    pub max_items: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_secs: Option<u64>,
    /// Skill domains in scope; empty means every domain in the catalog.
    #[serde(default)]
    pub target_domains: Vec<String>,
    /// Restricts item selection to items touching at least one of these skills.
    #[serde(default)]
    pub target_skills: Vec<String>,
    #[serde(default = "default_adaptive")]
    pub adaptive: bool,
}

fn default_adaptive() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_items: 5,
            max_items: 20,
            time_limit_secs: None,
            target_domains: Vec::new(),
            target_skills: Vec::new(),
            adaptive: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Created,
    Active,
    Paused,
    Complete,
}

impl SessionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Active => "ACTIVE",
            Self::Paused => "PAUSED",
            Self::Complete => "COMPLETE",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusTransition {
    pub from: SessionStatus,
    pub to: SessionStatus,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentedItem {
    pub item_id: String,
    pub presented_at: i64,
    /// Set when the selector had no eligible candidate and the engine fell back.
    pub fallback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredResponse {
    pub item_id: String,
    pub answer: ResponseAnswer,
    pub correct: bool,
    pub submitted_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
}

/// Misconception aggregated by error type across the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedMisconception {
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub frequency: u32,
    pub item_ids: Vec<String>,
    pub skill_ids: Vec<String>,
    pub first_seen: i64,
    pub last_seen: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TerminationReason {
    MaxItems,
    Converged,
    TimeLimit,
    CatalogExhausted,
}

impl TerminationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxItems => "max_items",
            Self::Converged => "converged",
            Self::TimeLimit => "time_limit",
            Self::CatalogExhausted => "catalog_exhausted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverallLevel {
    Beginner,
    Developing,
    Proficient,
    Advanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MasteryBand {
    Low,
    Uncertain,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillStrength {
    pub skill_id: String,
    pub confidence: f64,
    pub observations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillWeakness {
    pub skill_id: String,
    pub confidence: f64,
    pub observations: u32,
    pub remediation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MisconceptionSummary {
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub frequency: u32,
    pub example_item_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalDiagnosis {
    pub overall_level: OverallLevel,
    pub mean_mastery: f64,
    pub strengths: Vec<SkillStrength>,
    pub weaknesses: Vec<SkillWeakness>,
    pub misconceptions: Vec<MisconceptionSummary>,
    pub recommended_next_path: Vec<String>,
    pub estimated_minutes_to_mastery: u32,
    pub termination: TerminationReason,
    pub items_administered: usize,
    pub computed_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticSession {
    pub id: String,
    pub student_id: String,
    pub config: SessionConfig,
    pub status: SessionStatus,
    pub in_scope_skills: Vec<String>,
    pub items_presented: Vec<PresentedItem>,
    pub responses: Vec<ScoredResponse>,
    pub current_item_index: usize,
    pub mastery: BTreeMap<String, SkillMastery>,
    pub mastery_updates: Vec<MasteryUpdate>,
    pub misconceptions_detected: Vec<DetectedMisconception>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_diagnosis: Option<FinalDiagnosis>,
    pub transitions: Vec<StatusTransition>,
    pub fallback_count: u32,
    pub version: u64,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_at: Option<i64>,
    pub paused_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillSnapshot {
    pub skill_id: String,
    pub mastery: f64,
    pub band: MasteryBand,
    pub observations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub session_id: String,
    pub status: SessionStatus,
    pub items_completed: usize,
    pub items_remaining: usize,
    pub mastery_snapshot: Vec<SkillSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EngineWarning {
    #[serde(rename_all = "camelCase")]
    SelectorFallback { item_id: String, reason: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStart {
    pub session: DiagnosticSession,
    pub first_item: Item,
    pub warnings: Vec<EngineWarning>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub correct: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_item: Option<Item>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<FinalDiagnosis>,
    pub is_complete: bool,
    pub misconceptions_matched: Vec<String>,
    pub warnings: Vec<EngineWarning>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeOutcome {
    pub session: DiagnosticSession,
    pub current_item: Item,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bkt_degenerate_detection() {
        let ok = BktParams::default();
        assert!(!ok.is_degenerate());

        let bad = BktParams {
            guess: 0.6,
            slip: 0.5,
            ..BktParams::default()
        };
        assert!(bad.is_degenerate());
    }

    #[test]
    fn test_answer_key_tagged_json() {
        let key: AnswerKey =
            serde_json::from_str(r#"{"kind":"numeric","value":4.0,"tolerance":0.01}"#).unwrap();
        assert_eq!(key.format(), ItemFormat::Numeric);

        let key: AnswerKey =
            serde_json::from_str(r#"{"kind":"multiStep","steps":["a","b"],"minCorrect":1}"#)
                .unwrap();
        assert_eq!(
            key,
            AnswerKey::MultiStep {
                steps: vec!["a".to_string(), "b".to_string()],
                min_correct: Some(1)
            }
        );
    }

    #[test]
    fn test_status_serializes_screaming() {
        let json = serde_json::to_string(&SessionStatus::Complete).unwrap();
        assert_eq!(json, "\"COMPLETE\"");
    }
}
