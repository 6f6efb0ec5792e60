#![allow(dead_code)]

use std::sync::Arc;

use mastery_diagnostic::diagnostic::{
    AnswerKey, Catalog, Clock, DiagnosticConfig, DiagnosticEngine, InMemorySessionStore, Item,
    ManualClock, Response, ResponseAnswer, SessionConfig, SessionStore,
};

pub const START_MS: i64 = 1_700_000_000_000;

/// Two algebra skills with an uncertain prior, one arithmetic skill with two items.
pub const CATALOG: &str = r#"{
    "skills": [
        {"id": "integers", "name": "Integer operations", "domain": "algebra",
         "bkt": {"prior": 0.5, "learn": 0.1, "guess": 0.2, "slip": 0.1}},
        {"id": "linear", "name": "Linear equations", "domain": "algebra",
         "prerequisites": ["integers"],
         "bkt": {"prior": 0.5, "learn": 0.1, "guess": 0.2, "slip": 0.1}},
        {"id": "fractions", "name": "Fractions", "domain": "arithmetic",
         "bkt": {"prior": 0.5, "learn": 0.1, "guess": 0.2, "slip": 0.1},
         "remediation": "Revisit equivalent fractions"}
    ],
    "items": [
        {"id": "int-1", "skillIds": ["integers"],
         "irt": {"discrimination": 1.0, "difficulty": -1.0},
         "answer": {"kind": "numeric", "value": 4.0}},
        {"id": "int-2", "skillIds": ["integers"],
         "irt": {"discrimination": 1.2, "difficulty": 0.0},
         "answer": {"kind": "multipleChoice", "choices": ["-6", "6", "12"], "correct": "-6"}},
        {"id": "int-3", "skillIds": ["integers"],
         "irt": {"discrimination": 0.9, "difficulty": 1.0},
         "answer": {"kind": "numeric", "value": 10.0}},
        {"id": "lin-1", "skillIds": ["linear"],
         "irt": {"discrimination": 1.1, "difficulty": 0.0},
         "answer": {"kind": "numeric", "value": 3.0}},
        {"id": "lin-2", "skillIds": ["linear"],
         "irt": {"discrimination": 1.3, "difficulty": 1.0},
         "answer": {"kind": "freeText", "accepted": ["x = 2"]}},
        {"id": "lin-3", "skillIds": ["linear", "integers"],
         "irt": {"discrimination": 1.0, "difficulty": 0.5},
         "answer": {"kind": "multiStep", "steps": ["expand", "collect", "divide"]}},
        {"id": "frac-1", "skillIds": ["fractions"],
         "irt": {"discrimination": 1.0, "difficulty": 0.0},
         "answer": {"kind": "numeric", "value": 0.5, "tolerance": 0.001},
         "errorSignatures": [
            {"errorType": "inverted_fraction", "description": "Flips numerator and denominator",
             "rule": {"kind": "numericNear", "value": 2.0, "tolerance": 0.001}}
         ]},
        {"id": "frac-2", "skillIds": ["fractions"],
         "irt": {"discrimination": 1.4, "difficulty": 0.8},
         "answer": {"kind": "numeric", "value": 0.25, "tolerance": 0.001},
         "errorSignatures": [
            {"errorType": "inverted_fraction",
             "rule": {"kind": "numericNear", "value": 4.0, "tolerance": 0.001}},
            {"errorType": "added_denominators",
             "rule": {"kind": "pattern", "regex": "^0\\.1+$"}}
         ]}
    ]
}"#;

pub struct Harness {
    pub engine: Arc<DiagnosticEngine>,
    pub store: Arc<InMemorySessionStore>,
    pub clock: Arc<ManualClock>,
}

pub fn harness() -> Harness {
    harness_with(DiagnosticConfig::default())
}

pub fn harness_with(config: DiagnosticConfig) -> Harness {
    let catalog = Catalog::from_json_str(CATALOG).expect("fixture catalog is valid");
    let store = Arc::new(InMemorySessionStore::new());
    let clock = Arc::new(ManualClock::new(START_MS));
    let engine = DiagnosticEngine::with_clock(
        config,
        Arc::new(catalog),
        Arc::clone(&store) as Arc<dyn SessionStore>,
        Arc::clone(&clock) as Arc<dyn Clock>,
    )
    .expect("engine config is valid");
    Harness {
        engine: Arc::new(engine),
        store,
        clock,
    }
}

pub fn session_config(domains: &[&str], min_items: usize, max_items: usize) -> SessionConfig {
    SessionConfig {
        min_items,
        max_items,
        target_domains: domains.iter().map(|d| d.to_string()).collect(),
        ..SessionConfig::default()
    }
}

pub fn correct_answer(item: &Item) -> ResponseAnswer {
    match &item.answer {
        AnswerKey::MultipleChoice { correct, .. } => ResponseAnswer::Choice(correct.clone()),
        AnswerKey::Numeric { value, .. } => ResponseAnswer::Numeric(*value),
        AnswerKey::MultiStep { steps, .. } => ResponseAnswer::Steps(steps.clone()),
        AnswerKey::FreeText { accepted } => ResponseAnswer::Text(accepted[0].clone()),
    }
}

/// Incorrect but well-formed answer that matches no error signature.
pub fn wrong_answer(item: &Item) -> ResponseAnswer {
    match &item.answer {
        AnswerKey::MultipleChoice { .. } => ResponseAnswer::Choice("none of these".into()),
        AnswerKey::Numeric { value, .. } => ResponseAnswer::Numeric(value + 1000.0),
        AnswerKey::MultiStep { steps, .. } => {
            ResponseAnswer::Steps(steps.iter().map(|s| format!("not {s}")).collect())
        }
        AnswerKey::FreeText { .. } => ResponseAnswer::Text("no idea".into()),
    }
}

pub fn respond(item: &Item, answer: ResponseAnswer) -> Response {
    Response {
        item_id: item.id.clone(),
        answer,
        response_time_ms: Some(5_000),
    }
}
