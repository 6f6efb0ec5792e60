//! Response scoring against item answer keys and misconception signature matching.

use regex::Regex;

use crate::diagnostic::error::DiagnosticError;
use crate::diagnostic::types::{AnswerKey, ErrorSignature, MatchRule, ResponseAnswer};

/// Lowercase, trimmed, inner whitespace collapsed to single spaces.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalized textual form of an answer, used for signature matching.
pub fn answer_text(answer: &ResponseAnswer) -> String {
    match answer {
        ResponseAnswer::Choice(choice) => normalize(choice),
        ResponseAnswer::Numeric(value) => format_number(*value),
        ResponseAnswer::Steps(steps) => steps
            .iter()
            .map(|s| normalize(s))
            .collect::<Vec<_>>()
            .join(" > "),
        ResponseAnswer::Text(text) => normalize(text),
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

pub fn score_response(key: &AnswerKey, answer: &ResponseAnswer) -> Result<bool, DiagnosticError> {
    match (key, answer) {
        (AnswerKey::MultipleChoice { correct, .. }, ResponseAnswer::Choice(choice)) => {
            Ok(normalize(correct) == normalize(choice))
        }
        (AnswerKey::Numeric { value, tolerance }, ResponseAnswer::Numeric(given)) => {
            if !given.is_finite() {
                return Err(DiagnosticError::InvalidResponse(
                    "numeric answer must be finite".to_string(),
                ));
            }
            Ok((given - value).abs() <= tolerance.max(0.0) + f64::EPSILON)
        }
        // Free-form numeric entry arrives as text from some clients.
        (AnswerKey::Numeric { value, tolerance }, ResponseAnswer::Text(text)) => {
            match text.trim().parse::<f64>() {
                Ok(given) if given.is_finite() => {
                    Ok((given - value).abs() <= tolerance.max(0.0) + f64::EPSILON)
                }
                _ => Ok(false),
            }
        }
        (AnswerKey::MultiStep { steps, min_correct }, ResponseAnswer::Steps(given)) => {
            let required = min_correct.unwrap_or(steps.len()).min(steps.len());
            let matched = steps
                .iter()
                .zip(given.iter())
                .filter(|(expected, actual)| normalize(expected) == normalize(actual))
                .count();
            Ok(matched >= required && required > 0)
        }
        (AnswerKey::FreeText { accepted }, ResponseAnswer::Text(text)) => {
            let given = normalize(text);
            Ok(accepted.iter().any(|a| normalize(a) == given))
        }
        (key, answer) => Err(DiagnosticError::InvalidResponse(format!(
            "{} answer does not fit a {} item",
            answer_kind(answer),
            key.format().as_str()
        ))),
    }
}

fn answer_kind(answer: &ResponseAnswer) -> &'static str {
    match answer {
        ResponseAnswer::Choice(_) => "choice",
        ResponseAnswer::Numeric(_) => "numeric",
        ResponseAnswer::Steps(_) => "steps",
        ResponseAnswer::Text(_) => "text",
    }
}

#[derive(Debug, Clone)]
pub enum SignatureMatcher {
    Choice(String),
    Pattern(Regex),
    NumericNear { value: f64, tolerance: f64 },
}

/// Error signature with its match rule prepared at catalog load.
#[derive(Debug, Clone)]
pub struct CompiledSignature {
    pub error_type: String,
    pub description: Option<String>,
    matcher: SignatureMatcher,
}

impl CompiledSignature {
    pub fn compile(signature: &ErrorSignature) -> Result<Self, regex::Error> {
        let matcher = match &signature.rule {
            MatchRule::Choice { value } => SignatureMatcher::Choice(normalize(value)),
            MatchRule::Pattern { regex } => SignatureMatcher::Pattern(Regex::new(regex)?),
            MatchRule::NumericNear { value, tolerance } => SignatureMatcher::NumericNear {
                value: *value,
                tolerance: tolerance.abs(),
            },
        };
        Ok(Self {
            error_type: signature.error_type.clone(),
            description: signature.description.clone(),
            matcher,
        })
    }

    pub fn matches(&self, answer: &ResponseAnswer) -> bool {
        match &self.matcher {
            SignatureMatcher::Choice(expected) => answer_text(answer) == *expected,
            SignatureMatcher::Pattern(regex) => regex.is_match(&answer_text(answer)),
            SignatureMatcher::NumericNear { value, tolerance } => {
                let given = match answer {
                    ResponseAnswer::Numeric(v) => Some(*v),
                    ResponseAnswer::Text(t) | ResponseAnswer::Choice(t) => {
                        t.trim().parse::<f64>().ok()
                    }
                    ResponseAnswer::Steps(_) => None,
                };
                given.is_some_and(|g| (g - value).abs() <= tolerance + f64::EPSILON)
            }
        }
    }
}

/// Signatures matching an answer. Only meaningful for incorrect responses.
pub fn detect_misconceptions<'a>(
    signatures: &'a [CompiledSignature],
    answer: &ResponseAnswer,
) -> Vec<&'a CompiledSignature> {
    signatures.iter().filter(|s| s.matches(answer)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature(error_type: &str, rule: MatchRule) -> CompiledSignature {
        CompiledSignature::compile(&ErrorSignature {
            error_type: error_type.to_string(),
            description: None,
            rule,
        })
        .unwrap()
    }

    #[test]
    fn test_multiple_choice_is_case_insensitive() {
        let key = AnswerKey::MultipleChoice {
            choices: vec!["A".into(), "B".into()],
            correct: "B".into(),
        };
        assert!(score_response(&key, &ResponseAnswer::Choice(" b ".into())).unwrap());
        assert!(!score_response(&key, &ResponseAnswer::Choice("a".into())).unwrap());
    }

    #[test]
    fn test_numeric_tolerance() {
        let key = AnswerKey::Numeric {
            value: 2.5,
            tolerance: 0.05,
        };
        assert!(score_response(&key, &ResponseAnswer::Numeric(2.53)).unwrap());
        assert!(!score_response(&key, &ResponseAnswer::Numeric(2.6)).unwrap());
        assert!(score_response(&key, &ResponseAnswer::Text("2.5".into())).unwrap());
    }

    #[test]
    fn test_multi_step_partial_credit() {
        let key = AnswerKey::MultiStep {
            steps: vec!["distribute".into(), "combine".into(), "isolate".into()],
            min_correct: Some(2),
        };
        let answer = ResponseAnswer::Steps(vec![
            "distribute".into(),
            "isolate".into(),
            "isolate".into(),
        ]);
        assert!(score_response(&key, &answer).unwrap());

        let strict = AnswerKey::MultiStep {
            steps: vec!["distribute".into(), "combine".into()],
            min_correct: None,
        };
        let answer = ResponseAnswer::Steps(vec!["distribute".into(), "isolate".into()]);
        assert!(!score_response(&strict, &answer).unwrap());
    }

    #[test]
    fn test_format_mismatch_is_invalid_response() {
        let key = AnswerKey::FreeText {
            accepted: vec!["x = 2".into()],
        };
        let result = score_response(&key, &ResponseAnswer::Numeric(2.0));
        assert!(matches!(result, Err(DiagnosticError::InvalidResponse(_))));
    }

    #[test]
    fn test_signature_rules() {
        let sigs = vec![
            signature(
                "sign_error",
                MatchRule::NumericNear {
                    value: -4.0,
                    tolerance: 0.0,
                },
            ),
            signature(
                "distribution_error",
                MatchRule::Pattern {
                    regex: r"^2x \+ 3$".into(),
                },
            ),
            signature("picked_distractor", MatchRule::Choice { value: "C".into() }),
        ];

        let hits = detect_misconceptions(&sigs, &ResponseAnswer::Numeric(-4.0));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].error_type, "sign_error");

        let hits = detect_misconceptions(&sigs, &ResponseAnswer::Text("2X  + 3".into()));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].error_type, "distribution_error");

        let hits = detect_misconceptions(&sigs, &ResponseAnswer::Choice("c".into()));
        assert_eq!(hits[0].error_type, "picked_distractor");

        assert!(detect_misconceptions(&sigs, &ResponseAnswer::Numeric(7.0)).is_empty());
    }

    #[test]
    fn test_bad_regex_fails_compile() {
        let result = CompiledSignature::compile(&ErrorSignature {
            error_type: "x".into(),
            description: None,
            rule: MatchRule::Pattern {
                regex: "(unclosed".into(),
            },
        });
        assert!(result.is_err());
    }
}
