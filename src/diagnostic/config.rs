use serde::{Deserialize, Serialize};

use crate::diagnostic::catalog::validate_bkt;
use crate::diagnostic::error::DiagnosticError;
use crate::diagnostic::types::BktParams;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    Information,
    RuleTree,
}

impl SelectionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Information => "information",
            Self::RuleTree => "rule_tree",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "information" | "irt" | "bayesian" => Some(Self::Information),
            "rule_tree" | "ruletree" | "rules" => Some(Self::RuleTree),
            _ => None,
        }
    }
}

/// Mastery band boundaries. A skill is uncertain while `low < p < high`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MasteryThresholds {
    pub high: f64,
    pub low: f64,
}

impl Default for MasteryThresholds {
    fn default() -> Self {
        Self {
            high: 0.85,
            low: 0.30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionParams {
    pub strategy: SelectionStrategy,
    /// Items presented this many times across all sessions are skipped.
    pub max_item_exposure: Option<u64>,
    /// Information discount for items that do not touch the focus skill.
    pub off_focus_weight: f64,
    pub tie_epsilon: f64,
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self {
            strategy: SelectionStrategy::Information,
            max_item_exposure: None,
            off_focus_weight: 0.5,
            tie_epsilon: 1e-9,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LevelCutoffs {
    pub developing: f64,
    pub proficient: f64,
    pub advanced: f64,
}

impl Default for LevelCutoffs {
    fn default() -> Self {
        Self {
            developing: 0.40,
            proficient: 0.60,
            advanced: 0.80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisParams {
    pub misconception_examples: usize,
    pub minutes_per_weak_skill: u32,
    pub minutes_per_uncertain_skill: u32,
    pub level_cutoffs: LevelCutoffs,
    pub next_path_length: usize,
}

impl Default for DiagnosisParams {
    fn default() -> Self {
        Self {
            misconception_examples: 3,
            minutes_per_weak_skill: 45,
            minutes_per_uncertain_skill: 20,
            level_cutoffs: LevelCutoffs::default(),
            next_path_length: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticConfig {
    pub thresholds: MasteryThresholds,
    pub selection: SelectionParams,
    pub diagnosis: DiagnosisParams,
    /// Used for skills whose catalog entry carries no BKT parameters.
    pub default_bkt: BktParams,
    pub session_retention_minutes: u64,
}

impl Default for DiagnosticConfig {
    fn default() -> Self {
        Self {
            thresholds: MasteryThresholds::default(),
            selection: SelectionParams::default(),
            diagnosis: DiagnosisParams::default(),
            default_bkt: BktParams::default(),
            session_retention_minutes: 24 * 60,
        }
    }
}

impl DiagnosticConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = env_parse::<f64>("DIAG_HIGH_THRESHOLD") {
            config.thresholds.high = val;
        }
        if let Some(val) = env_parse::<f64>("DIAG_LOW_THRESHOLD") {
            config.thresholds.low = val;
        }
        if let Ok(val) = std::env::var("DIAG_STRATEGY") {
            match SelectionStrategy::parse(&val) {
                Some(strategy) => config.selection.strategy = strategy,
                None => tracing::warn!(value = %val, "unknown DIAG_STRATEGY, keeping default"),
            }
        }
        if let Some(val) = env_parse::<u64>("DIAG_MAX_EXPOSURE") {
            config.selection.max_item_exposure = Some(val);
        }
        if let Some(val) = env_parse::<usize>("DIAG_MISCONCEPTION_EXAMPLES") {
            config.diagnosis.misconception_examples = val;
        }
        if let Some(val) = env_parse::<u64>("DIAG_RETENTION_MINUTES") {
            config.session_retention_minutes = val;
        }

        config
    }

    pub fn validate(&self) -> Result<(), DiagnosticError> {
        let MasteryThresholds { high, low } = self.thresholds;
        if !(low > 0.0 && high < 1.0 && low < high) {
            return Err(DiagnosticError::InvalidConfig(format!(
                "mastery thresholds must satisfy 0 < low < high < 1 (low={low}, high={high})"
            )));
        }
        if !(0.0..=1.0).contains(&self.selection.off_focus_weight) {
            return Err(DiagnosticError::InvalidConfig(
                "off_focus_weight must be within [0, 1]".to_string(),
            ));
        }
        let cutoffs = self.diagnosis.level_cutoffs;
        if !(cutoffs.developing <= cutoffs.proficient && cutoffs.proficient <= cutoffs.advanced) {
            return Err(DiagnosticError::InvalidConfig(
                "level cutoffs must be non-decreasing".to_string(),
            ));
        }
        validate_bkt(&self.default_bkt)
            .map_err(|e| DiagnosticError::InvalidConfig(format!("default BKT parameters: {e}")))?;
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(DiagnosticConfig::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut config = DiagnosticConfig::default();
        config.thresholds = MasteryThresholds {
            high: 0.3,
            low: 0.8,
        };
        assert!(matches!(
            config.validate(),
            Err(DiagnosticError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_out_of_range_default_bkt_rejected() {
        let mut config = DiagnosticConfig::default();
        config.default_bkt.prior = 1.5;
        assert!(matches!(
            config.validate(),
            Err(DiagnosticError::InvalidConfig(msg)) if msg.contains("prior")
        ));

        let mut config = DiagnosticConfig::default();
        config.default_bkt.learn = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            SelectionStrategy::parse("rule_tree"),
            Some(SelectionStrategy::RuleTree)
        );
        assert_eq!(
            SelectionStrategy::parse(" IRT "),
            Some(SelectionStrategy::Information)
        );
        assert_eq!(SelectionStrategy::parse("random"), None);
    }
}
