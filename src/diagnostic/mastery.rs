//! Bayesian Knowledge Tracing mastery model.
//!
//! Each update is local to one skill: an item probing several skills produces
//! one independent update per skill with the same observed correctness.

use crate::diagnostic::catalog::Catalog;
use crate::diagnostic::config::MasteryThresholds;
use crate::diagnostic::error::DiagnosticError;
use crate::diagnostic::types::{BktParams, MasteryBand, SkillMastery};

const DENOMINATOR_FLOOR: f64 = 1e-12;

/// Starting belief for a skill, using its configured prior.
pub fn initialize_mastery(
    catalog: &Catalog,
    skill_id: &str,
    default_params: &BktParams,
) -> Result<SkillMastery, DiagnosticError> {
    let params = catalog.bkt_params(skill_id, default_params)?;
    Ok(SkillMastery {
        skill_id: skill_id.to_string(),
        probability: params.prior,
        params,
        observations: 0,
    })
}

/// P(known | observation) by Bayes' rule.
pub fn evidence_posterior(p_known: f64, params: &BktParams, observed_correct: bool) -> f64 {
    let (known, unknown) = if observed_correct {
        (
            p_known * (1.0 - params.slip),
            (1.0 - p_known) * params.guess,
        )
    } else {
        (p_known * params.slip, (1.0 - p_known) * (1.0 - params.guess))
    };
    known / (known + unknown).max(DENOMINATOR_FLOOR)
}

/// Transition step: an unknown skill may become known after the opportunity.
pub fn apply_learning(posterior: f64, learn: f64) -> f64 {
    posterior + (1.0 - posterior) * learn
}

/// Two-stage BKT step. Fails with `NumericGuard` instead of clamping if the
/// result leaves [0,1].
pub fn update_mastery(
    mastery: &SkillMastery,
    observed_correct: bool,
) -> Result<SkillMastery, DiagnosticError> {
    let posterior = evidence_posterior(mastery.probability, &mastery.params, observed_correct);
    let next = apply_learning(posterior, mastery.params.learn);

    if !next.is_finite() || !(0.0..=1.0).contains(&next) {
        tracing::error!(
            skill_id = %mastery.skill_id,
            prior = mastery.probability,
            value = next,
            "mastery update left the unit interval"
        );
        return Err(DiagnosticError::NumericGuard {
            skill_id: mastery.skill_id.clone(),
            value: next,
        });
    }

    Ok(SkillMastery {
        skill_id: mastery.skill_id.clone(),
        probability: next,
        params: mastery.params,
        observations: mastery.observations.saturating_add(1),
    })
}

pub fn classify(probability: f64, thresholds: &MasteryThresholds) -> MasteryBand {
    if probability >= thresholds.high {
        MasteryBand::High
    } else if probability <= thresholds.low {
        MasteryBand::Low
    } else {
        MasteryBand::Uncertain
    }
}

pub fn is_uncertain(probability: f64, thresholds: &MasteryThresholds) -> bool {
    classify(probability, thresholds) == MasteryBand::Uncertain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mastery(p: f64, params: BktParams) -> SkillMastery {
        SkillMastery {
            skill_id: "s".to_string(),
            probability: p,
            params,
            observations: 0,
        }
    }

    fn scenario_params() -> BktParams {
        BktParams {
            prior: 0.3,
            learn: 0.4,
            guess: 0.2,
            slip: 0.1,
        }
    }

    #[test]
    fn test_correct_response_scenario() {
        let params = scenario_params();
        let posterior = evidence_posterior(0.3, &params, true);
        assert!((posterior - 0.6585).abs() < 1e-3);

        let updated = update_mastery(&mastery(0.3, params), true).unwrap();
        assert!((updated.probability - 0.7951).abs() < 1e-3);
        assert_eq!(updated.observations, 1);
    }

    #[test]
    fn test_incorrect_response_lowers_belief() {
        let params = BktParams {
            learn: 0.0,
            ..scenario_params()
        };
        let updated = update_mastery(&mastery(0.6, params), false).unwrap();
        assert!(updated.probability < 0.6);
    }

    #[test]
    fn test_certain_knowledge_with_zero_slip() {
        let params = BktParams {
            prior: 1.0,
            learn: 0.0,
            guess: 0.2,
            slip: 0.0,
        };
        let updated = update_mastery(&mastery(1.0, params), false).unwrap();
        assert_eq!(updated.probability, 0.0);
    }

    #[test]
    fn test_out_of_range_prior_trips_guard() {
        let result = update_mastery(&mastery(1.5, scenario_params()), true);
        assert!(matches!(result, Err(DiagnosticError::NumericGuard { .. })));
    }

    #[test]
    fn test_classify_bands() {
        let thresholds = MasteryThresholds::default();
        assert_eq!(classify(0.9, &thresholds), MasteryBand::High);
        assert_eq!(classify(0.85, &thresholds), MasteryBand::High);
        assert_eq!(classify(0.5, &thresholds), MasteryBand::Uncertain);
        assert_eq!(classify(0.1, &thresholds), MasteryBand::Low);
        assert!(is_uncertain(0.31, &thresholds));
    }
}
