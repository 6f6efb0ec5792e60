use crate::diagnostic::types::IrtParams;

const MASTERY_FLOOR: f64 = 0.01;
const MASTERY_CEIL: f64 = 0.99;
const EPSILON: f64 = 1e-12;

/// Maps a mastery probability onto the logit ability scale.
pub fn ability_from_mastery(probability: f64) -> f64 {
    let p = probability.clamp(MASTERY_FLOOR, MASTERY_CEIL);
    (p / (1.0 - p)).ln()
}

/// 3PL probability of a correct response: `c + (1 - c) / (1 + exp(-a(θ - b)))`.
pub fn probability_correct(params: &IrtParams, theta: f64) -> f64 {
    let logistic = 1.0 / (1.0 + (-params.discrimination * (theta - params.difficulty)).exp());
    params.guessing + (1.0 - params.guessing) * logistic
}

/// Fisher information of a 3PL item at `theta`.
///
/// `a² · (Q / P) · ((P - c) / (1 - c))²`, i.e. `a² P Q` corrected for the guessing floor.
pub fn fisher_information(params: &IrtParams, theta: f64) -> f64 {
    let p = probability_correct(params, theta);
    let q = 1.0 - p;
    if p <= EPSILON || q <= EPSILON {
        return 0.0;
    }
    let c = params.guessing;
    let a = params.discrimination;
    let floor_correction = ((p - c) / (1.0 - c).max(EPSILON)).powi(2);
    a * a * (q / p) * floor_correction
}
