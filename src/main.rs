use std::sync::Arc;

use rand::Rng;
use tracing::{error, info, warn};

use mastery_diagnostic::config::Config;
use mastery_diagnostic::diagnostic::selection::irt::probability_correct;
use mastery_diagnostic::diagnostic::{
    AnswerKey, Catalog, DiagnosticConfig, DiagnosticEngine, DiagnosticError, FinalDiagnosis,
    Item, Response, ResponseAnswer, SessionConfig,
};
use mastery_diagnostic::logging::init_tracing;
use mastery_diagnostic::state::AppState;
use mastery_diagnostic::workers::WorkerManager;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = init_tracing(&config.log_level);

    let catalog = match Catalog::load(&config.catalog_path) {
        Ok(catalog) => catalog,
        Err(err) => {
            error!(path = %config.catalog_path.display(), error = %err, "failed to load catalog");
            std::process::exit(1);
        }
    };
    info!(
        skills = catalog.skills.len(),
        items = catalog.items.len(),
        "catalog loaded"
    );

    let state = match AppState::new(catalog, DiagnosticConfig::from_env()) {
        Ok(state) => state,
        Err(err) => {
            error!(error = %err, "invalid diagnostic configuration");
            std::process::exit(1);
        }
    };

    let worker_manager = match WorkerManager::new(state.engine(), config.cleanup_cron.clone())
        .await
    {
        Ok(manager) => {
            if let Err(e) = manager.start().await {
                error!(error = %e, "failed to start workers");
            }
            Some(manager)
        }
        Err(e) => {
            warn!(error = %e, "worker manager not initialized");
            None
        }
    };

    let mut rng = rand::rng();
    for n in 0..config.simulated_students {
        let student_id = format!("student-{}", n + 1);
        let ability: f64 = rng.random_range(-2.0..2.0);
        match simulate_student(&state.engine(), &student_id, ability, &mut rng) {
            Ok(diagnosis) => match serde_json::to_string_pretty(&diagnosis) {
                Ok(json) => println!("{student_id} (ability {ability:.2}):\n{json}"),
                Err(err) => error!(error = %err, "failed to render diagnosis"),
            },
            Err(err) => error!(
                student_id = %student_id,
                code = err.code(),
                error = %err,
                "simulation failed"
            ),
        }
    }

    info!(
        sessions = state.session_count(),
        uptime_secs = state.uptime_seconds(),
        "simulations finished, shutting down"
    );

    if let Some(ref manager) = worker_manager {
        manager.stop().await;
    }

    info!("Graceful shutdown complete");
}

/// Runs one session to completion, answering each item by sampling the 3PL model at `ability`.
fn simulate_student(
    engine: &Arc<DiagnosticEngine>,
    student_id: &str,
    ability: f64,
    rng: &mut impl Rng,
) -> Result<FinalDiagnosis, DiagnosticError> {
    let start = engine.start_session(
        student_id,
        SessionConfig {
            min_items: 4,
            max_items: 8,
            ..SessionConfig::default()
        },
    )?;
    let session_id = start.session.id.clone();
    let mut item = start.first_item;
    let mut answered = 0usize;

    loop {
        if answered == 2 {
            engine.pause_session(&session_id)?;
            item = engine.resume_session(&session_id)?.current_item;
        }

        let correct = rng.random_bool(probability_correct(&item.irt, ability).clamp(0.0, 1.0));
        let response = Response {
            item_id: item.id.clone(),
            answer: simulated_answer(&item, correct),
            response_time_ms: Some(item.avg_response_time_ms),
        };
        let outcome = engine.submit_response(&session_id, response)?;
        answered += 1;

        if let Some(diagnosis) = outcome.diagnosis {
            return Ok(diagnosis);
        }
        match outcome.next_item {
            Some(next) => item = next,
            None => return Err(DiagnosticError::NoCandidateItems),
        }
    }
}

fn simulated_answer(item: &Item, correct: bool) -> ResponseAnswer {
    match &item.answer {
        AnswerKey::MultipleChoice { choices, correct: key } => {
            if correct {
                ResponseAnswer::Choice(key.clone())
            } else {
                let wrong = choices.iter().find(|c| *c != key).cloned();
                ResponseAnswer::Choice(wrong.unwrap_or_else(|| "none".to_string()))
            }
        }
        AnswerKey::Numeric { value, .. } => {
            if correct {
                ResponseAnswer::Numeric(*value)
            } else if *value == 0.0 {
                ResponseAnswer::Numeric(1.0)
            } else {
                ResponseAnswer::Numeric(-*value)
            }
        }
        AnswerKey::MultiStep { steps, .. } => {
            if correct {
                ResponseAnswer::Steps(steps.clone())
            } else {
                ResponseAnswer::Steps(steps.iter().rev().cloned().collect())
            }
        }
        AnswerKey::FreeText { accepted } => match (correct, accepted.first()) {
            (true, Some(text)) => ResponseAnswer::Text(text.clone()),
            _ => ResponseAnswer::Text("not sure".to_string()),
        },
    }
}
