//! Session lifecycle: status transitions, invariants and the termination policy.

use std::collections::BTreeMap;

use uuid::Uuid;

use crate::diagnostic::config::MasteryThresholds;
use crate::diagnostic::error::DiagnosticError;
use crate::diagnostic::mastery::is_uncertain;
use crate::diagnostic::types::{
    DiagnosticSession, SessionConfig, SessionStatus, SkillMastery, StatusTransition,
    TerminationReason,
};

impl SessionStatus {
    pub fn can_transition_to(self, target: SessionStatus) -> bool {
        matches!(
            (self, target),
            (SessionStatus::Created, SessionStatus::Active)
                | (SessionStatus::Active, SessionStatus::Paused)
                | (SessionStatus::Paused, SessionStatus::Active)
                | (SessionStatus::Active, SessionStatus::Complete)
        )
    }
}

pub fn validate_session_config(config: &SessionConfig) -> Result<(), DiagnosticError> {
    if config.min_items < 1 {
        return Err(DiagnosticError::InvalidConfig(
            "min_items must be at least 1".to_string(),
        ));
    }
    if config.max_items < config.min_items {
        return Err(DiagnosticError::InvalidConfig(format!(
            "max_items ({}) must be >= min_items ({})",
            config.max_items, config.min_items
        )));
    }
    if config.time_limit_secs == Some(0) {
        return Err(DiagnosticError::InvalidConfig(
            "time_limit_secs must be positive when set".to_string(),
        ));
    }
    Ok(())
}

impl DiagnosticSession {
    pub fn new(
        student_id: impl Into<String>,
        config: SessionConfig,
        in_scope_skills: Vec<String>,
        mastery: BTreeMap<String, SkillMastery>,
        now_ms: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            student_id: student_id.into(),
            config,
            status: SessionStatus::Created,
            in_scope_skills,
            items_presented: Vec::new(),
            responses: Vec::new(),
            current_item_index: 0,
            mastery,
            mastery_updates: Vec::new(),
            misconceptions_detected: Vec::new(),
            final_diagnosis: None,
            transitions: Vec::new(),
            fallback_count: 0,
            version: 0,
            created_at: now_ms,
            updated_at: now_ms,
            paused_at: None,
            paused_ms: 0,
            completed_at: None,
        }
    }

    /// Moves to `target` or fails with `StateConflict` leaving the session untouched.
    pub fn transition_to(
        &mut self,
        target: SessionStatus,
        action: &str,
        now_ms: i64,
    ) -> Result<(), DiagnosticError> {
        if !self.status.can_transition_to(target) {
            return Err(DiagnosticError::state_conflict(&self.id, self.status, action));
        }
        self.transitions.push(StatusTransition {
            from: self.status,
            to: target,
            timestamp: now_ms,
        });
        self.status = target;
        Ok(())
    }

    pub fn ensure_status(&self, expected: SessionStatus, action: &str) -> Result<(), DiagnosticError> {
        if self.status != expected {
            return Err(DiagnosticError::state_conflict(&self.id, self.status, action));
        }
        Ok(())
    }

    /// True while an item has been presented but not yet scored.
    pub fn is_mid_item(&self) -> bool {
        self.items_presented.len() == self.responses.len() + 1
    }

    pub fn current_item_id(&self) -> Option<&str> {
        if self.is_mid_item() {
            self.items_presented
                .get(self.current_item_index)
                .map(|p| p.item_id.as_str())
        } else {
            None
        }
    }

    pub fn has_scored(&self, item_id: &str) -> bool {
        self.responses.iter().any(|r| r.item_id == item_id)
    }

    /// Wall time spent outside the paused state.
    pub fn active_elapsed_ms(&self, now_ms: i64) -> i64 {
        let paused_now = self.paused_at.map(|p| now_ms - p).unwrap_or(0);
        (now_ms - self.created_at - self.paused_ms - paused_now).max(0)
    }

    pub fn touch(&mut self, now_ms: i64) {
        self.updated_at = now_ms;
        self.version = self.version.saturating_add(1);
    }
}

/// Termination check run after each scored response.
pub fn evaluate_termination(
    session: &DiagnosticSession,
    thresholds: &MasteryThresholds,
    now_ms: i64,
) -> Option<TerminationReason> {
    let presented = session.items_presented.len();
    if presented >= session.config.max_items {
        return Some(TerminationReason::MaxItems);
    }
    if presented >= session.config.min_items
        && session
            .mastery
            .values()
            .all(|m| !is_uncertain(m.probability, thresholds))
    {
        return Some(TerminationReason::Converged);
    }
    if let Some(limit_secs) = session.config.time_limit_secs {
        let limit_ms = (limit_secs as i64).saturating_mul(1000);
        if session.active_elapsed_ms(now_ms) >= limit_ms {
            return Some(TerminationReason::TimeLimit);
        }
    }
    None
}
