//! Session orchestration over the catalog, mastery model, selectors and store.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::diagnostic::catalog::{Catalog, CandidateFilter};
use crate::diagnostic::clock::{Clock, SystemClock};
use crate::diagnostic::config::DiagnosticConfig;
use crate::diagnostic::diagnosis::synthesize;
use crate::diagnostic::error::DiagnosticError;
use crate::diagnostic::mastery::{classify, initialize_mastery, is_uncertain, update_mastery};
use crate::diagnostic::scoring::{detect_misconceptions, score_response};
use crate::diagnostic::selection::{selector_for, SelectionConstraints};
use crate::diagnostic::session::{evaluate_termination, validate_session_config};
use crate::diagnostic::store::SessionStore;
use crate::diagnostic::types::*;

/// Per-session mutexes enforcing at most one in-flight mutation per session id.
#[derive(Debug, Default)]
struct SessionLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    fn handle(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock();
        Arc::clone(
            map.entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Drops the entry when nobody else holds a handle to it.
    fn forget_if_idle(&self, session_id: &str) {
        let mut map = self.inner.lock();
        if map
            .get(session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(session_id);
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Runs `op` under the session's mutex, then prunes the entry unless another caller holds it.
    fn with_locked<T>(&self, session_id: &str, op: impl FnOnce() -> T) -> T {
        let lock = self.handle(session_id);
        let result = {
            let _guard = lock.lock();
            op()
        };
        drop(lock);
        self.forget_if_idle(session_id);
        result
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub examined: usize,
    pub evicted: usize,
    pub skipped_locked: usize,
}

pub struct DiagnosticEngine {
    config: DiagnosticConfig,
    catalog: Arc<Catalog>,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    locks: SessionLocks,
}

impl DiagnosticEngine {
    pub fn new(
        config: DiagnosticConfig,
        catalog: Arc<Catalog>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self, DiagnosticError> {
        Self::with_clock(config, catalog, store, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: DiagnosticConfig,
        catalog: Arc<Catalog>,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DiagnosticError> {
        config.validate()?;
        Ok(Self {
            config,
            catalog,
            store,
            clock,
            locks: SessionLocks::default(),
        })
    }

    pub fn config(&self) -> &DiagnosticConfig {
        &self.config
    }

    pub fn catalog(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog)
    }

    pub fn start_session(
        &self,
        student_id: &str,
        config: SessionConfig,
    ) -> Result<SessionStart, DiagnosticError> {
        validate_session_config(&config)?;
        let now = self.clock.now_ms();

        let scope = self.resolve_scope(&config)?;
        let mut mastery = BTreeMap::new();
        for skill_id in &scope {
            let initial = initialize_mastery(&self.catalog, skill_id, &self.config.default_bkt)?;
            mastery.insert(skill_id.clone(), initial);
        }

        let mut session = DiagnosticSession::new(student_id, config, scope, mastery, now);
        session.transition_to(SessionStatus::Active, "start", now)?;

        let mut warnings = Vec::new();
        let first_item = match self.present_next(&mut session, now, &mut warnings)? {
            Some(item) => item,
            None => {
                return Err(DiagnosticError::EmptyCatalog {
                    domains: session.config.target_domains.clone(),
                })
            }
        };

        session.touch(now);
        self.store.set(&session.id, &session)?;
        self.catalog.items.record_exposure(&first_item.id);

        debug!(
            session_id = %session.id,
            student_id = %session.student_id,
            skills = session.mastery.len(),
            first_item = %first_item.id,
            "diagnostic session started"
        );

        Ok(SessionStart {
            session,
            first_item,
            warnings,
        })
    }

    pub fn submit_response(
        &self,
        session_id: &str,
        response: Response,
    ) -> Result<SubmitOutcome, DiagnosticError> {
        self.locks
            .with_locked(session_id, || self.apply_response(session_id, response))
    }

    pub fn pause_session(&self, session_id: &str) -> Result<DiagnosticSession, DiagnosticError> {
        self.locks.with_locked(session_id, || self.apply_pause(session_id))
    }

    /// Returns to ACTIVE and re-presents the frozen item; nothing is re-selected.
    pub fn resume_session(&self, session_id: &str) -> Result<ResumeOutcome, DiagnosticError> {
        self.locks.with_locked(session_id, || self.apply_resume(session_id))
    }

    fn apply_response(
        &self,
        session_id: &str,
        response: Response,
    ) -> Result<SubmitOutcome, DiagnosticError> {
        let mut session = self.load(session_id)?;
        session.ensure_status(SessionStatus::Active, "submit response")?;

        let current_id = match session.current_item_id() {
            Some(id) => id.to_string(),
            None => {
                return Err(DiagnosticError::state_conflict(
                    session_id,
                    session.status,
                    "submit response with no item presented",
                ))
            }
        };
        if response.item_id != current_id {
            if session.has_scored(&response.item_id) {
                return Err(DiagnosticError::state_conflict(
                    session_id,
                    session.status,
                    format!("score item {} twice", response.item_id),
                ));
            }
            return Err(DiagnosticError::UnknownItem {
                session_id: session_id.to_string(),
                item_id: response.item_id,
            });
        }

        let item = self
            .catalog
            .items
            .get(&current_id)
            .ok_or_else(|| DiagnosticError::UnknownItem {
                session_id: session_id.to_string(),
                item_id: current_id.clone(),
            })?;

        let now = self.clock.now_ms();
        let correct = score_response(&item.answer, &response.answer)?;

        // Compute every update before touching the session so a guard failure mutates nothing.
        let mut updates = Vec::with_capacity(item.skill_ids.len());
        for skill_id in &item.skill_ids {
            let before = session
                .mastery
                .get(skill_id)
                .ok_or_else(|| DiagnosticError::UnknownSkill(skill_id.clone()))?;
            let after = update_mastery(before, correct)?;
            let record = MasteryUpdate {
                skill_id: skill_id.clone(),
                item_id: item.id.clone(),
                prior_mastery: before.probability,
                posterior_mastery: after.probability,
                observed_correct: correct,
                timestamp: now,
            };
            updates.push((record, after));
        }
        for (record, after) in updates {
            session.mastery.insert(after.skill_id.clone(), after);
            session.mastery_updates.push(record);
        }

        let misconceptions_matched = if correct {
            Vec::new()
        } else {
            self.record_misconceptions(&mut session, item, &response.answer, now)
        };

        session.responses.push(ScoredResponse {
            item_id: item.id.clone(),
            answer: response.answer,
            correct,
            submitted_at: now,
            response_time_ms: response.response_time_ms,
        });

        let mut warnings = Vec::new();
        let mut termination = evaluate_termination(&session, &self.config.thresholds, now);
        let mut next_item = None;
        if termination.is_none() {
            match self.present_next(&mut session, now, &mut warnings)? {
                Some(next) => next_item = Some(next),
                None => termination = Some(TerminationReason::CatalogExhausted),
            }
        }

        let diagnosis = match termination {
            Some(reason) => Some(self.complete(&mut session, reason, now)?),
            None => None,
        };

        session.touch(now);
        self.store.set(session_id, &session)?;
        if let Some(next) = &next_item {
            self.catalog.items.record_exposure(&next.id);
        }

        Ok(SubmitOutcome {
            correct,
            is_complete: diagnosis.is_some(),
            next_item,
            diagnosis,
            misconceptions_matched,
            warnings,
        })
    }

    fn apply_pause(&self, session_id: &str) -> Result<DiagnosticSession, DiagnosticError> {
        let mut session = self.load(session_id)?;
        let now = self.clock.now_ms();
        session.transition_to(SessionStatus::Paused, "pause", now)?;
        session.paused_at = Some(now);
        session.touch(now);
        self.store.set(session_id, &session)?;

        debug!(
            session_id = %session_id,
            item_index = session.current_item_index,
            "session paused"
        );
        Ok(session)
    }

    fn apply_resume(&self, session_id: &str) -> Result<ResumeOutcome, DiagnosticError> {
        let mut session = self.load(session_id)?;
        let now = self.clock.now_ms();
        session.transition_to(SessionStatus::Active, "resume", now)?;
        if let Some(paused_at) = session.paused_at.take() {
            session.paused_ms += (now - paused_at).max(0);
        }

        let current_id = session
            .current_item_id()
            .map(str::to_string)
            .ok_or_else(|| {
                DiagnosticError::state_conflict(
                    session_id,
                    SessionStatus::Paused,
                    "resume without a frozen item",
                )
            })?;
        let current_item = self
            .catalog
            .items
            .get(&current_id)
            .cloned()
            .ok_or_else(|| DiagnosticError::UnknownItem {
                session_id: session_id.to_string(),
                item_id: current_id.clone(),
            })?;

        session.touch(now);
        self.store.set(session_id, &session)?;

        debug!(session_id = %session_id, item_id = %current_item.id, "session resumed");
        Ok(ResumeOutcome {
            session,
            current_item,
        })
    }

    pub fn get_session(&self, session_id: &str) -> Result<DiagnosticSession, DiagnosticError> {
        self.load(session_id)
    }

    pub fn get_progress(&self, session_id: &str) -> Result<Progress, DiagnosticError> {
        let session = self.load(session_id)?;
        let thresholds = &self.config.thresholds;

        let mastery_snapshot: Vec<SkillSnapshot> = session
            .mastery
            .values()
            .map(|m| SkillSnapshot {
                skill_id: m.skill_id.clone(),
                mastery: m.probability,
                band: classify(m.probability, thresholds),
                observations: m.observations,
            })
            .collect();

        let items_completed = session.responses.len();
        let min_items = session.config.min_items;
        let items_remaining = if session.status == SessionStatus::Complete {
            0
        } else if items_completed < min_items
            || session
                .mastery
                .values()
                .any(|m| is_uncertain(m.probability, thresholds))
        {
            session.config.max_items.saturating_sub(items_completed)
        } else {
            min_items.saturating_sub(items_completed)
        };

        Ok(Progress {
            session_id: session.id,
            status: session.status,
            items_completed,
            items_remaining,
            mastery_snapshot,
        })
    }

    /// Evicts sessions idle since before `before_ms`, skipping any that are mid-mutation.
    pub fn sweep_expired(&self, before_ms: i64) -> Result<SweepReport, DiagnosticError> {
        let mut report = SweepReport::default();
        for session_id in self.store.list_expired_before(before_ms)? {
            report.examined += 1;
            let lock = self.locks.handle(&session_id);
            match lock.try_lock() {
                Some(_guard) => {
                    // Re-check under the lock; a request may have landed since listing.
                    let still_expired = self
                        .store
                        .get(&session_id)?
                        .is_some_and(|s| s.updated_at < before_ms);
                    if still_expired && self.store.delete(&session_id)? {
                        report.evicted += 1;
                    }
                }
                None => {
                    report.skipped_locked += 1;
                    debug!(session_id = %session_id, "skipping eviction of locked session");
                }
            }
            drop(lock);
            self.locks.forget_if_idle(&session_id);
        }
        Ok(report)
    }

    /// Sweep using the configured retention window.
    pub fn sweep_idle(&self) -> Result<SweepReport, DiagnosticError> {
        let retention_ms = (self.config.session_retention_minutes as i64).saturating_mul(60_000);
        self.sweep_expired(self.clock.now_ms().saturating_sub(retention_ms))
    }

    pub fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    fn load(&self, session_id: &str) -> Result<DiagnosticSession, DiagnosticError> {
        self.store
            .get(session_id)?
            .ok_or_else(|| DiagnosticError::SessionNotFound(session_id.to_string()))
    }

    /// Skills whose items may be presented: target domains plus explicit target skills.
    fn candidate_skills(&self, config: &SessionConfig) -> BTreeSet<String> {
        let mut skills: BTreeSet<String> = self
            .catalog
            .skills
            .in_domains(&config.target_domains)
            .into_iter()
            .map(|s| s.id.clone())
            .collect();
        skills.extend(config.target_skills.iter().cloned());
        skills
    }

    /// In-scope skills in catalog order, extended with every skill touched by a candidate item.
    fn resolve_scope(&self, config: &SessionConfig) -> Result<Vec<String>, DiagnosticError> {
        for skill_id in &config.target_skills {
            self.catalog.skills.get_skill(skill_id)?;
        }

        let filter = CandidateFilter {
            skills: Some(self.candidate_skills(config)),
        };
        let candidates = self.catalog.items.list_candidates(&filter);
        if candidates.is_empty() {
            return Err(DiagnosticError::EmptyCatalog {
                domains: config.target_domains.clone(),
            });
        }

        let mut in_scope: BTreeSet<String> = filter.skills.unwrap_or_default();
        for candidate in &candidates {
            in_scope.extend(candidate.item.skill_ids.iter().cloned());
        }

        Ok(self
            .catalog
            .skills
            .skills()
            .iter()
            .filter(|s| in_scope.contains(&s.id))
            .map(|s| s.id.clone())
            .collect())
    }

    /// Selects and records the next item on the session. `None` means nothing is left to present.
    /// Exposure is counted by the caller once the session is persisted.
    fn present_next(
        &self,
        session: &mut DiagnosticSession,
        now: i64,
        warnings: &mut Vec<EngineWarning>,
    ) -> Result<Option<Item>, DiagnosticError> {
        let filter = CandidateFilter {
            skills: Some(self.candidate_skills(&session.config)),
        };
        let candidates = self.catalog.items.list_candidates(&filter);

        let mut constraints = SelectionConstraints::from_config(&self.config);
        constraints.target_skills = session.config.target_skills.iter().cloned().collect();
        constraints.excluded_items = session
            .items_presented
            .iter()
            .map(|p| p.item_id.clone())
            .collect::<HashSet<_>>();

        let selector = selector_for(self.config.selection.strategy, session.config.adaptive);
        let (chosen, fallback) =
            match selector.select_next(&candidates, &session.mastery, &constraints) {
                Some(candidate) => (candidate.item, false),
                None => {
                    let reason = DiagnosticError::NoCandidateItems;
                    let fallback = candidates
                        .iter()
                        .find(|c| !constraints.excluded_items.contains(&c.item.id));
                    match fallback {
                        Some(candidate) => {
                            warn!(
                                session_id = %session.id,
                                selector = selector.name(),
                                item_id = %candidate.item.id,
                                reason = %reason,
                                "selector exhausted, falling back to first unpresented item"
                            );
                            warnings.push(EngineWarning::SelectorFallback {
                                item_id: candidate.item.id.clone(),
                                reason: reason.to_string(),
                            });
                            (candidate.item, true)
                        }
                        None => {
                            debug!(session_id = %session.id, "no unpresented items remain");
                            return Ok(None);
                        }
                    }
                }
            };

        session.items_presented.push(PresentedItem {
            item_id: chosen.id.clone(),
            presented_at: now,
            fallback,
        });
        session.current_item_index = session.items_presented.len() - 1;
        if fallback {
            session.fallback_count = session.fallback_count.saturating_add(1);
        }

        Ok(Some(chosen.clone()))
    }

    fn record_misconceptions(
        &self,
        session: &mut DiagnosticSession,
        item: &Item,
        answer: &ResponseAnswer,
        now: i64,
    ) -> Vec<String> {
        let signatures = self.catalog.items.signatures(&item.id);
        let mut matched: Vec<String> = Vec::new();

        for signature in detect_misconceptions(signatures, answer) {
            if matched.contains(&signature.error_type) {
                continue;
            }
            matched.push(signature.error_type.clone());

            match session
                .misconceptions_detected
                .iter_mut()
                .find(|d| d.error_type == signature.error_type)
            {
                Some(existing) => {
                    existing.frequency = existing.frequency.saturating_add(1);
                    if !existing.item_ids.contains(&item.id) {
                        existing.item_ids.push(item.id.clone());
                    }
                    for skill_id in &item.skill_ids {
                        if !existing.skill_ids.contains(skill_id) {
                            existing.skill_ids.push(skill_id.clone());
                        }
                    }
                    existing.last_seen = now;
                }
                None => session.misconceptions_detected.push(DetectedMisconception {
                    error_type: signature.error_type.clone(),
                    description: signature.description.clone(),
                    frequency: 1,
                    item_ids: vec![item.id.clone()],
                    skill_ids: item.skill_ids.clone(),
                    first_seen: now,
                    last_seen: now,
                }),
            }
        }

        if !matched.is_empty() {
            debug!(
                session_id = %session.id,
                item_id = %item.id,
                matched = ?matched,
                "misconception detected"
            );
        }
        matched
    }

    fn complete(
        &self,
        session: &mut DiagnosticSession,
        reason: TerminationReason,
        now: i64,
    ) -> Result<FinalDiagnosis, DiagnosticError> {
        session.transition_to(SessionStatus::Complete, "complete", now)?;
        let diagnosis = synthesize(session, &self.catalog, &self.config, reason, now);
        session.final_diagnosis = Some(diagnosis.clone());
        session.completed_at = Some(now);

        info!(
            session_id = %session.id,
            termination = reason.as_str(),
            items = session.responses.len(),
            level = ?diagnosis.overall_level,
            fallbacks = session.fallback_count,
            "diagnostic session complete"
        );
        Ok(diagnosis)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::diagnostic::clock::ManualClock;
    use crate::diagnostic::store::{InMemorySessionStore, StoreError};

    /// In-memory store whose writes can be switched to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemorySessionStore,
        fail_writes: AtomicBool,
    }

    impl SessionStore for FlakyStore {
        fn get(&self, id: &str) -> Result<Option<DiagnosticSession>, StoreError> {
            self.inner.get(id)
        }

        fn set(&self, id: &str, session: &DiagnosticSession) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("write rejected".to_string()));
            }
            self.inner.set(id, session)
        }

        fn delete(&self, id: &str) -> Result<bool, StoreError> {
            self.inner.delete(id)
        }

        fn list_expired_before(&self, timestamp_ms: i64) -> Result<Vec<String>, StoreError> {
            self.inner.list_expired_before(timestamp_ms)
        }
    }

    const CATALOG: &str = r#"{
        "skills": [{"id": "ratio", "name": "Ratios", "domain": "number"}],
        "items": [
            {"id": "r1", "skillIds": ["ratio"], "irt": {"discrimination": 1.0, "difficulty": 0.0},
             "answer": {"kind": "freeText", "accepted": ["3:4"]}},
            {"id": "r2", "skillIds": ["ratio"], "irt": {"discrimination": 1.0, "difficulty": 1.0},
             "answer": {"kind": "freeText", "accepted": ["2:5"]}}
        ]
    }"#;

    fn engine() -> (DiagnosticEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let engine = DiagnosticEngine::with_clock(
            DiagnosticConfig::default(),
            Arc::new(Catalog::from_json_str(CATALOG).unwrap()),
            Arc::new(InMemorySessionStore::new()),
            Arc::clone(&clock) as Arc<dyn Clock>,
        )
        .unwrap();
        (engine, clock)
    }

    #[test]
    fn test_invalid_engine_config_rejected() {
        let mut config = DiagnosticConfig::default();
        config.thresholds.low = 0.9;
        let result = DiagnosticEngine::new(
            config,
            Arc::new(Catalog::from_json_str(CATALOG).unwrap()),
            Arc::new(InMemorySessionStore::new()),
        );
        assert!(matches!(result, Err(DiagnosticError::InvalidConfig(_))));
    }

    #[test]
    fn test_sweep_skips_locked_session() {
        let (engine, clock) = engine();
        let busy = engine
            .start_session("busy", SessionConfig::default())
            .unwrap();
        let idle = engine
            .start_session("idle", SessionConfig::default())
            .unwrap();
        clock.advance_ms(10_000);

        let handle = engine.locks.handle(&busy.session.id);
        let guard = handle.lock();
        let report = engine.sweep_expired(clock.now_ms()).unwrap();
        drop(guard);

        assert_eq!(
            report,
            SweepReport {
                examined: 2,
                evicted: 1,
                skipped_locked: 1
            }
        );
        assert!(engine.get_session(&busy.session.id).is_ok());
        assert!(matches!(
            engine.get_session(&idle.session.id),
            Err(DiagnosticError::SessionNotFound(_))
        ));
        assert_eq!(engine.tracked_locks(), 1);
        drop(handle);
    }

    #[test]
    fn test_sweep_idle_uses_retention_window() {
        let (engine, clock) = engine();
        engine
            .start_session("s", SessionConfig::default())
            .unwrap();
        clock.advance_ms(60_000);
        assert_eq!(engine.sweep_idle().unwrap().evicted, 0);

        clock.advance_ms(engine.config().session_retention_minutes as i64 * 60_000);
        assert_eq!(engine.sweep_idle().unwrap().evicted, 1);
    }

    #[test]
    fn test_locks_pruned_for_missing_sessions() {
        let (engine, _clock) = engine();
        for i in 0..100 {
            let id = format!("missing-{i}");
            assert!(matches!(
                engine.pause_session(&id),
                Err(DiagnosticError::SessionNotFound(_))
            ));
            assert!(matches!(
                engine.resume_session(&id),
                Err(DiagnosticError::SessionNotFound(_))
            ));
        }
        assert_eq!(engine.tracked_locks(), 0);
    }

    #[test]
    fn test_exposure_not_counted_when_store_write_fails() {
        let store = Arc::new(FlakyStore::default());
        let engine = DiagnosticEngine::with_clock(
            DiagnosticConfig::default(),
            Arc::new(Catalog::from_json_str(CATALOG).unwrap()),
            Arc::clone(&store) as Arc<dyn SessionStore>,
            Arc::new(ManualClock::new(0)),
        )
        .unwrap();

        store.fail_writes.store(true, Ordering::SeqCst);
        let result = engine.start_session("s", SessionConfig::default());
        assert!(matches!(result, Err(DiagnosticError::Store(_))));
        assert_eq!(engine.catalog().items.exposure("r1"), Some(0));
        assert_eq!(engine.catalog().items.exposure("r2"), Some(0));

        store.fail_writes.store(false, Ordering::SeqCst);
        let start = engine.start_session("s", SessionConfig::default()).unwrap();
        assert_eq!(engine.catalog().items.exposure(&start.first_item.id), Some(1));
    }

    #[test]
    fn test_free_text_scoring_is_case_insensitive() {
        let (engine, _clock) = engine();
        let start = engine
            .start_session("s", SessionConfig::default())
            .unwrap();
        let accepted = match &start.first_item.answer {
            AnswerKey::FreeText { accepted } => accepted[0].clone(),
            other => panic!("unexpected key {other:?}"),
        };
        let outcome = engine
            .submit_response(
                &start.session.id,
                Response {
                    item_id: start.first_item.id.clone(),
                    answer: ResponseAnswer::Text(format!("  {accepted} ")),
                    response_time_ms: None,
                },
            )
            .unwrap();
        assert!(outcome.correct);
        assert!(outcome.next_item.is_some());
    }
}
