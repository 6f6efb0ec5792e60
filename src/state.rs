use std::sync::Arc;
use std::time::Instant;

use crate::diagnostic::{
    Catalog, DiagnosticConfig, DiagnosticEngine, DiagnosticError, InMemorySessionStore,
    SessionStore,
};

/// Host-lifetime wiring shared by the demo runner and the workers.
#[derive(Clone)]
pub struct AppState {
    started_at: Instant,
    engine: Arc<DiagnosticEngine>,
    store: Arc<InMemorySessionStore>,
}

impl AppState {
    pub fn new(catalog: Catalog, config: DiagnosticConfig) -> Result<Self, DiagnosticError> {
        let store = Arc::new(InMemorySessionStore::new());
        let engine = DiagnosticEngine::new(
            config,
            Arc::new(catalog),
            Arc::clone(&store) as Arc<dyn SessionStore>,
        )?;
        Ok(Self {
            started_at: Instant::now(),
            engine: Arc::new(engine),
            store,
        })
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn engine(&self) -> Arc<DiagnosticEngine> {
        Arc::clone(&self.engine)
    }

    pub fn session_count(&self) -> usize {
        self.store.len()
    }
}
