use thiserror::Error;

use crate::diagnostic::catalog::CatalogError;
use crate::diagnostic::store::StoreError;
use crate::diagnostic::types::SessionStatus;

#[derive(Debug, Error)]
pub enum DiagnosticError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("no catalog items match target domains {domains:?}")]
    EmptyCatalog { domains: Vec<String> },
    #[error("session {session_id}: cannot {action} while {status}")]
    StateConflict {
        session_id: String,
        status: SessionStatus,
        action: String,
    },
    #[error("unknown item {item_id} for session {session_id}")]
    UnknownItem { session_id: String, item_id: String },
    #[error("unknown skill: {0}")]
    UnknownSkill(String),
    #[error("no candidate items satisfy selection constraints")]
    NoCandidateItems,
    #[error("mastery update for skill {skill_id} left [0,1]: {value}")]
    NumericGuard { skill_id: String, value: f64 },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DiagnosticError {
    pub fn state_conflict(
        session_id: impl Into<String>,
        status: SessionStatus,
        action: impl Into<String>,
    ) -> Self {
        Self::StateConflict {
            session_id: session_id.into(),
            status,
            action: action.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::EmptyCatalog { .. } => "EMPTY_CATALOG",
            Self::StateConflict { .. } => "STATE_CONFLICT",
            Self::UnknownItem { .. } => "UNKNOWN_ITEM",
            Self::UnknownSkill(_) => "UNKNOWN_SKILL",
            Self::NoCandidateItems => "NO_CANDIDATE_ITEMS",
            Self::NumericGuard { .. } => "NUMERIC_GUARD",
            Self::InvalidResponse(_) => "INVALID_RESPONSE",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::Catalog(_) => "CATALOG_ERROR",
            Self::Store(_) => "STORE_ERROR",
        }
    }

    /// HTTP-equivalent status a host should surface for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidConfig(_) | Self::InvalidResponse(_) => 400,
            Self::SessionNotFound(_) | Self::UnknownSkill(_) => 404,
            Self::StateConflict { .. } => 409,
            Self::UnknownItem { .. } | Self::EmptyCatalog { .. } => 422,
            Self::NoCandidateItems
            | Self::NumericGuard { .. }
            | Self::Catalog(_)
            | Self::Store(_) => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}
