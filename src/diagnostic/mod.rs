//! Adaptive skill diagnosis: BKT mastery tracking, IRT-driven item selection
//! and the session lifecycle that ties them together.

pub mod catalog;
pub mod clock;
pub mod config;
pub mod diagnosis;
pub mod engine;
pub mod error;
pub mod mastery;
pub mod scoring;
pub mod selection;
pub mod session;
pub mod store;
pub mod types;

pub use catalog::{Catalog, CatalogError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{DiagnosticConfig, SelectionStrategy};
pub use engine::{DiagnosticEngine, SweepReport};
pub use error::DiagnosticError;
pub use store::{InMemorySessionStore, SessionStore, StoreError};
pub use types::*;
