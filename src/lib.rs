pub mod config;
pub mod diagnostic;
pub mod logging;
pub mod state;
pub mod workers;

pub use diagnostic::{DiagnosticConfig, DiagnosticEngine, DiagnosticError};
