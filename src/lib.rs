// execbox library crate
// This file exports the necessary modules for external use

pub mod admission;
pub mod catalog;
pub mod config;
pub mod error;
pub mod executor;
pub mod fallback;
pub mod http;
pub mod sandbox;
pub mod screen;
pub mod supervisor;

// Re-export commonly used types
pub use catalog::{Catalog, LanguageSpec};
pub use config::Settings;
pub use error::{ErrorType, ExecError};
pub use executor::{select_backend, ExecutionBackend, ExecutionRequest, ExecutionResult};
pub use http::{AppState, RequestLog};
