//! service-validator-runner: executes validation sessions against live services
//!
//! Reads an OpenAPI document, builds cases, sends them and evaluates the
//! responses with the session's checks. Also hosts request-log replay and the
//! bearer token exchange.

pub mod auth;
pub mod datagen;
pub mod engine;
pub mod filter;
pub mod replay;

use service_validator_core::{Registry, RegistryError, handbook_registry};

pub use auth::{AuthError, BasicAuth, fetch_bearer_token};
pub use engine::checks::native_registry;
pub use engine::phases::Phase;
pub use engine::spec::{Operation, fetch_document, load_document};
pub use engine::{RunReport, Runner, RunnerError};
pub use filter::{FilterError, OperationFilter};
pub use replay::{ReplayFilter, ReplayOutcome, Replayer};

/// Every rule the tool knows: the handbook rules followed by the native
/// checks.
///
/// # Errors
///
/// Returns error if two rules share a name.
pub fn builtin_registry() -> Result<Registry, RegistryError> {
    let mut registry = handbook_registry()?;
    registry.extend(native_registry()?)?;
    Ok(registry)
}
