//! Typed error taxonomy for the engine's public surface.
//!
//! Internal plumbing threads `color_eyre::Result` with `.context(...)` the
//! way the rest of this codebase does; at the boundary of `Engine`/`Registry`
//! methods we collapse into this enum so callers can pattern-match on what
//! kind of failure happened (surface vs. retry vs. forget), per the
//! propagation policy.

use std::path::PathBuf;

use color_eyre::Report;
use thiserror::Error;

use crate::fingerprint::Fingerprint;

/// Errors returned from the engine's public API.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `kind`, an `entry`, or a dependency mount path failed validation.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The `(kind, input)` pair could not be canonically serialized.
    #[error("unserializable input for kind {kind:?}: {message}")]
    Unserializable { kind: String, message: String },

    /// `execute`/`peek`/`forget` referenced a `kind` with no registered executor.
    #[error("unknown executor: {kind:?}")]
    NotFound { kind: String },

    /// The descriptor file or entry link exists but is invalid.
    #[error("corrupt artifact at {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    /// A filesystem operation failed for a reason other than the above.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The user-supplied executor function returned an error.
    #[error("executor {kind:?} ({fingerprint}) failed: {source}")]
    UserFnFailed {
        kind: String,
        fingerprint: Fingerprint,
        #[source]
        source: Report,
    },

    /// A nested `execute` call for a dependency failed.
    #[error("dependency {mount:?} of {kind:?} ({fingerprint}) failed: {source}")]
    DependencyFailed {
        kind: String,
        fingerprint: Fingerprint,
        mount: String,
        #[source]
        source: Box<EngineError>,
    },
}

/// Internal result type used by plumbing that hasn't yet been collapsed into
/// [`EngineError`]. Kept separate from the public error so that `color_eyre`
/// report chains (with their rich `.context()` breadcrumbs) aren't part of
/// the stable public API.
pub type Result<T> = color_eyre::Result<T>;
