//! Reads and writes the descriptor file, and creates/validates the entry
//! symlink.
//!
//! The descriptor's presence is the existence predicate for an artifact; the
//! entry link is the indirection that lets a user `fn` name its own output
//! layout under `workspace/` while giving every artifact a uniform
//! "here's the thing" pointer.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tracing::{instrument, trace};

use crate::{
    error::EngineError,
    fs,
    layout::{self, validate_entry},
    path::{AbsDirPath, AbsFilePath, normalize_lexically},
};

#[cfg(test)]
use crate::path::TryJoinWith as _;

/// Current wire format version for [`Descriptor`].
pub const MANIFEST_VERSION: &str = "1.0.0";

/// The reserved JSON record whose presence defines artifact existence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Descriptor {
    pub manifest_version: String,
    pub kind: String,
    pub input: serde_json::Value,
    #[serde(default = "serde_json::Map::new")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Descriptor {
    /// Build a fresh descriptor for a first-time publish: `created_at` and
    /// `updated_at` start equal, per the data model's lifecycle rule that
    /// `created_at` is immutable across republish.
    pub fn new(
        kind: impl Into<String>,
        input: serde_json::Value,
        metadata: serde_json::Map<String, serde_json::Value>,
        now: Timestamp,
    ) -> Self {
        Self {
            manifest_version: MANIFEST_VERSION.to_owned(),
            kind: kind.into(),
            input,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Serialize `record` into the reserved descriptor filename under `dir`.
#[instrument(skip(record))]
pub async fn write_descriptor(dir: &AbsDirPath, record: &Descriptor) -> Result<(), EngineError> {
    let path = layout::descriptor_path(dir)?;
    let body = serde_json::to_vec_pretty(record).map_err(|err| EngineError::InvalidArgument {
        message: format!("serialize descriptor: {err}"),
    })?;
    fs::write(&path, body)
        .await
        .map_err(|err| EngineError::Io(io_from_report(err)))?;
    trace!(?path, "wrote descriptor");
    Ok(())
}

/// Read and parse the descriptor under `dir`.
///
/// Returns `Ok(None)` if the descriptor is absent (a cache miss), and
/// `Err(EngineError::Corrupt)` if it exists but fails to parse — the caller
/// must decide what to do (surface, or delete and retry), never silently
/// treat corruption as absence.
#[instrument]
pub async fn read_descriptor(dir: &AbsDirPath) -> Result<Option<Descriptor>, EngineError> {
    let path = layout::descriptor_path(dir)?;
    let Some(bytes) = fs::read_buffered(&path)
        .await
        .map_err(|err| EngineError::Io(io_from_report(err)))?
    else {
        return Ok(None);
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|err| EngineError::Corrupt {
            path: path.into(),
            message: format!("invalid descriptor JSON: {err}"),
        })
}

/// Whether the descriptor file exists under `dir` (the artifact existence
/// predicate). Does not validate that it parses.
#[instrument]
pub async fn artifact_exists(dir: &AbsDirPath) -> Result<bool, EngineError> {
    let path = layout::descriptor_path(dir)?;
    Ok(fs::is_file(path.as_std_path()).await)
}

/// Create the entry symlink under `dir`, pointing at `workspace/<entry>`.
///
/// The target is written as a relative path so artifacts remain relocatable.
#[instrument]
pub async fn create_entry_link(dir: &AbsDirPath, entry: &str) -> Result<(), EngineError> {
    validate_entry(entry)?;
    let link = layout::entry_link_path(dir)?;
    let target = std::path::PathBuf::from(format!("{}/{entry}", layout::WORKSPACE_DIR_NAME));
    fs::symlink(&target, &link)
        .await
        .map_err(|err| EngineError::Io(io_from_report(err)))
}

/// Follow the entry symlink under `dir` and verify the resolved path lies
/// within `workspace/`.
///
/// Fails with [`EngineError::Corrupt`] if the link is missing or escapes the
/// workspace — per the invariant that any link escaping `workspace/` is
/// corruption, not a valid (if unusual) artifact.
#[instrument]
pub async fn resolve_entry_link(dir: &AbsDirPath) -> Result<AbsFilePath, EngineError> {
    let link = layout::entry_link_path(dir)?;
    let target = fs::read_link(&link)
        .await
        .map_err(|err| EngineError::Io(io_from_report(err)))?
        .ok_or_else(|| EngineError::Corrupt {
            path: link.clone().into(),
            message: "entry link is missing".into(),
        })?;

    let workspace = layout::workspace_dir(dir)?;
    let resolved_abs = normalize_lexically(dir.as_std_path().join(&target).as_path());

    if !resolved_abs.starts_with(workspace.as_std_path()) {
        return Err(EngineError::Corrupt {
            path: link.into(),
            message: format!("entry link escapes workspace: target = {target:?}"),
        });
    }

    AbsFilePath::try_from(resolved_abs).map_err(|err| EngineError::Corrupt {
        path: link.into(),
        message: format!("resolved entry path is invalid: {err}"),
    })
}

/// Bridge a `color_eyre::Report` from the `fs` helpers back into a plain
/// `std::io::Error` so it composes with [`EngineError::Io`]'s `#[from]`.
///
/// The `fs` module wraps IO errors with `.context(...)` breadcrumbs for
/// tracing; once we're collapsing into the typed error we only need the
/// message, not the original error kind, since callers key off the
/// `EngineError` variant rather than the wrapped `io::ErrorKind`.
fn io_from_report(err: color_eyre::eyre::Error) -> std::io::Error {
    std::io::Error::other(err.to_string())
}
