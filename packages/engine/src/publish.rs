//! Scratch-and-rename publish protocol: build in an isolated, uniquely
//! named scratch directory, then attempt one atomic `rename` into the
//! artifact's final location.
//!
//! POSIX `rename(2)` into an occupied directory fails rather than merging,
//! which is exactly the winner-takes-all semantics a concurrent cache wants:
//! whichever caller's scratch directory lands first becomes the artifact,
//! and every other concurrent builder discards its own (otherwise perfectly
//! valid) output.

use tracing::{instrument, trace, warn};

use crate::{
    error::EngineError,
    fs::{self, RenameOutcome},
    layout::{self, ArtifactLayout},
    path::AbsDirPath,
};

#[cfg(test)]
use crate::path::TryJoinWith as _;

/// Create the scratch directory and its `workspace/` subdirectory for a
/// fresh build attempt, returning the workspace path the user `fn` and
/// dependency linker operate on.
#[instrument(skip(layout))]
pub async fn prepare_scratch(
    layout: &ArtifactLayout,
    nonce: &str,
) -> Result<(AbsDirPath, AbsDirPath), EngineError> {
    let scratch_dir = layout.scratch_dir(nonce)?;
    let workspace = layout::workspace_dir(&scratch_dir)?;
    fs::create_dir_all(&workspace)
        .await
        .map_err(|err| EngineError::Io(std::io::Error::other(err.to_string())))?;
    Ok((scratch_dir, workspace))
}

/// Attempt to publish `scratch_dir` as `artifact_dir`.
///
/// Returns `true` if this call's rename won the race and `artifact_dir` is
/// now this scratch directory's content; `false` if another concurrent
/// publisher won first, in which case `scratch_dir` has already been
/// removed and the caller should treat `artifact_dir` as already present.
#[instrument(skip(scratch_dir, artifact_dir))]
pub async fn publish(
    scratch_dir: &AbsDirPath,
    artifact_dir: &AbsDirPath,
) -> Result<bool, EngineError> {
    match fs::rename_publish(scratch_dir, artifact_dir)
        .await
        .map_err(|err| EngineError::Io(std::io::Error::other(err.to_string())))?
    {
        RenameOutcome::Published => {
            trace!(?artifact_dir, "published artifact");
            Ok(true)
        }
        RenameOutcome::LostRace => {
            warn!(?scratch_dir, ?artifact_dir, "lost publish race, discarding scratch");
            cleanup_scratch(scratch_dir).await?;
            Ok(false)
        }
    }
}

/// Best-effort removal of a scratch directory, used both after losing a
/// publish race and after a failed build attempt.
#[instrument(skip(scratch_dir))]
pub async fn cleanup_scratch(scratch_dir: &AbsDirPath) -> Result<(), EngineError> {
    fs::remove_dir_all(scratch_dir)
        .await
        .map_err(|err| EngineError::Io(std::io::Error::other(err.to_string())))
}
