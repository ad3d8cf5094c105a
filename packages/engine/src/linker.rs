//! Creates and validates relative symlinks from a workspace into other
//! artifacts, so a mounted dependency's entry is reachable "as if" it had
//! been copied into the consuming workspace.

use std::path::{Path, PathBuf};

use tracing::instrument;

use crate::{
    error::EngineError,
    fs,
    layout::{self, validate_mount_path},
    path::{AbsDirPath, TryJoinWith as _},
};

/// The canonical relative target string a valid mount symlink should have:
/// the relative path from the mount's parent directory to the target
/// artifact's entry link.
///
/// Dereferencing the mount therefore resolves transitively through the
/// target's entry link into the target's own workspace.
pub fn expected_link_target(
    workspace_dir: &AbsDirPath,
    mount: &str,
    target_artifact_dir: &AbsDirPath,
) -> Result<PathBuf, EngineError> {
    validate_mount_path(mount)?;
    let mount_path = workspace_dir.as_std_path().join(mount);
    let mount_parent = mount_path
        .parent()
        .expect("joined path always has a parent");
    let target_entry = target_artifact_dir
        .as_std_path()
        .join(layout::ENTRY_LINK_NAME);

    pathdiff::diff_paths(&target_entry, mount_parent).ok_or_else(|| EngineError::InvalidArgument {
        message: format!(
            "cannot compute relative path from {mount_parent:?} to {target_entry:?}"
        ),
    })
}

/// Create the parent directories for `mount` inside `workspace_dir`, then
/// symlink `workspace_dir/mount` to the target artifact's entry link.
#[instrument(skip(workspace_dir, target_artifact_dir))]
pub async fn link_dependency(
    workspace_dir: &AbsDirPath,
    mount: &str,
    target_artifact_dir: &AbsDirPath,
) -> Result<(), EngineError> {
    let target = expected_link_target(workspace_dir, mount, target_artifact_dir)?;
    let link = workspace_dir
        .try_join_file(mount)
        .map_err(|err| EngineError::InvalidArgument {
            message: format!("build mount path: {err}"),
        })?;
    fs::symlink(&target, &link)
        .await
        .map_err(|err| EngineError::Io(std::io::Error::other(err.to_string())))
}

/// Outcome of checking whether a mount still matches its declared dependency.
#[derive(Debug, Eq, PartialEq)]
pub enum MountStatus {
    /// The mount's literal target matches `expected` and the target stats.
    Valid,
    /// The mount is missing, its target string has drifted from `expected`,
    /// or its target can no longer be stat'd (the dependency was removed
    /// out-of-band). Either way, recovery must re-link it.
    Stale,
}

/// Check whether the mount at `workspace_dir/mount` still points at
/// `expected` and that the resolved target is actually present on disk.
#[instrument(skip(workspace_dir, expected))]
pub async fn validate_mount(
    workspace_dir: &AbsDirPath,
    mount: &str,
    expected: &Path,
) -> Result<MountStatus, EngineError> {
    let link = workspace_dir
        .try_join_file(mount)
        .map_err(|err| EngineError::InvalidArgument {
            message: format!("build mount path: {err}"),
        })?;

    let Some(actual) = fs::read_link(&link)
        .await
        .map_err(|err| EngineError::Io(std::io::Error::other(err.to_string())))?
    else {
        return Ok(MountStatus::Stale);
    };

    if actual != expected {
        return Ok(MountStatus::Stale);
    }

    // The link's literal target matches; confirm it still resolves (the
    // dependency might have been deleted out-of-band since the link was
    // created).
    let link_parent = link.parent().expect("mount always has a parent");
    let resolved = link_parent.as_std_path().join(&actual);
    if fs::exists(&resolved).await {
        Ok(MountStatus::Valid)
    } else {
        Ok(MountStatus::Stale)
    }
}
