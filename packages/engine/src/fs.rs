//! Filesystem operations tailored to the engine.
//!
//! Inside this module we refer to `tokio::fs` by its fully qualified path so
//! it's maximally clear what we're using; callers should go through here
//! instead of touching `tokio::fs`/`std::fs` directly so that error context
//! and tracing stay consistent.

use std::{convert::identity, fmt::Debug as StdDebug, path::Path};

use color_eyre::{Result, eyre::Context};
use tracing::{instrument, trace};

use crate::path::{Abs, AbsDirPath, AbsFilePath, TypedPath};

/// Create the directory and all its parents, if they don't already exist.
#[instrument]
pub async fn create_dir_all(dir: &AbsDirPath) -> Result<()> {
    tokio::fs::create_dir_all(dir.as_std_path())
        .await
        .with_context(|| format!("create dir: {dir:?}"))
        .inspect(|_| trace!(?dir, "create directory"))
}

/// Remove the directory and all its contents.
///
/// Tolerates the directory already being absent, since callers use this for
/// best-effort scratch cleanup and idempotent `forget`.
#[instrument]
pub async fn remove_dir_all(dir: &AbsDirPath) -> Result<()> {
    match tokio::fs::remove_dir_all(dir.as_std_path()).await {
        Ok(()) => {
            trace!(?dir, "removed directory");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            trace!(?dir, "removed directory (already removed)");
            Ok(())
        }
        Err(err) => Err(err).context(format!("remove directory: {dir:?}")),
    }
}

/// Outcome of attempting to publish a scratch directory to its final path.
pub enum RenameOutcome {
    /// The rename succeeded; the scratch directory is now the final artifact.
    Published,
    /// Another writer had already published to the destination first.
    LostRace,
}

/// Rename `src` to `dst`, distinguishing a lost publish race from other
/// rename failures.
///
/// On POSIX, `rename()` of a directory onto an existing non-empty directory
/// fails atomically with `ENOTEMPTY` (surfaced as `DirectoryNotEmpty`, or
/// `AlreadyExists` on platforms/older std where the two aren't distinguished).
/// That failure mode is exactly the "someone else already published this
/// fingerprint" case and is not an error from the caller's point of view.
#[instrument]
pub async fn rename_publish(
    src: &TypedPath<Abs, crate::path::Dir>,
    dst: &TypedPath<Abs, crate::path::Dir>,
) -> Result<RenameOutcome> {
    match tokio::fs::rename(src.as_std_path(), dst.as_std_path()).await {
        Ok(()) => {
            trace!(?src, ?dst, "published via rename");
            Ok(RenameOutcome::Published)
        }
        Err(err)
            if matches!(
                err.kind(),
                std::io::ErrorKind::AlreadyExists | std::io::ErrorKind::DirectoryNotEmpty
            ) =>
        {
            trace!(?src, ?dst, "lost publish race");
            Ok(RenameOutcome::LostRace)
        }
        Err(err) => Err(err).context(format!("rename {src:?} -> {dst:?}")),
    }
}

/// Write the provided file content to disk, creating parent directories.
#[instrument(skip(content))]
pub async fn write(path: &AbsFilePath, content: impl AsRef<[u8]>) -> Result<()> {
    let content = content.as_ref();
    if let Some(parent) = path.parent() {
        create_dir_all(&parent)
            .await
            .context("create parent directory")?;
    }
    tokio::fs::write(path.as_std_path(), content)
        .await
        .with_context(|| format!("write file: {path:?}"))
        .inspect(|_| trace!(?path, bytes = content.len(), "write file"))
}

/// Buffer the file content from disk, returning `None` if it doesn't exist.
#[instrument]
pub async fn read_buffered(path: &AbsFilePath) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path.as_std_path()).await {
        Ok(buf) => {
            trace!(?path, bytes = buf.len(), "read file");
            Ok(Some(buf))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).context(format!("read file: {path:?}")),
    }
}

/// Create a symlink at `link` pointing to `target`.
///
/// `target` is written exactly as given (relative or absolute) and is not
/// validated for existence; callers are responsible for constructing a
/// target string with the right semantics (see `layout` and `linker`).
#[instrument]
pub async fn symlink(target: &Path, link: &AbsFilePath) -> Result<()> {
    if let Some(parent) = link.parent() {
        create_dir_all(&parent)
            .await
            .context("create parent directory")?;
    }
    let target = target.to_path_buf();
    let link_path = link.as_std_path().to_path_buf();
    tokio::task::spawn_blocking(move || create_symlink(&target, &link_path))
        .await
        .context("join task")?
        .with_context(|| format!("symlink {link:?}"))
        .inspect(|_| trace!(?link, "created symlink"))
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    // The artifact entry link always points at a file inside `workspace/`, so
    // a file symlink is correct here. Dependency mounts may point through
    // another entry link and are resolved the same way at read time.
    std::os::windows::fs::symlink_file(target, link)
}

/// Read the literal (unresolved) target of a symlink.
///
/// Returns `None` both when nothing exists at `link` and when something
/// exists there but isn't a symlink (`ErrorKind::InvalidInput` on POSIX),
/// since callers use this to probe "is this a mount" without first checking
/// the entry's type themselves.
#[instrument]
pub async fn read_link(link: &AbsFilePath) -> Result<Option<std::path::PathBuf>> {
    match tokio::fs::read_link(link.as_std_path()).await {
        Ok(target) => Ok(Some(target)),
        Err(err)
            if matches!(
                err.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::InvalidInput
            ) =>
        {
            Ok(None)
        }
        Err(err) => Err(err).context(format!("read link: {link:?}")),
    }
}

/// Remove a symlink (or file), tolerating it already being absent.
#[instrument]
pub async fn remove_link(link: &AbsFilePath) -> Result<()> {
    match tokio::fs::remove_file(link.as_std_path()).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).context(format!("remove link: {link:?}")),
    }
}

/// Check whether the path exists (following symlinks).
///
/// Prone to TOCTOU races like any such check; only use this for advisory
/// probes, not as a substitute for handling the error from a subsequent
/// operation.
#[instrument]
pub async fn exists(path: impl AsRef<std::path::Path> + StdDebug) -> bool {
    tokio::fs::try_exists(path).await.is_ok_and(identity)
}

/// Return whether the path represents a directory, following symlinks.
#[instrument]
pub async fn is_dir(path: impl AsRef<std::path::Path> + StdDebug) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|m| m.is_dir())
}

/// Return whether the path represents a regular file, following symlinks.
#[instrument]
pub async fn is_file(path: impl AsRef<std::path::Path> + StdDebug) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|m| m.is_file())
}

/// List the immediate children of a directory as file names.
///
/// Returns an empty vector if the directory doesn't exist.
#[instrument]
pub async fn list_dir_names(dir: &AbsDirPath) -> Result<Vec<String>> {
    let mut entries = match tokio::fs::read_dir(dir.as_std_path()).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).context(format!("read directory: {dir:?}")),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("read directory entry: {dir:?}"))?
    {
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_owned());
        }
    }
    Ok(names)
}
