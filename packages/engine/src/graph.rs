//! Reconstructs the dependency DAG by walking the on-disk store, with no
//! side-channel index: every edge is a mount symlink, and every node is a
//! directory holding a descriptor.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{instrument, trace};

use crate::{
    error::EngineError,
    fingerprint::Fingerprint,
    layout::{self, SCRATCH_PREFIX, STORE_DIR_NAME},
    manifest::{self, Descriptor},
    path::{AbsDirPath, TryJoinWith as _},
};

/// One artifact discovered while walking the store.
#[derive(Clone, Debug)]
pub struct ArtifactInfo {
    pub kind: String,
    pub fingerprint: Fingerprint,
    pub input: Value,
    pub metadata: serde_json::Map<String, Value>,
    /// Mount name -> dependency's `(kind, fingerprint)`, discovered by
    /// following each workspace symlink back to the artifact it targets.
    pub dependencies: BTreeMap<String, (String, Fingerprint)>,
}

/// The reconstructed store contents for one `store_version`.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    pub artifacts: Vec<ArtifactInfo>,
}

/// Walk `root/fs-data/<store_version>` and reconstruct every published
/// artifact and its dependency edges.
///
/// Scratch directories (prefixed with [`SCRATCH_PREFIX`]) are skipped: an
/// in-progress build is not yet part of the graph. A dependency edge whose
/// target artifact is absent (the dependency was `forget`-ten after this
/// artifact was published, or the mount link is corrupt) is simply omitted
/// from that artifact's `dependencies` map rather than failing the whole
/// walk — a single broken mount elsewhere in the store must not make the
/// rest of the graph unreadable.
#[instrument(skip(root))]
pub async fn list_artifacts(root: &AbsDirPath, store_version: &str) -> Result<Graph, EngineError> {
    let store_dir = root
        .try_join_dirs([STORE_DIR_NAME, store_version])
        .map_err(|err| EngineError::InvalidArgument {
            message: format!("build store directory: {err}"),
        })?;

    let mut artifacts = Vec::new();

    for kind in crate::fs::list_dir_names(&store_dir)
        .await
        .map_err(|err| EngineError::Io(std::io::Error::other(err.to_string())))?
    {
        if layout::validate_kind(&kind).is_err() {
            continue;
        }
        let kind_dir = store_dir
            .try_join_dir(&kind)
            .map_err(|err| EngineError::InvalidArgument {
                message: format!("build kind directory: {err}"),
            })?;

        for shard in crate::fs::list_dir_names(&kind_dir)
            .await
            .map_err(|err| EngineError::Io(std::io::Error::other(err.to_string())))?
        {
            let shard_dir = kind_dir
                .try_join_dir(&shard)
                .map_err(|err| EngineError::InvalidArgument {
                    message: format!("build shard directory: {err}"),
                })?;

            for entry_name in crate::fs::list_dir_names(&shard_dir)
                .await
                .map_err(|err| EngineError::Io(std::io::Error::other(err.to_string())))?
            {
                if entry_name.starts_with(SCRATCH_PREFIX) {
                    trace!(%entry_name, "skipping scratch directory");
                    continue;
                }
                let Ok(fingerprint) = entry_name.parse::<Fingerprint>() else {
                    continue;
                };

                let artifact_dir = shard_dir.try_join_dir(&entry_name).map_err(|err| {
                    EngineError::InvalidArgument {
                        message: format!("build artifact directory: {err}"),
                    }
                })?;

                let Some(descriptor) = manifest::read_descriptor(&artifact_dir).await? else {
                    continue;
                };

                let dependencies = discover_dependencies(root, store_version, &artifact_dir, &descriptor).await?;

                artifacts.push(ArtifactInfo {
                    kind: kind.clone(),
                    fingerprint,
                    input: descriptor.input,
                    metadata: descriptor.metadata,
                    dependencies,
                });
            }
        }
    }

    Ok(Graph { artifacts })
}

/// Walk every symlink under `artifact_dir/workspace` and resolve each one
/// that points through another artifact's entry link back to that
/// artifact's `(kind, fingerprint)`.
async fn discover_dependencies(
    root: &AbsDirPath,
    store_version: &str,
    artifact_dir: &AbsDirPath,
    _descriptor: &Descriptor,
) -> Result<BTreeMap<String, (String, Fingerprint)>, EngineError> {
    let workspace = layout::workspace_dir(artifact_dir)?;
    let store_dir = root
        .try_join_dirs([STORE_DIR_NAME, store_version])
        .map_err(|err| EngineError::InvalidArgument {
            message: format!("build store directory: {err}"),
        })?;

    let mut dependencies = BTreeMap::new();
    walk_mounts(&workspace, &workspace, &store_dir, &mut dependencies).await?;
    Ok(dependencies)
}

/// Recursively visit `dir` (rooted at `workspace`), recording any symlink
/// whose resolved target falls under `store_dir/<kind>/<shard>/<fingerprint>`.
fn walk_mounts<'a>(
    workspace: &'a AbsDirPath,
    dir: &'a AbsDirPath,
    store_dir: &'a AbsDirPath,
    out: &'a mut BTreeMap<String, (String, Fingerprint)>,
) -> futures::future::BoxFuture<'a, Result<(), EngineError>> {
    Box::pin(async move {
        for name in crate::fs::list_dir_names(dir)
            .await
            .map_err(|err| EngineError::Io(std::io::Error::other(err.to_string())))?
        {
            let child = dir
                .try_join_dir(&name)
                .map_err(|err| EngineError::InvalidArgument {
                    message: format!("build path: {err}"),
                })?;
            let child_file = dir
                .try_join_file(&name)
                .map_err(|err| EngineError::InvalidArgument {
                    message: format!("build path: {err}"),
                })?;

            if let Some(target) = crate::fs::read_link(&child_file)
                .await
                .map_err(|err| EngineError::Io(std::io::Error::other(err.to_string())))?
            {
                let parent = child_file.parent().expect("mount has a parent");
                let resolved = crate::path::normalize_lexically(
                    &parent.as_std_path().join(&target),
                );
                if let Some((kind, fingerprint)) = kind_and_fingerprint_under(store_dir, &resolved) {
                    let mount = child_file
                        .as_std_path()
                        .strip_prefix(workspace.as_std_path())
                        .expect("child lies under workspace")
                        .to_string_lossy()
                        .into_owned();
                    out.insert(mount, (kind, fingerprint));
                }
                continue;
            }

            if crate::fs::is_dir(child.as_std_path()).await {
                walk_mounts(workspace, &child, store_dir, out).await?;
            }
        }
        Ok(())
    })
}

/// If `resolved` lies at `store_dir/<kind>/<shard>/<fingerprint>[/...]`,
/// extract `(kind, fingerprint)`.
fn kind_and_fingerprint_under(
    store_dir: &AbsDirPath,
    resolved: &std::path::Path,
) -> Option<(String, Fingerprint)> {
    let relative = resolved.strip_prefix(store_dir.as_std_path()).ok()?;
    let mut components = relative.components();
    let kind = components.next()?.as_os_str().to_str()?.to_owned();
    let _shard = components.next()?;
    let fingerprint_str = components.next()?.as_os_str().to_str()?;
    let fingerprint = fingerprint_str.parse::<Fingerprint>().ok()?;
    Some((kind, fingerprint))
}
