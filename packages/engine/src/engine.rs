//! The `Engine`: ties fingerprinting, layout, the manifest, the dependency
//! linker, and the publish protocol together into `execute`/`peek`/`forget`.

use std::collections::HashMap;

use futures::future::{BoxFuture, try_join_all};
use tracing::{info, instrument, warn};

use crate::{
    error::EngineError,
    executor::{ExecutorConfig, Registry},
    fingerprint::Fingerprint,
    fs, layout, linker,
    manifest::{self, Descriptor},
    path::{AbsDirPath, AbsFilePath, TryJoinWith as _},
    publish,
};

/// Default on-disk store layout version. Bumped when the descriptor or
/// layout format changes incompatibly.
pub const DEFAULT_STORE_VERSION: &str = "v1";

/// Knobs that don't belong on every call site.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Layout/descriptor format version, namespacing the store so an
    /// incompatible upgrade doesn't collide with artifacts from an older
    /// binary.
    pub store_version: String,
    /// Whether a failed build (user `fn` error, dependency failure, or
    /// descriptor write failure) removes its scratch directory. Disable to
    /// leave failed attempts on disk for post-mortem inspection.
    pub cleanup_scratch_on_failure: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_version: DEFAULT_STORE_VERSION.to_owned(),
            cleanup_scratch_on_failure: true,
        }
    }
}

/// Chain of `(kind, fingerprint)` ancestors for the top-level `execute` call
/// currently in flight, used to reject dependency cycles before they recurse
/// forever.
type Ancestors = Vec<(String, Fingerprint)>;

/// A content-addressed filesystem execution/cache engine rooted at a single
/// directory.
///
/// Cheap to clone: everything inside is an owned path, a config struct, or a
/// `Registry` (itself backed by a concurrent map), so sharing one `Engine`
/// across tasks is the expected usage.
#[derive(Clone)]
pub struct Engine {
    root: AbsDirPath,
    registry: Registry,
    config: EngineConfig,
}

impl Engine {
    pub fn new(root: AbsDirPath, registry: Registry) -> Self {
        Self::with_config(root, registry, EngineConfig::default())
    }

    pub fn with_config(root: AbsDirPath, registry: Registry, config: EngineConfig) -> Self {
        Self {
            root,
            registry,
            config,
        }
    }

    pub fn root(&self) -> &AbsDirPath {
        &self.root
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run (or reuse the cached result of) the executor registered for
    /// `kind`, returning the resolved entry path.
    #[instrument(skip(self, input))]
    pub async fn execute(
        &self,
        kind: &str,
        input: serde_json::Value,
        force_recompute: bool,
    ) -> Result<AbsFilePath, EngineError> {
        let artifact_dir = self
            .resolve_artifact_dir(kind.to_owned(), input, force_recompute, Vec::new())
            .await?;
        manifest::resolve_entry_link(&artifact_dir).await
    }

    /// Probe whether `(kind, input)` is already cached, without executing
    /// anything or recovering stale dependency mounts.
    #[instrument(skip(self, input))]
    pub async fn peek(
        &self,
        kind: &str,
        input: serde_json::Value,
    ) -> Result<Option<AbsDirPath>, EngineError> {
        layout::validate_kind(kind)?;
        let fingerprint = Fingerprint::of_value(kind, &input);
        let layout = layout::ArtifactLayout::new(&self.root, self.config.store_version.as_str(), kind, fingerprint)?;
        let artifact_dir = layout.artifact_dir()?;
        if manifest::artifact_exists(&artifact_dir).await? {
            Ok(Some(artifact_dir))
        } else {
            Ok(None)
        }
    }

    /// Remove the cached artifact for `(kind, input)`, if any. Idempotent.
    #[instrument(skip(self, input))]
    pub async fn forget(&self, kind: &str, input: serde_json::Value) -> Result<(), EngineError> {
        layout::validate_kind(kind)?;
        let fingerprint = Fingerprint::of_value(kind, &input);
        let layout = layout::ArtifactLayout::new(&self.root, self.config.store_version.as_str(), kind, fingerprint)?;
        let artifact_dir = layout.artifact_dir()?;
        fs::remove_dir_all(&artifact_dir)
            .await
            .map_err(|err| EngineError::Io(std::io::Error::other(err.to_string())))
    }

    /// Core recursive primitive: ensure `(kind, input)` is published, return
    /// its artifact directory. Used both by `execute` (which resolves the
    /// entry link on top) and internally for mounting/recovering
    /// dependencies (which only need the directory to compute a mount
    /// target).
    fn resolve_artifact_dir(
        &self,
        kind: String,
        input: serde_json::Value,
        force_recompute: bool,
        ancestors: Ancestors,
    ) -> BoxFuture<'_, Result<AbsDirPath, EngineError>> {
        Box::pin(async move {
            layout::validate_kind(&kind)?;
            let executor = self
                .registry
                .get(&kind)
                .ok_or_else(|| EngineError::NotFound {
                    kind: kind.clone(),
                })?;

            let deps_map = executor.dependencies.resolve(&input)?;
            let fingerprint = Fingerprint::of_value(&kind, &input);

            if ancestors.iter().any(|(k, fp)| *k == kind && *fp == fingerprint) {
                return Err(EngineError::InvalidArgument {
                    message: format!(
                        "dependency cycle detected: {kind} ({fingerprint}) depends on itself"
                    ),
                });
            }

            let artifact_layout = layout::ArtifactLayout::new(
                &self.root,
                self.config.store_version.as_str(),
                kind.clone(),
                fingerprint,
            )?;
            let artifact_dir = artifact_layout.artifact_dir()?;

            let mut cached = manifest::artifact_exists(&artifact_dir).await?;
            if cached && force_recompute {
                fs::remove_dir_all(&artifact_dir)
                    .await
                    .map_err(|err| EngineError::Io(std::io::Error::other(err.to_string())))?;
                cached = false;
            }

            let mut child_ancestors = ancestors;
            child_ancestors.push((kind.clone(), fingerprint));

            if cached {
                match manifest::resolve_entry_link(&artifact_dir).await {
                    Ok(_) => {
                        self.recover_dependencies(&kind, fingerprint, &artifact_dir, &deps_map, child_ancestors)
                            .await?;
                        return Ok(artifact_dir);
                    }
                    Err(EngineError::Corrupt { .. }) => {
                        warn!(%kind, %fingerprint, "cached artifact has a corrupt entry link; rebuilding");
                        fs::remove_dir_all(&artifact_dir)
                            .await
                            .map_err(|err| EngineError::Io(std::io::Error::other(err.to_string())))?;
                    }
                    Err(err) => return Err(err),
                }
            }

            self.build_and_publish(
                &kind,
                fingerprint,
                input,
                &artifact_layout,
                &artifact_dir,
                &deps_map,
                child_ancestors,
                executor,
            )
            .await
        })
    }

    /// Miss path: prepare a scratch workspace, mount dependencies, run the
    /// user `fn`, write the descriptor and entry link, then attempt publish.
    #[allow(clippy::too_many_arguments)]
    async fn build_and_publish(
        &self,
        kind: &str,
        fingerprint: Fingerprint,
        input: serde_json::Value,
        artifact_layout: &layout::ArtifactLayout,
        artifact_dir: &AbsDirPath,
        deps_map: &HashMap<String, ExecutorConfig>,
        ancestors: Ancestors,
        executor: std::sync::Arc<crate::executor::Executor>,
    ) -> Result<AbsDirPath, EngineError> {
        let nonce = layout::ArtifactLayout::fresh_nonce();
        let (scratch_dir, workspace) = publish::prepare_scratch(artifact_layout, &nonce).await?;

        if let Err(err) = self
            .mount_dependencies(kind, fingerprint, &workspace, deps_map, ancestors)
            .await
        {
            self.cleanup_on_failure(&scratch_dir).await;
            return Err(err);
        }

        let run = executor.run.clone();
        let output = match run(input.clone(), workspace.clone()).await {
            Ok(output) => output,
            Err(source) => {
                self.cleanup_on_failure(&scratch_dir).await;
                return Err(EngineError::UserFnFailed {
                    kind: kind.to_owned(),
                    fingerprint,
                    source,
                });
            }
        };

        if let Err(err) = layout::validate_entry(&output.entry) {
            self.cleanup_on_failure(&scratch_dir).await;
            return Err(err);
        }

        let now = jiff::Timestamp::now();
        let descriptor = Descriptor::new(kind, input, output.metadata.unwrap_or_default(), now);

        if let Err(err) = manifest::write_descriptor(&scratch_dir, &descriptor).await {
            self.cleanup_on_failure(&scratch_dir).await;
            return Err(err);
        }
        if let Err(err) = manifest::create_entry_link(&scratch_dir, &output.entry).await {
            self.cleanup_on_failure(&scratch_dir).await;
            return Err(err);
        }

        match publish::publish(&scratch_dir, artifact_dir).await {
            Ok(_) => {
                info!(%kind, %fingerprint, "published artifact");
                Ok(artifact_dir.clone())
            }
            Err(err) => {
                self.cleanup_on_failure(&scratch_dir).await;
                Err(err)
            }
        }
    }

    async fn cleanup_on_failure(&self, scratch_dir: &AbsDirPath) {
        if !self.config.cleanup_scratch_on_failure {
            return;
        }
        if let Err(err) = publish::cleanup_scratch(scratch_dir).await {
            warn!(?scratch_dir, %err, "failed to clean up scratch directory after error");
        }
    }

    /// Concurrently resolve and link every declared dependency into a fresh
    /// scratch workspace.
    async fn mount_dependencies(
        &self,
        kind: &str,
        fingerprint: Fingerprint,
        workspace: &AbsDirPath,
        deps_map: &HashMap<String, ExecutorConfig>,
        ancestors: Ancestors,
    ) -> Result<(), EngineError> {
        try_join_all(deps_map.iter().map(|(mount, config)| {
            let ancestors = ancestors.clone();
            async move {
                let dep_artifact_dir = self
                    .resolve_artifact_dir(config.kind.clone(), config.input.clone(), config.force_recompute, ancestors)
                    .await
                    .map_err(|err| EngineError::DependencyFailed {
                        kind: kind.to_owned(),
                        fingerprint,
                        mount: mount.clone(),
                        source: Box::new(err),
                    })?;
                linker::link_dependency(workspace, mount, &dep_artifact_dir)
                    .await
                    .map_err(|err| EngineError::DependencyFailed {
                        kind: kind.to_owned(),
                        fingerprint,
                        mount: mount.clone(),
                        source: Box::new(err),
                    })
            }
        }))
        .await?;
        Ok(())
    }

    /// Cache-hit path: re-link any dependency mount that has gone stale
    /// (input drift, or the dependency was removed out from under us) before
    /// declaring the artifact ready.
    async fn recover_dependencies(
        &self,
        kind: &str,
        fingerprint: Fingerprint,
        artifact_dir: &AbsDirPath,
        deps_map: &HashMap<String, ExecutorConfig>,
        ancestors: Ancestors,
    ) -> Result<(), EngineError> {
        let workspace = layout::workspace_dir(artifact_dir)?;

        try_join_all(deps_map.iter().map(|(mount, config)| {
            let ancestors = ancestors.clone();
            let workspace = workspace.clone();
            async move {
                let dep_fingerprint = Fingerprint::of_value(&config.kind, &config.input);
                let dep_layout = layout::ArtifactLayout::new(
                    &self.root,
                    self.config.store_version.as_str(),
                    config.kind.clone(),
                    dep_fingerprint,
                )?;
                let dep_artifact_dir = dep_layout.artifact_dir()?;
                let expected = linker::expected_link_target(&workspace, mount, &dep_artifact_dir)?;
                let status = linker::validate_mount(&workspace, mount, &expected).await?;

                if status == linker::MountStatus::Stale {
                    let resolved_dep_dir = self
                        .resolve_artifact_dir(config.kind.clone(), config.input.clone(), config.force_recompute, ancestors)
                        .await
                        .map_err(|err| EngineError::DependencyFailed {
                            kind: kind.to_owned(),
                            fingerprint,
                            mount: mount.clone(),
                            source: Box::new(err),
                        })?;
                    let link_path = workspace.try_join_file(mount).map_err(|err| {
                        EngineError::InvalidArgument {
                            message: format!("build mount path: {err}"),
                        }
                    })?;
                    fs::remove_link(&link_path)
                        .await
                        .map_err(|err| EngineError::Io(std::io::Error::other(err.to_string())))?;
                    linker::link_dependency(&workspace, mount, &resolved_dep_dir).await?;
                }

                Ok::<_, EngineError>(())
            }
        }))
        .await?;
        Ok(())
    }
}
