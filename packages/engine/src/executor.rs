//! Registered capabilities (`Executor`) and request handles
//! (`ExecutorConfig`) used to name them from inside a `dependencies` map.
//!
//! The source pattern this generalizes — an executor function with an
//! attached `.config()` method — is modeled here as two distinct nouns so
//! that `dependencies` can be a plain collection of requests rather than a
//! collection of partially-applied functions.

use std::{collections::HashMap, sync::Arc};

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::{error::EngineError, layout, path::AbsDirPath};

/// A reified handle naming another artifact: `{ kind, input, forceRecompute }`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub kind: String,
    pub input: serde_json::Value,
    #[serde(default)]
    pub force_recompute: bool,
}

impl ExecutorConfig {
    /// Build a request for `kind` with the given input, `forceRecompute = false`.
    pub fn new(kind: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            input,
            force_recompute: false,
        }
    }

    /// Return a copy of this config with `forceRecompute` set.
    pub fn with_force_recompute(mut self, force: bool) -> Self {
        self.force_recompute = force;
        self
    }
}

/// What a user `fn` returns: the relative entry point and optional metadata.
#[derive(Clone, Debug, Default)]
pub struct ExecutorOutput {
    /// Relative path (under the workspace) to the artifact's entry point.
    pub entry: String,
    /// Optional metadata recorded in the descriptor. Does not participate in
    /// the fingerprint.
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl ExecutorOutput {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Future returned by a registered executor function.
pub type ExecutorFuture = BoxFuture<'static, color_eyre::Result<ExecutorOutput>>;

/// A fixed or input-dependent dependency mapping.
pub enum Dependencies {
    /// No declared dependencies.
    None,
    /// A fixed mapping from mount path to dependency request, known at
    /// registration time.
    Fixed(HashMap<String, ExecutorConfig>),
    /// A pure function of the input, evaluated once per `execute` call
    /// before fingerprinting. Modeled as a first-class executor variant
    /// rather than a registry mutation, so re-registering isn't needed just
    /// because `deps` depends on `input`.
    Dynamic(Arc<dyn Fn(&serde_json::Value) -> color_eyre::Result<HashMap<String, ExecutorConfig>> + Send + Sync>),
}

impl Dependencies {
    /// Evaluate the mapping for a given input.
    pub fn resolve(
        &self,
        input: &serde_json::Value,
    ) -> Result<HashMap<String, ExecutorConfig>, EngineError> {
        match self {
            Dependencies::None => Ok(HashMap::new()),
            Dependencies::Fixed(map) => Ok(map.clone()),
            Dependencies::Dynamic(f) => f(input).map_err(|err| EngineError::InvalidArgument {
                message: format!("evaluate dynamic dependencies: {err}"),
            }),
        }
    }
}

/// A registered `(kind, dependencies, fn)` triple.
pub struct Executor {
    pub(crate) dependencies: Dependencies,
    pub(crate) run: Arc<dyn Fn(serde_json::Value, AbsDirPath) -> ExecutorFuture + Send + Sync>,
}

/// Process-local registry mapping `kind` to its registered executor.
///
/// An explicit, owned container with lifecycle tied to the `Engine` instance
/// that holds it — not ambient global state.
#[derive(Clone, Default)]
pub struct Registry {
    executors: DashMap<String, Arc<Executor>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor with a fixed (or absent) dependency mapping.
    ///
    /// Re-registering the same `kind` replaces the prior entry.
    pub fn register<F>(
        &self,
        kind: impl Into<String>,
        dependencies: Dependencies,
        run: F,
    ) -> Result<(), EngineError>
    where
        F: Fn(serde_json::Value, AbsDirPath) -> ExecutorFuture + Send + Sync + 'static,
    {
        let kind = kind.into();
        layout::validate_kind(&kind)?;
        self.executors.insert(
            kind,
            Arc::new(Executor {
                dependencies,
                run: Arc::new(run),
            }),
        );
        Ok(())
    }

    /// Convenience for registering a dynamic-deps executor.
    pub fn register_dynamic<D, F>(
        &self,
        kind: impl Into<String>,
        deps_fn: D,
        run: F,
    ) -> Result<(), EngineError>
    where
        D: Fn(&serde_json::Value) -> color_eyre::Result<HashMap<String, ExecutorConfig>>
            + Send
            + Sync
            + 'static,
        F: Fn(serde_json::Value, AbsDirPath) -> ExecutorFuture + Send + Sync + 'static,
    {
        self.register(kind, Dependencies::Dynamic(Arc::new(deps_fn)), run)
    }

    pub(crate) fn get(&self, kind: &str) -> Option<Arc<Executor>> {
        self.executors.get(kind).map(|entry| entry.clone())
    }
}
