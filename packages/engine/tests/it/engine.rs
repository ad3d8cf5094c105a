use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use color_eyre::Result;
use fsexec::{
    engine::Engine,
    executor::{Dependencies, ExecutorConfig, ExecutorOutput, Registry},
    path::TryJoinWith as _,
};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::temporary_directory;

fn write_entry(
    input: serde_json::Value,
    workspace: fsexec::path::AbsDirPath,
) -> futures::future::BoxFuture<'static, color_eyre::Result<ExecutorOutput>> {
    Box::pin(async move {
        let name = input
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("out")
            .to_owned();
        let path = workspace.try_join_file(format!("{name}.txt")).unwrap();
        fsexec::fs::write(&path, name.as_bytes()).await?;
        Ok(ExecutorOutput::new(format!("{name}.txt")))
    })
}

#[tokio::test]
async fn cache_hit_skips_reexecution() -> Result<()> {
    let (_dir, root) = temporary_directory();
    let calls = std::sync::Arc::new(AtomicUsize::new(0));
    let registry = Registry::new();
    {
        let calls = calls.clone();
        registry.register("echo", Dependencies::None, move |input, workspace| {
            calls.fetch_add(1, Ordering::SeqCst);
            write_entry(input, workspace)
        })?;
    }
    let engine = Engine::new(root, registry);

    let first = engine.execute("echo", json!({"name": "a"}), false).await?;
    let second = engine.execute("echo", json!({"name": "a"}), false).await?;

    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), 1, "second call should be a cache hit");
    Ok(())
}

#[tokio::test]
async fn different_input_produces_different_artifact() -> Result<()> {
    let (_dir, root) = temporary_directory();
    let registry = Registry::new();
    registry.register("echo", Dependencies::None, write_entry)?;
    let engine = Engine::new(root, registry);

    let a = engine.execute("echo", json!({"name": "a"}), false).await?;
    let b = engine.execute("echo", json!({"name": "b"}), false).await?;
    assert_ne!(a, b);
    Ok(())
}

#[tokio::test]
async fn force_recompute_rebuilds_a_cached_artifact() -> Result<()> {
    let (_dir, root) = temporary_directory();
    let calls = std::sync::Arc::new(AtomicUsize::new(0));
    let registry = Registry::new();
    {
        let calls = calls.clone();
        registry.register("echo", Dependencies::None, move |input, workspace| {
            calls.fetch_add(1, Ordering::SeqCst);
            write_entry(input, workspace)
        })?;
    }
    let engine = Engine::new(root, registry);

    engine.execute("echo", json!({"name": "a"}), false).await?;
    engine.execute("echo", json!({"name": "a"}), true).await?;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn peek_never_executes() -> Result<()> {
    let (_dir, root) = temporary_directory();
    let registry = Registry::new();
    registry.register("echo", Dependencies::None, write_entry)?;
    let engine = Engine::new(root, registry);

    assert!(engine.peek("echo", json!({"name": "a"})).await?.is_none());
    engine.execute("echo", json!({"name": "a"}), false).await?;
    assert!(engine.peek("echo", json!({"name": "a"})).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn forget_is_idempotent_and_evicts() -> Result<()> {
    let (_dir, root) = temporary_directory();
    let registry = Registry::new();
    registry.register("echo", Dependencies::None, write_entry)?;
    let engine = Engine::new(root, registry);

    engine.execute("echo", json!({"name": "a"}), false).await?;
    assert!(engine.peek("echo", json!({"name": "a"})).await?.is_some());

    engine.forget("echo", json!({"name": "a"})).await?;
    engine.forget("echo", json!({"name": "a"})).await?;
    assert!(engine.peek("echo", json!({"name": "a"})).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn unregistered_kind_is_rejected() -> Result<()> {
    let (_dir, root) = temporary_directory();
    let registry = Registry::new();
    let engine = Engine::new(root, registry);

    let err = engine.execute("missing", json!({}), false).await.unwrap_err();
    assert!(matches!(err, fsexec::error::EngineError::NotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn dependency_is_mounted_into_workspace() -> Result<()> {
    let (_dir, root) = temporary_directory();
    let registry = Registry::new();
    registry.register("leaf", Dependencies::None, write_entry)?;

    let mut deps = HashMap::new();
    deps.insert("dep".to_owned(), ExecutorConfig::new("leaf", json!({"name": "leaf"})));
    registry.register("parent", Dependencies::Fixed(deps), |_input, workspace| {
        Box::pin(async move {
            let dep_entry = workspace.try_join_file("dep/leaf.txt").unwrap();
            let seen = fsexec::fs::exists(dep_entry.as_std_path()).await;
            assert!(seen, "mounted dependency entry should be reachable");
            fsexec::fs::write(&workspace.try_join_file("out.txt").unwrap(), b"parent").await?;
            Ok(ExecutorOutput::new("out.txt"))
        })
    })?;

    let engine = Engine::new(root, registry);
    engine.execute("parent", json!({}), false).await?;
    Ok(())
}

#[tokio::test]
async fn corrupt_entry_link_triggers_rebuild() -> Result<()> {
    let (_dir, root) = temporary_directory();
    let calls = std::sync::Arc::new(AtomicUsize::new(0));
    let registry = Registry::new();
    {
        let calls = calls.clone();
        registry.register("echo", Dependencies::None, move |input, workspace| {
            calls.fetch_add(1, Ordering::SeqCst);
            write_entry(input, workspace)
        })?;
    }
    let engine = Engine::new(root, registry);

    let first = engine.execute("echo", json!({"name": "a"}), false).await?;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let artifact_dir = engine
        .peek("echo", json!({"name": "a"}))
        .await?
        .expect("artifact should be cached");
    let entry_link = artifact_dir.try_join_file("entry").unwrap();
    fsexec::fs::remove_link(&entry_link).await?;

    let second = engine.execute("echo", json!({"name": "a"}), false).await?;
    assert_eq!(first, second, "rebuild should land on the same artifact path");
    assert_eq!(calls.load(Ordering::SeqCst), 2, "a corrupt entry link must trigger a rebuild");
    Ok(())
}

#[tokio::test]
async fn out_of_band_dependency_removal_triggers_recovery() -> Result<()> {
    let (_dir, root) = temporary_directory();
    let src_calls = std::sync::Arc::new(AtomicUsize::new(0));
    let sink_calls = std::sync::Arc::new(AtomicUsize::new(0));
    let registry = Registry::new();
    {
        let src_calls = src_calls.clone();
        registry.register("src", Dependencies::None, move |input, workspace| {
            src_calls.fetch_add(1, Ordering::SeqCst);
            write_entry(input, workspace)
        })?;
    }

    let mut deps = HashMap::new();
    deps.insert("in".to_owned(), ExecutorConfig::new("src", json!({"name": "v1"})));
    {
        let sink_calls = sink_calls.clone();
        registry.register("sink", Dependencies::Fixed(deps), move |_input, workspace| {
            sink_calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                fsexec::fs::write(&workspace.try_join_file("out.txt").unwrap(), b"sink").await?;
                Ok(ExecutorOutput::new("out.txt"))
            })
        })?;
    }

    let engine = Engine::new(root, registry);

    let first = engine.execute("sink", json!({}), false).await?;
    assert_eq!(sink_calls.load(Ordering::SeqCst), 1);
    assert_eq!(src_calls.load(Ordering::SeqCst), 1);

    engine.forget("src", json!({"name": "v1"})).await?;

    let second = engine.execute("sink", json!({}), false).await?;
    assert_eq!(first, second, "recovery must not change the sink's own artifact path");
    assert_eq!(sink_calls.load(Ordering::SeqCst), 1, "sink's fn must not be re-run on dependency recovery");
    assert_eq!(src_calls.load(Ordering::SeqCst), 2, "src must be rebuilt once to satisfy the stale mount");

    let mounted = second
        .parent()
        .unwrap()
        .try_join_dir("in")
        .unwrap()
        .try_join_file("v1.txt")
        .unwrap();
    assert!(mounted.exists().await, "recovered mount should resolve again");
    Ok(())
}

#[tokio::test]
async fn config_drift_relinks_mount_without_rerunning_the_consumer() -> Result<()> {
    let (_dir, root) = temporary_directory();
    let src_calls = std::sync::Arc::new(AtomicUsize::new(0));
    let sink_calls = std::sync::Arc::new(AtomicUsize::new(0));
    let registry = Registry::new();
    {
        let src_calls = src_calls.clone();
        registry.register("src", Dependencies::None, move |input, workspace| {
            src_calls.fetch_add(1, Ordering::SeqCst);
            write_entry(input, workspace)
        })?;
    }

    let mut deps_v1 = HashMap::new();
    deps_v1.insert("in".to_owned(), ExecutorConfig::new("src", json!({"name": "v1"})));
    {
        let sink_calls = sink_calls.clone();
        registry.register("sink", Dependencies::Fixed(deps_v1), move |_input, workspace| {
            sink_calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                fsexec::fs::write(&workspace.try_join_file("out.txt").unwrap(), b"sink").await?;
                Ok(ExecutorOutput::new("out.txt"))
            })
        })?;
    }

    let engine = Engine::new(root, registry);
    let first = engine.execute("sink", json!({}), false).await?;
    assert_eq!(sink_calls.load(Ordering::SeqCst), 1);
    assert_eq!(src_calls.load(Ordering::SeqCst), 1);

    // Re-register `sink` with its dependency pointed at a different input,
    // simulating config drift between calls without changing `sink`'s own
    // declared input.
    let mut deps_v2 = HashMap::new();
    deps_v2.insert("in".to_owned(), ExecutorConfig::new("src", json!({"name": "v2"})));
    {
        let sink_calls = sink_calls.clone();
        engine.registry().register("sink", Dependencies::Fixed(deps_v2), move |_input, workspace| {
            sink_calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                fsexec::fs::write(&workspace.try_join_file("out.txt").unwrap(), b"sink").await?;
                Ok(ExecutorOutput::new("out.txt"))
            })
        })?;
    }

    let second = engine.execute("sink", json!({}), false).await?;
    assert_eq!(first, second, "sink's own artifact path is unaffected by its dependency's config");
    assert_eq!(sink_calls.load(Ordering::SeqCst), 1, "sink's fn must not be re-run on config drift");
    assert_eq!(src_calls.load(Ordering::SeqCst), 2, "src must be run once per distinct input it's fingerprinted under");

    let mounted = second.parent().unwrap().try_join_dir("in").unwrap().try_join_file("v2.txt").unwrap();
    assert!(mounted.exists().await, "mount must now resolve to the v2 artifact");
    let stale = second.parent().unwrap().try_join_dir("in").unwrap().try_join_file("v1.txt").unwrap();
    assert!(!stale.exists().await, "mount must no longer resolve to the v1 artifact");
    Ok(())
}

#[tokio::test]
async fn direct_self_dependency_is_rejected_as_a_cycle() -> Result<()> {
    let (_dir, root) = temporary_directory();
    let registry = Registry::new();
    registry.register_dynamic(
        "cyclic",
        |input| {
            let mut deps = HashMap::new();
            deps.insert("self".to_owned(), ExecutorConfig::new("cyclic", input.clone()));
            Ok(deps)
        },
        write_entry,
    )?;
    let engine = Engine::new(root, registry);

    let err = engine.execute("cyclic", json!({"name": "x"}), false).await.unwrap_err();
    match err {
        fsexec::error::EngineError::DependencyFailed { source, .. } => {
            assert!(matches!(*source, fsexec::error::EngineError::InvalidArgument { .. }));
        }
        other => panic!("expected a wrapped cycle error, got {other:?}"),
    }
    Ok(())
}
