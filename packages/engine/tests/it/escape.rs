use color_eyre::Result;
use fsexec::{
    engine::Engine,
    executor::{Dependencies, ExecutorConfig, ExecutorOutput, Registry},
    path::TryJoinWith as _,
};
use serde_json::json;

use crate::temporary_directory;

#[tokio::test]
async fn entry_escaping_workspace_is_rejected() -> Result<()> {
    let (_dir, root) = temporary_directory();
    let registry = Registry::new();
    registry.register("evil", Dependencies::None, |_input, workspace| {
        Box::pin(async move {
            // Attempting to report an entry that climbs out of `workspace/`.
            let _ = workspace;
            Ok(ExecutorOutput::new("../../etc/passwd"))
        })
    })?;
    let engine = Engine::new(root, registry);

    let err = engine.execute("evil", json!({}), false).await.unwrap_err();
    assert!(matches!(err, fsexec::error::EngineError::InvalidArgument { .. }));
    Ok(())
}

#[tokio::test]
async fn mount_path_escaping_workspace_is_rejected() -> Result<()> {
    let (_dir, root) = temporary_directory();
    let registry = Registry::new();
    registry.register("leaf", Dependencies::None, |_input, workspace| {
        Box::pin(async move {
            fsexec::fs::write(&workspace.try_join_file("out.txt").unwrap(), b"x").await?;
            Ok(ExecutorOutput::new("out.txt"))
        })
    })?;

    let mut deps = std::collections::HashMap::new();
    deps.insert(
        "../escape".to_owned(),
        ExecutorConfig::new("leaf", json!({})),
    );
    registry.register("parent", Dependencies::Fixed(deps), |_input, workspace| {
        Box::pin(async move {
            let _ = workspace;
            Ok(ExecutorOutput::new("out.txt"))
        })
    })?;

    let engine = Engine::new(root, registry);
    let err = engine.execute("parent", json!({}), false).await.unwrap_err();
    match err {
        fsexec::error::EngineError::DependencyFailed { source, .. } => {
            assert!(matches!(*source, fsexec::error::EngineError::InvalidArgument { .. }));
        }
        other => panic!("expected a wrapped mount-escape error, got {other:?}"),
    }
    Ok(())
}
