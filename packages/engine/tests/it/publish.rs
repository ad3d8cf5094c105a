use color_eyre::Result;
use fsexec::{
    executor::{Dependencies, ExecutorOutput, Registry},
    path::TryJoinWith as _,
};
use serde_json::json;

use crate::temporary_directory;

/// Several concurrent `execute` calls for the identical `(kind, input)`
/// should produce exactly one published artifact, with every caller
/// resolving to the same entry path.
#[tokio::test]
async fn concurrent_execute_converges_on_one_artifact() -> Result<()> {
    let (_dir, root) = temporary_directory();
    let registry = Registry::new();
    registry.register("slow", Dependencies::None, |_input, workspace| {
        Box::pin(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let path = workspace.try_join_file("out.txt").unwrap();
            fsexec::fs::write(&path, uuid::Uuid::new_v4().as_bytes()).await?;
            Ok(ExecutorOutput::new("out.txt"))
        })
    })?;

    let engine = std::sync::Arc::new(fsexec::engine::Engine::new(root, registry));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        tasks.push(tokio::spawn(async move {
            engine.execute("slow", json!({"k": 1}), false).await
        }));
    }

    let mut resolved = Vec::new();
    for task in tasks {
        resolved.push(task.await.unwrap()?);
    }

    let first = &resolved[0];
    assert!(resolved.iter().all(|entry| entry == first));

    Ok(())
}
