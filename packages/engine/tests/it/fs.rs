use color_eyre::Result;
use fsexec::path::TryJoinWith as _;
use pretty_assertions::assert_eq;

use crate::temporary_directory;

#[tokio::test]
async fn write_then_read_round_trips() -> Result<()> {
    let (_dir, root) = temporary_directory();
    let path = root.try_join_file("nested/out.txt").unwrap();

    fsexec::fs::write(&path, b"hello").await?;
    let contents = fsexec::fs::read_buffered(&path).await?;
    assert_eq!(contents, Some(b"hello".to_vec()));

    Ok(())
}

#[tokio::test]
async fn read_buffered_returns_none_for_missing_file() -> Result<()> {
    let (_dir, root) = temporary_directory();
    let path = root.try_join_file("absent.txt").unwrap();

    assert_eq!(fsexec::fs::read_buffered(&path).await?, None);
    Ok(())
}

#[tokio::test]
async fn symlink_round_trips_through_read_link() -> Result<()> {
    let (_dir, root) = temporary_directory();
    let link = root.try_join_file("link").unwrap();

    fsexec::fs::symlink(std::path::Path::new("target/does-not-exist"), &link).await?;
    let target = fsexec::fs::read_link(&link).await?;
    assert_eq!(target, Some(std::path::PathBuf::from("target/does-not-exist")));

    Ok(())
}

#[tokio::test]
async fn read_link_on_non_symlink_returns_none() -> Result<()> {
    let (_dir, root) = temporary_directory();
    let path = root.try_join_file("plain.txt").unwrap();
    fsexec::fs::write(&path, b"x").await?;

    assert_eq!(fsexec::fs::read_link(&path).await?, None);
    Ok(())
}

#[tokio::test]
async fn rename_publish_detects_lost_race() -> Result<()> {
    let (_dir, root) = temporary_directory();
    let a = root.try_join_dir("a").unwrap();
    let b = root.try_join_dir("b").unwrap();
    let dst = root.try_join_dir("dst").unwrap();

    fsexec::fs::create_dir_all(&a).await?;
    fsexec::fs::create_dir_all(&b).await?;

    let first = fsexec::fs::rename_publish(&a, &dst).await?;
    assert!(matches!(first, fsexec::fs::RenameOutcome::Published));

    let second = fsexec::fs::rename_publish(&b, &dst).await?;
    assert!(matches!(second, fsexec::fs::RenameOutcome::LostRace));

    Ok(())
}

#[tokio::test]
async fn remove_dir_all_tolerates_missing_directory() -> Result<()> {
    let (_dir, root) = temporary_directory();
    let missing = root.try_join_dir("never-created").unwrap();
    fsexec::fs::remove_dir_all(&missing).await?;
    Ok(())
}

#[tokio::test]
async fn list_dir_names_is_empty_for_missing_directory() -> Result<()> {
    let (_dir, root) = temporary_directory();
    let missing = root.try_join_dir("never-created").unwrap();
    assert_eq!(fsexec::fs::list_dir_names(&missing).await?, Vec::<String>::new());
    Ok(())
}
