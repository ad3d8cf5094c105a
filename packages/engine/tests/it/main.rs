use fsexec::path::AbsDirPath;
use tempfile::TempDir;

pub mod engine;
pub mod escape;
pub mod fingerprint;
pub mod fs;
pub mod publish;

#[track_caller]
pub fn temporary_directory() -> (TempDir, AbsDirPath) {
    let dir = TempDir::new().expect("create temporary directory");
    let path = AbsDirPath::try_from(dir.path()).expect("read temp dir as abs dir");
    (dir, path)
}
