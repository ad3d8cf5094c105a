//! Maps `(root, kind, fingerprint)` triples to sharded directory paths, and
//! defines the reserved filenames inside an artifact directory.
//!
//! This module is a pure function over strings and paths; it never touches
//! the filesystem itself (see `manifest`, `publish`, and `fs` for that).

use uuid::Uuid;

use crate::{
    error::EngineError,
    fingerprint::Fingerprint,
    path::{AbsDirPath, AbsFilePath, RelFilePath, TryJoinWith as _},
};

/// Directory name under `root` that contains the whole store.
pub const STORE_DIR_NAME: &str = "fs-data";

/// Reserved name of the descriptor file inside an artifact directory.
pub const DESCRIPTOR_FILE_NAME: &str = ".fsexec-descriptor.json";

/// Reserved name of the entry symlink inside an artifact directory.
pub const ENTRY_LINK_NAME: &str = "entry";

/// Reserved name of the workspace directory inside an artifact directory.
pub const WORKSPACE_DIR_NAME: &str = "workspace";

/// Prefix used for scratch directories, so `listArtifacts` and directory
/// listings can cheaply skip them.
pub const SCRATCH_PREFIX: &str = ".tmp-";

/// All filenames reserved at the top level of an artifact directory. A user
/// `entry` must never collide with one of these once joined under
/// `workspace/`, though in practice `entry` lives one level down so the only
/// real collision risk is a `kind` or fingerprint directory name, which is
/// validated separately.
const RESERVED_TOP_LEVEL: &[&str] = &[DESCRIPTOR_FILE_NAME, ENTRY_LINK_NAME, WORKSPACE_DIR_NAME];

/// Validate a `kind` identifier per the data model: non-empty, no path
/// separators, no leading/trailing whitespace, not `.` or `..`.
pub fn validate_kind(kind: &str) -> Result<(), EngineError> {
    if kind.is_empty() {
        return Err(EngineError::InvalidArgument {
            message: "kind must not be empty".into(),
        });
    }
    if kind != kind.trim() {
        return Err(EngineError::InvalidArgument {
            message: format!("kind {kind:?} has leading/trailing whitespace"),
        });
    }
    if kind == "." || kind == ".." {
        return Err(EngineError::InvalidArgument {
            message: format!("kind {kind:?} is not a valid identifier"),
        });
    }
    if kind.contains('/') || kind.contains('\\') {
        return Err(EngineError::InvalidArgument {
            message: format!("kind {kind:?} must not contain path separators"),
        });
    }
    Ok(())
}

/// Validate that `entry` is a safe relative path to place under `workspace/`:
/// relative, non-empty, no `..` components, and not one of the reserved
/// top-level names (defense in depth — `entry` is joined under `workspace/`
/// so a literal collision with e.g. the descriptor filename can't happen,
/// but a caller could still try to escape with a leading path segment).
pub fn validate_entry(entry: &str) -> Result<RelFilePath, EngineError> {
    validate_safe_relative(entry)?;
    RelFilePath::try_from(entry).map_err(|err| EngineError::InvalidArgument {
        message: format!("entry {entry:?} is not a valid relative file path: {err}"),
    })
}

/// Validate that `mount` is a safe relative mount path for a dependency:
/// relative, non-empty, no `..` components.
pub fn validate_mount_path(mount: &str) -> Result<RelFilePath, EngineError> {
    validate_safe_relative(mount)?;
    RelFilePath::try_from(mount).map_err(|err| EngineError::InvalidArgument {
        message: format!("mount path {mount:?} is not a valid relative file path: {err}"),
    })
}

fn validate_safe_relative(path: &str) -> Result<(), EngineError> {
    if path.is_empty() {
        return Err(EngineError::InvalidArgument {
            message: "path must not be empty".into(),
        });
    }
    let std_path = std::path::Path::new(path);
    if std_path.is_absolute() {
        return Err(EngineError::InvalidArgument {
            message: format!("path {path:?} must be relative"),
        });
    }
    for component in std_path.components() {
        if matches!(component, std::path::Component::ParentDir) {
            return Err(EngineError::InvalidArgument {
                message: format!("path {path:?} must not contain '..'"),
            });
        }
    }
    if RESERVED_TOP_LEVEL.contains(&path) {
        return Err(EngineError::InvalidArgument {
            message: format!("path {path:?} collides with a reserved name"),
        });
    }
    Ok(())
}

/// Computes the on-disk locations for one `(kind, fingerprint)` artifact.
#[derive(Clone, Debug)]
pub struct ArtifactLayout {
    root: AbsDirPath,
    store_version: String,
    kind: String,
    fingerprint: Fingerprint,
}

impl ArtifactLayout {
    /// Build a layout, validating `kind`.
    pub fn new(
        root: &AbsDirPath,
        store_version: impl Into<String>,
        kind: impl Into<String>,
        fingerprint: Fingerprint,
    ) -> Result<Self, EngineError> {
        let kind = kind.into();
        validate_kind(&kind)?;
        Ok(Self {
            root: root.clone(),
            store_version: store_version.into(),
            kind,
            fingerprint,
        })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// The directory containing every shard for this `kind`.
    fn kind_dir(&self) -> Result<AbsDirPath, EngineError> {
        self.root
            .try_join_dirs([STORE_DIR_NAME, &self.store_version, &self.kind])
            .map_err(|err| EngineError::InvalidArgument {
                message: format!("build kind directory: {err}"),
            })
    }

    /// The final published artifact directory.
    pub fn artifact_dir(&self) -> Result<AbsDirPath, EngineError> {
        let fp = self.fingerprint.to_string();
        self.kind_dir()?
            .try_join_dirs([self.fingerprint.shard().as_str(), fp.as_str()])
            .map_err(|err| EngineError::InvalidArgument {
                message: format!("build artifact directory: {err}"),
            })
    }

    /// A fresh scratch directory sibling to the artifact directory, unique
    /// per attempt via `nonce`.
    pub fn scratch_dir(&self, nonce: &str) -> Result<AbsDirPath, EngineError> {
        let fp = self.fingerprint.to_string();
        let name = format!("{SCRATCH_PREFIX}{fp}-{nonce}");
        self.kind_dir()?
            .try_join_dirs([self.fingerprint.shard().as_str(), name.as_str()])
            .map_err(|err| EngineError::InvalidArgument {
                message: format!("build scratch directory: {err}"),
            })
    }

    /// Generate a fresh nonce suitable for [`ArtifactLayout::scratch_dir`].
    pub fn fresh_nonce() -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// The descriptor file path inside an artifact (or scratch) directory.
pub fn descriptor_path(dir: &AbsDirPath) -> Result<AbsFilePath, EngineError> {
    dir.try_join_file(DESCRIPTOR_FILE_NAME)
        .map_err(|err| EngineError::InvalidArgument {
            message: format!("build descriptor path: {err}"),
        })
}

/// The entry link path inside an artifact (or scratch) directory.
pub fn entry_link_path(dir: &AbsDirPath) -> Result<AbsFilePath, EngineError> {
    dir.try_join_file(ENTRY_LINK_NAME)
        .map_err(|err| EngineError::InvalidArgument {
            message: format!("build entry link path: {err}"),
        })
}

/// The workspace directory path inside an artifact (or scratch) directory.
pub fn workspace_dir(dir: &AbsDirPath) -> Result<AbsDirPath, EngineError> {
    dir.try_join_dir(WORKSPACE_DIR_NAME)
        .map_err(|err| EngineError::InvalidArgument {
            message: format!("build workspace directory: {err}"),
        })
}
