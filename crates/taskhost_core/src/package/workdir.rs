//! Private work directories for unpacked packages.

use super::{LoaderError, LoaderResult};
use crate::config::ConfigSource;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Name prefix of every work directory.
pub const WORK_DIR_PREFIX: &str = "taskhost-unpack-";

/// Freshly created directory owned by exactly one extraction.
///
/// ```text
/// {temp_root}/taskhost-unpack-{uuid}/
/// ├── lib/          # bundled dependency archives
/// └── ...           # package classes, mirroring archive paths
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    /// Creates a work directory under the configured temp root.
    ///
    /// An unusable configured root falls back to the platform temp dir.
    pub fn allocate(config: Option<&dyn ConfigSource>) -> LoaderResult<Self> {
        let base = select_temp_root(config);
        Self::allocate_in(&base)
    }

    /// Creates a uniquely named work directory directly under `base`.
    ///
    /// # Errors
    /// - `LoaderError::Io` when the directory cannot be created. An existing
    ///   directory of the same name is an error, never reused.
    pub fn allocate_in(base: &Path) -> LoaderResult<Self> {
        let root = base.join(format!("{WORK_DIR_PREFIX}{}", Uuid::new_v4().simple()));
        fs::create_dir(&root).map_err(|err| LoaderError::io(&root, err))?;
        info!(
            "event=workdir_allocate module=package status=ok root={}",
            root.display()
        );
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lib_dir(&self) -> PathBuf {
        self.root.join("lib")
    }
}

fn select_temp_root(config: Option<&dyn ConfigSource>) -> PathBuf {
    let Some(configured) = config.and_then(|source| source.temp_root_path()) else {
        return std::env::temp_dir();
    };

    match fs::create_dir_all(&configured) {
        Ok(()) if configured.is_dir() => configured,
        Ok(()) => {
            warn!(
                "event=temp_root_fallback module=package status=warn configured={} error_code=not_a_directory",
                configured.display()
            );
            std::env::temp_dir()
        }
        Err(err) => {
            warn!(
                "event=temp_root_fallback module=package status=warn configured={} error_code=create_failed error={}",
                configured.display(),
                err
            );
            std::env::temp_dir()
        }
    }
}
