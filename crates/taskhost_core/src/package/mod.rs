//! Isolated loading of externally supplied application packages.
//!
//! # Responsibility
//! - Tell flat packages from self-contained ones that bundle `lib/` dependencies.
//! - Unpack self-contained packages into a private work directory.
//! - Resolve named types child-first: package classpath, then the host.
//!
//! # Invariants
//! - Every extraction writes into its own freshly created directory.
//! - Archive streams are closed on every exit path, errors included.
//! - Work directories are never deleted here; their cleanup belongs to the host.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;
use std::path::{Path, PathBuf};

pub mod archive;
pub mod classpath;
pub mod extract;
pub mod layout;
pub mod loader;
pub mod resolver;
pub mod workdir;

pub type LoaderResult<T> = Result<T, LoaderError>;

/// Failures of package inspection, extraction, resolution or construction.
#[derive(Debug)]
pub enum LoaderError {
    /// Archive unreadable, directory uncreatable, or a write failed.
    Io { path: PathBuf, source: io::Error },
    /// Archive entry that would land outside the work directory.
    UnsafeEntry { path: String, reason: &'static str },
    /// Name found neither on the package classpath nor in the parent, or not
    /// a well-formed class name at all.
    ClassResolution { class_name: String },
    /// Type resolved but could not be constructed as requested.
    Instantiation { class_name: String, reason: String },
}

impl LoaderError {
    pub(crate) fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn unsafe_entry(path: &str, reason: &'static str) -> Self {
        Self::UnsafeEntry {
            path: path.to_string(),
            reason,
        }
    }

    /// Stable short code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "io",
            Self::UnsafeEntry { .. } => "unsafe_entry",
            Self::ClassResolution { .. } => "class_not_found",
            Self::Instantiation { .. } => "instantiation_failed",
        }
    }
}

impl Display for LoaderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "i/o failure at `{}`: {source}", path.display()),
            Self::UnsafeEntry { path, reason } => {
                write!(f, "refusing archive entry `{path}`: {reason}")
            }
            Self::ClassResolution { class_name } => write!(f, "class not found: {class_name}"),
            Self::Instantiation { class_name, reason } => {
                write!(f, "cannot instantiate {class_name}: {reason}")
            }
        }
    }
}

impl Error for LoaderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::UnsafeEntry { .. }
            | Self::ClassResolution { .. }
            | Self::Instantiation { .. } => None,
        }
    }
}
