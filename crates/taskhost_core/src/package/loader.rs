//! Package loading entry points.
//!
//! # Responsibility
//! - Build a child-first resolver for a package, unpacking it when needed.
//! - Instantiate a named type from that resolver.
//!
//! # Invariants
//! - No archive means no isolation: the parent resolver is returned as is.
//! - Flat packages are never unpacked.
//! - Scanning and unpacking block the caller; run them off latency-sensitive
//!   threads.

use super::archive::PackageArchive;
use super::classpath::ClassPath;
use super::extract::extract_package;
use super::layout::{detect_layout, PackageLayout};
use super::resolver::{default_resolver, ClassDefiner, IsolatedResolver, Resolver};
use super::workdir::WorkDir;
use super::{LoaderError, LoaderResult};
use crate::config::ConfigSource;
use log::{error, info};
use std::sync::Arc;
use std::time::Instant;

/// Runnable unit of work shipped inside a package.
pub trait Tool: Send {
    /// Runs with `args`, returning a process-style exit code.
    fn run(&mut self, args: &[String]) -> Result<i32, String>;
}

/// Builds isolated resolvers for packages.
#[derive(Clone)]
pub struct PackageLoader {
    definer: Arc<dyn ClassDefiner>,
}

impl PackageLoader {
    pub fn new(definer: impl ClassDefiner + 'static) -> Self {
        Self::from_shared(Arc::new(definer))
    }

    pub fn from_shared(definer: Arc<dyn ClassDefiner>) -> Self {
        Self { definer }
    }

    /// Returns a resolver that looks in `archive` before `parent`.
    ///
    /// A missing `parent` means the process-wide host resolver. Flat
    /// packages keep being read through `archive` for the resolver's lifetime.
    ///
    /// # Errors
    /// - `LoaderError::Io` when the archive cannot be read or unpacked.
    /// - `LoaderError::UnsafeEntry` when an entry would escape the work dir.
    pub fn build_resolver(
        &self,
        archive: Option<Arc<dyn PackageArchive>>,
        parent: Option<Arc<dyn Resolver>>,
        config: Option<&dyn ConfigSource>,
    ) -> LoaderResult<Arc<dyn Resolver>> {
        let parent: Arc<dyn Resolver> = match parent {
            Some(parent) => parent,
            None => default_resolver(),
        };
        let Some(archive) = archive else {
            return Ok(parent);
        };

        let started_at = Instant::now();
        match self.package_class_path(&archive, config) {
            Ok((layout, class_path)) => {
                info!(
                    "event=package_load module=package status=ok layout={:?} classpath_entries={} duration_ms={} archive={}",
                    layout,
                    class_path.len(),
                    started_at.elapsed().as_millis(),
                    archive.location().display()
                );
                Ok(Arc::new(IsolatedResolver::new(
                    class_path,
                    parent,
                    Arc::clone(&self.definer),
                )))
            }
            Err(err) => {
                error!(
                    "event=package_load module=package status=error duration_ms={} error_code={} error={} archive={}",
                    started_at.elapsed().as_millis(),
                    err.code(),
                    err,
                    archive.location().display()
                );
                Err(err)
            }
        }
    }

    /// Resolves `class_name` through the package and constructs it as `T`.
    ///
    /// # Errors
    /// - Everything `build_resolver` reports.
    /// - `LoaderError::ClassResolution` when neither package nor parent has it.
    /// - `LoaderError::Instantiation` when construction fails or yields
    ///   something other than `T`.
    pub fn load_instance<T: 'static>(
        &self,
        archive: Option<Arc<dyn PackageArchive>>,
        parent: Option<Arc<dyn Resolver>>,
        class_name: &str,
        config: Option<&dyn ConfigSource>,
    ) -> LoaderResult<T> {
        let resolver = self.build_resolver(archive, parent, config)?;
        instantiate(resolver.as_ref(), class_name)
    }

    /// Loads `class_name` as a runnable tool.
    pub fn load_tool(
        &self,
        archive: Option<Arc<dyn PackageArchive>>,
        parent: Option<Arc<dyn Resolver>>,
        class_name: &str,
        config: Option<&dyn ConfigSource>,
    ) -> LoaderResult<Box<dyn Tool>> {
        self.load_instance::<Box<dyn Tool>>(archive, parent, class_name, config)
    }

    fn package_class_path(
        &self,
        archive: &Arc<dyn PackageArchive>,
        config: Option<&dyn ConfigSource>,
    ) -> LoaderResult<(PackageLayout, ClassPath)> {
        let layout = detect_layout(archive.as_ref())?;
        let class_path = match layout {
            PackageLayout::Flat => ClassPath::for_flat(Arc::clone(archive)),
            PackageLayout::Legacy => {
                let work_dir = WorkDir::allocate(config)?;
                extract_package(archive.as_ref(), work_dir.root())?;
                ClassPath::for_extracted(work_dir.root())?
            }
        };
        Ok((layout, class_path))
    }
}

/// Resolves `class_name` and constructs it as `T`.
pub fn instantiate<T: 'static>(resolver: &dyn Resolver, class_name: &str) -> LoaderResult<T> {
    let handle = resolver.resolve(class_name)?;
    let instance = handle
        .construct()
        .map_err(|reason| LoaderError::Instantiation {
            class_name: class_name.to_string(),
            reason,
        })?;
    instance
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| LoaderError::Instantiation {
            class_name: class_name.to_string(),
            reason: format!(
                "constructed value is not a `{}`",
                std::any::type_name::<T>()
            ),
        })
}
