//! Core runtime pieces for hosting data-processing jobs.
//! Context-scoped resource bindings and isolated loading of job packages.

pub mod config;
pub mod context;
pub mod logging;
pub mod package;

pub use config::{ConfigSource, LoaderConfig, TEMP_ROOT_KEY};
pub use context::registry::{RegistryError, RegistryResult, ResourceRegistry};
pub use context::{ContextAccessor, ContextId, FixedContextAccessor, ThreadContextAccessor};
pub use logging::{default_log_level, init_logging, logging_status};
pub use package::archive::{
    write_package, ArchiveEntry, EntryKind, PackageArchive, PackageWriter, TarPackage, Visit,
};
pub use package::classpath::{class_resource_name, ClassPath, ClassPathEntry, ClassResource};
pub use package::extract::{extract_package, ExtractionSummary};
pub use package::layout::{classify_layout, detect_layout, EntryDescriptor, PackageLayout};
pub use package::loader::{instantiate, PackageLoader, Tool};
pub use package::resolver::{
    default_resolver, validate_class_name, ClassDefiner, ConstructibleType, FactoryType,
    HostResolver, Instance, IsolatedResolver, Resolver, TypeHandle,
};
pub use package::workdir::WorkDir;
pub use package::{LoaderError, LoaderResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
