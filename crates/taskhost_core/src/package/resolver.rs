//! Named type resolution.
//!
//! # Responsibility
//! - Turn a fully qualified class name into a constructible type handle.
//! - Resolve child-first for packages: own classpath, then the parent.
//!
//! # Invariants
//! - `ConstructibleType::construct` is the only way to create instances.
//! - Once an `IsolatedResolver` has defined a name it always hands out the
//!   same handle for it.

use super::classpath::{ClassPath, ClassResource};
use super::loader::Tool;
use super::{LoaderError, LoaderResult};
use log::debug;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Dot-separated Unicode identifiers; `$` and `_` are identifier characters.
const CLASS_NAME_PATTERN: &str =
    r"^[\p{XID_Start}_$][\p{XID_Continue}$]*(?:\.[\p{XID_Start}_$][\p{XID_Continue}$]*)*$";

static CLASS_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(CLASS_NAME_PATTERN).expect("valid class name regex"));

static HOST_RESOLVER: Lazy<Arc<HostResolver>> = Lazy::new(|| Arc::new(HostResolver::new()));

/// Boxed instance produced by a constructible type.
pub type Instance = Box<dyn Any + Send>;

/// Shared handle to a resolved type.
pub type TypeHandle = Arc<dyn ConstructibleType>;

/// Resolved type that can produce instances through a zero-argument path.
pub trait ConstructibleType: Send + Sync {
    fn class_name(&self) -> &str;

    /// Creates one instance, or explains why it cannot.
    fn construct(&self) -> Result<Instance, String>;
}

/// Source of type handles by class name.
pub trait Resolver: Send + Sync {
    /// # Errors
    /// - `LoaderError::ClassResolution` when the name is unknown.
    fn resolve(&self, class_name: &str) -> LoaderResult<TypeHandle>;

    /// Classpath searched before any fallback; `None` for non-isolated resolvers.
    fn class_path(&self) -> Option<&ClassPath> {
        None
    }
}

/// Host capability turning located class bytes into a type handle.
pub trait ClassDefiner: Send + Sync {
    fn define(&self, resource: &ClassResource) -> LoaderResult<TypeHandle>;
}

impl<F> ClassDefiner for F
where
    F: Fn(&ClassResource) -> LoaderResult<TypeHandle> + Send + Sync,
{
    fn define(&self, resource: &ClassResource) -> LoaderResult<TypeHandle> {
        self(resource)
    }
}

type Factory = dyn Fn() -> Result<Instance, String> + Send + Sync;

/// Constructible type backed by a factory closure.
pub struct FactoryType {
    class_name: String,
    factory: Box<Factory>,
}

impl FactoryType {
    pub fn new<F>(class_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Instance, String> + Send + Sync + 'static,
    {
        Self {
            class_name: class_name.into(),
            factory: Box::new(factory),
        }
    }

    /// Type whose zero-argument construction is `T::default()`.
    pub fn of<T>(class_name: impl Into<String>) -> Self
    where
        T: Default + Send + 'static,
    {
        Self::new(class_name, || Ok(Box::new(T::default()) as Instance))
    }

    /// Type producing `Box<dyn Tool>` instances from `T::default()`.
    pub fn tool<T>(class_name: impl Into<String>) -> Self
    where
        T: Tool + Default + 'static,
    {
        Self::new(class_name, || {
            let tool: Box<dyn Tool> = Box::new(T::default());
            Ok(Box::new(tool) as Instance)
        })
    }

    pub fn into_handle(self) -> TypeHandle {
        Arc::new(self)
    }
}

impl Debug for FactoryType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryType")
            .field("class_name", &self.class_name)
            .finish_non_exhaustive()
    }
}

impl ConstructibleType for FactoryType {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn construct(&self) -> Result<Instance, String> {
        (self.factory)()
    }
}

/// Types compiled into the host process.
#[derive(Default)]
pub struct HostResolver {
    types: RwLock<BTreeMap<String, TypeHandle>>,
}

impl HostResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handle` under its class name, returning any replaced handle.
    pub fn register(&self, handle: TypeHandle) -> Option<TypeHandle> {
        let class_name = handle.class_name().to_string();
        self.types.write().insert(class_name, handle)
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.types.read().contains_key(class_name)
    }

    /// Registered class names, sorted.
    pub fn class_names(&self) -> Vec<String> {
        self.types.read().keys().cloned().collect()
    }
}

impl Resolver for HostResolver {
    fn resolve(&self, class_name: &str) -> LoaderResult<TypeHandle> {
        validate_class_name(class_name)?;
        self.types
            .read()
            .get(class_name)
            .cloned()
            .ok_or_else(|| LoaderError::ClassResolution {
                class_name: class_name.to_string(),
            })
    }
}

/// Process-wide host resolver used when callers supply no parent.
pub fn default_resolver() -> Arc<HostResolver> {
    Arc::clone(&*HOST_RESOLVER)
}

/// Checks dotted identifier syntax, e.g. `org.example.Main$Inner`.
///
/// A malformed name can never resolve, so it is reported as
/// `LoaderError::ClassResolution` like any other unknown name.
pub fn validate_class_name(class_name: &str) -> LoaderResult<()> {
    if CLASS_NAME_RE.is_match(class_name) {
        return Ok(());
    }
    debug!(
        "event=class_resolve module=package status=rejected reason=malformed_name class={}",
        class_name
    );
    Err(LoaderError::ClassResolution {
        class_name: class_name.to_string(),
    })
}

/// Child-first resolver over a package classpath.
pub struct IsolatedResolver {
    class_path: ClassPath,
    parent: Arc<dyn Resolver>,
    definer: Arc<dyn ClassDefiner>,
    defined: Mutex<HashMap<String, TypeHandle>>,
}

impl IsolatedResolver {
    pub fn new(
        class_path: ClassPath,
        parent: Arc<dyn Resolver>,
        definer: Arc<dyn ClassDefiner>,
    ) -> Self {
        Self {
            class_path,
            parent,
            definer,
            defined: Mutex::new(HashMap::new()),
        }
    }

    pub fn parent(&self) -> &Arc<dyn Resolver> {
        &self.parent
    }

    /// Resolves `class_name` from this classpath only.
    pub fn find_local(&self, class_name: &str) -> LoaderResult<Option<TypeHandle>> {
        if let Some(handle) = self.defined.lock().get(class_name) {
            return Ok(Some(Arc::clone(handle)));
        }

        let Some(resource) = self.class_path.find_class(class_name)? else {
            return Ok(None);
        };
        let handle = self.definer.define(&resource)?;
        debug!(
            "event=class_define module=package status=ok class={} origin={}",
            class_name,
            resource.origin.display()
        );

        // Concurrent definitions of one name: the first stored handle wins.
        let mut defined = self.defined.lock();
        let handle = defined.entry(class_name.to_string()).or_insert(handle);
        Ok(Some(Arc::clone(handle)))
    }
}

impl Resolver for IsolatedResolver {
    fn resolve(&self, class_name: &str) -> LoaderResult<TypeHandle> {
        validate_class_name(class_name)?;
        if let Some(handle) = self.find_local(class_name)? {
            return Ok(handle);
        }
        debug!(
            "event=class_resolve module=package status=fallback class={}",
            class_name
        );
        self.parent.resolve(class_name)
    }

    fn class_path(&self) -> Option<&ClassPath> {
        Some(&self.class_path)
    }
}
