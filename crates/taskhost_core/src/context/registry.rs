//! Per-context resource bindings.
//!
//! # Responsibility
//! - Let nested code discover a scarce handle (a table, a connection) that an
//!   outer frame of the same execution context already acquired.
//! - Fail fast on double binds and on unbinding something never bound.
//!
//! # Invariants
//! - At most one binding per key per context.
//! - A context whose last binding is removed leaves no state behind.
//! - Handles are stored and returned untouched; the registry never inspects them.

use super::{ContextAccessor, ContextId, ThreadContextAccessor};
use log::trace;
use parking_lot::Mutex;
use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};

pub type RegistryResult<T> = Result<T, RegistryError>;

/// Misuse of the bind/unbind protocol. Both variants signal caller bugs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// `bind` on a key that is already bound in the context.
    Conflict {
        key: String,
        existing: String,
        context: ContextId,
    },
    /// `unbind` on a key with nothing bound in the context.
    NotBound { key: String, context: ContextId },
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conflict {
                key,
                existing,
                context,
            } => write!(
                f,
                "already value [{existing}] for key [{key}] bound to context [{context}]"
            ),
            Self::NotBound { key, context } => {
                write!(f, "no value for key [{key}] bound to context [{context}]")
            }
        }
    }
}

impl Error for RegistryError {}

/// Registry of resource handles keyed by execution context, then by key.
///
/// Operations without a context argument act on the context reported by the
/// accessor. The `*_in` variants take the context explicitly.
pub struct ResourceRegistry<K, H, A = ThreadContextAccessor> {
    accessor: A,
    contexts: Mutex<HashMap<ContextId, BTreeMap<K, H>>>,
}

impl<K, H> ResourceRegistry<K, H, ThreadContextAccessor>
where
    K: Ord + Clone + Debug,
    H: Debug,
{
    pub fn new() -> Self {
        Self::with_accessor(ThreadContextAccessor)
    }
}

impl<K, H> Default for ResourceRegistry<K, H, ThreadContextAccessor>
where
    K: Ord + Clone + Debug,
    H: Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, H, A> ResourceRegistry<K, H, A>
where
    K: Ord + Clone + Debug,
    H: Debug,
    A: ContextAccessor,
{
    pub fn with_accessor(accessor: A) -> Self {
        Self {
            accessor,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    pub fn current_context(&self) -> ContextId {
        self.accessor.current_context()
    }

    pub fn has_resource<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.has_resource_in(&self.current_context(), key)
    }

    pub fn has_resource_in<Q>(&self, context: &ContextId, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.contexts
            .lock()
            .get(context)
            .is_some_and(|bindings| bindings.contains_key(key))
    }

    pub fn get_resource<Q>(&self, key: &Q) -> Option<H>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
        H: Clone,
    {
        self.get_resource_in(&self.current_context(), key)
    }

    pub fn get_resource_in<Q>(&self, context: &ContextId, key: &Q) -> Option<H>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
        H: Clone,
    {
        self.contexts
            .lock()
            .get(context)
            .and_then(|bindings| bindings.get(key).cloned())
    }

    /// Binds `handle` under `key` in the current context.
    ///
    /// # Errors
    /// - `RegistryError::Conflict` when `key` is already bound; the stored
    ///   handle is left as it was.
    pub fn bind_resource(&self, key: K, handle: H) -> RegistryResult<()> {
        self.bind_resource_in(&self.current_context(), key, handle)
    }

    pub fn bind_resource_in(&self, context: &ContextId, key: K, handle: H) -> RegistryResult<()> {
        let mut contexts = self.contexts.lock();
        let bindings = contexts.entry(context.clone()).or_default();
        if let Some(existing) = bindings.get(&key) {
            return Err(RegistryError::Conflict {
                key: format!("{key:?}"),
                existing: format!("{existing:?}"),
                context: context.clone(),
            });
        }

        trace!(
            "event=resource_bind module=context status=ok key={:?} value={:?} context={}",
            key,
            handle,
            context
        );
        bindings.insert(key, handle);
        Ok(())
    }

    /// Removes and returns the handle bound under `key` in the current context.
    ///
    /// # Errors
    /// - `RegistryError::NotBound` when nothing is bound under `key`.
    pub fn unbind_resource<Q>(&self, key: &Q) -> RegistryResult<H>
    where
        K: Borrow<Q>,
        Q: Ord + Debug + ?Sized,
    {
        self.unbind_resource_in(&self.current_context(), key)
    }

    pub fn unbind_resource_in<Q>(&self, context: &ContextId, key: &Q) -> RegistryResult<H>
    where
        K: Borrow<Q>,
        Q: Ord + Debug + ?Sized,
    {
        self.unbind_resource_if_present_in(context, key)
            .ok_or_else(|| RegistryError::NotBound {
                key: format!("{key:?}"),
                context: context.clone(),
            })
    }

    /// Like `unbind_resource` but returns `None` instead of failing.
    ///
    /// Meant for cleanup paths that are already handling another error.
    pub fn unbind_resource_if_present<Q>(&self, key: &Q) -> Option<H>
    where
        K: Borrow<Q>,
        Q: Ord + Debug + ?Sized,
    {
        self.unbind_resource_if_present_in(&self.current_context(), key)
    }

    pub fn unbind_resource_if_present_in<Q>(&self, context: &ContextId, key: &Q) -> Option<H>
    where
        K: Borrow<Q>,
        Q: Ord + Debug + ?Sized,
    {
        let mut contexts = self.contexts.lock();
        let bindings = contexts.get_mut(context)?;
        let removed = bindings.remove(key);
        if bindings.is_empty() {
            contexts.remove(context);
        }

        if let Some(handle) = &removed {
            trace!(
                "event=resource_unbind module=context status=ok key={:?} value={:?} context={}",
                key,
                handle,
                context
            );
        }
        removed
    }

    /// Snapshot of the keys bound in the current context.
    pub fn bound_keys(&self) -> BTreeSet<K> {
        self.bound_keys_in(&self.current_context())
    }

    pub fn bound_keys_in(&self, context: &ContextId) -> BTreeSet<K> {
        self.contexts
            .lock()
            .get(context)
            .map(|bindings| bindings.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of contexts that currently hold at least one binding.
    pub fn active_contexts(&self) -> usize {
        self.contexts.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::{RegistryError, ResourceRegistry};
    use crate::context::{ContextId, FixedContextAccessor};

    fn registry() -> ResourceRegistry<String, u32, FixedContextAccessor> {
        ResourceRegistry::with_accessor(FixedContextAccessor::new(ContextId::new(1, "main")))
    }

    #[test]
    fn bind_then_get_returns_handle() {
        let registry = registry();
        registry
            .bind_resource("orders".to_string(), 11)
            .expect("first bind should succeed");

        assert!(registry.has_resource("orders"));
        assert_eq!(registry.get_resource("orders"), Some(11));
        assert_eq!(registry.get_resource("missing"), None);
    }

    #[test]
    fn conflicting_bind_keeps_original_handle() {
        let registry = registry();
        registry
            .bind_resource("orders".to_string(), 11)
            .expect("first bind should succeed");

        let err = registry
            .bind_resource("orders".to_string(), 12)
            .expect_err("second bind must fail");
        assert!(matches!(err, RegistryError::Conflict { .. }));
        let message = err.to_string();
        assert!(message.contains("[11]"));
        assert!(message.contains("orders"));
        assert!(message.contains("main#1"));

        assert_eq!(registry.get_resource("orders"), Some(11));
    }

    #[test]
    fn unbind_of_unbound_key_fails_and_if_present_is_noop() {
        let registry = registry();
        let err = registry
            .unbind_resource("orders")
            .expect_err("unbind without bind must fail");
        assert_eq!(
            err,
            RegistryError::NotBound {
                key: "\"orders\"".to_string(),
                context: ContextId::new(1, "main"),
            }
        );

        assert_eq!(registry.unbind_resource_if_present("orders"), None);
        assert_eq!(registry.active_contexts(), 0);
    }

    #[test]
    fn querying_unknown_context_creates_no_state() {
        let registry = registry();
        let other = ContextId::new(2, "other");
        registry
            .bind_resource("orders".to_string(), 1)
            .expect("bind in default context");
        assert_eq!(registry.active_contexts(), 1);
        assert!(registry.bound_keys_in(&other).is_empty());
        assert_eq!(registry.active_contexts(), 1);
    }

    #[test]
    fn last_unbind_reclaims_context() {
        let registry = registry();
        registry
            .bind_resource("a".to_string(), 1)
            .expect("bind a");
        registry
            .bind_resource("b".to_string(), 2)
            .expect("bind b");

        assert_eq!(registry.unbind_resource("a").expect("unbind a"), 1);
        assert_eq!(registry.active_contexts(), 1);
        assert_eq!(registry.unbind_resource_if_present("b"), Some(2));
        assert_eq!(registry.active_contexts(), 0);
        assert!(registry.bound_keys().is_empty());

        registry
            .bind_resource("a".to_string(), 3)
            .expect("rebinding after reclaim should succeed");
        assert_eq!(registry.get_resource("a"), Some(3));
    }
}
