//! Execution contexts and the per-context resource registry.
//!
//! # Responsibility
//! - Name the unit of concurrent work that resource bindings are scoped to.
//! - Keep bindings of one context invisible to every other context.
//!
//! # Invariants
//! - One `ContextId` is never reused for a different thread within a process.
//! - Accessors are pure lookups; they never allocate registry state.

use std::cell::Cell;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

pub mod registry;

static NEXT_THREAD_CONTEXT: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_CONTEXT_ID: Cell<u64> = const { Cell::new(0) };
}

/// Identifier of one execution context (thread, task, or unit of work).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId {
    id: u64,
    label: String,
}

impl ContextId {
    pub fn new(id: u64, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Display for ContextId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.label, self.id)
    }
}

/// Host capability returning the context the caller currently runs in.
pub trait ContextAccessor: Send + Sync {
    fn current_context(&self) -> ContextId;
}

/// Treats every OS thread as its own execution context.
///
/// Ids come from a process-wide counter the first time a thread asks, so two
/// threads never share an id even if the OS recycles thread handles.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadContextAccessor;

impl ContextAccessor for ThreadContextAccessor {
    fn current_context(&self) -> ContextId {
        let id = THREAD_CONTEXT_ID.with(|slot| {
            if slot.get() == 0 {
                slot.set(NEXT_THREAD_CONTEXT.fetch_add(1, Ordering::Relaxed));
            }
            slot.get()
        });
        let current = std::thread::current();
        ContextId::new(id, current.name().unwrap_or("unnamed"))
    }
}

/// Always reports the same context.
///
/// Hosts that track their own unit of work (a transaction, a job attempt)
/// construct one of these per unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedContextAccessor {
    context: ContextId,
}

impl FixedContextAccessor {
    pub fn new(context: ContextId) -> Self {
        Self { context }
    }
}

impl ContextAccessor for FixedContextAccessor {
    fn current_context(&self) -> ContextId {
        self.context.clone()
    }
}
