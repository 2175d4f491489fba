//! Per-thread fan-out collector.
//!
//! When one test-class instance is shared by test methods running on
//! several threads at once, its providers can only hold one delegate. That
//! delegate is a `ThreadKeyedCollector`, which routes each operation to the
//! collector bound to the calling thread, so concurrent tests never see each
//! other's failures.
//!
//! # Example
//!
//! ```
//! use softly_core::{DefaultErrorCollector, ThreadKeyedCollector};
//! use softly_proto::{ErrorCollector, Failure};
//! use std::sync::Arc;
//!
//! let adapter = Arc::new(ThreadKeyedCollector::new());
//! let mine = Arc::new(DefaultErrorCollector::new());
//! adapter.set_delegate(mine.clone());
//!
//! adapter.collect(Failure::new("only for this thread"));
//! assert_eq!(mine.failures().len(), 1);
//!
//! adapter.reset();
//! assert!(adapter.delegate().is_none());
//! ```

use crate::collector::DefaultErrorCollector;
use softly_proto::{ErrorCollector, Failure};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle, Scope, ScopedJoinHandle, ThreadId};

/// Routes collector operations by the identity of the calling thread.
#[derive(Default)]
pub struct ThreadKeyedCollector {
    bindings: RwLock<HashMap<ThreadId, Arc<dyn ErrorCollector>>>,
    /// Receives failures reported from threads with no binding.
    orphaned: DefaultErrorCollector,
}

impl ThreadKeyedCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes the binding of the calling thread and returns it.
    ///
    /// Must run before a pooled thread is reused for an unrelated test.
    pub fn reset(&self) -> Option<Arc<dyn ErrorCollector>> {
        let id = thread::current().id();
        self.bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// True when the calling thread has a collector bound.
    pub fn is_bound(&self) -> bool {
        self.current().is_some()
    }

    /// Number of threads currently holding a binding.
    pub fn bound_threads(&self) -> usize {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Failures reported from threads that had no binding at the time.
    pub fn orphaned_failures(&self) -> Vec<Failure> {
        self.orphaned.failures()
    }

    /// Drains the failures reported from threads that had no binding.
    pub fn take_orphaned_failures(&self) -> Vec<Failure> {
        self.orphaned.take_failures()
    }

    /// Spawns a thread that inherits the calling thread's binding.
    ///
    /// The child's binding is removed when `f` returns or unwinds.
    pub fn spawn<F, T>(self: &Arc<Self>, f: F) -> JoinHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let adapter = Arc::clone(self);
        let inherited = self.current();
        thread::spawn(move || adapter.run_inheriting(inherited, f))
    }

    /// Scoped variant of [`ThreadKeyedCollector::spawn`].
    pub fn spawn_scoped<'scope, 'env, F, T>(
        &'scope self,
        scope: &'scope Scope<'scope, 'env>,
        f: F,
    ) -> ScopedJoinHandle<'scope, T>
    where
        F: FnOnce() -> T + Send + 'scope,
        T: Send + 'scope,
    {
        let inherited = self.current();
        scope.spawn(move || self.run_inheriting(inherited, f))
    }

    fn run_inheriting<T>(
        &self,
        inherited: Option<Arc<dyn ErrorCollector>>,
        f: impl FnOnce() -> T,
    ) -> T {
        if let Some(collector) = inherited {
            self.set_delegate(collector);
        }
        let _unbind = scopeguard::guard((), |()| {
            self.reset();
        });
        f()
    }

    fn current(&self) -> Option<Arc<dyn ErrorCollector>> {
        let id = thread::current().id();
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }
}

impl ErrorCollector for ThreadKeyedCollector {
    fn collect(&self, failure: Failure) {
        match self.current() {
            Some(collector) => collector.collect(failure),
            None => {
                tracing::warn!(
                    thread = ?thread::current().id(),
                    failure = %failure.message,
                    "Soft assertion failed on a thread with no bound collector"
                );
                self.orphaned.collect(failure);
            }
        }
    }

    fn record_success(&self) {
        if let Some(collector) = self.current() {
            collector.record_success();
        }
    }

    fn failures(&self) -> Vec<Failure> {
        self.current()
            .map(|collector| collector.failures())
            .unwrap_or_default()
    }

    fn had_any_success(&self) -> bool {
        self.current()
            .is_some_and(|collector| collector.had_any_success())
    }

    fn delegate(&self) -> Option<Arc<dyn ErrorCollector>> {
        self.current()
    }

    /// Binds `delegate` to the calling thread only.
    fn set_delegate(&self, delegate: Arc<dyn ErrorCollector>) {
        let id = thread::current().id();
        tracing::trace!(thread = ?id, "Binding collector to thread");
        self.bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, delegate);
    }
}

impl fmt::Debug for ThreadKeyedCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadKeyedCollector")
            .field("bound_threads", &self.bound_threads())
            .field("orphaned", &self.orphaned.failures().len())
            .finish()
    }
}
