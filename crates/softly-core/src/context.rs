//! Hierarchical execution contexts with per-context stores.
//!
//! A test runner describes its run as a tree: an engine root, one node per
//! test class, one per test method. Each node carries a [`Store`] whose
//! values live as long as the node, plus lifecycle and execution-mode
//! settings inherited from the nearest ancestor that sets them.
//!
//! # Example
//!
//! ```
//! use softly_core::context::{ContextSpec, ContextTree, Lifecycle};
//!
//! let tree = ContextTree::new();
//! let class = tree.root().child(ContextSpec::class("PersonTest").lifecycle(Lifecycle::PerClass));
//! let method = class.child(ContextSpec::method("name_is_set"));
//!
//! assert!(method.is_per_class());
//! assert!(method.has_test_method());
//! assert!(!class.has_test_method());
//! ```

use softly_proto::{Error, Result};
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock, TryLockError};

/// A type-erased stored value.
pub type StoreValue = Arc<dyn Any + Send + Sync>;

/// Index of a node in its [`ContextTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Engine,
    Class,
    Method,
}

/// How many test-class instances a class gets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Lifecycle {
    /// A fresh instance per test method.
    #[default]
    PerMethod,
    /// One instance shared by every test method of the class.
    PerClass,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    #[default]
    SameThread,
    /// Children may run at the same time on different threads.
    Concurrent,
}

/// Identifies a stored value: a namespace plus a key within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub namespace: TypeId,
    pub key: TypeId,
}

impl StoreKey {
    pub fn new(namespace: TypeId, key: TypeId) -> Self {
        Self { namespace, key }
    }

    /// The key of a typed slot.
    pub fn slot<S: Slot>() -> Self {
        Self::new(TypeId::of::<S::Namespace>(), TypeId::of::<S>())
    }
}

/// A typed store entry. The implementing type is the key.
pub trait Slot: 'static {
    type Namespace: ?Sized + 'static;
    type Value: Send + Sync + 'static;
}

type Cell = Arc<Mutex<Option<StoreValue>>>;

/// Key-value store owned by one context.
///
/// Creation is exactly-once per key even under concurrent first access. The
/// map lock is only held to find a key's cell, and construction happens
/// under that cell's own lock, so a constructor may use the store for other
/// keys. Re-entering for the same key deadlocks.
#[derive(Default)]
pub struct Store {
    cells: Mutex<HashMap<StoreKey, Cell>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_raw(&self, key: StoreKey) -> Option<StoreValue> {
        let cell = self
            .cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()?;
        cell.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn contains(&self, key: StoreKey) -> bool {
        self.get_raw(key).is_some()
    }

    /// Returns the value under `key`, running `init` to create it if absent.
    ///
    /// A failed `init` leaves the key empty so a later call can retry.
    pub fn get_or_try_insert_raw(
        &self,
        key: StoreKey,
        init: impl FnOnce() -> Result<StoreValue>,
    ) -> Result<StoreValue> {
        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(cells.entry(key).or_default())
        };

        let mut slot = cell.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = slot.as_ref() {
            return Ok(Arc::clone(value));
        }
        match init() {
            Ok(value) => {
                *slot = Some(Arc::clone(&value));
                Ok(value)
            }
            Err(error) => {
                drop(slot);
                self.remove_if_unclaimed(key, &cell);
                Err(error)
            }
        }
    }

    /// Drops an empty cell nobody else is waiting on.
    fn remove_if_unclaimed(&self, key: StoreKey, cell: &Cell) {
        let mut cells = self.cells.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one held by the caller.
        if Arc::strong_count(cell) == 2
            && cells.get(&key).is_some_and(|current| Arc::ptr_eq(current, cell))
        {
            cells.remove(&key);
        }
    }

    pub fn get<S: Slot>(&self) -> Result<Option<Arc<S::Value>>> {
        self.get_raw(StoreKey::slot::<S>())
            .map(downcast::<S>)
            .transpose()
    }

    pub fn get_or_try_insert_with<S: Slot>(
        &self,
        init: impl FnOnce() -> Result<S::Value>,
    ) -> Result<Arc<S::Value>> {
        let value = self.get_or_try_insert_raw(StoreKey::slot::<S>(), || {
            init().map(|value| Arc::new(value) as StoreValue)
        })?;
        downcast::<S>(value)
    }

    /// Drops every stored value.
    pub fn clear(&self) {
        self.cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of keys holding a value. Keys still under construction are
    /// not counted.
    pub fn len(&self) -> usize {
        let cells: Vec<Cell> = self
            .cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        cells
            .iter()
            .filter(|cell| match cell.try_lock() {
                Ok(slot) => slot.is_some(),
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().is_some(),
                Err(TryLockError::WouldBlock) => false,
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("entries", &self.len()).finish()
    }
}

fn downcast<S: Slot>(value: StoreValue) -> Result<Arc<S::Value>> {
    value.downcast::<S::Value>().map_err(|_| {
        Error::InternalConsistency(format!(
            "store entry {} does not hold a {}",
            type_name::<S>(),
            type_name::<S::Value>()
        ))
    })
}

/// Description of a node to add to a tree.
#[derive(Debug, Clone)]
pub struct ContextSpec {
    name: String,
    kind: ContextKind,
    lifecycle: Option<Lifecycle>,
    mode: Option<ExecutionMode>,
}

impl ContextSpec {
    pub fn class(name: impl Into<String>) -> Self {
        Self::new(name, ContextKind::Class)
    }

    pub fn method(name: impl Into<String>) -> Self {
        Self::new(name, ContextKind::Method)
    }

    fn new(name: impl Into<String>, kind: ContextKind) -> Self {
        Self {
            name: name.into(),
            kind,
            lifecycle: None,
            mode: None,
        }
    }

    pub fn lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

#[derive(Debug)]
struct Node {
    name: String,
    kind: ContextKind,
    parent: Option<ContextId>,
    lifecycle: Option<Lifecycle>,
    mode: Option<ExecutionMode>,
    store: Arc<Store>,
}

/// Arena of context nodes, shared by every handle into it.
///
/// A tree describes one run. Nodes live until the tree is dropped;
/// [`ExecutionContext::close`] releases a node's stored values but keeps the
/// node so handles to it stay valid. Long-lived runners should start a new
/// tree per run, as [`ScenarioRunner`](crate::testing::ScenarioRunner) does
/// per class.
#[derive(Clone)]
pub struct ContextTree {
    nodes: Arc<RwLock<Vec<Arc<Node>>>>,
}

impl ContextTree {
    /// Creates a tree holding only the engine root.
    pub fn new() -> Self {
        let root = Node {
            name: "engine".to_string(),
            kind: ContextKind::Engine,
            parent: None,
            lifecycle: None,
            mode: None,
            store: Arc::new(Store::new()),
        };
        Self {
            nodes: Arc::new(RwLock::new(vec![Arc::new(root)])),
        }
    }

    pub fn root(&self) -> ExecutionContext {
        self.context(ContextId(0))
    }

    fn context(&self, id: ContextId) -> ExecutionContext {
        ExecutionContext {
            tree: self.clone(),
            id,
        }
    }

    fn node(&self, id: ContextId) -> Arc<Node> {
        Arc::clone(&self.nodes.read().unwrap_or_else(PoisonError::into_inner)[id.0])
    }

    fn push(&self, node: Node) -> ContextId {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        nodes.push(Arc::new(node));
        ContextId(nodes.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ContextTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ContextTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextTree").field("nodes", &self.len()).finish()
    }
}

/// Handle to one node of a [`ContextTree`].
#[derive(Clone)]
pub struct ExecutionContext {
    tree: ContextTree,
    id: ContextId,
}

impl ExecutionContext {
    /// Adds a child node and returns its handle.
    pub fn child(&self, spec: ContextSpec) -> ExecutionContext {
        let id = self.tree.push(Node {
            name: spec.name,
            kind: spec.kind,
            parent: Some(self.id),
            lifecycle: spec.lifecycle,
            mode: spec.mode,
            store: Arc::new(Store::new()),
        });
        self.tree.context(id)
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn name(&self) -> String {
        self.tree.node(self.id).name.clone()
    }

    pub fn kind(&self) -> ContextKind {
        self.tree.node(self.id).kind
    }

    pub fn parent(&self) -> Option<ExecutionContext> {
        self.tree
            .node(self.id)
            .parent
            .map(|id| self.tree.context(id))
    }

    /// This context followed by each ancestor up to the root.
    pub fn ancestors(&self) -> impl Iterator<Item = ExecutionContext> + use<> {
        std::iter::successors(Some(self.clone()), ExecutionContext::parent)
    }

    pub fn store(&self) -> Arc<Store> {
        Arc::clone(&self.tree.node(self.id).store)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.ancestors()
            .find_map(|ctx| ctx.tree.node(ctx.id).lifecycle)
            .unwrap_or_default()
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.ancestors()
            .find_map(|ctx| ctx.tree.node(ctx.id).mode)
            .unwrap_or_default()
    }

    pub fn is_per_class(&self) -> bool {
        self.lifecycle() == Lifecycle::PerClass
    }

    pub fn is_concurrent(&self) -> bool {
        self.execution_mode() == ExecutionMode::Concurrent
    }

    /// True for a context that runs a single test method.
    pub fn has_test_method(&self) -> bool {
        self.kind() == ContextKind::Method
    }

    /// Looks `key` up in this context, then in each ancestor.
    pub fn find_inherited_raw(&self, key: StoreKey) -> Option<StoreValue> {
        self.ancestors().find_map(|ctx| ctx.store().get_raw(key))
    }

    /// Returns the value visible from this context, creating it here if no
    /// context on the path to the root holds one.
    pub fn get_or_insert_inherited_raw(
        &self,
        key: StoreKey,
        init: impl FnOnce() -> Result<StoreValue>,
    ) -> Result<StoreValue> {
        if let Some(value) = self.parent().and_then(|parent| parent.find_inherited_raw(key)) {
            return Ok(value);
        }
        self.store().get_or_try_insert_raw(key, init)
    }

    pub fn get_or_insert_inherited<S: Slot>(
        &self,
        init: impl FnOnce() -> Result<S::Value>,
    ) -> Result<Arc<S::Value>> {
        let value = self.get_or_insert_inherited_raw(StoreKey::slot::<S>(), || {
            init().map(|value| Arc::new(value) as StoreValue)
        })?;
        downcast::<S>(value)
    }

    pub fn find_inherited<S: Slot>(&self) -> Result<Option<Arc<S::Value>>> {
        self.find_inherited_raw(StoreKey::slot::<S>())
            .map(downcast::<S>)
            .transpose()
    }

    /// Ends this context; everything in its store is dropped.
    pub fn close(&self) {
        let store = self.store();
        tracing::debug!(context = %self.name(), entries = store.len(), "Closing context");
        store.clear();
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = self.tree.node(self.id);
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("name", &node.name)
            .field("kind", &node.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct Counter;
    impl Slot for Counter {
        type Namespace = Counter;
        type Value = AtomicUsize;
    }

    struct Label;
    impl Slot for Label {
        type Namespace = Counter;
        type Value = String;
    }

    #[test]
    fn test_settings_inherited_from_nearest_ancestor() {
        let tree = ContextTree::new();
        let class = tree.root().child(
            ContextSpec::class("C")
                .lifecycle(Lifecycle::PerClass)
                .execution_mode(ExecutionMode::Concurrent),
        );
        let nested = class.child(ContextSpec::class("Inner").lifecycle(Lifecycle::PerMethod));
        let method = nested.child(ContextSpec::method("m"));

        assert!(class.is_per_class() && class.is_concurrent());
        assert!(!method.is_per_class());
        assert!(method.is_concurrent());
        assert_eq!(tree.root().lifecycle(), Lifecycle::PerMethod);
    }

    #[test]
    fn test_parent_and_ancestors() {
        let tree = ContextTree::new();
        let class = tree.root().child(ContextSpec::class("C"));
        let method = class.child(ContextSpec::method("m"));

        assert_eq!(method.parent().unwrap().id(), class.id());
        let names: Vec<_> = method.ancestors().map(|ctx| ctx.name()).collect();
        assert_eq!(names, vec!["m", "C", "engine"]);
        assert!(tree.root().parent().is_none());
    }

    #[test]
    fn test_store_creates_once() {
        let store = Store::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            store
                .get_or_try_insert_with::<Label>(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("made".to_string())
                })
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.get::<Label>().unwrap().unwrap().as_str(), "made");
    }

    #[test]
    fn test_failed_init_can_be_retried() {
        let store = Store::new();
        let err = store
            .get_or_try_insert_with::<Label>(|| Err(Error::Configuration("nope".into())))
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(store.get::<Label>().unwrap().is_none());
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);

        store
            .get_or_try_insert_with::<Label>(|| Ok("second".into()))
            .unwrap();
        assert!(store.get::<Label>().unwrap().is_some());
    }

    #[test]
    fn test_constructor_may_reenter_for_other_keys() {
        let store = Store::new();
        let label = store
            .get_or_try_insert_with::<Label>(|| {
                let counter = store.get_or_try_insert_with::<Counter>(|| Ok(AtomicUsize::new(7)))?;
                Ok(format!("count={}", counter.load(Ordering::SeqCst)))
            })
            .unwrap();

        assert_eq!(label.as_str(), "count=7");
    }

    #[test]
    fn test_concurrent_first_access_builds_one_value() {
        let store = Arc::new(Store::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let calls = calls.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    store
                        .get_or_try_insert_with::<Counter>(|| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(AtomicUsize::new(0))
                        })
                        .unwrap()
                })
            })
            .collect();
        let values: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
    }

    #[test]
    fn test_inherited_lookup_prefers_ancestor_value() {
        let tree = ContextTree::new();
        let class = tree.root().child(ContextSpec::class("C"));
        let method = class.child(ContextSpec::method("m"));

        let from_class = class
            .get_or_insert_inherited::<Label>(|| Ok("class".into()))
            .unwrap();
        let from_method = method
            .get_or_insert_inherited::<Label>(|| Ok("method".into()))
            .unwrap();

        assert!(Arc::ptr_eq(&from_class, &from_method));
        assert!(method.store().is_empty());
    }

    #[test]
    fn test_inherited_creates_locally_when_absent() {
        let tree = ContextTree::new();
        let class = tree.root().child(ContextSpec::class("C"));
        let method = class.child(ContextSpec::method("m"));

        method
            .get_or_insert_inherited::<Label>(|| Ok("method".into()))
            .unwrap();

        assert!(method.store().get::<Label>().unwrap().is_some());
        assert!(class.find_inherited::<Label>().unwrap().is_none());
    }

    #[test]
    fn test_close_clears_store() {
        let tree = ContextTree::new();
        let method = tree.root().child(ContextSpec::method("m"));
        method
            .store()
            .get_or_try_insert_with::<Label>(|| Ok("x".into()))
            .unwrap();

        method.close();

        assert!(method.store().is_empty());
    }

    #[test]
    fn test_closed_node_stays_addressable() {
        let tree = ContextTree::new();
        let class = tree.root().child(ContextSpec::class("C"));
        let method = class.child(ContextSpec::method("m"));
        let nodes = tree.len();

        method.close();

        assert_eq!(tree.len(), nodes);
        assert_eq!(method.name(), "m");
        assert_eq!(method.parent().unwrap().id(), class.id());
    }
}
