//! Per-object storage state.

use crate::object::{ObjectRef, WeakObjectRef};
use crate::observer::{EventMask, Listener, Observer};
use refgraph_storage::{NodeId, SharedWriter, StorageWriter, StoreResult};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::error;

/// A registered observer.
///
/// Persistent objects observe each other as [`WeakObjectRef`]s; anything else
/// registers as a plain [`Observer`].
#[derive(Clone)]
pub(crate) enum ObserverRef {
    Object(WeakObjectRef),
    External(Weak<dyn Observer>),
}

impl ObserverRef {
    fn addr(&self) -> *const () {
        match self {
            Self::Object(weak) => weak.as_ptr().cast(),
            Self::External(weak) => weak.as_ptr().cast(),
        }
    }

    fn upgrade(&self) -> Option<LiveObserver> {
        match self {
            Self::Object(weak) => weak.upgrade().map(LiveObserver::Object),
            Self::External(weak) => weak.upgrade().map(LiveObserver::External),
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Self::Object(weak) => weak.strong_count() > 0,
            Self::External(weak) => weak.strong_count() > 0,
        }
    }
}

/// A strong handle to an observer for the duration of one dispatch.
pub(crate) enum LiveObserver {
    Object(ObjectRef),
    External(Rc<dyn Observer>),
}

impl LiveObserver {
    pub(crate) fn as_observer(&self) -> &dyn Observer {
        match self {
            Self::Object(object) => object.as_observer(),
            Self::External(observer) => observer.as_ref(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct ListenerEntry {
    pub(crate) listener: Weak<dyn Listener>,
    pub(crate) mask: EventMask,
}

/// State every persistent object embeds.
///
/// Holds the node ID, the reference count, the attached writer and the
/// object's observers, listeners and parents. All subscribers are held
/// weakly.
pub struct StorageBase {
    id: Cell<NodeId>,
    ref_count: Cell<u32>,
    handle: WeakObjectRef,
    writer: RefCell<Option<SharedWriter>>,
    observers: RefCell<Vec<ObserverRef>>,
    listeners: RefCell<Vec<ListenerEntry>>,
    parents: RefCell<Vec<WeakObjectRef>>,
}

impl std::fmt::Debug for StorageBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageBase")
            .field("id", &self.id.get())
            .field("ref_count", &self.ref_count.get())
            .field("attached", &self.writer.borrow().is_some())
            .finish_non_exhaustive()
    }
}

impl StorageBase {
    pub(crate) fn new(handle: WeakObjectRef) -> Self {
        Self {
            id: Cell::new(NodeId::new()),
            ref_count: Cell::new(0),
            handle,
            writer: RefCell::new(None),
            observers: RefCell::new(Vec::new()),
            listeners: RefCell::new(Vec::new()),
            parents: RefCell::new(Vec::new()),
        }
    }

    /// Returns the node ID.
    pub fn id(&self) -> NodeId {
        self.id.get()
    }

    /// Rebinds the object to a stored node ID.
    ///
    /// Used when rebuilding objects from storage; never call it on an object
    /// that already has a writer attached.
    pub fn set_id(&self, id: NodeId) {
        self.id.set(id);
    }

    /// Returns the number of owners holding this object.
    pub fn ref_count(&self) -> u32 {
        self.ref_count.get()
    }

    /// Returns a weak handle to the owning object.
    pub fn handle(&self) -> WeakObjectRef {
        self.handle.clone()
    }

    /// Returns the attached writer.
    pub fn writer(&self) -> Option<SharedWriter> {
        self.writer.borrow().clone()
    }

    /// Returns `true` if a writer is attached.
    pub fn is_attached(&self) -> bool {
        self.writer.borrow().is_some()
    }

    /// Number of live observers.
    pub fn observer_count(&self) -> usize {
        self.observers.borrow().iter().filter(|o| o.is_live()).count()
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners
            .borrow()
            .iter()
            .filter(|l| l.listener.strong_count() > 0)
            .count()
    }

    /// Number of live parents.
    pub fn parent_count(&self) -> usize {
        self.parents
            .borrow()
            .iter()
            .filter(|p| p.strong_count() > 0)
            .count()
    }

    pub(crate) fn set_writer(&self, writer: Option<SharedWriter>) {
        *self.writer.borrow_mut() = writer;
    }

    pub(crate) fn increment(&self) -> u32 {
        let count = self.ref_count.get() + 1;
        self.ref_count.set(count);
        count
    }

    pub(crate) fn decrement(&self) -> u32 {
        let count = self.ref_count.get();
        assert!(count > 0, "object {} released with no references", self.id());
        self.ref_count.set(count - 1);
        count - 1
    }

    pub(crate) fn add_observer(&self, observer: ObserverRef) {
        self.observers.borrow_mut().push(observer);
    }

    pub(crate) fn remove_observer(&self, addr: *const ()) {
        let mut observers = self.observers.borrow_mut();
        let Some(pos) = observers
            .iter()
            .position(|o| std::ptr::addr_eq(o.addr(), addr))
        else {
            panic!("observer is not registered on object {}", self.id());
        };
        observers.remove(pos);
    }

    pub(crate) fn add_listener(&self, entry: ListenerEntry) {
        self.listeners.borrow_mut().push(entry);
    }

    pub(crate) fn remove_listener(&self, addr: *const ()) {
        let mut listeners = self.listeners.borrow_mut();
        let Some(pos) = listeners
            .iter()
            .position(|l| std::ptr::addr_eq(l.listener.as_ptr().cast::<()>(), addr))
        else {
            panic!("listener is not registered on object {}", self.id());
        };
        listeners.remove(pos);
    }

    pub(crate) fn add_parent(&self, parent: WeakObjectRef) {
        self.parents.borrow_mut().push(parent);
    }

    pub(crate) fn remove_parent(&self, parent: &WeakObjectRef) {
        let mut parents = self.parents.borrow_mut();
        let Some(pos) = parents
            .iter()
            .position(|p| std::ptr::addr_eq(p.as_ptr(), parent.as_ptr()))
        else {
            panic!("parent is not registered on object {}", self.id());
        };
        parents.remove(pos);
    }

    /// Live observers, upgraded so callbacks can re-enter this object.
    pub(crate) fn live_observers(&self) -> Vec<LiveObserver> {
        self.observers
            .borrow()
            .iter()
            .filter_map(ObserverRef::upgrade)
            .collect()
    }

    pub(crate) fn live_listeners(&self) -> Vec<(Rc<dyn Listener>, EventMask)> {
        self.listeners
            .borrow()
            .iter()
            .filter_map(|l| l.listener.upgrade().map(|listener| (listener, l.mask)))
            .collect()
    }

    pub(crate) fn live_parents(&self) -> Vec<ObjectRef> {
        self.parents.borrow().iter().filter_map(Weak::upgrade).collect()
    }

    /// Returns `true` if any live parent still has a writer attached.
    pub(crate) fn has_attached_parent(&self) -> bool {
        self.live_parents()
            .iter()
            .any(|parent| parent.storage().is_attached())
    }

    /// Forwards one mutation to the attached writer, logging failures.
    pub(crate) fn write_through<F>(&self, op: &'static str, f: F)
    where
        F: FnOnce(&mut dyn StorageWriter) -> StoreResult<()>,
    {
        let Some(writer) = self.writer() else {
            return;
        };
        let mut guard = writer.lock();
        if let Err(err) = f(&mut *guard) {
            error!(id = %self.id(), op, error = %err, "storage write failed");
        }
    }

    /// Panics if anything still observes, listens to or owns this object.
    pub(crate) fn assert_released(&self) {
        let observers = self.observer_count();
        let listeners = self.listener_count();
        let parents = self.parent_count();
        assert!(
            observers == 0 && listeners == 0 && parents == 0,
            "object {} deleted while still attached: {observers} observers, {listeners} listeners, {parents} parents",
            self.id()
        );
    }
}
