//! Persistent objects.
//!
//! Application types implement [`Persistent`]: they embed a [`StorageBase`],
//! describe their keys with a [`Shape`], and call the `notify_*` methods of
//! [`PersistentObject`] from their setters. Everything else (writer
//! forwarding, observer dispatch, parent tracking, reference counting) is
//! provided.

use crate::base::{ListenerEntry, ObserverRef, StorageBase};
use crate::error::{CoreError, CoreResult};
use crate::observer::{EventMask, Listener, Observer, StorageEvent};
use crate::shape::{Declaration, Shape};
use refgraph_codec::Value;
use refgraph_storage::{NodeId, NodeRecord, SharedWriter};
use std::any::Any;
use std::collections::HashSet;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

/// Strong, type-erased handle to a persistent object.
pub type ObjectRef = Rc<dyn PersistentObject>;

/// Weak, type-erased handle to a persistent object.
pub type WeakObjectRef = Weak<dyn PersistentObject>;

impl std::fmt::Debug for dyn PersistentObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentObject")
            .field("type_tag", &self.type_tag())
            .finish_non_exhaustive()
    }
}

/// Implemented by application types that persist.
pub trait Persistent: Observer + Sized + 'static {
    /// The embedded storage state.
    fn base(&self) -> &StorageBase;

    /// The type's storage declaration.
    fn shape() -> &'static Shape<Self>;

    /// Runs when the last owner releases this object.
    ///
    /// Implementations release everything the object owns, typically by
    /// clearing its relationships and item slots.
    fn about_to_delete(&self) {}
}

/// Creates a persistent object.
///
/// `build` receives the object's [`StorageBase`], already bound to the
/// object's handle, so relationships and item slots can be constructed
/// against it.
pub fn create<T: Persistent>(build: impl FnOnce(StorageBase) -> T) -> Rc<T> {
    Rc::new_cyclic(|weak: &Weak<T>| {
        let handle: WeakObjectRef = weak.clone();
        build(StorageBase::new(handle))
    })
}

/// Downcasts a type-erased object.
pub fn downcast<T: Persistent>(object: &ObjectRef) -> Option<Rc<T>> {
    Rc::clone(object).into_any().downcast::<T>().ok()
}

/// The type-erased persistent object protocol.
///
/// Implemented for every [`Persistent`] type. Writer calls always precede
/// observer and listener callbacks, so a callback that reads storage sees the
/// change.
pub trait PersistentObject: Observer {
    /// The object as a trait object.
    fn as_object(&self) -> &dyn PersistentObject;

    /// The object as an observer.
    fn as_observer(&self) -> &dyn Observer;

    /// The embedded storage state.
    fn storage(&self) -> &StorageBase;

    /// The type's declared keys.
    fn declaration(&self) -> Declaration;

    /// The type tag written to storage.
    fn type_tag(&self) -> &'static str;

    /// Reads a declared property.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not a declared property.
    fn get_storage_property(&self, key: &str) -> Option<Value>;

    /// Writes a declared property through its setter.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not a declared property.
    fn set_storage_property(&self, key: &str, value: Value);

    /// Reads a declared item slot.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not a declared item.
    fn get_storage_item(&self, key: &str) -> Option<ObjectRef>;

    /// Reads a declared relationship.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not a declared relationship.
    fn get_storage_relationship(&self, key: &str) -> Vec<ObjectRef>;

    /// Reads a declared data slot.
    ///
    /// # Panics
    ///
    /// Panics if `key` is not a declared data key.
    fn get_storage_data(&self, key: &str) -> Option<Vec<u8>>;

    /// Every object held in an item slot or relationship.
    fn children(&self) -> Vec<ObjectRef>;

    /// Runs the type's deletion hook.
    fn run_delete_hook(&self);

    /// The object as [`Any`].
    fn as_any(&self) -> &dyn Any;

    /// The object as a shared [`Any`], for downcasting.
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;

    /// Returns the node ID.
    fn id(&self) -> NodeId {
        self.storage().id()
    }

    /// Returns the number of owners holding this object.
    fn ref_count(&self) -> u32 {
        self.storage().ref_count()
    }

    /// Records one more owner.
    fn add_ref(&self) {
        self.storage().increment();
    }

    /// Releases one owner. When the last owner goes, the deletion hook runs
    /// and the object must no longer be observed, listened to or owned.
    ///
    /// # Panics
    ///
    /// Panics if the count is already zero, or if subscribers remain once it
    /// reaches zero.
    fn remove_ref(&self) {
        let base = self.storage();
        if base.decrement() == 0 {
            trace!(id = %base.id(), type_tag = self.type_tag(), "releasing object");
            self.run_delete_hook();
            base.assert_released();
        }
    }

    /// Registers an observer.
    fn add_observer(&self, observer: &Rc<dyn Observer>) {
        self.storage()
            .add_observer(ObserverRef::External(Rc::downgrade(observer)));
    }

    /// Unregisters an observer.
    ///
    /// # Panics
    ///
    /// Panics if the observer is not registered.
    fn remove_observer(&self, observer: &Rc<dyn Observer>) {
        self.storage()
            .remove_observer(Rc::as_ptr(observer).cast::<()>());
    }

    /// Registers another persistent object as an observer.
    fn add_object_observer(&self, observer: &WeakObjectRef) {
        self.storage()
            .add_observer(ObserverRef::Object(observer.clone()));
    }

    /// Unregisters a persistent object observer.
    ///
    /// # Panics
    ///
    /// Panics if the observer is not registered.
    fn remove_object_observer(&self, observer: &WeakObjectRef) {
        self.storage().remove_observer(observer.as_ptr().cast::<()>());
    }

    /// Registers a listener for the kinds it subscribes to.
    fn add_listener(&self, listener: &Rc<dyn Listener>) {
        let mask = EventMask::from_kinds(&listener.subscriptions());
        self.storage().add_listener(ListenerEntry {
            listener: Rc::downgrade(listener),
            mask,
        });
    }

    /// Unregisters a listener.
    ///
    /// # Panics
    ///
    /// Panics if the listener is not registered.
    fn remove_listener(&self, listener: &Rc<dyn Listener>) {
        self.storage()
            .remove_listener(Rc::as_ptr(listener).cast::<()>());
    }

    /// Registers an owning parent.
    fn add_parent(&self, parent: &WeakObjectRef) {
        self.storage().add_parent(parent.clone());
    }

    /// Unregisters an owning parent.
    ///
    /// # Panics
    ///
    /// Panics if the parent is not registered.
    fn remove_parent(&self, parent: &WeakObjectRef) {
        self.storage().remove_parent(parent);
    }

    /// Returns the attached writer.
    fn writer(&self) -> Option<SharedWriter> {
        self.storage().writer()
    }

    /// Attaches `writer` to this object and its descendants, or detaches
    /// with `None`.
    ///
    /// Shared descendants are visited once. When detaching, a descendant
    /// that still has another attached parent keeps its writer. Never issues
    /// backend calls.
    fn attach_writer(&self, writer: Option<SharedWriter>) {
        let attaching = writer.is_some();
        let mut visited = HashSet::from([self.id()]);
        self.storage().set_writer(writer.clone());

        let mut pending = self.children();
        while let Some(object) = pending.pop() {
            if !visited.insert(object.id()) {
                continue;
            }
            if !attaching && object.storage().has_attached_parent() {
                continue;
            }
            object.storage().set_writer(writer.clone());
            pending.extend(object.children());
        }
        debug!(id = %self.id(), attaching, objects = visited.len(), "writer attachment changed");
    }

    /// Forwards a property change, then notifies observers and listeners.
    fn notify_set_property(&self, key: &str, value: &Value) {
        let id = self.id();
        self.storage()
            .write_through("set_property", |w| w.set_property(id, key, value));
        let sender = self.as_object();
        for observer in self.storage().live_observers() {
            observer.as_observer().property_changed(sender, key, value);
        }
        self.notify_listeners(&StorageEvent::PropertyChanged { key, value });
    }

    /// Forwards a newly linked item, adopts it, then notifies.
    fn notify_set_item(&self, key: &str, item: &ObjectRef) {
        let id = self.id();
        self.storage()
            .write_through("set_item", |w| w.set_item(id, key, &item.to_record()));
        self.adopt(item);
        let sender = self.as_object();
        for observer in self.storage().live_observers() {
            observer.as_observer().item_set(sender, key, item);
        }
        self.notify_listeners(&StorageEvent::ItemSet { key, item });
    }

    /// Forwards an unlinked item, disowns it, then notifies.
    fn notify_clear_item(&self, key: &str, item: &ObjectRef) {
        let id = self.id();
        self.storage()
            .write_through("clear_item", |w| w.clear_item(id, key));
        self.disown(item);
        let sender = self.as_object();
        for observer in self.storage().live_observers() {
            observer.as_observer().item_cleared(sender, key);
        }
        self.notify_listeners(&StorageEvent::ItemCleared { key });
    }

    /// Forwards a data blob, then notifies.
    fn notify_set_data(&self, key: &str, data: &[u8]) {
        let id = self.id();
        self.storage()
            .write_through("set_data", |w| w.set_data(id, key, data));
        let sender = self.as_object();
        for observer in self.storage().live_observers() {
            observer.as_observer().data_set(sender, key, data);
        }
        self.notify_listeners(&StorageEvent::DataSet { key, data });
    }

    /// Forwards a relationship insertion, adopts the member, then notifies.
    fn notify_insert_item(&self, key: &str, item: &ObjectRef, index: usize) {
        let id = self.id();
        self.storage().write_through("insert_item", |w| {
            w.insert_item(id, key, &item.to_record(), index)
        });
        self.adopt(item);
        let sender = self.as_object();
        for observer in self.storage().live_observers() {
            observer.as_observer().item_inserted(sender, key, item, index);
        }
        self.notify_listeners(&StorageEvent::ItemInserted { key, item, index });
    }

    /// Forwards a relationship removal, disowns the member, then notifies.
    fn notify_remove_item(&self, key: &str, item: &ObjectRef, index: usize) {
        let id = self.id();
        self.storage()
            .write_through("remove_item", |w| w.remove_item(id, key, index));
        self.disown(item);
        let sender = self.as_object();
        for observer in self.storage().live_observers() {
            observer.as_observer().item_removed(sender, key, item, index);
        }
        self.notify_listeners(&StorageEvent::ItemRemoved { key, item, index });
    }

    /// Delivers an event to the listeners subscribed to its kind.
    fn notify_listeners(&self, event: &StorageEvent<'_>) {
        let kind = event.kind();
        let sender = self.as_object();
        for (listener, mask) in self.storage().live_listeners() {
            if mask.contains(kind) {
                listener.on_event(sender, event);
            }
        }
    }

    /// Raises an application event on this object's listeners.
    fn notify_custom(&self, name: &str, payload: &Value) {
        self.notify_listeners(&StorageEvent::Custom { name, payload });
    }

    /// Propagates an event to every live parent.
    fn notify_parents(&self, event: &StorageEvent<'_>) {
        let child = self.as_object();
        for parent in self.storage().live_parents() {
            parent.child_notified(child, event);
        }
    }

    /// Registers this object as parent of `item` and shares its writer.
    fn adopt(&self, item: &ObjectRef) {
        item.add_parent(&self.storage().handle());
        if let Some(writer) = self.writer() {
            item.attach_writer(Some(writer));
        }
    }

    /// Unregisters this object as parent of `item`, detaching it once no
    /// attached parent remains.
    fn disown(&self, item: &ObjectRef) {
        item.remove_parent(&self.storage().handle());
        if item.storage().is_attached() && !item.storage().has_attached_parent() {
            item.attach_writer(None);
        }
    }

    /// Snapshots this object and everything it holds.
    ///
    /// A node reached a second time in the same traversal is emitted as a
    /// bare reference.
    fn to_record(&self) -> NodeRecord {
        record_of(self.as_object(), &mut HashSet::new())
    }

    /// Writes this object's full declared content through the attached
    /// writer: properties, items, data, relationships, then the type tag.
    ///
    /// Links are added, not replaced, so this is meant for an object whose
    /// node holds no links yet; [`Self::rewrite`] uses it on an emptied store.
    ///
    /// # Errors
    ///
    /// Returns an error if no writer is attached or the write fails.
    fn write(&self) -> CoreResult<()> {
        let writer = self
            .writer()
            .ok_or_else(|| CoreError::writer_detached(self.id()))?;
        let record = self.to_record();
        writer.lock().write_record(&record)?;
        Ok(())
    }

    /// Replaces the whole store with this object's graph, rooted here.
    ///
    /// # Errors
    ///
    /// Returns an error if no writer is attached or the write fails.
    fn rewrite(&self) -> CoreResult<()> {
        let writer = self
            .writer()
            .ok_or_else(|| CoreError::writer_detached(self.id()))?;
        let record = self.to_record();
        let mut guard = writer.lock();
        guard.begin_rewrite()?;
        let written = guard
            .set_root(record.id)
            .and_then(|()| guard.write_record(&record));
        let ended = guard.end_rewrite();
        written?;
        ended?;
        debug!(id = %record.id, nodes = record.subtree_len(), "graph rewritten");
        Ok(())
    }
}

impl<T: Persistent> PersistentObject for T {
    fn as_object(&self) -> &dyn PersistentObject {
        self
    }

    fn as_observer(&self) -> &dyn Observer {
        self
    }

    fn storage(&self) -> &StorageBase {
        self.base()
    }

    fn declaration(&self) -> Declaration {
        T::shape().declaration()
    }

    fn type_tag(&self) -> &'static str {
        T::shape().type_tag()
    }

    fn get_storage_property(&self, key: &str) -> Option<Value> {
        T::shape().get_property(self, key)
    }

    fn set_storage_property(&self, key: &str, value: Value) {
        T::shape().set_property(self, key, value);
    }

    fn get_storage_item(&self, key: &str) -> Option<ObjectRef> {
        T::shape().get_item(self, key)
    }

    fn get_storage_relationship(&self, key: &str) -> Vec<ObjectRef> {
        T::shape().get_relationship(self, key)
    }

    fn get_storage_data(&self, key: &str) -> Option<Vec<u8>> {
        T::shape().get_data(self, key)
    }

    fn children(&self) -> Vec<ObjectRef> {
        T::shape().children(self)
    }

    fn run_delete_hook(&self) {
        Persistent::about_to_delete(self);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

fn record_of(object: &dyn PersistentObject, visited: &mut HashSet<NodeId>) -> NodeRecord {
    let id = object.id();
    if !visited.insert(id) {
        return NodeRecord::reference(id);
    }
    let decl = object.declaration();
    let mut record = NodeRecord::new(id, decl.type_tag);

    for key in decl.properties {
        if let Some(value) = object.get_storage_property(key) {
            record.properties.push((key.to_owned(), value));
        }
    }
    for key in decl.items {
        if let Some(item) = object.get_storage_item(key) {
            record.items.push((key.to_owned(), record_of(item.as_object(), visited)));
        }
    }
    for key in decl.data {
        if let Some(data) = object.get_storage_data(key) {
            record.data.push((key.to_owned(), data));
        }
    }
    for key in decl.relationships {
        let members = object.get_storage_relationship(key);
        if !members.is_empty() {
            let members = members
                .iter()
                .map(|member| record_of(member.as_object(), visited))
                .collect();
            record.relationships.push((key.to_owned(), members));
        }
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::EventKind;
    use crate::testing::{memory, Folder, Note, Recorder};
    use parking_lot::Mutex;
    use refgraph_storage::{verify_node_map, InMemoryWriter, StorageWriter};
    use std::cell::RefCell;
    use std::sync::Arc;

    fn sample() -> (Rc<Folder>, Rc<Note>, Rc<Note>) {
        let folder = Folder::new("inbox");
        let first = Note::new("first");
        let second = Note::new("second");
        folder.notes.append(Rc::clone(&first));
        folder.notes.append(Rc::clone(&second));
        folder.cover.set(Some(Rc::clone(&first)));
        folder.set_blob(vec![1, 2, 3]);
        (folder, first, second)
    }

    #[test]
    fn rewrite_stores_whole_graph() {
        let (folder, first, second) = sample();
        let (mem, writer) = memory();
        folder.attach_writer(Some(writer));
        folder.rewrite().unwrap();

        let mem = mem.lock();
        let map = mem.node_map();
        assert_eq!(map.len(), 3);
        assert_eq!(map.roots(), vec![folder.id()]);
        assert_eq!(map.get(&first.id()).unwrap().ref_count, 2);
        assert_eq!(map.get(&second.id()).unwrap().ref_count, 1);
        let root = map.get(&folder.id()).unwrap();
        assert_eq!(root.properties["name"], Value::from("inbox"));
        assert_eq!(root.data["blob"], vec![1, 2, 3]);
        assert_eq!(root.relationships["notes"], vec![first.id(), second.id()]);
        assert_eq!(root.items["cover"], first.id());
        assert!(verify_node_map(map).is_ok());
    }

    #[test]
    fn rewrite_without_writer_fails() {
        let folder = Folder::new("loose");
        assert!(matches!(
            folder.rewrite(),
            Err(CoreError::WriterDetached { id }) if id == folder.id()
        ));
        assert!(matches!(folder.write(), Err(CoreError::WriterDetached { .. })));
    }

    #[test]
    fn attach_writer_reaches_descendants_once() {
        let (folder, first, second) = sample();
        let nested = Note::new("nested");
        first.attachments.append(Rc::clone(&nested));
        let (_, writer) = memory();

        folder.attach_writer(Some(writer));
        assert!(first.storage().is_attached());
        assert!(second.storage().is_attached());
        assert!(nested.storage().is_attached());

        folder.attach_writer(None);
        assert!(!folder.storage().is_attached());
        assert!(!first.storage().is_attached());
        assert!(!nested.storage().is_attached());
    }

    #[test]
    fn detach_keeps_writer_on_shared_descendant() {
        let (_, writer) = memory();
        let left = Folder::new("left");
        let right = Folder::new("right");
        let shared_note = Note::new("shared");
        left.notes.append(Rc::clone(&shared_note));
        right.notes.append(Rc::clone(&shared_note));
        left.attach_writer(Some(Arc::clone(&writer)));
        right.attach_writer(Some(writer));

        left.attach_writer(None);
        assert!(shared_note.storage().is_attached());
        right.attach_writer(None);
        assert!(!shared_note.storage().is_attached());
    }

    #[test]
    fn writer_sees_change_before_observers() {
        struct Probe {
            writer: Arc<Mutex<InMemoryWriter>>,
            stored: RefCell<Option<Value>>,
        }
        impl Observer for Probe {
            fn property_changed(&self, sender: &dyn PersistentObject, key: &str, _value: &Value) {
                let stored = self
                    .writer
                    .lock()
                    .find_node(&sender.id())
                    .and_then(|node| node.properties.get(key).cloned());
                *self.stored.borrow_mut() = stored;
            }
        }

        let (folder, _, _) = sample();
        let (mem, writer) = memory();
        folder.attach_writer(Some(writer));
        folder.rewrite().unwrap();

        let probe = Rc::new(Probe {
            writer: Arc::clone(&mem),
            stored: RefCell::new(None),
        });
        let observer: Rc<dyn Observer> = probe.clone();
        folder.add_observer(&observer);
        folder.set_name("renamed");
        assert_eq!(*probe.stored.borrow(), Some(Value::from("renamed")));
        folder.remove_observer(&observer);
    }

    #[test]
    fn observers_receive_each_mutation() {
        let (folder, first, _) = sample();
        let recorder = Rc::new(Recorder::default());
        let observer: Rc<dyn Observer> = recorder.clone();
        folder.add_observer(&observer);

        folder.set_name("renamed");
        folder.set_blob(vec![9]);
        folder.notes.append(Note::new("third"));
        folder.notes.remove(2);
        folder.cover.set(None);
        folder.cover.set(Some(first));

        assert_eq!(
            recorder.take(),
            vec![
                "property name=renamed",
                "data blob 1",
                "inserted notes 2",
                "removed notes 2",
                "cleared cover",
                "set cover",
            ]
        );
        folder.remove_observer(&observer);
        folder.set_name("quiet");
        assert!(recorder.take().is_empty());
    }

    #[test]
    fn listeners_filter_by_subscription() {
        let (folder, _, _) = sample();
        let recorder = Rc::new(Recorder::only(&[EventKind::ItemInserted, EventKind::Custom]));
        let listener: Rc<dyn Listener> = recorder.clone();
        folder.add_listener(&listener);

        folder.set_name("ignored");
        folder.notes.insert(0, Note::new("zero"));
        folder.notify_custom("refresh", &Value::Null);

        assert_eq!(
            recorder.take(),
            vec!["event ItemInserted notes", "event Custom refresh"]
        );
        folder.remove_listener(&listener);
    }

    #[test]
    fn owner_observes_members_and_receives_parent_events() {
        let (folder, first, second) = sample();
        first.set_text("edited");
        second.set_text("edited too");
        assert_eq!(folder.member_changes.get(), 2);

        second.notify_parents(&StorageEvent::Custom {
            name: "touched",
            payload: &Value::Null,
        });
        assert_eq!(*folder.child_events.borrow(), vec!["note touched"]);
    }

    #[test]
    fn dropped_subscribers_are_skipped() {
        let (folder, _, _) = sample();
        {
            let recorder: Rc<dyn Observer> = Rc::new(Recorder::default());
            folder.add_observer(&recorder);
            assert_eq!(folder.storage().observer_count(), 1);
        }
        assert_eq!(folder.storage().observer_count(), 0);
        folder.set_name("still fine");
    }

    #[test]
    fn to_record_emits_repeats_as_references() {
        let (folder, first, _) = sample();
        let record = folder.to_record();
        assert_eq!(record.subtree_len(), 4);

        let (key, cover) = &record.items[0];
        assert_eq!(key, "cover");
        assert_eq!(cover.type_tag.as_deref(), Some("note"));

        let (_, members) = &record.relationships[0];
        assert_eq!(members[0], NodeRecord::reference(first.id()));
        assert_eq!(members[1].type_tag.as_deref(), Some("note"));
    }

    #[test]
    fn mutations_are_dropped_while_disconnected() {
        let (folder, _, _) = sample();
        let (mem, writer) = memory();
        folder.attach_writer(Some(writer));
        folder.rewrite().unwrap();

        mem.lock().set_disconnected(true);
        folder.set_name("unsaved");
        mem.lock().set_disconnected(false);
        assert_eq!(
            mem.lock().find_node(&folder.id()).unwrap().properties["name"],
            Value::from("inbox")
        );

        folder.rewrite().unwrap();
        let mem = mem.lock();
        assert_eq!(
            mem.find_node(&folder.id()).unwrap().properties["name"],
            Value::from("unsaved")
        );
        assert!(verify_node_map(mem.node_map()).is_ok());
    }

    #[test]
    fn downcast_recovers_concrete_type() {
        let (folder, first, _) = sample();
        let object: ObjectRef = first.clone();
        assert!(Rc::ptr_eq(&downcast::<Note>(&object).unwrap(), &first));
        assert!(downcast::<Folder>(&object).is_none());
        assert_eq!(folder.type_tag(), "folder");
        assert!(folder.declaration().root);
    }

    #[test]
    #[should_panic(expected = "released with no references")]
    fn releasing_unreferenced_object_panics() {
        Note::new("orphan").remove_ref();
    }

    #[test]
    #[should_panic(expected = "observer is not registered")]
    fn removing_unknown_observer_panics() {
        let note = Note::new("n");
        let observer: Rc<dyn Observer> = Rc::new(Recorder::default());
        note.remove_observer(&observer);
    }

    #[test]
    #[should_panic(expected = "deleted while still attached")]
    fn deleting_observed_object_panics() {
        let (folder, _, second) = sample();
        let observer: Rc<dyn Observer> = Rc::new(Recorder::default());
        second.add_observer(&observer);
        folder.notes.remove(1);
    }
}
