//! Owned containers of persistent objects.

use crate::base::StorageBase;
use crate::object::{ObjectRef, Persistent, PersistentObject, WeakObjectRef};
use std::cell::RefCell;
use std::rc::Rc;

/// An ordered list of objects owned by one persistent object.
///
/// Every member holds one reference from this list, is observed by the
/// owner, and has the owner registered as a parent. Insertions and removals
/// are forwarded to the owner's writer with the index they happened at.
pub struct Relationship<T: Persistent> {
    key: &'static str,
    owner: WeakObjectRef,
    members: RefCell<Vec<Rc<T>>>,
}

impl<T: Persistent> std::fmt::Debug for Relationship<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relationship")
            .field("key", &self.key)
            .field("len", &self.len())
            .finish()
    }
}

impl<T: Persistent> Relationship<T> {
    /// Creates an empty relationship stored under `key` on `owner`.
    pub fn new(owner: &StorageBase, key: &'static str) -> Self {
        Self {
            key,
            owner: owner.handle(),
            members: RefCell::new(Vec::new()),
        }
    }

    /// Returns the storage key.
    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Inserts `value` before position `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index > len`.
    pub fn insert(&self, index: usize, value: Rc<T>) {
        let len = self.len();
        assert!(
            index <= len,
            "relationship `{}` insert index {index} out of range for length {len}",
            self.key
        );
        value.add_ref();
        self.members.borrow_mut().insert(index, Rc::clone(&value));

        let item: ObjectRef = value;
        item.add_object_observer(&self.owner);
        if let Some(owner) = self.owner.upgrade() {
            owner.notify_insert_item(self.key, &item, index);
        }
    }

    /// Appends `value` at the end.
    pub fn append(&self, value: Rc<T>) {
        self.insert(self.len(), value);
    }

    /// Removes and returns the member at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= len`.
    pub fn remove(&self, index: usize) -> Rc<T> {
        let value = match self.get(index) {
            Some(value) => value,
            None => panic!(
                "relationship `{}` remove index {index} out of range for length {}",
                self.key,
                self.len()
            ),
        };
        let item: ObjectRef = Rc::clone(&value) as ObjectRef;
        item.remove_object_observer(&self.owner);
        self.members.borrow_mut().remove(index);
        if let Some(owner) = self.owner.upgrade() {
            owner.notify_remove_item(self.key, &item, index);
        }
        item.remove_ref();
        value
    }

    /// Removes the first occurrence of `value`. Returns `false` if it is not
    /// a member.
    pub fn remove_value(&self, value: &Rc<T>) -> bool {
        match self.index_of(value) {
            Some(index) => {
                self.remove(index);
                true
            }
            None => false,
        }
    }

    /// Removes every member, last first.
    pub fn clear(&self) {
        while !self.is_empty() {
            self.remove(self.len() - 1);
        }
    }

    /// Returns the member at `index`.
    pub fn get(&self, index: usize) -> Option<Rc<T>> {
        self.members.borrow().get(index).cloned()
    }

    /// Returns the position of `value`.
    pub fn index_of(&self, value: &Rc<T>) -> Option<usize> {
        self.members
            .borrow()
            .iter()
            .position(|member| Rc::ptr_eq(member, value))
    }

    /// Returns the number of members.
    pub fn len(&self) -> usize {
        self.members.borrow().len()
    }

    /// Returns `true` if there are no members.
    pub fn is_empty(&self) -> bool {
        self.members.borrow().is_empty()
    }

    /// Returns the members in order.
    pub fn to_vec(&self) -> Vec<Rc<T>> {
        self.members.borrow().clone()
    }

    /// Returns the members as type-erased objects.
    pub fn objects(&self) -> Vec<ObjectRef> {
        self.members
            .borrow()
            .iter()
            .map(|member| Rc::clone(member) as ObjectRef)
            .collect()
    }
}

/// A single optional object owned by one persistent object.
pub struct ItemSlot<T: Persistent> {
    key: &'static str,
    owner: WeakObjectRef,
    item: RefCell<Option<Rc<T>>>,
}

impl<T: Persistent> std::fmt::Debug for ItemSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemSlot")
            .field("key", &self.key)
            .field("set", &self.is_set())
            .finish()
    }
}

impl<T: Persistent> ItemSlot<T> {
    /// Creates an empty slot stored under `key` on `owner`.
    pub fn new(owner: &StorageBase, key: &'static str) -> Self {
        Self {
            key,
            owner: owner.handle(),
            item: RefCell::new(None),
        }
    }

    /// Returns the storage key.
    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Replaces the held object. The previous one is unlinked and released
    /// first. Setting the object already held does nothing.
    pub fn set(&self, item: Option<Rc<T>>) {
        let same = match (self.item.borrow().as_ref(), item.as_ref()) {
            (Some(current), Some(next)) => Rc::ptr_eq(current, next),
            (None, None) => true,
            _ => false,
        };
        if same {
            return;
        }

        let owner = self.owner.upgrade();
        let previous = self.item.borrow_mut().take();
        if let Some(previous) = previous {
            let previous: ObjectRef = previous;
            if let Some(owner) = &owner {
                owner.notify_clear_item(self.key, &previous);
            }
            previous.remove_ref();
        }
        if let Some(next) = item {
            next.add_ref();
            *self.item.borrow_mut() = Some(Rc::clone(&next));
            let next: ObjectRef = next;
            if let Some(owner) = &owner {
                owner.notify_set_item(self.key, &next);
            }
        }
    }

    /// Returns the held object.
    pub fn get(&self) -> Option<Rc<T>> {
        self.item.borrow().clone()
    }

    /// Returns the held object, type-erased.
    pub fn object(&self) -> Option<ObjectRef> {
        self.item
            .borrow()
            .as_ref()
            .map(|item| Rc::clone(item) as ObjectRef)
    }

    /// Returns `true` if an object is held.
    pub fn is_set(&self) -> bool {
        self.item.borrow().is_some()
    }
}

#[cfg(test)]
mod tests {
    use crate::object::PersistentObject;
    use crate::testing::{memory, Folder, Note};
    use refgraph_storage::NodeSource;
    use std::rc::Rc;

    fn texts(folder: &Folder) -> Vec<String> {
        folder.notes.to_vec().iter().map(|n| n.text()).collect()
    }

    #[test]
    fn insert_and_remove_keep_order() {
        let folder = Folder::new("f");
        folder.notes.append(Note::new("b"));
        folder.notes.insert(0, Note::new("a"));
        folder.notes.append(Note::new("d"));
        folder.notes.insert(2, Note::new("c"));
        assert_eq!(texts(&folder), vec!["a", "b", "c", "d"]);

        let removed = folder.notes.remove(1);
        assert_eq!(removed.text(), "b");
        assert_eq!(removed.ref_count(), 0);
        assert_eq!(removed.deletions.get(), 1);
        assert_eq!(texts(&folder), vec!["a", "c", "d"]);
    }

    #[test]
    fn members_hold_one_reference_each() {
        let folder = Folder::new("f");
        let note = Note::new("twice");
        folder.notes.append(Rc::clone(&note));
        folder.notes.append(Rc::clone(&note));
        assert_eq!(note.ref_count(), 2);
        assert_eq!(note.storage().parent_count(), 2);
        assert_eq!(note.storage().observer_count(), 2);
        assert_eq!(folder.notes.index_of(&note), Some(0));

        assert!(folder.notes.remove_value(&note));
        assert_eq!(note.ref_count(), 1);
        assert_eq!(note.deletions.get(), 0);
        assert!(folder.notes.remove_value(&note));
        assert_eq!(note.deletions.get(), 1);
        assert!(!folder.notes.remove_value(&note));
    }

    #[test]
    fn clear_releases_nested_members() {
        let folder = Folder::new("f");
        let parent = Note::new("parent");
        let child = Note::new("child");
        parent.attachments.append(Rc::clone(&child));
        folder.notes.append(Rc::clone(&parent));

        folder.notes.clear();
        assert!(folder.notes.is_empty());
        assert_eq!(parent.deletions.get(), 1);
        assert_eq!(child.deletions.get(), 1);
        assert!(parent.attachments.is_empty());
    }

    #[test]
    fn writes_through_with_contiguous_indices() {
        let folder = Folder::new("f");
        let (mem, writer) = memory();
        folder.attach_writer(Some(writer));
        folder.rewrite().unwrap();

        for text in ["a", "b", "c", "d"] {
            folder.notes.append(Note::new(text));
        }
        folder.notes.remove(0);
        folder.notes.insert(1, Note::new("x"));
        folder.notes.remove(3);

        let ids: Vec<_> = folder.notes.to_vec().iter().map(|n| n.id()).collect();
        let mem = mem.lock();
        assert_eq!(mem.node_map().items(folder.id(), "notes").unwrap(), ids);
        assert_eq!(mem.node_map().len(), 1 + ids.len());
    }

    #[test]
    fn removed_member_is_detached() {
        let folder = Folder::new("f");
        let note = Note::new("n");
        folder.notes.append(Rc::clone(&note));
        let (mem, writer) = memory();
        folder.attach_writer(Some(writer));
        folder.rewrite().unwrap();
        assert!(note.storage().is_attached());

        folder.notes.remove(0);
        assert!(!note.storage().is_attached());
        assert!(mem.lock().find_node(&note.id()).is_none());
    }

    #[test]
    #[should_panic(expected = "insert index 2 out of range")]
    fn insert_past_end_panics() {
        let folder = Folder::new("f");
        folder.notes.insert(2, Note::new("n"));
    }

    #[test]
    #[should_panic(expected = "remove index 0 out of range")]
    fn remove_from_empty_panics() {
        Folder::new("f").notes.remove(0);
    }

    #[test]
    fn item_slot_replaces_and_releases() {
        let folder = Folder::new("f");
        let (mem, writer) = memory();
        folder.attach_writer(Some(writer));
        folder.rewrite().unwrap();

        let old = Note::new("old");
        let new = Note::new("new");
        folder.cover.set(Some(Rc::clone(&old)));
        folder.cover.set(Some(Rc::clone(&old)));
        assert_eq!(old.ref_count(), 1);

        folder.cover.set(Some(Rc::clone(&new)));
        assert_eq!(old.ref_count(), 0);
        assert_eq!(old.deletions.get(), 1);
        assert!(Rc::ptr_eq(&folder.cover.get().unwrap(), &new));

        let mem = mem.lock();
        assert_eq!(mem.node_map().item(folder.id(), "cover").unwrap(), Some(new.id()));
        assert!(mem.find_node(&old.id()).is_none());
    }

    #[test]
    fn item_slot_clear() {
        let folder = Folder::new("f");
        let note = Note::new("n");
        folder.cover.set(Some(Rc::clone(&note)));
        assert!(folder.cover.is_set());
        folder.cover.set(None);
        assert!(!folder.cover.is_set());
        assert_eq!(note.storage().parent_count(), 0);
        assert_eq!(note.deletions.get(), 1);
    }

    mod order {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn backend_order_tracks_live_order(
                ops in prop::collection::vec((any::<bool>(), 0usize..8), 1..40)
            ) {
                let folder = Folder::new("f");
                let (mem, writer) = memory();
                folder.attach_writer(Some(writer));
                folder.rewrite().unwrap();

                for (insert, pos) in ops {
                    let len = folder.notes.len();
                    if insert || len == 0 {
                        folder.notes.insert(pos.min(len), Note::new("n"));
                    } else {
                        folder.notes.remove(pos % len);
                    }
                }

                let ids: Vec<_> = folder.notes.to_vec().iter().map(|n| n.id()).collect();
                let stored = mem.lock().node_map().items(folder.id(), "notes").unwrap();
                prop_assert_eq!(stored, ids);
            }
        }
    }
}
