//! Small persistent model shared by the unit tests.

use crate::base::StorageBase;
use crate::error::CoreResult;
use crate::object::{create, ObjectRef, Persistent, PersistentObject};
use crate::observer::{EventKind, Listener, Observer, StorageEvent};
use crate::reader::StorageReader;
use crate::registry::TypeRegistry;
use crate::relationship::{ItemSlot, Relationship};
use crate::shape::Shape;
use parking_lot::Mutex;
use refgraph_codec::Value;
use refgraph_storage::{InMemoryWriter, NodeId, SharedWriter};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::{Arc, OnceLock};

pub(crate) struct Folder {
    base: StorageBase,
    name: RefCell<String>,
    blob: RefCell<Option<Vec<u8>>>,
    pub(crate) cover: ItemSlot<Note>,
    pub(crate) notes: Relationship<Note>,
    pub(crate) member_changes: Cell<usize>,
    pub(crate) child_events: RefCell<Vec<String>>,
}

impl Folder {
    pub(crate) fn new(name: &str) -> Rc<Self> {
        create(|base| Folder {
            cover: ItemSlot::new(&base, "cover"),
            notes: Relationship::new(&base, "notes"),
            base,
            name: RefCell::new(name.to_owned()),
            blob: RefCell::new(None),
            member_changes: Cell::new(0),
            child_events: RefCell::new(Vec::new()),
        })
    }

    pub(crate) fn name(&self) -> String {
        self.name.borrow().clone()
    }

    pub(crate) fn set_name(&self, name: &str) {
        *self.name.borrow_mut() = name.to_owned();
        self.notify_set_property("name", &Value::from(name));
    }

    pub(crate) fn blob(&self) -> Option<Vec<u8>> {
        self.blob.borrow().clone()
    }

    pub(crate) fn set_blob(&self, blob: Vec<u8>) {
        *self.blob.borrow_mut() = Some(blob.clone());
        self.notify_set_data("blob", &blob);
    }
}

impl Observer for Folder {
    fn property_changed(&self, _sender: &dyn PersistentObject, _key: &str, _value: &Value) {
        self.member_changes.set(self.member_changes.get() + 1);
    }

    fn child_notified(&self, child: &dyn PersistentObject, event: &StorageEvent<'_>) {
        self.child_events
            .borrow_mut()
            .push(format!("{} {}", child.type_tag(), event.key()));
    }
}

impl Persistent for Folder {
    fn base(&self) -> &StorageBase {
        &self.base
    }

    fn shape() -> &'static Shape<Self> {
        static SHAPE: OnceLock<Shape<Folder>> = OnceLock::new();
        SHAPE.get_or_init(|| {
            Shape::<Folder>::new("folder")
                .root()
                .property(
                    "name",
                    |f| Some(Value::from(f.name())),
                    |f, v| *f.name.borrow_mut() = v.as_text().unwrap_or_default().to_owned(),
                )
                .item("cover", |f| f.cover.object())
                .relationship("notes", |f| f.notes.objects())
                .data("blob", Folder::blob)
        })
    }

    fn about_to_delete(&self) {
        self.cover.set(None);
        self.notes.clear();
    }
}

pub(crate) struct Note {
    base: StorageBase,
    text: RefCell<String>,
    pub(crate) attachments: Relationship<Note>,
    pub(crate) deletions: Cell<u32>,
}

impl Note {
    pub(crate) fn new(text: &str) -> Rc<Self> {
        create(|base| Note {
            attachments: Relationship::new(&base, "attachments"),
            base,
            text: RefCell::new(text.to_owned()),
            deletions: Cell::new(0),
        })
    }

    pub(crate) fn text(&self) -> String {
        self.text.borrow().clone()
    }

    pub(crate) fn set_text(&self, text: &str) {
        *self.text.borrow_mut() = text.to_owned();
        self.notify_set_property("text", &Value::from(text));
    }
}

impl Observer for Note {}

impl Persistent for Note {
    fn base(&self) -> &StorageBase {
        &self.base
    }

    fn shape() -> &'static Shape<Self> {
        static SHAPE: OnceLock<Shape<Note>> = OnceLock::new();
        SHAPE.get_or_init(|| {
            Shape::<Note>::new("note")
                .property(
                    "text",
                    |n| Some(Value::from(n.text())),
                    |n, v| *n.text.borrow_mut() = v.as_text().unwrap_or_default().to_owned(),
                )
                .relationship("attachments", |n| n.attachments.objects())
        })
    }

    fn about_to_delete(&self) {
        self.deletions.set(self.deletions.get() + 1);
        self.attachments.clear();
    }
}

fn build_folder(reader: &mut StorageReader<'_>, id: NodeId) -> CoreResult<Option<ObjectRef>> {
    let folder = Folder::new("");
    reader.restore_properties(&*folder, id)?;
    for note in reader.get_items_as::<Note>(id, "notes")? {
        folder.notes.append(note);
    }
    folder.cover.set(reader.get_item_as::<Note>(id, "cover")?);
    if let Some(blob) = reader.get_data(id, "blob")? {
        *folder.blob.borrow_mut() = Some(blob);
    }
    Ok(Some(folder as ObjectRef))
}

fn build_note(reader: &mut StorageReader<'_>, id: NodeId) -> CoreResult<Option<ObjectRef>> {
    let note = Note::new("");
    reader.restore_properties(&*note, id)?;
    for attachment in reader.get_items_as::<Note>(id, "attachments")? {
        note.attachments.append(attachment);
    }
    Ok(Some(note as ObjectRef))
}

pub(crate) fn registry() -> TypeRegistry {
    TypeRegistry::new()
        .with("folder", build_folder)
        .with("note", build_note)
}

/// An in-memory writer kept concrete for inspection, plus its shared handle.
pub(crate) fn memory() -> (Arc<Mutex<InMemoryWriter>>, SharedWriter) {
    let concrete = Arc::new(Mutex::new(InMemoryWriter::new()));
    let writer: SharedWriter = concrete.clone();
    (concrete, writer)
}

/// Records observer callbacks and listener events as strings.
#[derive(Default)]
pub(crate) struct Recorder {
    pub(crate) seen: RefCell<Vec<String>>,
    kinds: Vec<EventKind>,
}

impl Recorder {
    pub(crate) fn only(kinds: &[EventKind]) -> Self {
        Self {
            seen: RefCell::new(Vec::new()),
            kinds: kinds.to_vec(),
        }
    }

    pub(crate) fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.seen.borrow_mut())
    }

    fn push(&self, entry: String) {
        self.seen.borrow_mut().push(entry);
    }
}

impl Observer for Recorder {
    fn property_changed(&self, _sender: &dyn PersistentObject, key: &str, value: &Value) {
        self.push(format!("property {key}={}", value.as_text().unwrap_or_default()));
    }

    fn item_set(&self, _sender: &dyn PersistentObject, key: &str, _item: &ObjectRef) {
        self.push(format!("set {key}"));
    }

    fn item_cleared(&self, _sender: &dyn PersistentObject, key: &str) {
        self.push(format!("cleared {key}"));
    }

    fn data_set(&self, _sender: &dyn PersistentObject, key: &str, data: &[u8]) {
        self.push(format!("data {key} {}", data.len()));
    }

    fn item_inserted(&self, _sender: &dyn PersistentObject, key: &str, _item: &ObjectRef, index: usize) {
        self.push(format!("inserted {key} {index}"));
    }

    fn item_removed(&self, _sender: &dyn PersistentObject, key: &str, _item: &ObjectRef, index: usize) {
        self.push(format!("removed {key} {index}"));
    }
}

impl Listener for Recorder {
    fn subscriptions(&self) -> Vec<EventKind> {
        if self.kinds.is_empty() {
            EventKind::ALL.to_vec()
        } else {
            self.kinds.clone()
        }
    }

    fn on_event(&self, _sender: &dyn PersistentObject, event: &StorageEvent<'_>) {
        self.push(format!("event {:?} {}", event.kind(), event.key()));
    }
}
