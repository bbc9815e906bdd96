//! Sample measurement domain.
//!
//! A [`Document`] holds [`DataGroup`]s of [`DataItem`]s. Items carry
//! [`Graphic`]s and may share a [`Calibration`] with the document and with
//! each other, which exercises shared nodes and cascading deletes.

use refgraph_codec::Value;
use refgraph_core::{
    create, Constructor, CoreResult, ItemSlot, ObjectRef, Observer, Persistent,
    PersistentObject, Relationship, Shape, StorageBase, StorageEvent, StorageReader, TypeRegistry,
};
use refgraph_storage::{NodeId, NodeSource};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::OnceLock;

fn text(value: &Value) -> String {
    value.as_text().unwrap_or_default().to_owned()
}

fn float(value: &Value) -> f64 {
    value.as_float().unwrap_or_default()
}

/// Root of a measurement graph.
pub struct Document {
    base: StorageBase,
    title: RefCell<String>,
    revision: Cell<i64>,
    thumbnail: RefCell<Option<Vec<u8>>>,
    changes: Cell<usize>,
    /// Calibration applied to the whole document.
    pub calibration: ItemSlot<Calibration>,
    /// Data groups in display order.
    pub groups: Relationship<DataGroup>,
}

impl Document {
    /// Type tag.
    pub const TYPE_TAG: &'static str = "document";

    /// Creates an empty document.
    pub fn new(title: &str) -> Rc<Self> {
        create(|base| Document {
            calibration: ItemSlot::new(&base, "calibration"),
            groups: Relationship::new(&base, "groups"),
            base,
            title: RefCell::new(title.to_owned()),
            revision: Cell::new(0),
            thumbnail: RefCell::new(None),
            changes: Cell::new(0),
        })
    }

    /// Returns the title.
    pub fn title(&self) -> String {
        self.title.borrow().clone()
    }

    /// Renames the document.
    pub fn set_title(&self, title: &str) {
        *self.title.borrow_mut() = title.to_owned();
        self.notify_set_property("title", &Value::from(title));
    }

    /// Returns the revision counter.
    pub fn revision(&self) -> i64 {
        self.revision.get()
    }

    /// Increments the revision counter.
    pub fn bump_revision(&self) {
        self.revision.set(self.revision.get() + 1);
        self.notify_set_property("revision", &Value::Integer(self.revision.get()));
    }

    /// Returns the thumbnail image.
    pub fn thumbnail(&self) -> Option<Vec<u8>> {
        self.thumbnail.borrow().clone()
    }

    /// Replaces the thumbnail image.
    pub fn set_thumbnail(&self, image: Vec<u8>) {
        *self.thumbnail.borrow_mut() = Some(image.clone());
        self.notify_set_data("thumbnail", &image);
    }

    /// Number of changes reported by groups and their items since creation.
    pub fn changes(&self) -> usize {
        self.changes.get()
    }

    /// Total number of data items across all groups.
    pub fn item_count(&self) -> usize {
        self.groups.to_vec().iter().map(|g| g.items.len()).sum()
    }
}

impl Observer for Document {
    fn property_changed(&self, _sender: &dyn PersistentObject, _key: &str, _value: &Value) {
        self.changes.set(self.changes.get() + 1);
    }

    fn child_notified(&self, _child: &dyn PersistentObject, _event: &StorageEvent<'_>) {
        self.changes.set(self.changes.get() + 1);
    }
}

impl Persistent for Document {
    fn base(&self) -> &StorageBase {
        &self.base
    }

    fn shape() -> &'static Shape<Self> {
        static SHAPE: OnceLock<Shape<Document>> = OnceLock::new();
        SHAPE.get_or_init(|| {
            Shape::<Document>::new(Document::TYPE_TAG)
                .root()
                .property(
                    "title",
                    |d| Some(Value::from(d.title())),
                    |d, v| *d.title.borrow_mut() = text(&v),
                )
                .property(
                    "revision",
                    |d| Some(Value::Integer(d.revision())),
                    |d, v| d.revision.set(v.as_integer().unwrap_or_default()),
                )
                .item("calibration", |d| d.calibration.object())
                .relationship("groups", |d| d.groups.objects())
                .data("thumbnail", Document::thumbnail)
        })
    }

    fn about_to_delete(&self) {
        self.calibration.set(None);
        self.groups.clear();
    }
}

/// A named list of data items.
pub struct DataGroup {
    base: StorageBase,
    name: RefCell<String>,
    /// Items in acquisition order.
    pub items: Relationship<DataItem>,
}

impl DataGroup {
    /// Type tag.
    pub const TYPE_TAG: &'static str = "data_group";

    /// Creates an empty group.
    pub fn new(name: &str) -> Rc<Self> {
        create(|base| DataGroup {
            items: Relationship::new(&base, "items"),
            base,
            name: RefCell::new(name.to_owned()),
        })
    }

    /// Returns the name.
    pub fn name(&self) -> String {
        self.name.borrow().clone()
    }

    /// Renames the group.
    pub fn set_name(&self, name: &str) {
        *self.name.borrow_mut() = name.to_owned();
        self.notify_set_property("name", &Value::from(name));
    }
}

// Item edits are passed up so the document sees them.
impl Observer for DataGroup {
    fn property_changed(&self, _sender: &dyn PersistentObject, key: &str, value: &Value) {
        self.notify_parents(&StorageEvent::PropertyChanged { key, value });
    }
}

impl Persistent for DataGroup {
    fn base(&self) -> &StorageBase {
        &self.base
    }

    fn shape() -> &'static Shape<Self> {
        static SHAPE: OnceLock<Shape<DataGroup>> = OnceLock::new();
        SHAPE.get_or_init(|| {
            Shape::<DataGroup>::new(DataGroup::TYPE_TAG)
                .property(
                    "name",
                    |g| Some(Value::from(g.name())),
                    |g, v| *g.name.borrow_mut() = text(&v),
                )
                .relationship("items", |g| g.items.objects())
        })
    }

    fn about_to_delete(&self) {
        self.items.clear();
    }
}

/// One measured value.
pub struct DataItem {
    base: StorageBase,
    label: RefCell<String>,
    value: Cell<f64>,
    samples: RefCell<Option<Vec<u8>>>,
    /// Calibration used to convert the raw value.
    pub calibration: ItemSlot<Calibration>,
    /// Graphics drawn for this item.
    pub graphics: Relationship<Graphic>,
}

impl DataItem {
    /// Type tag.
    pub const TYPE_TAG: &'static str = "data_item";

    /// Creates an item with a raw value.
    pub fn new(label: &str, value: f64) -> Rc<Self> {
        create(|base| DataItem {
            calibration: ItemSlot::new(&base, "calibration"),
            graphics: Relationship::new(&base, "graphics"),
            base,
            label: RefCell::new(label.to_owned()),
            value: Cell::new(value),
            samples: RefCell::new(None),
        })
    }

    /// Returns the label.
    pub fn label(&self) -> String {
        self.label.borrow().clone()
    }

    /// Changes the label.
    pub fn set_label(&self, label: &str) {
        *self.label.borrow_mut() = label.to_owned();
        self.notify_set_property("label", &Value::from(label));
    }

    /// Returns the raw value.
    pub fn value(&self) -> f64 {
        self.value.get()
    }

    /// Changes the raw value.
    pub fn set_value(&self, value: f64) {
        self.value.set(value);
        self.notify_set_property("value", &Value::Float(value));
    }

    /// Returns the value with the calibration applied.
    pub fn calibrated(&self) -> f64 {
        match self.calibration.get() {
            Some(calibration) => calibration.apply(self.value()),
            None => self.value(),
        }
    }

    /// Returns the raw sample buffer.
    pub fn samples(&self) -> Option<Vec<u8>> {
        self.samples.borrow().clone()
    }

    /// Replaces the raw sample buffer.
    pub fn set_samples(&self, samples: Vec<u8>) {
        *self.samples.borrow_mut() = Some(samples.clone());
        self.notify_set_data("samples", &samples);
    }
}

impl Observer for DataItem {}

impl Persistent for DataItem {
    fn base(&self) -> &StorageBase {
        &self.base
    }

    fn shape() -> &'static Shape<Self> {
        static SHAPE: OnceLock<Shape<DataItem>> = OnceLock::new();
        SHAPE.get_or_init(|| {
            Shape::<DataItem>::new(DataItem::TYPE_TAG)
                .property(
                    "label",
                    |i| Some(Value::from(i.label())),
                    |i, v| *i.label.borrow_mut() = text(&v),
                )
                .property(
                    "value",
                    |i| Some(Value::Float(i.value())),
                    |i, v| i.value.set(float(&v)),
                )
                .item("calibration", |i| i.calibration.object())
                .relationship("graphics", |i| i.graphics.objects())
                .data("samples", DataItem::samples)
        })
    }

    fn about_to_delete(&self) {
        self.calibration.set(None);
        self.graphics.clear();
    }
}

/// Linear conversion from raw to calibrated values.
pub struct Calibration {
    base: StorageBase,
    scale: Cell<f64>,
    offset: Cell<f64>,
}

impl Calibration {
    /// Type tag.
    pub const TYPE_TAG: &'static str = "calibration";

    /// Creates a calibration.
    pub fn new(scale: f64, offset: f64) -> Rc<Self> {
        create(|base| Calibration {
            base,
            scale: Cell::new(scale),
            offset: Cell::new(offset),
        })
    }

    /// Returns the scale factor.
    pub fn scale(&self) -> f64 {
        self.scale.get()
    }

    /// Returns the offset.
    pub fn offset(&self) -> f64 {
        self.offset.get()
    }

    /// Changes the scale factor.
    pub fn set_scale(&self, scale: f64) {
        self.scale.set(scale);
        self.notify_set_property("scale", &Value::Float(scale));
    }

    /// Applies the calibration to a raw value.
    pub fn apply(&self, raw: f64) -> f64 {
        raw * self.scale() + self.offset()
    }
}

impl Observer for Calibration {}

impl Persistent for Calibration {
    fn base(&self) -> &StorageBase {
        &self.base
    }

    fn shape() -> &'static Shape<Self> {
        static SHAPE: OnceLock<Shape<Calibration>> = OnceLock::new();
        SHAPE.get_or_init(|| {
            Shape::<Calibration>::new(Calibration::TYPE_TAG)
                .property(
                    "scale",
                    |c| Some(Value::Float(c.scale())),
                    |c, v| c.scale.set(float(&v)),
                )
                .property(
                    "offset",
                    |c| Some(Value::Float(c.offset())),
                    |c, v| c.offset.set(float(&v)),
                )
        })
    }
}

/// A marker drawn at a position.
pub struct Graphic {
    base: StorageBase,
    kind: RefCell<String>,
    x: Cell<f64>,
    y: Cell<f64>,
}

impl Graphic {
    /// Type tag.
    pub const TYPE_TAG: &'static str = "graphic";

    /// Creates a graphic.
    pub fn new(kind: &str, x: f64, y: f64) -> Rc<Self> {
        create(|base| Graphic {
            base,
            kind: RefCell::new(kind.to_owned()),
            x: Cell::new(x),
            y: Cell::new(y),
        })
    }

    /// Returns the kind of marker.
    pub fn kind(&self) -> String {
        self.kind.borrow().clone()
    }

    /// Returns the position.
    pub fn position(&self) -> (f64, f64) {
        (self.x.get(), self.y.get())
    }

    /// Moves the graphic.
    pub fn move_to(&self, x: f64, y: f64) {
        self.x.set(x);
        self.notify_set_property("x", &Value::Float(x));
        self.y.set(y);
        self.notify_set_property("y", &Value::Float(y));
    }
}

impl Observer for Graphic {}

impl Persistent for Graphic {
    fn base(&self) -> &StorageBase {
        &self.base
    }

    fn shape() -> &'static Shape<Self> {
        static SHAPE: OnceLock<Shape<Graphic>> = OnceLock::new();
        SHAPE.get_or_init(|| {
            Shape::<Graphic>::new(Graphic::TYPE_TAG)
                .property(
                    "kind",
                    |g| Some(Value::from(g.kind())),
                    |g, v| *g.kind.borrow_mut() = text(&v),
                )
                .property("x", |g| Some(Value::Float(g.x.get())), |g, v| g.x.set(float(&v)))
                .property("y", |g| Some(Value::Float(g.y.get())), |g, v| g.y.set(float(&v)))
        })
    }
}

fn build_document(reader: &mut StorageReader<'_>, id: NodeId) -> CoreResult<Option<ObjectRef>> {
    let document = Document::new("");
    reader.restore_properties(&*document, id)?;
    document
        .calibration
        .set(reader.get_item_as::<Calibration>(id, "calibration")?);
    for group in reader.get_items_as::<DataGroup>(id, "groups")? {
        document.groups.append(group);
    }
    *document.thumbnail.borrow_mut() = reader.get_data(id, "thumbnail")?;
    Ok(Some(document as ObjectRef))
}

fn build_group(reader: &mut StorageReader<'_>, id: NodeId) -> CoreResult<Option<ObjectRef>> {
    let group = DataGroup::new("");
    reader.restore_properties(&*group, id)?;
    for item in reader.get_items_as::<DataItem>(id, "items")? {
        group.items.append(item);
    }
    Ok(Some(group as ObjectRef))
}

fn build_item(reader: &mut StorageReader<'_>, id: NodeId) -> CoreResult<Option<ObjectRef>> {
    let item = DataItem::new("", 0.0);
    reader.restore_properties(&*item, id)?;
    item.calibration
        .set(reader.get_item_as::<Calibration>(id, "calibration")?);
    for graphic in reader.get_items_as::<Graphic>(id, "graphics")? {
        item.graphics.append(graphic);
    }
    *item.samples.borrow_mut() = reader.get_data(id, "samples")?;
    Ok(Some(item as ObjectRef))
}

fn build_calibration(reader: &mut StorageReader<'_>, id: NodeId) -> CoreResult<Option<ObjectRef>> {
    let calibration = Calibration::new(1.0, 0.0);
    reader.restore_properties(&*calibration, id)?;
    Ok(Some(calibration as ObjectRef))
}

fn build_graphic(reader: &mut StorageReader<'_>, id: NodeId) -> CoreResult<Option<ObjectRef>> {
    let graphic = Graphic::new("", 0.0, 0.0);
    reader.restore_properties(&*graphic, id)?;
    Ok(Some(graphic as ObjectRef))
}

const CONSTRUCTORS: [(&str, Constructor); 5] = [
    (Document::TYPE_TAG, build_document),
    (DataGroup::TYPE_TAG, build_group),
    (DataItem::TYPE_TAG, build_item),
    (Calibration::TYPE_TAG, build_calibration),
    (Graphic::TYPE_TAG, build_graphic),
];

/// Returns a registry with every sample type.
pub fn registry() -> TypeRegistry {
    CONSTRUCTORS
        .iter()
        .fold(TypeRegistry::new(), |registry, (tag, constructor)| {
            registry.with(*tag, *constructor)
        })
}

/// Registers every sample type in the process-wide registry, initializing
/// it if needed.
///
/// # Errors
///
/// Returns an error if registration fails.
pub fn register_global() -> CoreResult<()> {
    refgraph_core::registry::init();
    for (tag, constructor) in CONSTRUCTORS {
        refgraph_core::registry::register(tag, constructor)?;
    }
    Ok(())
}

/// Rebuilds the document stored in `source`.
///
/// # Errors
///
/// Returns an error if the source cannot be read or holds no document.
pub fn load_document(source: &dyn NodeSource) -> CoreResult<Rc<Document>> {
    StorageReader::with_registry(source, registry()).build_root_as::<Document>(Document::TYPE_TAG)
}
