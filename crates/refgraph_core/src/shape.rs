//! Per-type storage declarations.
//!
//! A [`Shape`] lists, for one persistent type, the keys it persists and how
//! to reach each value on a live object. Shapes are built once per type and
//! live in a `static OnceLock`.

use crate::object::ObjectRef;
use refgraph_codec::Value;

type PropertyGetter<T> = fn(&T) -> Option<Value>;
type PropertySetter<T> = fn(&T, Value);
type ItemGetter<T> = fn(&T) -> Option<ObjectRef>;
type RelationshipGetter<T> = fn(&T) -> Vec<ObjectRef>;
type DataGetter<T> = fn(&T) -> Option<Vec<u8>>;

struct PropertyAccess<T> {
    key: &'static str,
    get: PropertyGetter<T>,
    set: PropertySetter<T>,
}

/// Storage declaration for a persistent type `T`.
///
/// # Example
///
/// ```rust,ignore
/// fn shape() -> &'static Shape<Self> {
///     static SHAPE: OnceLock<Shape<Sample>> = OnceLock::new();
///     SHAPE.get_or_init(|| {
///         Shape::<Sample>::new("sample")
///             .property("name", |s| Some(s.name().into()), |s, v| s.restore_name(v))
///             .relationship("children", |s| s.children.objects())
///     })
/// }
/// ```
pub struct Shape<T> {
    type_tag: &'static str,
    root: bool,
    properties: Vec<PropertyAccess<T>>,
    items: Vec<(&'static str, ItemGetter<T>)>,
    relationships: Vec<(&'static str, RelationshipGetter<T>)>,
    data: Vec<(&'static str, DataGetter<T>)>,
}

impl<T> Shape<T> {
    /// Starts a declaration for `type_tag`.
    #[must_use]
    pub fn new(type_tag: &'static str) -> Self {
        Self {
            type_tag,
            root: false,
            properties: Vec::new(),
            items: Vec::new(),
            relationships: Vec::new(),
            data: Vec::new(),
        }
    }

    /// Marks the type as a root type.
    #[must_use]
    pub fn root(mut self) -> Self {
        self.root = true;
        self
    }

    /// Declares a scalar property with its getter and setter.
    #[must_use]
    pub fn property(
        mut self,
        key: &'static str,
        get: PropertyGetter<T>,
        set: PropertySetter<T>,
    ) -> Self {
        self.properties.push(PropertyAccess { key, get, set });
        self
    }

    /// Declares a single item slot.
    #[must_use]
    pub fn item(mut self, key: &'static str, get: ItemGetter<T>) -> Self {
        self.items.push((key, get));
        self
    }

    /// Declares an ordered relationship.
    #[must_use]
    pub fn relationship(mut self, key: &'static str, get: RelationshipGetter<T>) -> Self {
        self.relationships.push((key, get));
        self
    }

    /// Declares a binary data slot.
    #[must_use]
    pub fn data(mut self, key: &'static str, get: DataGetter<T>) -> Self {
        self.data.push((key, get));
        self
    }

    /// Returns the type tag.
    pub fn type_tag(&self) -> &'static str {
        self.type_tag
    }

    /// Returns the type-erased declaration.
    pub fn declaration(&self) -> Declaration {
        Declaration {
            type_tag: self.type_tag,
            root: self.root,
            properties: self.properties.iter().map(|p| p.key).collect(),
            items: self.items.iter().map(|(key, _)| *key).collect(),
            relationships: self.relationships.iter().map(|(key, _)| *key).collect(),
            data: self.data.iter().map(|(key, _)| *key).collect(),
        }
    }

    pub(crate) fn get_property(&self, object: &T, key: &str) -> Option<Value> {
        (self.property_access(key).get)(object)
    }

    pub(crate) fn set_property(&self, object: &T, key: &str, value: Value) {
        (self.property_access(key).set)(object, value);
    }

    pub(crate) fn get_item(&self, object: &T, key: &str) -> Option<ObjectRef> {
        (self.lookup(&self.items, "item", key))(object)
    }

    pub(crate) fn get_relationship(&self, object: &T, key: &str) -> Vec<ObjectRef> {
        (self.lookup(&self.relationships, "relationship", key))(object)
    }

    pub(crate) fn get_data(&self, object: &T, key: &str) -> Option<Vec<u8>> {
        (self.lookup(&self.data, "data", key))(object)
    }

    /// Every item and relationship member currently held, items first.
    pub(crate) fn children(&self, object: &T) -> Vec<ObjectRef> {
        let mut children: Vec<ObjectRef> =
            self.items.iter().filter_map(|(_, get)| get(object)).collect();
        for (_, get) in &self.relationships {
            children.extend(get(object));
        }
        children
    }

    fn property_access(&self, key: &str) -> &PropertyAccess<T> {
        match self.properties.iter().find(|p| p.key == key) {
            Some(access) => access,
            None => panic!("type `{}` declares no property `{key}`", self.type_tag),
        }
    }

    fn lookup<G: Copy>(&self, entries: &[(&'static str, G)], what: &str, key: &str) -> G {
        match entries.iter().find(|(name, _)| *name == key) {
            Some((_, get)) => *get,
            None => panic!("type `{}` declares no {what} `{key}`", self.type_tag),
        }
    }
}

/// The keys a persistent type declares, without its accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    /// Type tag written to storage.
    pub type_tag: &'static str,
    /// Whether the type can be a graph root.
    pub root: bool,
    /// Scalar property keys.
    pub properties: Vec<&'static str>,
    /// Single item keys.
    pub items: Vec<&'static str>,
    /// Relationship keys.
    pub relationships: Vec<&'static str>,
    /// Data keys.
    pub data: Vec<&'static str>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Counter {
        hits: Cell<i64>,
    }

    fn counter_shape() -> Shape<Counter> {
        Shape::<Counter>::new("counter")
            .root()
            .property(
                "hits",
                |c| Some(Value::Integer(c.hits.get())),
                |c, v| c.hits.set(v.as_integer().unwrap_or_default()),
            )
            .data("raw", |c| Some(c.hits.get().to_le_bytes().to_vec()))
    }

    #[test]
    fn declaration_lists_keys() {
        let decl = counter_shape().declaration();
        assert_eq!(decl.type_tag, "counter");
        assert!(decl.root);
        assert_eq!(decl.properties, vec!["hits"]);
        assert!(decl.items.is_empty());
        assert!(decl.relationships.is_empty());
        assert_eq!(decl.data, vec!["raw"]);
    }

    #[test]
    fn accessors_reach_the_object() {
        let shape = counter_shape();
        let counter = Counter { hits: Cell::new(2) };
        assert_eq!(shape.get_property(&counter, "hits"), Some(Value::Integer(2)));
        shape.set_property(&counter, "hits", Value::Integer(9));
        assert_eq!(counter.hits.get(), 9);
        assert_eq!(shape.get_data(&counter, "raw"), Some(9i64.to_le_bytes().to_vec()));
        assert!(shape.children(&counter).is_empty());
    }

    #[test]
    #[should_panic(expected = "declares no property `missing`")]
    fn undeclared_property_panics() {
        let counter = Counter { hits: Cell::new(0) };
        let _ = counter_shape().get_property(&counter, "missing");
    }

    #[test]
    #[should_panic(expected = "declares no relationship `children`")]
    fn undeclared_relationship_panics() {
        let counter = Counter { hits: Cell::new(0) };
        let _ = counter_shape().get_relationship(&counter, "children");
    }
}
