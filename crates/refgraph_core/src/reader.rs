//! Rebuilding live objects from storage.

use crate::error::{CoreError, CoreResult};
use crate::object::{downcast, ObjectRef, Persistent, PersistentObject};
use crate::registry::{self, TypeRegistry};
use refgraph_codec::Value;
use refgraph_storage::{NodeId, NodeSource};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use tracing::{debug, warn};

/// Rebuilds a live object graph from a [`NodeSource`].
///
/// Every node is built at most once per reader; a node referenced from
/// several places comes back as the same object. A node reached again while
/// it is still being built is a cycle and is skipped with a warning.
pub struct StorageReader<'a> {
    source: &'a dyn NodeSource,
    registry: TypeRegistry,
    built: HashMap<NodeId, ObjectRef>,
    in_progress: HashSet<NodeId>,
}

impl std::fmt::Debug for StorageReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageReader")
            .field("registry", &self.registry)
            .field("built", &self.built.len())
            .finish_non_exhaustive()
    }
}

impl<'a> StorageReader<'a> {
    /// Creates a reader using the process-wide registry.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RegistryUninitialized`] if the registry was not
    /// initialized.
    pub fn new(source: &'a dyn NodeSource) -> CoreResult<Self> {
        Ok(Self::with_registry(source, registry::global()?))
    }

    /// Creates a reader using an explicit registry.
    pub fn with_registry(source: &'a dyn NodeSource, registry: TypeRegistry) -> Self {
        Self {
            source,
            registry,
            built: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }

    /// Returns the underlying source.
    pub fn source(&self) -> &'a dyn NodeSource {
        self.source
    }

    /// Number of objects built so far.
    pub fn built_len(&self) -> usize {
        self.built.len()
    }

    /// Finds the unreferenced node of type `type_tag`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read.
    pub fn find_root_node(&self, type_tag: &str) -> CoreResult<Option<NodeId>> {
        Ok(self.source.find_root(type_tag)?)
    }

    /// Builds the root object of type `type_tag`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RootNotFound`] if no such root exists or it
    /// cannot be built.
    pub fn build_root(&mut self, type_tag: &str) -> CoreResult<ObjectRef> {
        let id = self
            .find_root_node(type_tag)?
            .ok_or_else(|| CoreError::root_not_found(type_tag))?;
        let root = self
            .build_item(id)?
            .ok_or_else(|| CoreError::root_not_found(type_tag))?;
        debug!(id = %id, type_tag, objects = self.built.len(), "root rebuilt");
        Ok(root)
    }

    /// Builds the root object and downcasts it.
    ///
    /// # Errors
    ///
    /// As [`Self::build_root`], plus [`CoreError::TypeMismatch`].
    pub fn build_root_as<T: Persistent>(&mut self, type_tag: &str) -> CoreResult<Rc<T>> {
        let root = self.build_root(type_tag)?;
        expect_type(&root)
    }

    /// Builds the object for node `id`, or returns the one already built.
    ///
    /// Returns `Ok(None)` for missing or untyped nodes, unregistered types
    /// and cycles.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read or a constructor fails.
    pub fn build_item(&mut self, id: NodeId) -> CoreResult<Option<ObjectRef>> {
        if let Some(object) = self.built.get(&id) {
            return Ok(Some(Rc::clone(object)));
        }
        if self.in_progress.contains(&id) {
            warn!(id = %id, "cycle while rebuilding graph, skipping node");
            return Ok(None);
        }
        let Some(type_tag) = self.source.node_type(id)? else {
            warn!(id = %id, "node is missing or untyped, skipping");
            return Ok(None);
        };
        let Some(constructor) = self.registry.get(&type_tag) else {
            warn!(id = %id, type_tag = %type_tag, "no constructor registered, skipping");
            return Ok(None);
        };

        self.in_progress.insert(id);
        let built = constructor(self, id);
        self.in_progress.remove(&id);

        let Some(object) = built? else {
            return Ok(None);
        };
        object.storage().set_id(id);
        self.built.insert(id, Rc::clone(&object));
        Ok(Some(object))
    }

    /// Builds node `id` and downcasts it.
    ///
    /// # Errors
    ///
    /// As [`Self::build_item`], plus [`CoreError::TypeMismatch`].
    pub fn build_item_as<T: Persistent>(&mut self, id: NodeId) -> CoreResult<Option<Rc<T>>> {
        self.build_item(id)?.as_ref().map(expect_type::<T>).transpose()
    }

    /// Reads a property.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read.
    pub fn get_property(&self, id: NodeId, key: &str) -> CoreResult<Option<Value>> {
        Ok(self.source.property(id, key)?)
    }

    /// Reads a property, falling back to `default`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read.
    pub fn get_property_or(&self, id: NodeId, key: &str, default: Value) -> CoreResult<Value> {
        Ok(self.get_property(id, key)?.unwrap_or(default))
    }

    /// Builds the single item linked under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read or a constructor fails.
    pub fn get_item(&mut self, id: NodeId, key: &str) -> CoreResult<Option<ObjectRef>> {
        match self.source.item(id, key)? {
            Some(item) => self.build_item(item),
            None => Ok(None),
        }
    }

    /// Builds the single item linked under `key` and downcasts it.
    ///
    /// # Errors
    ///
    /// As [`Self::get_item`], plus [`CoreError::TypeMismatch`].
    pub fn get_item_as<T: Persistent>(&mut self, id: NodeId, key: &str) -> CoreResult<Option<Rc<T>>> {
        self.get_item(id, key)?.as_ref().map(expect_type::<T>).transpose()
    }

    /// Builds the members of relationship `key`, in order. Members that
    /// cannot be built are left out.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read or a constructor fails.
    pub fn get_items(&mut self, id: NodeId, key: &str) -> CoreResult<Vec<ObjectRef>> {
        let mut objects = Vec::new();
        for member in self.source.items(id, key)? {
            if let Some(object) = self.build_item(member)? {
                objects.push(object);
            }
        }
        Ok(objects)
    }

    /// Builds the members of relationship `key` and downcasts them.
    ///
    /// # Errors
    ///
    /// As [`Self::get_items`], plus [`CoreError::TypeMismatch`].
    pub fn get_items_as<T: Persistent>(&mut self, id: NodeId, key: &str) -> CoreResult<Vec<Rc<T>>> {
        self.get_items(id, key)?.iter().map(expect_type::<T>).collect()
    }

    /// Reads a data blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read.
    pub fn get_data(&self, id: NodeId, key: &str) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.source.data(id, key)?)
    }

    /// Reads a data blob, falling back to `default`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read.
    pub fn get_data_or(&self, id: NodeId, key: &str, default: Vec<u8>) -> CoreResult<Vec<u8>> {
        Ok(self.get_data(id, key)?.unwrap_or(default))
    }

    /// Returns `true` if a property is stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read.
    pub fn has_property(&self, id: NodeId, key: &str) -> CoreResult<bool> {
        Ok(self.source.property(id, key)?.is_some())
    }

    /// Returns `true` if a single item is linked under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read.
    pub fn has_item(&self, id: NodeId, key: &str) -> CoreResult<bool> {
        Ok(self.source.has_item(id, key)?)
    }

    /// Returns `true` if relationship `key` has members.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read.
    pub fn has_relationship(&self, id: NodeId, key: &str) -> CoreResult<bool> {
        Ok(self.source.has_relationship(id, key)?)
    }

    /// Returns `true` if a data blob is stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read.
    pub fn has_data(&self, id: NodeId, key: &str) -> CoreResult<bool> {
        Ok(self.source.has_data(id, key)?)
    }

    /// Copies every stored declared property of node `id` onto `object`
    /// through its setters.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read.
    pub fn restore_properties(&self, object: &dyn PersistentObject, id: NodeId) -> CoreResult<()> {
        for key in object.declaration().properties {
            if let Some(value) = self.source.property(id, key)? {
                object.set_storage_property(key, value);
            }
        }
        Ok(())
    }
}

fn expect_type<T: Persistent>(object: &ObjectRef) -> CoreResult<Rc<T>> {
    downcast::<T>(object).ok_or_else(|| CoreError::TypeMismatch {
        id: object.id(),
        expected: std::any::type_name::<T>(),
        found: object.type_tag().to_owned(),
    })
}
