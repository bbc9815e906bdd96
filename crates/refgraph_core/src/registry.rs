//! Type tag to constructor mapping used when rebuilding a graph.
//!
//! A [`TypeRegistry`] can be passed to a reader directly. A process-wide
//! registry is also available through [`init`], [`register`] and
//! [`teardown`].

use crate::error::{CoreError, CoreResult};
use crate::object::ObjectRef;
use crate::reader::StorageReader;
use parking_lot::RwLock;
use refgraph_storage::NodeId;
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

/// Rebuilds one object from storage.
///
/// Returns `Ok(None)` if the node cannot be turned into an object.
pub type Constructor = fn(&mut StorageReader<'_>, NodeId) -> CoreResult<Option<ObjectRef>>;

/// Maps type tags to constructors.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    constructors: HashMap<String, Constructor>,
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.type_tags())
            .finish()
    }
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor, returning the one it replaces.
    pub fn register(&mut self, type_tag: impl Into<String>, constructor: Constructor) -> Option<Constructor> {
        self.constructors.insert(type_tag.into(), constructor)
    }

    /// Adds a constructor, builder style.
    #[must_use]
    pub fn with(mut self, type_tag: impl Into<String>, constructor: Constructor) -> Self {
        self.register(type_tag, constructor);
        self
    }

    /// Returns the constructor for `type_tag`.
    pub fn get(&self, type_tag: &str) -> Option<Constructor> {
        self.constructors.get(type_tag).copied()
    }

    /// Returns `true` if `type_tag` is registered.
    pub fn contains(&self, type_tag: &str) -> bool {
        self.constructors.contains_key(type_tag)
    }

    /// Returns the registered type tags, sorted.
    pub fn type_tags(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }

    /// Returns the number of registered types.
    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

fn global_slot() -> &'static RwLock<Option<TypeRegistry>> {
    static GLOBAL: OnceLock<RwLock<Option<TypeRegistry>>> = OnceLock::new();
    GLOBAL.get_or_init(|| RwLock::new(None))
}

/// Initializes the process-wide registry. Does nothing if it already exists.
pub fn init() {
    let mut slot = global_slot().write();
    if slot.is_none() {
        debug!("type registry initialized");
        *slot = Some(TypeRegistry::new());
    }
}

/// Registers a constructor in the process-wide registry.
///
/// # Errors
///
/// Returns [`CoreError::RegistryUninitialized`] if [`init`] was not called.
pub fn register(type_tag: impl Into<String>, constructor: Constructor) -> CoreResult<()> {
    let mut slot = global_slot().write();
    let registry = slot.as_mut().ok_or(CoreError::RegistryUninitialized)?;
    registry.register(type_tag, constructor);
    Ok(())
}

/// Drops the process-wide registry.
pub fn teardown() {
    if global_slot().write().take().is_some() {
        debug!("type registry torn down");
    }
}

/// Returns `true` if the process-wide registry exists.
pub fn is_initialized() -> bool {
    global_slot().read().is_some()
}

/// Returns a copy of the process-wide registry.
///
/// # Errors
///
/// Returns [`CoreError::RegistryUninitialized`] if [`init`] was not called.
pub fn global() -> CoreResult<TypeRegistry> {
    global_slot()
        .read()
        .clone()
        .ok_or(CoreError::RegistryUninitialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nothing(_: &mut StorageReader<'_>, _: NodeId) -> CoreResult<Option<ObjectRef>> {
        Ok(None)
    }

    #[test]
    fn local_registry_lookup() {
        let registry = TypeRegistry::new().with("b", nothing).with("a", nothing);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("a"));
        assert!(registry.get("c").is_none());
        assert_eq!(registry.type_tags(), vec!["a", "b"]);
    }

    #[test]
    fn register_replaces_previous() {
        let mut registry = TypeRegistry::new();
        assert!(registry.register("a", nothing).is_none());
        assert!(registry.register("a", nothing).is_some());
        assert_eq!(registry.len(), 1);
    }

    // The only test touching the process-wide registry.
    #[test]
    fn global_lifecycle() {
        teardown();
        assert!(!is_initialized());
        assert!(matches!(register("a", nothing), Err(CoreError::RegistryUninitialized)));
        assert!(global().is_err());

        init();
        register("a", nothing).unwrap();
        init();
        assert!(global().unwrap().contains("a"));

        teardown();
        assert!(!is_initialized());
    }
}
