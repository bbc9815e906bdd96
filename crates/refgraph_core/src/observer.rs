//! Change callbacks for live objects.
//!
//! Two kinds of subscriber exist:
//!
//! - [`Observer`]s get one named callback per mutation kind. Relationship
//!   owners observe their members this way.
//! - [`Listener`]s get a [`StorageEvent`] for the event kinds they subscribe
//!   to, including custom events an object raises itself.

use crate::object::{ObjectRef, PersistentObject};
use refgraph_codec::Value;

/// Named change callbacks. Every callback defaults to doing nothing.
///
/// Callbacks run synchronously on the mutating thread, after the change has
/// been forwarded to the object's writer.
pub trait Observer {
    /// A scalar property changed.
    fn property_changed(&self, _sender: &dyn PersistentObject, _key: &str, _value: &Value) {}

    /// A single item was linked.
    fn item_set(&self, _sender: &dyn PersistentObject, _key: &str, _item: &ObjectRef) {}

    /// A single item was unlinked.
    fn item_cleared(&self, _sender: &dyn PersistentObject, _key: &str) {}

    /// A data blob was written.
    fn data_set(&self, _sender: &dyn PersistentObject, _key: &str, _data: &[u8]) {}

    /// An object was inserted into a relationship.
    fn item_inserted(
        &self,
        _sender: &dyn PersistentObject,
        _key: &str,
        _item: &ObjectRef,
        _index: usize,
    ) {
    }

    /// An object was removed from a relationship.
    fn item_removed(
        &self,
        _sender: &dyn PersistentObject,
        _key: &str,
        _item: &ObjectRef,
        _index: usize,
    ) {
    }

    /// A child propagated an event to its parents.
    fn child_notified(&self, _child: &dyn PersistentObject, _event: &StorageEvent<'_>) {}
}

/// Event kinds a [`Listener`] can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`StorageEvent::PropertyChanged`].
    PropertyChanged,
    /// [`StorageEvent::ItemSet`].
    ItemSet,
    /// [`StorageEvent::ItemCleared`].
    ItemCleared,
    /// [`StorageEvent::DataSet`].
    DataSet,
    /// [`StorageEvent::ItemInserted`].
    ItemInserted,
    /// [`StorageEvent::ItemRemoved`].
    ItemRemoved,
    /// [`StorageEvent::Custom`].
    Custom,
}

impl EventKind {
    /// Every event kind.
    pub const ALL: [EventKind; 7] = [
        EventKind::PropertyChanged,
        EventKind::ItemSet,
        EventKind::ItemCleared,
        EventKind::DataSet,
        EventKind::ItemInserted,
        EventKind::ItemRemoved,
        EventKind::Custom,
    ];

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

/// A set of [`EventKind`]s, resolved once when a listener registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventMask(u8);

impl EventMask {
    /// Builds a mask from a list of kinds.
    pub fn from_kinds(kinds: &[EventKind]) -> Self {
        Self(kinds.iter().fold(0, |mask, kind| mask | kind.bit()))
    }

    /// Returns `true` if the mask includes `kind`.
    pub const fn contains(self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Returns `true` if no kind is included.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// One change, as delivered to listeners and parents.
#[derive(Debug, Clone)]
pub enum StorageEvent<'a> {
    /// A scalar property changed.
    PropertyChanged {
        /// Property key.
        key: &'a str,
        /// New value.
        value: &'a Value,
    },
    /// A single item was linked.
    ItemSet {
        /// Item key.
        key: &'a str,
        /// The linked object.
        item: &'a ObjectRef,
    },
    /// A single item was unlinked.
    ItemCleared {
        /// Item key.
        key: &'a str,
    },
    /// A data blob was written.
    DataSet {
        /// Data key.
        key: &'a str,
        /// The blob.
        data: &'a [u8],
    },
    /// An object was inserted into a relationship.
    ItemInserted {
        /// Relationship key.
        key: &'a str,
        /// The inserted object.
        item: &'a ObjectRef,
        /// Position it now occupies.
        index: usize,
    },
    /// An object was removed from a relationship.
    ItemRemoved {
        /// Relationship key.
        key: &'a str,
        /// The removed object.
        item: &'a ObjectRef,
        /// Position it occupied.
        index: usize,
    },
    /// An application defined event.
    Custom {
        /// Event name.
        name: &'a str,
        /// Event payload.
        payload: &'a Value,
    },
}

impl StorageEvent<'_> {
    /// Returns the kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::PropertyChanged { .. } => EventKind::PropertyChanged,
            Self::ItemSet { .. } => EventKind::ItemSet,
            Self::ItemCleared { .. } => EventKind::ItemCleared,
            Self::DataSet { .. } => EventKind::DataSet,
            Self::ItemInserted { .. } => EventKind::ItemInserted,
            Self::ItemRemoved { .. } => EventKind::ItemRemoved,
            Self::Custom { .. } => EventKind::Custom,
        }
    }

    /// Returns the key or custom event name.
    pub fn key(&self) -> &str {
        match self {
            Self::PropertyChanged { key, .. }
            | Self::ItemSet { key, .. }
            | Self::ItemCleared { key }
            | Self::DataSet { key, .. }
            | Self::ItemInserted { key, .. }
            | Self::ItemRemoved { key, .. } => key,
            Self::Custom { name, .. } => name,
        }
    }
}

/// Receives [`StorageEvent`]s of the kinds it subscribes to.
pub trait Listener {
    /// Event kinds this listener wants. Read once at registration.
    fn subscriptions(&self) -> Vec<EventKind> {
        EventKind::ALL.to_vec()
    }

    /// Handles one event.
    fn on_event(&self, sender: &dyn PersistentObject, event: &StorageEvent<'_>);
}
