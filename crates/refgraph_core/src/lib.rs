//! # refgraph core
//!
//! Live, reference-counted object graphs that persist themselves.
//!
//! Application types implement [`Persistent`] and embed a [`StorageBase`].
//! Objects own other objects through [`ItemSlot`]s and [`Relationship`]s;
//! every mutation is forwarded to the graph's [`SharedWriter`] as it happens
//! and then reported to observers and listeners.
//!
//! ## Saving
//!
//! 1. Build the graph.
//! 2. [`PersistentObject::attach_writer`] on the root.
//! 3. [`PersistentObject::rewrite`] once, to store the current state.
//! 4. Keep mutating; each change is written through incrementally.
//!
//! ## Loading
//!
//! Register one constructor per type tag in a [`TypeRegistry`], then ask a
//! [`StorageReader`] for the root. Shared nodes are rebuilt once and shared
//! again.
//!
//! [`SharedWriter`]: refgraph_storage::SharedWriter

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod base;
mod error;
mod object;
mod observer;
mod reader;
pub mod registry;
mod relationship;
mod shape;

#[cfg(test)]
mod testing;

pub use base::StorageBase;
pub use error::{CoreError, CoreResult};
pub use object::{create, downcast, ObjectRef, Persistent, PersistentObject, WeakObjectRef};
pub use observer::{EventKind, EventMask, Listener, Observer, StorageEvent};
pub use reader::StorageReader;
pub use registry::{Constructor, TypeRegistry};
pub use relationship::{ItemSlot, Relationship};
pub use shape::{Declaration, Shape};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
