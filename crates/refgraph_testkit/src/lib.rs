//! # refgraph testkit
//!
//! Test utilities for refgraph.
//!
//! This crate provides:
//! - A sample measurement domain with shared and nested objects
//! - Store fixtures for every backend
//! - Property-based test generators using proptest
//! - Cross-backend integration helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use refgraph_testkit::prelude::*;
//!
//! #[test]
//! fn saved_document_reloads() {
//!     let store = MemoryStore::new();
//!     let sample = sample_document();
//!     save(&sample.document, store.writer()).unwrap();
//!     let loaded = load_document(&store.node_map()).unwrap();
//!     assert_eq!(loaded.title(), "run 42");
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod model;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::model::*;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use model::*;
