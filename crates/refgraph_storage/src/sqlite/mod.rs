//! SQLite backend.
//!
//! The graph lives in five tables:
//!
//! ```text
//! nodes(id, type, refcount)
//! items(parent_id, key, item_id)
//! relationships(parent_id, key, item_index, item_id)
//! properties(id, key, value)
//! data(id, key, value)
//! ```
//!
//! IDs are hyphenated UUID text, property values are CBOR blobs and data
//! blobs are stored as given.

mod dump;
mod query;
mod reader;
pub mod schema;
mod writer;

pub use dump::dump;
pub use reader::SqliteReader;
pub use schema::TableCounts;
pub use writer::SqliteWriter;
