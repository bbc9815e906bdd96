//! # refgraph codec
//!
//! Property values and CBOR encoding for refgraph.
//!
//! Persistent objects store their scalar properties as [`Value`]s. Backends
//! need those values as bytes (the relational backend keeps one blob per
//! property) and the in-memory backend exports its whole node map as a single
//! byte stream. Both go through CBOR.
//!
//! ## Usage
//!
//! ```
//! use refgraph_codec::{decode_value, encode_value, Value};
//!
//! let value = Value::from("calibrated");
//! let bytes = encode_value(&value).unwrap();
//! assert_eq!(decode_value(&bytes).unwrap(), value);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod value;

pub use cbor::{decode_value, encode_value, from_cbor, to_cbor};
pub use error::{CodecError, CodecResult};
pub use value::Value;
