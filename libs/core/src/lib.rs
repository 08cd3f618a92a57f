//! Courier Core - wire values, marshalling and envelope codecs
//!
//! Everything the event bus puts on the wire is a [`WireValue`]. Host values
//! move in and out through the [`IntoWire`] and [`FromWire`] traits, and an
//! addressed [`Envelope`] can be encoded with any [`Codec`](codec::Codec) for
//! a transport to carry.
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use courier_core::{codec::BincodeCodec, Envelope, FromWire, IntoWire};
//!
//! let mut order = BTreeMap::new();
//! order.insert("item".to_string(), 42i64);
//!
//! let body = order.clone().into_wire();
//! let envelope = Envelope::new("orders", body);
//! let bytes = envelope.encode(&BincodeCodec::default()).unwrap();
//!
//! let decoded = Envelope::decode(&BincodeCodec::default(), &bytes).unwrap();
//! let back = BTreeMap::<String, i64>::from_wire(decoded.body).unwrap();
//! assert_eq!(back, order);
//! ```

pub mod codec;
pub mod envelope;
pub mod error;
pub mod json;
pub mod marshal;
pub mod value;

// Re-exports for convenience
pub use envelope::{Envelope, Failure};
pub use error::{Error, MarshalError, Result};
pub use json::{json_to_wire, wire_to_json};
pub use marshal::{from_wire, to_wire, FromWire, IntoWire};
pub use value::{OpaqueValue, WireValue};
