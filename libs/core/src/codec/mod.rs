//! Envelope codecs
//!
//! A [`Codec`] turns any serde value into bytes and back. Transports pick
//! one and tag frames with its [`content_type`](Codec::content_type) so the
//! receiving side decodes with the same codec.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

pub mod bincode;
pub mod json;

pub use self::bincode::BincodeCodec;
pub use self::json::JsonCodec;

pub trait Codec: Send + Sync {
    /// MIME-style name of the encoding
    fn content_type(&self) -> &'static str;

    /// Whether NaN and infinite doubles survive an encode/decode cycle
    fn carries_non_finite(&self) -> bool {
        true
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}
