use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};

use crate::codec::Codec;
use crate::error::{Error, Result};

/// Largest payload a default [`BincodeCodec`] will decode
pub const DEFAULT_DECODE_LIMIT: u64 = 16 * 1024 * 1024;

/// Compact binary codec for process-to-process traffic
///
/// Decoding is bounded: a corrupt length prefix fails with a codec error
/// instead of allocating past `limit` bytes.
#[derive(Debug, Clone, Copy)]
pub struct BincodeCodec {
    limit: u64,
}

impl Default for BincodeCodec {
    fn default() -> Self {
        Self {
            limit: DEFAULT_DECODE_LIMIT,
        }
    }
}

impl BincodeCodec {
    pub fn with_limit(limit: u64) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    fn options(&self) -> impl Options {
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .allow_trailing_bytes()
            .with_limit(self.limit)
    }
}

impl Codec for BincodeCodec {
    fn content_type(&self) -> &'static str {
        "application/x-bincode"
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        self.options()
            .serialize(value)
            .map_err(|e| Error::Codec(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        self.options()
            .deserialize(bytes)
            .map_err(|e| Error::Codec(e.to_string()))
    }
}
