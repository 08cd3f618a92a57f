use serde::{Deserialize, Serialize};

use crate::codec::Codec;
use crate::error::{MarshalError, Result};
use crate::value::WireValue;

/// Addressed message as it crosses an executor or process boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub address: String,
    pub body: WireValue,
    /// One-shot address the receiver replies to, if the sender expects a reply
    pub reply_address: Option<String>,
    /// Set instead of a meaningful body when the recipient failed
    pub failure: Option<Failure>,
}

/// Recipient-side failure carried back to the sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub code: i32,
    pub message: String,
}

impl Envelope {
    pub fn new(address: impl Into<String>, body: WireValue) -> Self {
        Self {
            address: address.into(),
            body,
            reply_address: None,
            failure: None,
        }
    }

    /// Failure reply addressed to a sender's reply address
    pub fn failure(address: impl Into<String>, failure: Failure) -> Self {
        Self {
            address: address.into(),
            body: WireValue::Null,
            reply_address: None,
            failure: Some(failure),
        }
    }

    pub fn with_reply_address(mut self, reply_address: impl Into<String>) -> Self {
        self.reply_address = Some(reply_address.into());
        self
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }

    /// Encode for a transport
    ///
    /// Fails with [`MarshalError::Opaque`] when the body holds a value that
    /// only exists in this process, and with [`MarshalError::Unrepresentable`]
    /// when it holds a NaN or infinite double the codec cannot carry.
    pub fn encode<C: Codec>(&self, codec: &C) -> Result<Vec<u8>> {
        if let Some(opaque) = self.body.find_opaque() {
            return Err(MarshalError::Opaque {
                type_name: opaque.type_name(),
            }
            .into());
        }
        if !codec.carries_non_finite() && self.body.has_non_finite() {
            return Err(MarshalError::Unrepresentable {
                kind: "non-finite double",
                target: codec.content_type(),
            }
            .into());
        }
        codec.encode(self)
    }

    pub fn decode<C: Codec>(codec: &C, bytes: &[u8]) -> Result<Self> {
        codec.decode(bytes)
    }
}
