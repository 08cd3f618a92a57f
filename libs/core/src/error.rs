use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Marshal error: {0}")]
    Marshal(#[from] MarshalError),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure converting between a [`WireValue`](crate::WireValue) and a host type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarshalError {
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("value {value} out of range for {target}")]
    OutOfRange { value: String, target: &'static str },

    #[error("expected {expected} elements, found {found}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("invalid map key {key:?}")]
    InvalidKey { key: String },

    #[error("opaque value of type {type_name} is not wire-safe")]
    Opaque { type_name: &'static str },

    #[error("{kind} value cannot be represented as {target}")]
    Unrepresentable {
        kind: &'static str,
        target: &'static str,
    },
}
