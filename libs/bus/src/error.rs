use thiserror::Error;

use courier_core::MarshalError;

use crate::executor::ExecutorId;
use crate::registry::HandlerId;

/// Synchronous failures of bus operations
///
/// Delivery failures (timeouts, missing handlers, recipient failures) are
/// never reported here; they reach the reply callback as a
/// [`ReplyError`](crate::ReplyError).
#[derive(Error, Debug)]
pub enum Error {
    #[error("An address must be specified")]
    MissingAddress,

    #[error("A message body must be specified")]
    MissingBody,

    #[error("No handler registered with id {0}")]
    UnknownHandler(HandlerId),

    #[error("Executor {0} is closed")]
    ExecutorClosed(ExecutorId),

    #[error("No Tokio runtime available: {0}")]
    NoRuntime(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Marshal error: {0}")]
    Marshal(#[from] MarshalError),

    #[error(transparent)]
    Core(#[from] courier_core::Error),

    #[error("Authorisation failed: {0}")]
    Authorisation(String),

    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
