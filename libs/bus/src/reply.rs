//! Reply outcomes
//!
//! [`ReplyError`] is what a correlated sender receives instead of a reply.
//! [`HandlerError`] is what a handler returns to fail the message it was
//! given; the bus turns it into a [`ReplyFailure::RecipientFailure`] at the
//! sender.

use std::fmt;

use courier_core::Failure;

/// Why a correlated send produced no reply
///
/// The integer codes are stable and shared with other bus implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyFailure {
    Timeout,
    NoHandlers,
    RecipientFailure,
}

impl ReplyFailure {
    pub fn as_int(self) -> i32 {
        match self {
            ReplyFailure::Timeout => 0,
            ReplyFailure::NoHandlers => 1,
            ReplyFailure::RecipientFailure => 2,
        }
    }

    pub fn from_int(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(ReplyFailure::Timeout),
            1 => Some(ReplyFailure::NoHandlers),
            2 => Some(ReplyFailure::RecipientFailure),
            _ => None,
        }
    }

    /// Short stable label for logs and metrics
    pub fn as_label(self) -> &'static str {
        match self {
            ReplyFailure::Timeout => "reply_timeout",
            ReplyFailure::NoHandlers => "reply_no_handlers",
            ReplyFailure::RecipientFailure => "reply_recipient_failure",
        }
    }
}

impl fmt::Display for ReplyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReplyFailure::Timeout => "timed out waiting for reply",
            ReplyFailure::NoHandlers => "no handlers for address",
            ReplyFailure::RecipientFailure => "recipient failed",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyError {
    kind: ReplyFailure,
    failure_code: Option<i32>,
    cause: Option<String>,
}

impl ReplyError {
    pub(crate) fn timeout(address: &str) -> Self {
        Self {
            kind: ReplyFailure::Timeout,
            failure_code: None,
            cause: Some(format!("no reply for message sent to {address}")),
        }
    }

    pub(crate) fn no_handlers(address: &str) -> Self {
        Self {
            kind: ReplyFailure::NoHandlers,
            failure_code: None,
            cause: Some(format!("no handlers for address {address}")),
        }
    }

    /// The executor that would have run the reply callback went away
    pub(crate) fn abandoned(address: &str) -> Self {
        Self {
            kind: ReplyFailure::NoHandlers,
            failure_code: None,
            cause: Some(format!("reply to {address} abandoned: executor closed")),
        }
    }

    pub(crate) fn recipient(failure: Failure) -> Self {
        Self {
            kind: ReplyFailure::RecipientFailure,
            failure_code: Some(failure.code),
            cause: Some(failure.message),
        }
    }

    pub fn kind(&self) -> ReplyFailure {
        self.kind
    }

    /// Code chosen by the failing recipient; only set for recipient failures
    pub fn failure_code(&self) -> Option<i32> {
        self.failure_code
    }

    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == ReplyFailure::Timeout
    }

    pub fn is_no_handlers(&self) -> bool {
        self.kind == ReplyFailure::NoHandlers
    }

    pub fn is_recipient_failure(&self) -> bool {
        self.kind == ReplyFailure::RecipientFailure
    }
}

impl fmt::Display for ReplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(code) = self.failure_code {
            write!(f, " (code {code})")?;
        }
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ReplyError {}

/// Failure raised by a handler for the message it is processing
///
/// Any `std::error::Error` converts into it with [`HandlerError::DEFAULT_CODE`],
/// so handlers can use `?` freely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    pub code: i32,
    pub message: String,
}

impl HandlerError {
    pub const DEFAULT_CODE: i32 = -1;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Self::DEFAULT_CODE, message)
    }

    pub(crate) fn into_failure(self) -> Failure {
        Failure {
            code: self.code,
            message: self.message,
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler failed with code {}: {}", self.code, self.message)
    }
}

impl<E: std::error::Error> From<E> for HandlerError {
    fn from(err: E) -> Self {
        Self::msg(err.to_string())
    }
}

pub type HandlerResult = std::result::Result<(), HandlerError>;
