use std::fmt;
use std::time::Duration;

use courier_core::{Envelope, Failure, FromWire, IntoWire, MarshalError, WireValue};

use crate::correlator::ReplyCallback;
use crate::error::Result;
use crate::executor::Executor;
use crate::reply::ReplyError;

/// A message as seen by the handler it was delivered to
///
/// Carries the executor it was delivered on, so replies and their callbacks
/// stay on the handler's executor.
#[derive(Clone)]
pub struct Message {
    address: String,
    body: WireValue,
    reply_address: Option<String>,
    executor: Executor,
}

impl Message {
    pub(crate) fn new(envelope: Envelope, executor: Executor) -> Self {
        Self {
            address: envelope.address,
            body: envelope.body,
            reply_address: envelope.reply_address,
            executor,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn body(&self) -> &WireValue {
        &self.body
    }

    pub fn into_body(self) -> WireValue {
        self.body
    }

    /// Unmarshal a copy of the body into a host type
    pub fn body_as<T: FromWire>(&self) -> std::result::Result<T, MarshalError> {
        T::from_wire(self.body.clone())
    }

    /// Address a reply goes to; `None` when the sender did not ask for one
    pub fn reply_address(&self) -> Option<&str> {
        self.reply_address.as_deref()
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Reply to the sender
    ///
    /// Does nothing when the message was not sent with a reply handler. A
    /// reply that arrives after the sender timed out is dropped.
    pub fn reply(&self, body: impl IntoWire) -> Result<()> {
        let Some(reply_address) = &self.reply_address else {
            return Ok(());
        };
        self.executor.bus().reply_from(
            self.executor.mailbox(),
            reply_address,
            body.into_wire(),
            None,
        )
    }

    /// Reply and expect a reply back, within the bus default timeout
    ///
    /// With no reply address the callback is never invoked.
    pub fn reply_with_handler<F>(&self, body: impl IntoWire, on_reply: F) -> Result<()>
    where
        F: FnOnce(std::result::Result<Message, ReplyError>) + Send + 'static,
    {
        self.reply_correlated(body, None, on_reply)
    }

    /// Reply and expect a reply back within `timeout`
    pub fn reply_with_timeout<F>(
        &self,
        body: impl IntoWire,
        timeout: Duration,
        on_reply: F,
    ) -> Result<()>
    where
        F: FnOnce(std::result::Result<Message, ReplyError>) + Send + 'static,
    {
        self.reply_correlated(body, Some(timeout), on_reply)
    }

    fn reply_correlated<F>(&self, body: impl IntoWire, timeout: Option<Duration>, on_reply: F) -> Result<()>
    where
        F: FnOnce(std::result::Result<Message, ReplyError>) + Send + 'static,
    {
        let Some(reply_address) = &self.reply_address else {
            return Ok(());
        };
        let on_reply: ReplyCallback = Box::new(on_reply);
        self.executor.bus().reply_from(
            self.executor.mailbox(),
            reply_address,
            body.into_wire(),
            Some((timeout, on_reply)),
        )
    }

    /// Fail the message; the sender's callback receives a recipient failure
    /// carrying `code` and `message`
    pub fn fail(&self, code: i32, message: impl Into<String>) -> Result<()> {
        let Some(reply_address) = &self.reply_address else {
            return Ok(());
        };
        self.executor.bus().fail_from(
            self.executor.mailbox(),
            reply_address,
            Failure {
                code,
                message: message.into(),
            },
        )
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("address", &self.address)
            .field("body", &self.body)
            .field("reply_address", &self.reply_address)
            .field("executor", &self.executor.id())
            .finish()
    }
}
