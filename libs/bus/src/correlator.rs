//! Reply correlation
//!
//! A correlated send registers a transient handler on a fresh one-shot
//! address and hands that address to the recipient as `reply_address`.
//! The [`PendingReply`] behind that handler owns the sender's callback and
//! its timeout timer. Whichever of reply, failure, no-handlers or timeout
//! reaches it first takes the callback; everything after finds it empty.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::message::Message;
use crate::reply::ReplyError;

/// Single-fire reply callback
pub type ReplyCallback = Box<dyn FnOnce(Result<Message, ReplyError>) + Send + 'static>;

pub(crate) struct PendingReply {
    /// Address the original message was sent to, for error context
    target: String,
    callback: Mutex<Option<ReplyCallback>>,
    timer: Mutex<Option<AbortHandle>>,
}

impl PendingReply {
    pub(crate) fn new(target: impl Into<String>, callback: ReplyCallback) -> Self {
        Self {
            target: target.into(),
            callback: Mutex::new(Some(callback)),
            timer: Mutex::new(None),
        }
    }

    pub(crate) fn target(&self) -> &str {
        &self.target
    }

    /// Claim the callback and disarm the timer; `None` once already claimed
    pub(crate) fn take(&self) -> Option<ReplyCallback> {
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        if let Some(timer) = self.timer.lock().unwrap_or_else(PoisonError::into_inner).take() {
            timer.abort();
        }
        Some(callback)
    }

    /// Attach the timeout timer, aborting it at once if the reply already won
    pub(crate) fn arm(&self, timer: AbortHandle) {
        let callback = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        if callback.is_none() {
            timer.abort();
            return;
        }
        *self.timer.lock().unwrap_or_else(PoisonError::into_inner) = Some(timer);
    }
}

/// Future form of a correlated send, returned by
/// [`Executor::request`](crate::Executor::request)
///
/// Resolves with the reply or the [`ReplyError`] that replaced it. If the
/// sending executor closes first the future resolves with a no-handlers
/// error instead of hanging.
pub struct ReplyFuture {
    rx: oneshot::Receiver<Result<Message, ReplyError>>,
    address: String,
}

impl ReplyFuture {
    pub(crate) fn new(rx: oneshot::Receiver<Result<Message, ReplyError>>, address: &str) -> Self {
        Self {
            rx,
            address: address.to_string(),
        }
    }

    /// Address the request was sent to
    pub fn address(&self) -> &str {
        &self.address
    }
}

impl Future for ReplyFuture {
    type Output = Result<Message, ReplyError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ReplyError::abandoned(&self.address))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for ReplyFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyFuture")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
