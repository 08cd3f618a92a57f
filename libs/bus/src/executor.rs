//! Single-threaded run contexts
//!
//! An [`Executor`] is one tokio task draining a FIFO job queue. Every
//! callback of a handler registered through an executor runs on that queue,
//! one at a time, so a unit of work never observes its own callbacks
//! concurrently. Different executors run in parallel.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use courier_core::IntoWire;

use crate::bus::EventBus;
use crate::correlator::ReplyFuture;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::registry::HandlerId;
use crate::reply::{HandlerResult, ReplyError};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutorId(u64);

impl ExecutorId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ExecutorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "executor-{}", self.0)
    }
}

/// Job queue of one executor, as held by registrations
#[derive(Clone)]
pub(crate) struct Mailbox {
    id: ExecutorId,
    jobs: mpsc::UnboundedSender<Job>,
    closed: Arc<AtomicBool>,
    runtime: Handle,
}

impl Mailbox {
    /// Start the executor loop on `runtime`
    pub(crate) fn spawn(id: ExecutorId, runtime: Handle) -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        let closed = Arc::new(AtomicBool::new(false));
        let stop = closed.clone();

        runtime.spawn(async move {
            while let Some(job) = rx.recv().await {
                if stop.load(Ordering::Acquire) {
                    break;
                }
                if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(job)) {
                    warn!(executor = %id, panic = %panic_message(&*panic), "executor job panicked");
                }
            }
            trace!(executor = %id, "executor loop stopped");
        });

        Self {
            id,
            jobs,
            closed,
            runtime,
        }
    }

    pub(crate) fn id(&self) -> ExecutorId {
        self.id
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Queue a job; false when the executor is gone
    pub(crate) fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        if self.is_closed() {
            return false;
        }
        self.jobs.send(Box::new(job)).is_ok()
    }

    /// Mark closed and wake the loop so it exits; false if already closed
    fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _ = self.jobs.send(Box::new(|| {}));
        true
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Handle to one executor on an [`EventBus`]
///
/// All bus operations go through an executor: handlers registered here run
/// here, and reply callbacks for sends made here run here. Cloning is cheap
/// and every clone refers to the same executor.
#[derive(Clone)]
pub struct Executor {
    bus: EventBus,
    mailbox: Mailbox,
}

impl Executor {
    pub(crate) fn from_parts(bus: EventBus, mailbox: Mailbox) -> Self {
        Self { bus, mailbox }
    }

    pub(crate) fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn id(&self) -> ExecutorId {
        self.mailbox.id()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    /// Run a closure on this executor, after everything already queued
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        if self.mailbox.post(job) {
            Ok(())
        } else {
            Err(Error::ExecutorClosed(self.id()))
        }
    }

    /// Register a handler for `address`
    ///
    /// Returns the identifier to pass to [`unregister_handler`](Self::unregister_handler).
    /// `local_only` handlers are never advertised to other nodes.
    pub fn register_handler<F>(
        &self,
        address: impl Into<String>,
        local_only: bool,
        handler: F,
    ) -> Result<HandlerId>
    where
        F: Fn(Message) -> HandlerResult + Send + Sync + 'static,
    {
        self.bus
            .register_from(&self.mailbox, Some(address.into()), local_only, Arc::new(handler))
    }

    /// Register a handler whose address is its own generated identifier
    ///
    /// Only code that is handed the returned id can reach the handler, which
    /// makes it a private inbox for this executor.
    pub fn register_simple_handler<F>(&self, local_only: bool, handler: F) -> Result<HandlerId>
    where
        F: Fn(Message) -> HandlerResult + Send + Sync + 'static,
    {
        self.bus
            .register_from(&self.mailbox, None, local_only, Arc::new(handler))
    }

    pub fn unregister_handler(&self, id: &HandlerId) -> Result<()> {
        self.bus.unregister(id)
    }

    /// Fire-and-forget point-to-point send
    pub fn send(&self, address: &str, body: impl IntoWire) -> Result<()> {
        self.bus.send_from(&self.mailbox, address, body.into_wire())
    }

    /// Point-to-point send expecting one reply within the default timeout
    pub fn send_with_reply<F>(&self, address: &str, body: impl IntoWire, on_reply: F) -> Result<()>
    where
        F: FnOnce(std::result::Result<Message, ReplyError>) + Send + 'static,
    {
        self.bus
            .request_from(&self.mailbox, address, body.into_wire(), None, Box::new(on_reply))
    }

    /// Point-to-point send expecting one reply within `timeout`
    pub fn send_with_timeout<F>(
        &self,
        address: &str,
        body: impl IntoWire,
        timeout: Duration,
        on_reply: F,
    ) -> Result<()>
    where
        F: FnOnce(std::result::Result<Message, ReplyError>) + Send + 'static,
    {
        self.bus.request_from(
            &self.mailbox,
            address,
            body.into_wire(),
            Some(timeout),
            Box::new(on_reply),
        )
    }

    /// Send expecting a reply, as a future
    ///
    /// `None` uses the bus default timeout.
    pub fn request(
        &self,
        address: &str,
        body: impl IntoWire,
        timeout: Option<Duration>,
    ) -> Result<ReplyFuture> {
        let (tx, rx) = oneshot::channel();
        self.bus.request_from(
            &self.mailbox,
            address,
            body.into_wire(),
            timeout,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        )?;
        Ok(ReplyFuture::new(rx, address))
    }

    /// Deliver to every handler registered for `address`
    pub fn publish(&self, address: &str, body: impl IntoWire) -> Result<()> {
        self.bus.publish_from(&self.mailbox, address, body.into_wire())
    }

    /// Tear the executor down
    ///
    /// Unregisters every handler owned by this executor, including pending
    /// reply handlers whose callbacks are then never invoked, and stops the
    /// loop. Returns how many registrations were removed.
    pub fn close(&self) -> usize {
        if !self.mailbox.shutdown() {
            return 0;
        }
        let removed = self.bus.release(self.id());
        debug!(executor = %self.id(), handlers = removed, "executor closed");
        removed
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("id", &self.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}
