//! Dispatcher
//!
//! [`EventBus`] owns the handler registry and routes messages to the
//! executors that own the matching handlers. Routing never runs user code
//! inline: it posts a job onto the owning executor and returns.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use courier_core::{Envelope, Failure, MarshalError, WireValue};

use crate::config::EventBusConfig;
use crate::correlator::{PendingReply, ReplyCallback};
use crate::error::{Error, Result};
use crate::executor::{panic_message, Executor, ExecutorId, Mailbox};
use crate::message::Message;
use crate::registry::{Callback, HandlerFn, HandlerId, HandlerRegistry, Registration};
use crate::reply::{HandlerError, ReplyError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// One handler, round-robin
    Send,
    /// Every handler
    Publish,
}

struct BusInner {
    registry: HandlerRegistry,
    default_reply_timeout_ms: AtomicU64,
    strict_marshalling: bool,
    next_executor: AtomicU64,
}

/// An in-process event bus
///
/// Cheap to clone; every clone is the same bus. All messaging goes through
/// an [`Executor`] obtained from [`EventBus::executor`].
///
/// ```
/// use courier_bus::{EventBus, EventBusConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let bus = EventBus::new(EventBusConfig::default());
/// let executor = bus.executor().unwrap();
///
/// executor
///     .register_handler("greeter", false, |msg| {
///         let name: String = msg.body_as()?;
///         msg.reply(format!("hello {name}"))?;
///         Ok(())
///     })
///     .unwrap();
///
/// let reply = executor.request("greeter", "courier", None).unwrap().await.unwrap();
/// assert_eq!(reply.body().as_str(), Some("hello courier"));
/// # }
/// ```
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                registry: HandlerRegistry::new(),
                default_reply_timeout_ms: AtomicU64::new(config.default_reply_timeout_ms),
                strict_marshalling: config.strict_marshalling,
                next_executor: AtomicU64::new(1),
            }),
        }
    }

    /// Start a new executor on the current Tokio runtime
    pub fn executor(&self) -> Result<Executor> {
        let runtime = Handle::try_current().map_err(|e| Error::NoRuntime(e.to_string()))?;
        let id = ExecutorId::new(self.inner.next_executor.fetch_add(1, Ordering::Relaxed));
        debug!(executor = %id, "executor started");
        Ok(Executor::from_parts(self.clone(), Mailbox::spawn(id, runtime)))
    }

    /// Timeout for correlated sends that do not pass one
    pub fn default_reply_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.default_reply_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_default_reply_timeout(&self, timeout: Duration) {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.inner
            .default_reply_timeout_ms
            .store(millis, Ordering::Relaxed);
    }

    pub fn is_strict(&self) -> bool {
        self.inner.strict_marshalling
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    pub fn handler_count(&self, address: &str) -> usize {
        self.inner.registry.handler_count(address)
    }

    /// Addresses a clustering transport would advertise for this node
    pub fn cluster_addresses(&self) -> Vec<String> {
        self.inner.registry.cluster_addresses()
    }

    pub(crate) fn register_from(
        &self,
        mailbox: &Mailbox,
        address: Option<String>,
        local_only: bool,
        handler: HandlerFn,
    ) -> Result<HandlerId> {
        ensure_open(mailbox)?;
        let callback = Callback::Handler(handler);
        let id = match address {
            Some(address) if address.is_empty() => return Err(Error::MissingAddress),
            Some(address) => self
                .inner
                .registry
                .register(address, local_only, mailbox.clone(), callback),
            None => self
                .inner
                .registry
                .register_simple(local_only, mailbox.clone(), callback),
        };
        debug!(handler_id = %id, executor = %mailbox.id(), local_only, "handler registered");
        Ok(id)
    }

    pub(crate) fn unregister(&self, id: &HandlerId) -> Result<()> {
        let registration = self.inner.registry.unregister(id)?;
        if let Callback::Reply(pending) = &registration.callback {
            drop(pending.take());
        }
        debug!(handler_id = %id, address = %registration.address, "handler unregistered");
        Ok(())
    }

    /// Drop every registration owned by a closing executor
    ///
    /// Pending reply callbacks are discarded unrun and their timers aborted.
    pub(crate) fn release(&self, executor: ExecutorId) -> usize {
        let removed = self.inner.registry.remove_owned(executor);
        for registration in &removed {
            if let Callback::Reply(pending) = &registration.callback {
                drop(pending.take());
            }
        }
        removed.len()
    }

    pub(crate) fn send_from(&self, mailbox: &Mailbox, address: &str, body: WireValue) -> Result<()> {
        self.check_outgoing(mailbox, address, &body)?;
        if self.deliver(Envelope::new(address, body), Mode::Send) == 0 {
            trace!(address, "no handlers, message dropped");
        }
        Ok(())
    }

    pub(crate) fn publish_from(&self, mailbox: &Mailbox, address: &str, body: WireValue) -> Result<()> {
        self.check_outgoing(mailbox, address, &body)?;
        let delivered = self.deliver(Envelope::new(address, body), Mode::Publish);
        trace!(address, delivered, "published");
        Ok(())
    }

    pub(crate) fn request_from(
        &self,
        mailbox: &Mailbox,
        address: &str,
        body: WireValue,
        timeout: Option<Duration>,
        on_reply: ReplyCallback,
    ) -> Result<()> {
        self.check_outgoing(mailbox, address, &body)?;
        self.correlate(mailbox, Envelope::new(address, body), timeout, on_reply);
        Ok(())
    }

    /// Send a reply, optionally correlated; a `Null` reply body is allowed
    pub(crate) fn reply_from(
        &self,
        mailbox: &Mailbox,
        reply_address: &str,
        body: WireValue,
        correlation: Option<(Option<Duration>, ReplyCallback)>,
    ) -> Result<()> {
        ensure_open(mailbox)?;
        self.check_marshalling(&body)?;
        let envelope = Envelope::new(reply_address, body);
        match correlation {
            Some((timeout, on_reply)) => self.correlate(mailbox, envelope, timeout, on_reply),
            None => {
                if self.deliver(envelope, Mode::Send) == 0 {
                    trace!(reply_address, "reply dropped, sender no longer waiting");
                }
            }
        }
        Ok(())
    }

    pub(crate) fn fail_from(&self, mailbox: &Mailbox, reply_address: &str, failure: Failure) -> Result<()> {
        ensure_open(mailbox)?;
        self.deliver(Envelope::failure(reply_address, failure), Mode::Send);
        Ok(())
    }

    fn check_outgoing(&self, mailbox: &Mailbox, address: &str, body: &WireValue) -> Result<()> {
        ensure_open(mailbox)?;
        if address.is_empty() {
            return Err(Error::MissingAddress);
        }
        if body.is_null() {
            return Err(Error::MissingBody);
        }
        self.check_marshalling(body)
    }

    fn check_marshalling(&self, body: &WireValue) -> Result<()> {
        if !self.inner.strict_marshalling {
            return Ok(());
        }
        match body.find_opaque() {
            Some(opaque) => Err(MarshalError::Opaque {
                type_name: opaque.type_name(),
            }
            .into()),
            None => Ok(()),
        }
    }

    /// Register a one-shot reply handler on `mailbox` and send `envelope`
    /// with it as the reply address
    fn correlate(
        &self,
        mailbox: &Mailbox,
        envelope: Envelope,
        timeout: Option<Duration>,
        on_reply: ReplyCallback,
    ) {
        let target = envelope.address.clone();
        let pending = Arc::new(PendingReply::new(target.as_str(), on_reply));
        let reply_id = self.inner.registry.register_simple(
            true,
            mailbox.clone(),
            Callback::Reply(pending.clone()),
        );
        let envelope = envelope.with_reply_address(reply_id.as_str());

        if self.deliver(envelope, Mode::Send) == 0 {
            let _ = self.inner.registry.unregister(&reply_id);
            if let Some(on_reply) = pending.take() {
                debug!(address = %target, "no handlers for correlated send");
                let error = ReplyError::no_handlers(&target);
                if !mailbox.post(move || on_reply(Err(error))) {
                    warn!(executor = %mailbox.id(), "executor closed before no-handlers delivery");
                }
            }
            return;
        }

        let timeout = timeout.unwrap_or_else(|| self.default_reply_timeout());
        let bus = self.clone();
        let owner = mailbox.clone();
        let expiring = pending.clone();
        let timer = mailbox.runtime().spawn(async move {
            tokio::time::sleep(timeout).await;
            let job_owner = owner.clone();
            let _ = owner.post(move || bus.expire(&reply_id, &expiring, &job_owner));
        });
        pending.arm(timer.abort_handle());
    }

    /// Timer fired; runs on the correlating executor
    fn expire(&self, reply_id: &HandlerId, pending: &PendingReply, owner: &Mailbox) {
        let _ = self.inner.registry.unregister(reply_id);
        if let Some(on_reply) = pending.take() {
            debug!(address = pending.target(), executor = %owner.id(), "reply timed out");
            on_reply(Err(ReplyError::timeout(pending.target())));
        }
    }

    /// Route to the live handlers for the envelope's address
    ///
    /// Returns how many executors accepted the delivery.
    fn deliver(&self, envelope: Envelope, mode: Mode) -> usize {
        let targets = match mode {
            Mode::Send => self
                .inner
                .registry
                .select_one(&envelope.address)
                .into_iter()
                .collect(),
            Mode::Publish => self.inner.registry.select_all(&envelope.address),
        };

        let mut delivered = 0;
        for registration in targets {
            let mailbox = registration.mailbox.clone();
            let bus = self.clone();
            let job_envelope = envelope.clone();
            if mailbox.post(move || bus.invoke(registration, job_envelope)) {
                delivered += 1;
            } else {
                warn!(executor = %mailbox.id(), address = %envelope.address, "delivery to closed executor dropped");
            }
        }
        delivered
    }

    /// Run one delivery on the owning executor
    fn invoke(&self, registration: Registration, envelope: Envelope) {
        match &registration.callback {
            Callback::Reply(pending) => self.complete_reply(&registration, pending, envelope),
            Callback::Handler(handler) => {
                if !self.inner.registry.contains(&registration.id) {
                    trace!(handler_id = %registration.id, "handler unregistered before delivery");
                    return;
                }
                trace!(handler_id = %registration.id, address = %registration.address, "delivering");

                let reply_address = envelope.reply_address.clone();
                let executor = Executor::from_parts(self.clone(), registration.mailbox.clone());
                let message = Message::new(envelope, executor);

                let failure = match panic::catch_unwind(AssertUnwindSafe(|| handler(message))) {
                    Ok(Ok(())) => return,
                    Ok(Err(err)) => err.into_failure(),
                    Err(panic) => Failure {
                        code: HandlerError::DEFAULT_CODE,
                        message: panic_message(&*panic),
                    },
                };
                warn!(
                    handler_id = %registration.id,
                    address = %registration.address,
                    code = failure.code,
                    error = %failure.message,
                    "handler failed"
                );
                if let Some(reply_address) = reply_address {
                    self.deliver(Envelope::failure(reply_address, failure), Mode::Send);
                }
            }
        }
    }

    fn complete_reply(&self, registration: &Registration, pending: &PendingReply, mut envelope: Envelope) {
        let _ = self.inner.registry.unregister(&registration.id);
        let Some(on_reply) = pending.take() else {
            trace!(address = %registration.address, "late reply dropped");
            return;
        };
        let result = match envelope.failure.take() {
            Some(failure) => Err(ReplyError::recipient(failure)),
            None => Ok(Message::new(
                envelope,
                Executor::from_parts(self.clone(), registration.mailbox.clone()),
            )),
        };
        on_reply(result);
    }
}

fn ensure_open(mailbox: &Mailbox) -> Result<()> {
    if mailbox.is_closed() {
        Err(Error::ExecutorClosed(mailbox.id()))
    } else {
        Ok(())
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.inner.registry.len())
            .field("default_reply_timeout", &self.default_reply_timeout())
            .field("strict_marshalling", &self.inner.strict_marshalling)
            .finish()
    }
}
