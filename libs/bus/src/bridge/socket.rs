use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use courier_core::WireValue;

use crate::error::Result;
use crate::executor::Executor;
use crate::registry::HandlerId;

/// Outbound half of a remote peer's connection
///
/// Implemented by whatever transport carries the bridge to the peer.
pub trait SocketWriter: Send + Sync + 'static {
    fn write(&self, body: WireValue);

    fn close(&self) {}
}

/// A remote peer attached to the bus
///
/// Opening a socket registers a local-only simple handler that forwards
/// every body it receives to the writer. Code on any executor can write to
/// the peer by sending to [`write_handler_id`](Self::write_handler_id).
#[derive(Clone)]
pub struct BridgeSocket {
    inner: Arc<SocketInner>,
}

struct SocketInner {
    executor: Executor,
    session_id: String,
    write_handler_id: HandlerId,
    writer: Arc<dyn SocketWriter>,
    closed: AtomicBool,
}

impl BridgeSocket {
    pub fn open(
        executor: &Executor,
        session_id: impl Into<String>,
        writer: Arc<dyn SocketWriter>,
    ) -> Result<Self> {
        let forward = writer.clone();
        let write_handler_id = executor.register_simple_handler(true, move |msg| {
            forward.write(msg.into_body());
            Ok(())
        })?;
        let session_id = session_id.into();
        debug!(session = %session_id, handler_id = %write_handler_id, "bridge socket opened");

        Ok(Self {
            inner: Arc::new(SocketInner {
                executor: executor.clone(),
                session_id,
                write_handler_id,
                writer,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Address that forwards to this socket's writer
    pub fn write_handler_id(&self) -> &HandlerId {
        &self.inner.write_handler_id
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn executor(&self) -> &Executor {
        &self.inner.executor
    }

    pub fn write(&self, body: WireValue) {
        if !self.is_closed() {
            self.inner.writer.write(body);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Unregister the write handler and close the writer
    ///
    /// Returns false if the socket was already closed.
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Err(e) = self.inner.executor.unregister_handler(&self.inner.write_handler_id) {
            warn!(session = %self.inner.session_id, error = %e, "socket write handler already gone");
        }
        self.inner.writer.close();
        debug!(session = %self.inner.session_id, "bridge socket closed");
        true
    }
}

impl PartialEq for BridgeSocket {
    fn eq(&self, other: &Self) -> bool {
        self.inner.write_handler_id == other.inner.write_handler_id
    }
}

impl Eq for BridgeSocket {}

impl fmt::Debug for BridgeSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeSocket")
            .field("session_id", &self.inner.session_id)
            .field("write_handler_id", &self.inner.write_handler_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}
