//! Bridge interception points
//!
//! Each hook sees one event-bus operation performed on behalf of a remote
//! peer. Boolean hooks veto the operation by returning false; an unset hook
//! allows it. Observers cannot veto.

use std::fmt;
use std::sync::Arc;

use courier_core::WireValue;

use super::socket::BridgeSocket;

type SocketHook = Arc<dyn Fn(&BridgeSocket) -> bool + Send + Sync>;
type SocketObserver = Arc<dyn Fn(&BridgeSocket) + Send + Sync>;
type SendOrPublishHook = Arc<dyn Fn(&BridgeSocket, bool, &WireValue, &str) -> bool + Send + Sync>;
type AddressHook = Arc<dyn Fn(&BridgeSocket, &str) -> bool + Send + Sync>;
type AddressObserver = Arc<dyn Fn(&BridgeSocket, &str) + Send + Sync>;
type AuthoriseHook = Arc<dyn Fn(&WireValue, &str, Authorisation) + Send + Sync>;

type AuthorisationCallback = Box<dyn FnOnce(Result<bool, String>) + Send>;

/// Pending answer to an authorisation query
///
/// Consumed by [`complete`](Self::complete), so the result is reported
/// exactly once. Dropping it unanswered reports a failure.
pub struct Authorisation {
    on_result: Option<AuthorisationCallback>,
}

impl Authorisation {
    pub(crate) fn new(on_result: impl FnOnce(Result<bool, String>) + Send + 'static) -> Self {
        Self {
            on_result: Some(Box::new(on_result)),
        }
    }

    pub fn complete(mut self, result: Result<bool, String>) {
        if let Some(on_result) = self.on_result.take() {
            on_result(result);
        }
    }

    pub fn allow(self) {
        self.complete(Ok(true));
    }

    pub fn deny(self) {
        self.complete(Ok(false));
    }

    pub fn fail(self, reason: impl Into<String>) {
        self.complete(Err(reason.into()));
    }
}

impl Drop for Authorisation {
    fn drop(&mut self) {
        if let Some(on_result) = self.on_result.take() {
            on_result(Err("authorisation dropped without a result".to_string()));
        }
    }
}

impl fmt::Debug for Authorisation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authorisation")
            .field("pending", &self.on_result.is_some())
            .finish()
    }
}

/// Hook set applied by an [`EventBusBridge`](super::EventBusBridge)
///
/// ```
/// use courier_bus::bridge::BridgeHooks;
///
/// let hooks = BridgeHooks::new()
///     .on_pre_register(|_socket, address| !address.starts_with("internal."))
///     .on_authorise(|_body, session_id, auth| {
///         if session_id == "trusted" { auth.allow() } else { auth.deny() }
///     });
/// ```
#[derive(Clone, Default)]
pub struct BridgeHooks {
    socket_created: Option<SocketHook>,
    socket_closed: Option<SocketObserver>,
    send_or_publish: Option<SendOrPublishHook>,
    pre_register: Option<AddressHook>,
    post_register: Option<AddressObserver>,
    unregister: Option<AddressHook>,
    authorise: Option<AuthoriseHook>,
}

impl BridgeHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Veto a new socket
    pub fn on_socket_created(mut self, f: impl Fn(&BridgeSocket) -> bool + Send + Sync + 'static) -> Self {
        self.socket_created = Some(Arc::new(f));
        self
    }

    pub fn on_socket_closed(mut self, f: impl Fn(&BridgeSocket) + Send + Sync + 'static) -> Self {
        self.socket_closed = Some(Arc::new(f));
        self
    }

    /// Veto a send (`true`) or publish (`false`) from a peer
    pub fn on_send_or_publish(
        mut self,
        f: impl Fn(&BridgeSocket, bool, &WireValue, &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.send_or_publish = Some(Arc::new(f));
        self
    }

    pub fn on_pre_register(mut self, f: impl Fn(&BridgeSocket, &str) -> bool + Send + Sync + 'static) -> Self {
        self.pre_register = Some(Arc::new(f));
        self
    }

    pub fn on_post_register(mut self, f: impl Fn(&BridgeSocket, &str) + Send + Sync + 'static) -> Self {
        self.post_register = Some(Arc::new(f));
        self
    }

    pub fn on_unregister(mut self, f: impl Fn(&BridgeSocket, &str) -> bool + Send + Sync + 'static) -> Self {
        self.unregister = Some(Arc::new(f));
        self
    }

    /// Take over authorisation
    ///
    /// The hook receives the message body, the peer's session id and the
    /// [`Authorisation`] to answer, now or later from any thread.
    pub fn on_authorise(
        mut self,
        f: impl Fn(&WireValue, &str, Authorisation) + Send + Sync + 'static,
    ) -> Self {
        self.authorise = Some(Arc::new(f));
        self
    }

    pub fn handle_socket_created(&self, socket: &BridgeSocket) -> bool {
        self.socket_created.as_ref().map_or(true, |f| f(socket))
    }

    pub fn handle_socket_closed(&self, socket: &BridgeSocket) {
        if let Some(f) = &self.socket_closed {
            f(socket);
        }
    }

    pub fn handle_send_or_publish(
        &self,
        socket: &BridgeSocket,
        is_send: bool,
        body: &WireValue,
        address: &str,
    ) -> bool {
        self.send_or_publish
            .as_ref()
            .map_or(true, |f| f(socket, is_send, body, address))
    }

    pub fn handle_pre_register(&self, socket: &BridgeSocket, address: &str) -> bool {
        self.pre_register.as_ref().map_or(true, |f| f(socket, address))
    }

    pub fn handle_post_register(&self, socket: &BridgeSocket, address: &str) {
        if let Some(f) = &self.post_register {
            f(socket, address);
        }
    }

    pub fn handle_unregister(&self, socket: &BridgeSocket, address: &str) -> bool {
        self.unregister.as_ref().map_or(true, |f| f(socket, address))
    }

    /// Hand `auth` to the authorise hook
    ///
    /// Gives `auth` back when no hook is installed, so the caller can fall
    /// back to its own check.
    pub fn handle_authorise(
        &self,
        body: &WireValue,
        session_id: &str,
        auth: Authorisation,
    ) -> Option<Authorisation> {
        match &self.authorise {
            Some(f) => {
                f(body, session_id, auth);
                None
            }
            None => Some(auth),
        }
    }

    pub fn has_authorise(&self) -> bool {
        self.authorise.is_some()
    }
}

impl fmt::Debug for BridgeHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeHooks")
            .field("socket_created", &self.socket_created.is_some())
            .field("socket_closed", &self.socket_closed.is_some())
            .field("send_or_publish", &self.send_or_publish.is_some())
            .field("pre_register", &self.pre_register.is_some())
            .field("post_register", &self.post_register.is_some())
            .field("unregister", &self.unregister.is_some())
            .field("authorise", &self.authorise.is_some())
            .finish()
    }
}
