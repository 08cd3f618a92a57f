//! Event bus bridge for remote peers
//!
//! An [`EventBusBridge`] performs bus operations on behalf of a
//! [`BridgeSocket`]. Every operation passes through the [`BridgeHooks`],
//! then the permitted-address rules, then authorisation when the matching
//! rule requires it. Successful authorisations are cached per session for
//! `auth_timeout_ms`.

mod hooks;
mod permitted;
mod socket;

pub use hooks::{Authorisation, BridgeHooks};
pub use socket::{BridgeSocket, SocketWriter};

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::{debug, warn};

use courier_core::{IntoWire, WireValue};

use crate::config::BridgeConfig;
use crate::error::Result;
use crate::registry::HandlerId;

use permitted::PermittedRules;

/// Why the bridge refused an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    SocketClosed,
    /// A hook returned false
    HookRejected,
    /// No permitted rule matches the address
    NotPermitted,
    /// The socket has no subscription for the address
    NotRegistered,
}

/// Result of a bridged operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// Performed on the bus
    Forwarded,
    /// Waiting on authorisation; performed only if it succeeds
    PendingAuthorisation,
    Denied(DenyReason),
}

impl BridgeOutcome {
    pub fn is_forwarded(&self) -> bool {
        matches!(self, BridgeOutcome::Forwarded)
    }
}

struct BridgeInner {
    config: BridgeConfig,
    hooks: BridgeHooks,
    inbound: PermittedRules,
    outbound: PermittedRules,
    /// session id -> authorisation expiry
    authorised: DashMap<String, Instant>,
    /// socket write handler -> (address, subscription handler)
    subscriptions: DashMap<HandlerId, Vec<(String, HandlerId)>>,
}

/// Applies hooks and permitted rules to bus traffic from remote peers
#[derive(Clone)]
pub struct EventBusBridge {
    inner: Arc<BridgeInner>,
}

impl EventBusBridge {
    /// Fails with a config error when a permitted `address_re` does not compile
    pub fn new(config: BridgeConfig, hooks: BridgeHooks) -> Result<Self> {
        let inbound = PermittedRules::compile(&config.inbound_permitted)?;
        let outbound = PermittedRules::compile(&config.outbound_permitted)?;
        Ok(Self {
            inner: Arc::new(BridgeInner {
                config,
                hooks,
                inbound,
                outbound,
                authorised: DashMap::new(),
                subscriptions: DashMap::new(),
            }),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn hooks(&self) -> &BridgeHooks {
        &self.inner.hooks
    }

    /// Admit a new socket; a vetoed socket is closed
    pub fn socket_created(&self, socket: &BridgeSocket) -> bool {
        if self.inner.hooks.handle_socket_created(socket) {
            debug!(session = socket.session_id(), "bridge socket admitted");
            return true;
        }
        debug!(session = socket.session_id(), "bridge socket rejected by hook");
        socket.close();
        false
    }

    /// Tear down everything the bridge holds for `socket`, then close it
    pub fn socket_closed(&self, socket: &BridgeSocket) {
        if let Some((_, subscriptions)) = self.inner.subscriptions.remove(socket.write_handler_id()) {
            for (address, id) in subscriptions {
                if let Err(e) = socket.executor().unregister_handler(&id) {
                    warn!(session = socket.session_id(), address = %address, error = %e, "subscription already gone");
                }
            }
        }
        self.inner.authorised.remove(socket.session_id());
        self.inner.hooks.handle_socket_closed(socket);
        socket.close();
    }

    pub fn send(&self, socket: &BridgeSocket, address: &str, body: impl IntoWire) -> BridgeOutcome {
        self.send_or_publish(socket, true, address, body.into_wire())
    }

    pub fn publish(&self, socket: &BridgeSocket, address: &str, body: impl IntoWire) -> BridgeOutcome {
        self.send_or_publish(socket, false, address, body.into_wire())
    }

    /// Send on behalf of `socket` and write the reply back to it
    ///
    /// Delivery failures are logged; the peer sees nothing.
    pub fn request(&self, socket: &BridgeSocket, address: &str, body: impl IntoWire) -> BridgeOutcome {
        let body = body.into_wire();
        let outcome = self.check_inbound(socket, true, address, &body);
        if outcome != BridgeOutcome::Forwarded {
            return outcome;
        }
        let requires_auth = self.inbound_requires_auth(address);
        let address_owned = address.to_string();
        self.with_authorisation(socket, requires_auth, body, move |socket, body| {
            let reply_to = socket.clone();
            let result = socket.executor().send_with_reply(&address_owned, body, move |reply| match reply {
                Ok(msg) => reply_to.write(msg.into_body()),
                Err(e) => debug!(session = reply_to.session_id(), error = %e, "bridged request got no reply"),
            });
            if let Err(e) = result {
                warn!(session = socket.session_id(), address = %address_owned, error = %e, "bridged request failed");
            }
        })
    }

    pub fn send_or_publish(
        &self,
        socket: &BridgeSocket,
        is_send: bool,
        address: &str,
        body: WireValue,
    ) -> BridgeOutcome {
        let outcome = self.check_inbound(socket, is_send, address, &body);
        if outcome != BridgeOutcome::Forwarded {
            return outcome;
        }
        let requires_auth = self.inbound_requires_auth(address);
        let address_owned = address.to_string();
        self.with_authorisation(socket, requires_auth, body, move |socket, body| {
            let result = if is_send {
                socket.executor().send(&address_owned, body)
            } else {
                socket.executor().publish(&address_owned, body)
            };
            if let Err(e) = result {
                warn!(session = socket.session_id(), address = %address_owned, error = %e, "bridged message failed");
            }
        })
    }

    /// Subscribe `socket` to `address`; matching messages are written to it
    pub fn register(&self, socket: &BridgeSocket, address: &str) -> BridgeOutcome {
        if socket.is_closed() {
            return BridgeOutcome::Denied(DenyReason::SocketClosed);
        }
        if !self.inner.hooks.handle_pre_register(socket, address) {
            return BridgeOutcome::Denied(DenyReason::HookRejected);
        }
        let Some(rule) = self.inner.outbound.find(address) else {
            debug!(session = socket.session_id(), address, "register not permitted");
            return BridgeOutcome::Denied(DenyReason::NotPermitted);
        };
        let requires_auth = rule.requires_auth();

        let bridge = self.clone();
        let address_owned = address.to_string();
        self.with_authorisation(socket, requires_auth, WireValue::Null, move |socket, _| {
            bridge.subscribe(socket, &address_owned);
        })
    }

    /// Drop the socket's subscriptions for `address`
    pub fn unregister(&self, socket: &BridgeSocket, address: &str) -> BridgeOutcome {
        if !self.inner.hooks.handle_unregister(socket, address) {
            return BridgeOutcome::Denied(DenyReason::HookRejected);
        }
        let removed: Vec<HandlerId> = match self.inner.subscriptions.get_mut(socket.write_handler_id()) {
            Some(mut subscriptions) => {
                let (gone, kept): (Vec<_>, Vec<_>) =
                    subscriptions.drain(..).partition(|(a, _)| a == address);
                *subscriptions = kept;
                gone.into_iter().map(|(_, id)| id).collect()
            }
            None => Vec::new(),
        };
        if removed.is_empty() {
            return BridgeOutcome::Denied(DenyReason::NotRegistered);
        }
        for id in &removed {
            if let Err(e) = socket.executor().unregister_handler(id) {
                warn!(session = socket.session_id(), address, error = %e, "subscription already gone");
            }
        }
        debug!(session = socket.session_id(), address, "socket unsubscribed");
        BridgeOutcome::Forwarded
    }

    /// Whether `session_id` holds an unexpired authorisation
    pub fn is_authorised(&self, session_id: &str) -> bool {
        let expiry = self.inner.authorised.get(session_id).map(|entry| *entry);
        match expiry {
            Some(expiry) if expiry > Instant::now() => true,
            Some(_) => {
                self.inner.authorised.remove(session_id);
                false
            }
            None => false,
        }
    }

    /// Addresses `socket` is currently subscribed to
    pub fn subscriptions(&self, socket: &BridgeSocket) -> Vec<String> {
        self.inner
            .subscriptions
            .get(socket.write_handler_id())
            .map(|subs| subs.iter().map(|(address, _)| address.clone()).collect())
            .unwrap_or_default()
    }

    fn check_inbound(&self, socket: &BridgeSocket, is_send: bool, address: &str, body: &WireValue) -> BridgeOutcome {
        if socket.is_closed() {
            return BridgeOutcome::Denied(DenyReason::SocketClosed);
        }
        if !self.inner.hooks.handle_send_or_publish(socket, is_send, body, address) {
            return BridgeOutcome::Denied(DenyReason::HookRejected);
        }
        if self.inner.inbound.find(address).is_none() {
            debug!(session = socket.session_id(), address, "inbound message not permitted");
            return BridgeOutcome::Denied(DenyReason::NotPermitted);
        }
        BridgeOutcome::Forwarded
    }

    fn inbound_requires_auth(&self, address: &str) -> bool {
        self.inner
            .inbound
            .find(address)
            .is_some_and(|rule| rule.requires_auth())
    }

    fn subscribe(&self, socket: &BridgeSocket, address: &str) {
        if socket.is_closed() {
            return;
        }
        let target = socket.clone();
        let registered = socket.executor().register_handler(address, true, move |msg| {
            target.write(msg.into_body());
            Ok(())
        });
        match registered {
            Ok(id) => {
                self.inner
                    .subscriptions
                    .entry(socket.write_handler_id().clone())
                    .or_default()
                    .push((address.to_string(), id));
                debug!(session = socket.session_id(), address, "socket subscribed");
                self.inner.hooks.handle_post_register(socket, address);
            }
            Err(e) => warn!(session = socket.session_id(), address, error = %e, "socket subscription failed"),
        }
    }

    /// Run `then` now, or once the socket's session is authorised
    fn with_authorisation<F>(&self, socket: &BridgeSocket, requires_auth: bool, body: WireValue, then: F) -> BridgeOutcome
    where
        F: FnOnce(&BridgeSocket, WireValue) + Send + 'static,
    {
        if !requires_auth || self.is_authorised(socket.session_id()) {
            then(socket, body);
            return BridgeOutcome::Forwarded;
        }

        let bridge = self.clone();
        let target = socket.clone();
        let auth_body = body.clone();
        let auth = Authorisation::new(move |result| match result {
            Ok(true) => {
                let expiry = Instant::now() + bridge.inner.config.auth_timeout();
                bridge
                    .inner
                    .authorised
                    .insert(target.session_id().to_string(), expiry);
                then(&target, body);
            }
            Ok(false) => debug!(session = target.session_id(), "authorisation denied"),
            Err(e) => warn!(session = target.session_id(), error = %e, "authorisation failed"),
        });

        if let Some(auth) = self.inner.hooks.handle_authorise(&auth_body, socket.session_id(), auth) {
            self.authorise_via_bus(socket, auth);
        }
        BridgeOutcome::PendingAuthorisation
    }

    /// Ask the handler on `auth_address` whether the session is valid
    ///
    /// Expects a reply map with `"status": "ok"`.
    fn authorise_via_bus(&self, socket: &BridgeSocket, auth: Authorisation) {
        let query = serde_json::json!({ "sessionID": socket.session_id() });
        let result = socket
            .executor()
            .send_with_reply(&self.inner.config.auth_address, query, move |reply| match reply {
                Ok(msg) => {
                    let ok = msg.body().get("status").and_then(WireValue::as_str) == Some("ok");
                    auth.complete(Ok(ok));
                }
                Err(e) => auth.fail(e.to_string()),
            });
        // On a synchronous error the closure, and the Authorisation in it,
        // has been dropped, which reports the failure.
        if let Err(e) = result {
            debug!(session = socket.session_id(), error = %e, "authorisation request not sent");
        }
    }
}

impl std::fmt::Debug for EventBusBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBusBridge")
            .field("hooks", &self.inner.hooks)
            .field("sessions", &self.inner.authorised.len())
            .field("sockets", &self.inner.subscriptions.len())
            .finish()
    }
}
