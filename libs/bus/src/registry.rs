//! Handler registry
//!
//! Maps handler identifiers to `(address, callback)` pairs and addresses to
//! their live handlers. It is the only structure shared by every executor,
//! so all mutations go through one mutex. Callbacks are never invoked while
//! the lock is held; the registry only hands out cloned registrations.
//!
//! ## Rules
//! - Identifiers are UUID v4 strings, unique for the registry's lifetime.
//! - Dispatch is by address; lookup by identifier is only for removal.
//! - Unregistering an unknown identifier is an error, never a no-op.
//! - `send` picks one handler per address in round-robin registration order.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::correlator::PendingReply;
use crate::error::{Error, Result};
use crate::executor::{ExecutorId, Mailbox};
use crate::message::Message;
use crate::reply::HandlerResult;

pub(crate) type HandlerFn = Arc<dyn Fn(Message) -> HandlerResult + Send + Sync>;

/// Opaque identifier of a registration
///
/// Hand it back verbatim to unregister. For simple handlers it is also the
/// handler's address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandlerId(String);

impl HandlerId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for HandlerId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

#[derive(Clone)]
pub(crate) enum Callback {
    Handler(HandlerFn),
    /// Transient one-shot handler created for a correlated send
    Reply(Arc<PendingReply>),
}

#[derive(Clone)]
pub(crate) struct Registration {
    pub(crate) id: HandlerId,
    pub(crate) address: String,
    pub(crate) local_only: bool,
    pub(crate) mailbox: Mailbox,
    pub(crate) callback: Callback,
}

#[derive(Default)]
struct AddressEntry {
    handlers: Vec<HandlerId>,
    cursor: usize,
}

#[derive(Default)]
struct RegistryState {
    by_id: HashMap<HandlerId, Registration>,
    by_address: HashMap<String, AddressEntry>,
}

impl RegistryState {
    fn insert(&mut self, registration: Registration) {
        self.by_address
            .entry(registration.address.clone())
            .or_default()
            .handlers
            .push(registration.id.clone());
        self.by_id.insert(registration.id.clone(), registration);
    }

    fn remove(&mut self, id: &HandlerId) -> Option<Registration> {
        let registration = self.by_id.remove(id)?;
        if let Some(entry) = self.by_address.get_mut(&registration.address) {
            if let Some(pos) = entry.handlers.iter().position(|h| h == id) {
                entry.handlers.remove(pos);
                if pos < entry.cursor {
                    entry.cursor -= 1;
                }
            }
            if entry.handlers.is_empty() {
                self.by_address.remove(&registration.address);
            } else if entry.cursor >= entry.handlers.len() {
                entry.cursor = 0;
            }
        }
        Some(registration)
    }
}

/// Process-wide table of live handlers, owned by an [`EventBus`](crate::EventBus)
#[derive(Default)]
pub struct HandlerRegistry {
    state: Mutex<RegistryState>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(
        &self,
        address: String,
        local_only: bool,
        mailbox: Mailbox,
        callback: Callback,
    ) -> HandlerId {
        let id = HandlerId::generate();
        self.state().insert(Registration {
            id: id.clone(),
            address,
            local_only,
            mailbox,
            callback,
        });
        id
    }

    /// Register with the generated identifier doubling as the address
    pub(crate) fn register_simple(
        &self,
        local_only: bool,
        mailbox: Mailbox,
        callback: Callback,
    ) -> HandlerId {
        let id = HandlerId::generate();
        self.state().insert(Registration {
            id: id.clone(),
            address: id.to_string(),
            local_only,
            mailbox,
            callback,
        });
        id
    }

    /// Remove a registration, returning it
    pub(crate) fn unregister(&self, id: &HandlerId) -> Result<Registration> {
        self.state()
            .remove(id)
            .ok_or_else(|| Error::UnknownHandler(id.clone()))
    }

    /// Remove every registration owned by `executor`
    pub(crate) fn remove_owned(&self, executor: ExecutorId) -> Vec<Registration> {
        let mut state = self.state();
        let owned: Vec<HandlerId> = state
            .by_id
            .values()
            .filter(|r| r.mailbox.id() == executor)
            .map(|r| r.id.clone())
            .collect();
        owned.iter().filter_map(|id| state.remove(id)).collect()
    }

    /// Next handler for a point-to-point send
    pub(crate) fn select_one(&self, address: &str) -> Option<Registration> {
        let mut state = self.state();
        let state = &mut *state;
        let entry = state.by_address.get_mut(address)?;
        let id = entry.handlers.get(entry.cursor)?.clone();
        entry.cursor = (entry.cursor + 1) % entry.handlers.len();
        state.by_id.get(&id).cloned()
    }

    /// Every handler for a publish, in registration order
    pub(crate) fn select_all(&self, address: &str) -> Vec<Registration> {
        let state = self.state();
        state
            .by_address
            .get(address)
            .map(|entry| {
                entry
                    .handlers
                    .iter()
                    .filter_map(|id| state.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn contains(&self, id: &HandlerId) -> bool {
        self.state().by_id.contains_key(id)
    }

    /// Address a registration listens on
    pub fn address_of(&self, id: &HandlerId) -> Option<String> {
        self.state().by_id.get(id).map(|r| r.address.clone())
    }

    pub fn handler_count(&self, address: &str) -> usize {
        self.state()
            .by_address
            .get(address)
            .map_or(0, |entry| entry.handlers.len())
    }

    /// Sorted addresses with at least one live handler
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.state().by_address.keys().cloned().collect();
        addresses.sort_unstable();
        addresses
    }

    /// Sorted addresses with at least one handler that is not local-only
    ///
    /// This is the set a clustering transport would advertise to other nodes.
    pub fn cluster_addresses(&self) -> Vec<String> {
        let state = self.state();
        let mut addresses: Vec<String> = state
            .by_address
            .iter()
            .filter(|(_, entry)| {
                entry
                    .handlers
                    .iter()
                    .any(|id| state.by_id.get(id).is_some_and(|r| !r.local_only))
            })
            .map(|(address, _)| address.clone())
            .collect();
        addresses.sort_unstable();
        addresses
    }

    pub fn len(&self) -> usize {
        self.state().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::runtime::Handle;

    fn mailbox(raw: u64) -> Mailbox {
        Mailbox::spawn(ExecutorId::new(raw), Handle::current())
    }

    fn noop() -> Callback {
        Callback::Handler(Arc::new(|_| Ok(())))
    }

    #[tokio::test]
    async fn register_and_unregister() {
        let registry = HandlerRegistry::new();
        let id = registry.register("addr".into(), false, mailbox(1), noop());

        assert!(registry.contains(&id));
        assert_eq!(registry.handler_count("addr"), 1);
        assert_eq!(registry.address_of(&id).as_deref(), Some("addr"));

        let removed = registry.unregister(&id).unwrap();
        assert_eq!(removed.address, "addr");
        assert_eq!(registry.handler_count("addr"), 0);
        assert!(registry.addresses().is_empty());
    }

    #[tokio::test]
    async fn second_unregister_fails() {
        let registry = HandlerRegistry::new();
        let id = registry.register("addr".into(), false, mailbox(1), noop());

        registry.unregister(&id).unwrap();
        assert!(matches!(
            registry.unregister(&id),
            Err(Error::UnknownHandler(unknown)) if unknown == id
        ));
    }

    #[tokio::test]
    async fn simple_handler_address_is_its_id() {
        let registry = HandlerRegistry::new();
        let id = registry.register_simple(true, mailbox(1), noop());

        assert_eq!(registry.address_of(&id).as_deref(), Some(id.as_str()));
        assert_eq!(registry.handler_count(id.as_str()), 1);
        assert!(Uuid::parse_str(id.as_str()).is_ok());
    }

    #[tokio::test]
    async fn select_one_round_robins() {
        let registry = HandlerRegistry::new();
        let a = registry.register("addr".into(), false, mailbox(1), noop());
        let b = registry.register("addr".into(), false, mailbox(1), noop());
        let c = registry.register("addr".into(), false, mailbox(1), noop());

        let picks: Vec<HandlerId> = (0..6)
            .map(|_| registry.select_one("addr").unwrap().id)
            .collect();
        assert_eq!(picks, vec![a.clone(), b.clone(), c.clone(), a.clone(), b.clone(), c.clone()]);

        // Removing the handler under the cursor moves on to the next one
        assert_eq!(registry.select_one("addr").unwrap().id, a);
        registry.unregister(&b).unwrap();
        assert_eq!(registry.select_one("addr").unwrap().id, c);
        assert_eq!(registry.select_one("addr").unwrap().id, a);
        assert!(registry.select_one("missing").is_none());
    }

    #[tokio::test]
    async fn remove_owned_only_touches_that_executor() {
        let registry = HandlerRegistry::new();
        let mine = mailbox(1);
        let theirs = mailbox(2);
        registry.register("addr".into(), false, mine.clone(), noop());
        registry.register_simple(true, mine, noop());
        let kept = registry.register("addr".into(), false, theirs, noop());

        let removed = registry.remove_owned(ExecutorId::new(1));
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.select_all("addr").len(), 1);
        assert!(registry.contains(&kept));
    }

    #[tokio::test]
    async fn cluster_addresses_skip_local_only() {
        let registry = HandlerRegistry::new();
        registry.register("shared".into(), false, mailbox(1), noop());
        registry.register("shared".into(), true, mailbox(1), noop());
        registry.register("private".into(), true, mailbox(1), noop());

        assert_eq!(registry.addresses(), vec!["private".to_string(), "shared".to_string()]);
        assert_eq!(registry.cluster_addresses(), vec!["shared".to_string()]);
    }
}
