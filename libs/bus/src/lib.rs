//! Courier Bus - address-based messaging between executors
//!
//! Handlers register on string addresses; senders reach them with
//! point-to-point sends, publishes, or correlated sends that expect exactly
//! one reply (or a [`ReplyError`]) within a timeout. All callbacks run on
//! the [`Executor`] that registered them, one at a time.
//!
//! # Example
//!
//! ```
//! use courier_bus::{EventBus, EventBusConfig};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = EventBus::new(EventBusConfig::default());
//! let server = bus.executor()?;
//! let client = bus.executor()?;
//!
//! server.register_handler("orders.place", false, |msg| {
//!     msg.reply(json!({ "accepted": true }))?;
//!     Ok(())
//! })?;
//!
//! let reply = client
//!     .request("orders.place", json!({ "item": 42 }), Some(Duration::from_secs(1)))?
//!     .await?;
//! assert_eq!(reply.body().get("accepted").and_then(|v| v.as_bool()), Some(true));
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod bus;
pub mod config;
pub mod correlator;
pub mod error;
pub mod executor;
pub mod message;
pub mod registry;
pub mod reply;

// Re-exports for convenience
pub use bus::EventBus;
pub use config::{BridgeConfig, EventBusConfig, PermittedOptions};
pub use correlator::{ReplyCallback, ReplyFuture};
pub use error::{Error, Result};
pub use executor::{Executor, ExecutorId};
pub use message::Message;
pub use registry::{HandlerId, HandlerRegistry};
pub use reply::{HandlerError, HandlerResult, ReplyError, ReplyFailure};

pub use courier_core::{FromWire, IntoWire, MarshalError, WireValue};
pub use courier_derive::handler;
