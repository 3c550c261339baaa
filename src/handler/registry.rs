//! Handler registry for dispatching notifications by command id.
//!
//! # Example
//!
//! ```
//! use altcom_rpc::handler::HandlerRegistry;
//! use altcom_rpc::protocol::InboundFrame;
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register(0x0401, "network_event", |frame: InboundFrame| async move {
//!     frame.release();
//! });
//!
//! assert!(registry.contains(0x0401));
//! assert_eq!(registry.name(0x0401), Some("network_event"));
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::protocol::InboundFrame;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A notification handler.
///
/// The handler owns the frame it receives and must release it (dropping it
/// also releases).
pub trait NotificationHandler: Send + Sync + 'static {
    /// Process one notification frame.
    fn handle(&self, frame: InboundFrame) -> BoxFuture<'static, ()>;
}

impl<F, Fut> NotificationHandler for F
where
    F: Fn(InboundFrame) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn handle(&self, frame: InboundFrame) -> BoxFuture<'static, ()> {
        Box::pin((self)(frame))
    }
}

/// A registered handler with the name used in logs.
#[derive(Clone)]
pub struct HandlerEntry {
    name: String,
    handler: Arc<dyn NotificationHandler>,
}

impl HandlerEntry {
    /// Name given at registration.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the handler on `frame`.
    pub fn handle(&self, frame: InboundFrame) -> BoxFuture<'static, ()> {
        self.handler.handle(frame)
    }
}

impl std::fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerEntry").field("name", &self.name).finish()
    }
}

/// Registry mapping command ids to notification handlers.
#[derive(Default, Clone, Debug)]
pub struct HandlerRegistry {
    handlers: HashMap<u16, HandlerEntry>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `command_id`, replacing any previous one.
    pub fn register<H>(&mut self, command_id: u16, name: &str, handler: H)
    where
        H: NotificationHandler,
    {
        self.register_arc(command_id, name, Arc::new(handler));
    }

    /// Register an already shared handler.
    pub fn register_arc(
        &mut self,
        command_id: u16,
        name: &str,
        handler: Arc<dyn NotificationHandler>,
    ) {
        let previous = self.handlers.insert(
            command_id,
            HandlerEntry {
                name: name.to_string(),
                handler,
            },
        );
        if let Some(previous) = previous {
            tracing::debug!(
                command_id,
                replaced = previous.name(),
                name,
                "replaced notification handler"
            );
        }
    }

    /// Handler for `command_id`.
    pub fn get(&self, command_id: u16) -> Option<&HandlerEntry> {
        self.handlers.get(&command_id)
    }

    /// Name of the handler for `command_id`.
    pub fn name(&self, command_id: u16) -> Option<&str> {
        self.handlers.get(&command_id).map(HandlerEntry::name)
    }

    /// True if a handler is registered for `command_id`.
    pub fn contains(&self, command_id: u16) -> bool {
        self.handlers.contains_key(&command_id)
    }

    /// Registered command ids, ascending.
    pub fn command_ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.handlers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
