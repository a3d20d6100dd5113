//! Pooling handler factory.

use super::{HandlerRegistry, HandlerResolver, HandlerSource, MessageHandler};
use crate::errors::{PreconditionError, Result};
use crate::message::TransportMessage;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

/// A released handler waiting for reuse.
struct PooledHandler {
    handler: Arc<dyn MessageHandler>,
    /// Captured when the handler was released.
    message_types: Vec<String>,
}

impl PooledHandler {
    /// Only single-capability handlers are matched.
    fn services(&self, message_type: &str) -> bool {
        matches!(self.message_types.as_slice(), [only] if only == message_type)
    }
}

fn same_instance(a: &Arc<dyn MessageHandler>, b: &Arc<dyn MessageHandler>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

/// Supplies handlers for messages and recycles reusable ones.
///
/// The pool is the only structure shared between inbox workers. Lookup with
/// removal and insertion both happen under one mutex that is never held while
/// a handler is created or runs.
pub struct HandlerFactory {
    resolver: Arc<dyn HandlerResolver>,
    released: Mutex<Vec<PooledHandler>>,
}

impl HandlerFactory {
    /// Creates a factory that resolves new handlers through `resolver`.
    #[must_use]
    pub fn new(resolver: Arc<dyn HandlerResolver>) -> Self {
        Self {
            resolver,
            released: Mutex::new(Vec::new()),
        }
    }

    /// Creates a factory backed by a registration map.
    #[must_use]
    pub fn with_registry(registry: HandlerRegistry) -> Self {
        Self::new(Arc::new(registry))
    }

    /// Returns a handler for the message.
    ///
    /// A pooled instance whose single declared type matches is preferred;
    /// otherwise the resolver creates one. `Ok(None)` means no handler is
    /// registered for the message type.
    ///
    /// # Errors
    ///
    /// Returns a precondition error if the message carries no type.
    pub fn get_handler(
        &self,
        message: &TransportMessage,
    ) -> Result<Option<Arc<dyn MessageHandler>>> {
        let message_type = message.message_type.as_str();
        if message_type.trim().is_empty() {
            return Err(PreconditionError::new("message", "message type must not be empty").into());
        }

        {
            let mut released = self.released.lock();
            if let Some(index) = released.iter().position(|entry| entry.services(message_type)) {
                let entry = released.swap_remove(index);
                trace!(message_type, handler = entry.handler.name(), "Reusing pooled handler");
                return Ok(Some(entry.handler));
            }
        }

        let handler = self.resolver.create_handler(message);
        if let Some(ref handler) = handler {
            trace!(message_type, handler = handler.name(), "Created handler");
        }
        Ok(handler)
    }

    /// Returns a handler after use.
    ///
    /// Non-reusable handlers are disposed. Releasing an instance that is
    /// already pooled has no effect. Callers must not keep using a handler
    /// after releasing it.
    pub fn release_handler(&self, handler: Option<Arc<dyn MessageHandler>>) {
        let Some(handler) = handler else {
            return;
        };

        if !handler.is_reusable() {
            handler.dispose();
            return;
        }

        let message_types = handler.message_types();
        let mut released = self.released.lock();
        if released
            .iter()
            .any(|entry| same_instance(&entry.handler, &handler))
        {
            return;
        }
        released.push(PooledHandler {
            handler,
            message_types,
        });
    }

    /// Adds registrations through the resolver.
    pub fn register_handlers(&self, source: &dyn HandlerSource) -> Result<usize> {
        self.resolver.register_handlers(source)
    }

    /// The message types that can be dispatched.
    #[must_use]
    pub fn message_types_handled(&self) -> Vec<String> {
        self.resolver.message_types_handled()
    }

    /// Number of handlers waiting in the pool.
    #[must_use]
    pub fn pooled_count(&self) -> usize {
        self.released.lock().len()
    }
}

impl std::fmt::Debug for HandlerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerFactory")
            .field("pooled", &self.pooled_count())
            .finish_non_exhaustive()
    }
}
