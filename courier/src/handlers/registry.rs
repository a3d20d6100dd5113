//! Registration map from message type to handler constructor.

use super::MessageHandler;
use crate::errors::{ConfigurationError, PreconditionError, Result};
use crate::message::TransportMessage;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

/// Factory function type for creating handlers.
pub type HandlerConstructor = Arc<dyn Fn() -> Arc<dyn MessageHandler> + Send + Sync>;

/// One message type and the constructor for its handler.
#[derive(Clone)]
pub struct HandlerRegistration {
    message_type: String,
    constructor: HandlerConstructor,
}

impl HandlerRegistration {
    /// Creates a registration from a constructor closure.
    pub fn new<F>(message_type: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> Arc<dyn MessageHandler> + Send + Sync + 'static,
    {
        Self {
            message_type: message_type.into(),
            constructor: Arc::new(constructor),
        }
    }

    /// Creates a registration for a default-constructible handler.
    pub fn of<H>(message_type: impl Into<String>) -> Self
    where
        H: MessageHandler + Default + 'static,
    {
        Self::new(message_type, || Arc::new(H::default()) as Arc<dyn MessageHandler>)
    }

    /// Returns the message type.
    #[must_use]
    pub fn message_type(&self) -> &str {
        &self.message_type
    }
}

impl std::fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("message_type", &self.message_type)
            .finish_non_exhaustive()
    }
}

/// Something that can be scanned for handler registrations.
pub trait HandlerSource {
    /// Returns the registrations this source provides.
    fn registrations(&self) -> Vec<HandlerRegistration>;
}

impl HandlerSource for Vec<HandlerRegistration> {
    fn registrations(&self) -> Vec<HandlerRegistration> {
        self.clone()
    }
}

/// Creates handlers for messages the pool cannot serve.
pub trait HandlerResolver: Send + Sync {
    /// Creates a new handler for the message, or `None` if its type is unknown.
    fn create_handler(&self, message: &TransportMessage) -> Option<Arc<dyn MessageHandler>>;

    /// The message types this resolver can create handlers for.
    fn message_types_handled(&self) -> Vec<String>;

    /// Adds the registrations found in `source`, returning how many were added.
    fn register_handlers(&self, source: &dyn HandlerSource) -> Result<usize>;
}

/// The default resolver: an explicit map populated at startup.
#[derive(Default)]
pub struct HandlerRegistry {
    constructors: DashMap<String, HandlerConstructor>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a single handler constructor.
    pub fn register(&self, registration: HandlerRegistration) -> Result<()> {
        self.register_handlers(&vec![registration]).map(|_| ())
    }

    /// Returns the number of registered message types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }
}

impl HandlerResolver for HandlerRegistry {
    fn create_handler(&self, message: &TransportMessage) -> Option<Arc<dyn MessageHandler>> {
        // Clone the constructor out so the shard lock is not held while it runs.
        let constructor = self
            .constructors
            .get(&message.message_type)
            .map(|entry| Arc::clone(entry.value()))?;
        Some(constructor())
    }

    fn message_types_handled(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .constructors
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        types.sort();
        types
    }

    fn register_handlers(&self, source: &dyn HandlerSource) -> Result<usize> {
        let registrations = source.registrations();

        let mut seen = HashSet::new();
        for registration in &registrations {
            if registration.message_type.trim().is_empty() {
                return Err(PreconditionError::new(
                    "message_type",
                    "handler registrations require a message type",
                )
                .into());
            }
            if !seen.insert(registration.message_type.as_str())
                || self.constructors.contains_key(&registration.message_type)
            {
                return Err(
                    ConfigurationError::DuplicateHandler(registration.message_type.clone()).into(),
                );
            }
        }

        let count = registrations.len();
        for registration in registrations {
            tracing::debug!(
                message_type = %registration.message_type,
                "Registered message handler"
            );
            self.constructors
                .insert(registration.message_type, registration.constructor);
        }

        Ok(count)
    }
}
