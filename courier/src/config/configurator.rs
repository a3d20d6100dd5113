//! Programmatic configuration steps.

use super::BusConfiguration;
use crate::errors::{ConfigurationError, Result};
use tracing::debug;

/// Adjusts the bus configuration before the bus starts.
pub trait Configurator: Send + Sync {
    /// Identifies the configurator. Two configurators with the same name
    /// (compared case-insensitively) cannot be added to one collection.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Applies the adjustment.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be adjusted.
    fn apply(&self, configuration: &mut BusConfiguration) -> Result<()>;
}

/// An ordered set of configurators, unique by name.
#[derive(Default)]
pub struct ConfiguratorCollection {
    configurators: Vec<Box<dyn Configurator>>,
}

impl ConfiguratorCollection {
    /// Creates an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a configurator.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::DuplicateConfigurator`] if one with the
    /// same name was already added.
    pub fn add(&mut self, configurator: impl Configurator + 'static) -> Result<(), ConfigurationError> {
        if self.contains(configurator.name()) {
            return Err(ConfigurationError::DuplicateConfigurator(
                configurator.name().to_string(),
            ));
        }
        self.configurators.push(Box::new(configurator));
        Ok(())
    }

    /// Returns true if a configurator with this name was added.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.configurators
            .iter()
            .any(|existing| existing.name().eq_ignore_ascii_case(name))
    }

    /// Number of configurators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.configurators.len()
    }

    /// Returns true if the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.configurators.is_empty()
    }

    /// Applies every configurator in insertion order.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first failure.
    pub fn apply(&self, configuration: &mut BusConfiguration) -> Result<()> {
        for configurator in &self.configurators {
            debug!(configurator = configurator.name(), "Applying configurator");
            configurator.apply(configuration)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConfiguratorCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.configurators.iter().map(|c| c.name()))
            .finish()
    }
}
