//! Fluent builder for configuring a [`Registry`] before a run.
//!
//! This is the extension point a library consumer uses to teach tuttle
//! about a new resource scheme or processor without touching the engine
//! itself — the same open-registry design [`Registry::default`] wires up
//! for the built-in kinds.

use std::sync::Arc;

use crate::processor::Processor;
use crate::registry::Registry;
use crate::resource::{self, Resource};

/// Builds a [`Registry`], starting from the built-in file/http/postgres
/// resource kinds and shell/download processors, with room to register
/// more of either before [`build`](RegistryBuilder::build).
///
/// # Examples
///
/// ## Default configuration
/// ```
/// use tuttle::builder::RegistryBuilder;
///
/// let registry = RegistryBuilder::new().build();
/// assert_eq!(registry.default_processor().name(), "shell");
/// ```
///
/// ## Registering a custom processor
/// ```
/// use tuttle::builder::RegistryBuilder;
/// use tuttle::processor::{Job, Processor, Result};
/// use async_trait::async_trait;
/// use std::sync::Arc;
///
/// #[derive(Debug, Default)]
/// struct NoopProcessor;
///
/// #[async_trait]
/// impl Processor for NoopProcessor {
///     fn name(&self) -> &str { "noop" }
///     fn static_check(&self, _code: &str, _inputs: &[String], _outputs: &[String]) -> Result<()> { Ok(()) }
///     fn pre_check(&self, _inputs: &[String], _outputs: &[String]) -> Result<()> { Ok(()) }
///     async fn run(&self, _job: Job<'_>) -> Result<()> { Ok(()) }
/// }
///
/// let registry = RegistryBuilder::new()
///     .with_processor("noop", Arc::new(NoopProcessor))
///     .build();
/// assert!(registry.processor("noop").is_ok());
/// ```
pub struct RegistryBuilder {
    registry: Registry,
}

impl RegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { registry: Registry::default() }
    }

    /// Registers `scheme` (e.g. `"s3"`) against a resource constructor.
    #[must_use]
    pub fn with_resource_scheme<F>(mut self, scheme: &str, constructor: F) -> Self
    where
        F: Fn(&str) -> resource::Result<Box<dyn Resource>> + Send + Sync + 'static,
    {
        self.registry.register_resource_scheme(scheme, constructor);
        self
    }

    /// Registers a processor under `name`, available to any process whose
    /// `#!` directive names it.
    #[must_use]
    pub fn with_processor(mut self, name: &str, processor: Arc<dyn Processor>) -> Self {
        self.registry.register_processor(name, processor);
        self
    }

    #[must_use]
    pub fn build(self) -> Registry {
        self.registry
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
