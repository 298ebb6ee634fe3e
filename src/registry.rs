//! Component A: maps URL scheme -> resource kind constructor, and processor
//! name -> processor kind. Both mappings are open: plugins extend them at
//! process start. No reflection; the registry holds plain constructor
//! closures and boxed processor values.

use std::collections::HashMap;
use std::sync::Arc;

use snafu::prelude::*;

use crate::processor::{DownloadProcessor, Processor, ShellProcessor};
use crate::resource::{self, Resource};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Unknown resource scheme in url '{url}'"))]
    UnknownScheme { url: String },

    #[snafu(display("Unknown processor '{name}'"))]
    UnknownProcessor { name: String },

    #[snafu(display("resource error: {source}"))]
    Resource { source: resource::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

type ResourceConstructor = Arc<dyn Fn(&str) -> resource::Result<Box<dyn Resource>> + Send + Sync>;

/// Default processor name that always resolves.
pub const DEFAULT_PROCESSOR: &str = ShellProcessor::NAME;

pub struct Registry {
    resource_kinds: HashMap<String, ResourceConstructor>,
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("resource_schemes", &self.resource_kinds.keys().collect::<Vec<_>>())
            .field("processors", &self.processors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self {
            resource_kinds: HashMap::new(),
            processors: HashMap::new(),
        };
        registry.register_resource_scheme("file", |url| resource::construct(url));
        registry.register_resource_scheme("http", |url| resource::construct(url));
        registry.register_resource_scheme("https", |url| resource::construct(url));
        registry.register_resource_scheme("pg", |url| resource::construct(url));
        registry.register_resource_scheme("postgres", |url| resource::construct(url));
        registry.register_processor(ShellProcessor::NAME, Arc::new(ShellProcessor));
        registry.register_processor(DownloadProcessor::NAME, Arc::new(DownloadProcessor));
        registry
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_resource_scheme<F>(&mut self, scheme: &str, constructor: F)
    where
        F: Fn(&str) -> resource::Result<Box<dyn Resource>> + Send + Sync + 'static,
    {
        self.resource_kinds.insert(scheme.to_string(), Arc::new(constructor));
    }

    pub fn register_processor(&mut self, name: &str, processor: Arc<dyn Processor>) {
        self.processors.insert(name.to_string(), processor);
    }

    /// Splits `url` at `"://"`; an unknown scheme surfaces as a parse-time
    /// error, not a panic.
    pub fn construct_resource(&self, url: &str) -> Result<Box<dyn Resource>> {
        let scheme = resource::extract_scheme(url).context(UnknownSchemeSnafu { url: url.to_string() })?;
        let constructor = self
            .resource_kinds
            .get(scheme)
            .context(UnknownSchemeSnafu { url: url.to_string() })?;
        constructor(url).context(ResourceSnafu)
    }

    pub fn processor(&self, name: &str) -> Result<Arc<dyn Processor>> {
        self.processors
            .get(name)
            .cloned()
            .context(UnknownProcessorSnafu { name: name.to_string() })
    }

    pub fn default_processor(&self) -> Arc<dyn Processor> {
        self.processor(DEFAULT_PROCESSOR)
            .expect("default processor is always registered")
    }
}
