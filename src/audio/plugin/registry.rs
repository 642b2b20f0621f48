//! Plugin discovery across formats

use std::collections::BTreeMap;

use tracing::{info, warn};

use super::{Plugin, PluginInfo};
use crate::audio::AudioError;

/// A source of plugins for one format
pub trait PluginFactory: Send + Sync {
    /// Format tag, used as the registry key prefix
    fn format(&self) -> &str;

    /// Scan or load whatever the format needs before enumeration
    fn initialize(&mut self) -> Result<(), AudioError>;

    /// Describe every plugin this factory can create
    fn enumerate(&self) -> Vec<PluginInfo>;

    /// Instantiate a plugin by its format-local id
    fn create(&self, id: &str) -> Option<Box<dyn Plugin>>;
}

/// All registered factories and the plugins they expose
#[derive(Default)]
pub struct PluginRegistry {
    factories: Vec<Box<dyn PluginFactory>>,
    plugins: BTreeMap<String, PluginInfo>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in effects
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_factory(Box::new(super::BuiltinFactory::new()));
        registry.initialize_all();
        registry
    }

    pub fn register_factory(&mut self, factory: Box<dyn PluginFactory>) {
        self.factories.push(factory);
    }

    /// Initialize every factory and rebuild the plugin list.
    ///
    /// Returns true if at least one factory initialized.
    pub fn initialize_all(&mut self) -> bool {
        self.plugins.clear();
        let mut any = false;
        for factory in self.factories.iter_mut() {
            if let Err(e) = factory.initialize() {
                warn!("Plugin format {} failed to initialize: {}", factory.format(), e);
                continue;
            }
            any = true;
            for info in factory.enumerate() {
                self.plugins.insert(info.full_id(), info);
            }
        }
        info!("Plugin registry holds {} plugins", self.plugins.len());
        any
    }

    /// Every known plugin, ordered by full id
    pub fn plugins(&self) -> Vec<PluginInfo> {
        self.plugins.values().cloned().collect()
    }

    /// Look up a plugin by `format:id`
    pub fn info(&self, full_id: &str) -> Option<&PluginInfo> {
        self.plugins.get(full_id)
    }

    /// Create a plugin by `format:id`, or by bare id when unambiguous
    pub fn create(&self, full_id: &str) -> Option<Box<dyn Plugin>> {
        // URIs contain ':' too, so only split on a registered format
        if let Some((format, id)) = full_id.split_once(':') {
            if let Some(factory) = self.factory(format) {
                return factory.create(id);
            }
        }
        self.create_by_uri(full_id)
    }

    /// Create a plugin from the id stored in a state snapshot.
    ///
    /// Factories are tried in registration order.
    pub fn create_by_uri(&self, uri: &str) -> Option<Box<dyn Plugin>> {
        self.factories.iter().find_map(|factory| factory.create(uri))
    }

    fn factory(&self, format: &str) -> Option<&dyn PluginFactory> {
        self.factories
            .iter()
            .find(|f| f.format() == format)
            .map(|f| f.as_ref())
    }
}
