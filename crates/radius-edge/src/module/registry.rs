//! Module registry
//!
//! Maps module names used in the configuration to factories. A factory
//! receives the module's opaque config map and the collaborators shared by all
//! modules, and returns a ready module or a configuration error. Server-wide
//! filters are registered and built the same way.

use super::{Module, ModuleError, ModuleResult, Pipeline};
use crate::coa::{CoaDynamicModule, CoaNasAttributeModule};
use crate::filter::{Filter, FilterError, RateLimitFilter};
use crate::lb::{Allocator, LbServeModule, LoadBalanceModule};
use crate::session::GlobalStorage;
use crate::tracker::NasTracker;
use crate::transport::Exchanger;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Opaque per-module configuration, as found in the config file
pub type ModuleConfig = serde_json::Map<String, serde_json::Value>;

/// One entry of a listener's module list or of the server's filter list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub config: ModuleConfig,
}

impl ModuleDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: ModuleConfig::new(),
        }
    }

    pub fn with_config(mut self, config: ModuleConfig) -> Self {
        self.config = config;
        self
    }
}

/// Decode an opaque module config into its typed form
pub fn decode_config<T: DeserializeOwned>(module: &str, config: &ModuleConfig) -> ModuleResult<T> {
    serde_json::from_value(serde_json::Value::Object(config.clone()))
        .map_err(|e| ModuleError::config(module, e.to_string()))
}

/// Decode an opaque filter config into its typed form
pub fn decode_filter_config<T: DeserializeOwned>(
    filter: &str,
    config: &ModuleConfig,
) -> Result<T, FilterError> {
    serde_json::from_value(serde_json::Value::Object(config.clone()))
        .map_err(|e| FilterError::config(filter, e.to_string()))
}

/// Collaborators shared by every module instance
#[derive(Clone)]
pub struct ModuleDeps {
    pub storage: Arc<dyn GlobalStorage>,
    pub tracker: Arc<dyn NasTracker>,
    pub allocator: Arc<Allocator>,
    pub exchanger: Arc<dyn Exchanger>,
}

type ModuleFactory =
    Box<dyn Fn(&ModuleConfig, &ModuleDeps) -> ModuleResult<Arc<dyn Module>> + Send + Sync>;

type FilterFactory =
    Box<dyn Fn(&ModuleConfig) -> Result<Arc<dyn Filter>, FilterError> + Send + Sync>;

/// Name to factory table
pub struct ModuleRegistry {
    factories: HashMap<String, ModuleFactory>,
    filters: HashMap<String, FilterFactory>,
}

impl ModuleRegistry {
    /// Registry without any module or filter
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
            filters: HashMap::new(),
        }
    }

    /// Registry with the built-in modules and filters
    ///
    /// Modules `load_balance`, `lb_serve`, `coa_dynamic` and
    /// `coa_nas_attribute`; filter `rate_limit`.
    pub fn new() -> Self {
        let mut registry = Self::empty();

        registry.register(LoadBalanceModule::NAME, |_, deps| {
            Ok(Arc::new(LoadBalanceModule::new(Arc::clone(&deps.allocator))))
        });
        registry.register(LbServeModule::NAME, |config, deps| {
            let config = decode_config(LbServeModule::NAME, config)?;
            Ok(Arc::new(LbServeModule::new(config, Arc::clone(&deps.exchanger))?))
        });
        registry.register(CoaDynamicModule::NAME, |config, deps| {
            let config = decode_config(CoaDynamicModule::NAME, config)?;
            Ok(Arc::new(CoaDynamicModule::new(
                config,
                Arc::clone(&deps.tracker),
                Arc::clone(&deps.exchanger),
            )?))
        });
        registry.register(CoaNasAttributeModule::NAME, |config, deps| {
            let config = decode_config(CoaNasAttributeModule::NAME, config)?;
            Ok(Arc::new(CoaNasAttributeModule::new(
                config,
                Arc::clone(&deps.exchanger),
            )?))
        });

        registry.register_filter(RateLimitFilter::NAME, |config| {
            let config = decode_filter_config(RateLimitFilter::NAME, config)?;
            Ok(Arc::new(RateLimitFilter::new(config)?))
        });

        registry
    }

    /// Register (or replace) a factory
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ModuleConfig, &ModuleDeps) -> ModuleResult<Arc<dyn Module>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Instantiate the module registered as `name`
    pub fn init(
        &self,
        name: &str,
        config: &ModuleConfig,
        deps: &ModuleDeps,
    ) -> ModuleResult<Arc<dyn Module>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ModuleError::UnknownModule(name.to_string()))?;
        factory(config, deps)
    }

    /// Build the pipeline of one listener from its module list
    pub fn build_pipeline(
        &self,
        listener: &str,
        modules: &[ModuleDescriptor],
        deps: &ModuleDeps,
    ) -> ModuleResult<Pipeline> {
        let mut builder = Pipeline::builder(listener, Arc::clone(&deps.storage));
        for descriptor in modules {
            builder = builder.module(self.init(&descriptor.name, &descriptor.config, deps)?);
        }

        let pipeline = builder.build();
        info!(
            listener,
            modules = ?pipeline.module_names(),
            "Initialized module pipeline"
        );
        Ok(pipeline)
    }

    /// Register (or replace) a filter factory
    pub fn register_filter<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ModuleConfig) -> Result<Arc<dyn Filter>, FilterError> + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Box::new(factory));
    }

    pub fn contains_filter(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    /// Instantiate the filter registered as `name`
    pub fn init_filter(&self, name: &str, config: &ModuleConfig) -> Result<Arc<dyn Filter>, FilterError> {
        let factory = self
            .filters
            .get(name)
            .ok_or_else(|| FilterError::UnknownFilter(name.to_string()))?;
        factory(config)
    }

    /// Build the server-wide filter list, in configuration order
    pub fn build_filters(&self, filters: &[ModuleDescriptor]) -> Result<Vec<Arc<dyn Filter>>, FilterError> {
        let built = filters
            .iter()
            .map(|descriptor| self.init_filter(&descriptor.name, &descriptor.config))
            .collect::<Result<Vec<_>, _>>()?;

        if !built.is_empty() {
            let names: Vec<&str> = built.iter().map(|f| f.name()).collect();
            info!(filters = ?names, "Initialized filters");
        }
        Ok(built)
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
