//! Static plugin modules.
//!
//! A [`PluginModule`] is a named bundle of plugin factories compiled into
//! the binary. Modules can be loaded explicitly, or collected at link time
//! through the [`PLUGIN_MODULES`] distributed slice:
//!
//! ```rust,ignore
//! fn handlers(_ctx: &ModuleContext) -> Vec<PluginBuilder> {
//!     vec![PluginBuilder::new().id("ping").command("ping").execute(ping)]
//! }
//!
//! yuzu_framework::plugin_module!(PING, PluginModule::new("ping").handlers(handlers));
//! ```

use std::path::{Path, PathBuf};

use linkme::distributed_slice;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};
use yuzu_core::KeyValueStore;

use crate::plugin::PluginBuilder;
use crate::registry::PluginRegistry;

/// What a module's factories get to see while building plugins.
#[derive(Debug, Clone, Default)]
pub struct ModuleContext {
    data_dir: PathBuf,
    config: serde_json::Value,
}

impl ModuleContext {
    /// `config` is the module's own `[plugins.<name>]` table.
    pub fn new(data_dir: impl Into<PathBuf>, config: serde_json::Value) -> Self {
        Self {
            data_dir: data_dir.into(),
            config,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_value(&self) -> &serde_json::Value {
        &self.config
    }

    /// Deserializes the module config, falling back to defaults when it is
    /// absent or malformed.
    pub fn get_config<T: DeserializeOwned + Default>(&self) -> T {
        if self.config.is_null() {
            return T::default();
        }
        match serde_json::from_value(self.config.clone()) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "Invalid plugin config, using defaults");
                T::default()
            }
        }
    }

    /// Opens a store file inside the data directory.
    pub fn store(&self, file: &str, autosave: bool) -> KeyValueStore {
        KeyValueStore::open(self.data_dir.join(file), autosave)
    }
}

/// Builds plugin descriptors for a module.
pub type PluginFactory = fn(&ModuleContext) -> Vec<PluginBuilder>;

/// A named set of handlers and post-send observers.
#[derive(Clone, Copy)]
pub struct PluginModule {
    pub name: &'static str,
    pub handlers: PluginFactory,
    pub observers: PluginFactory,
}

/// Summary of one [`PluginModule::load_into`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModuleLoadReport {
    pub handlers: usize,
    pub observers: usize,
    pub rejected: usize,
}

impl PluginModule {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            handlers: no_plugins,
            observers: no_plugins,
        }
    }

    pub const fn handlers(mut self, factory: PluginFactory) -> Self {
        self.handlers = factory;
        self
    }

    pub const fn observers(mut self, factory: PluginFactory) -> Self {
        self.observers = factory;
        self
    }

    /// Builds the module's plugins and registers them.
    ///
    /// Invalid descriptors are logged and skipped; the rest still load.
    pub fn load_into(&self, registry: &mut PluginRegistry, ctx: &ModuleContext) -> ModuleLoadReport {
        let mut report = ModuleLoadReport::default();

        for builder in (self.handlers)(ctx) {
            match registry.register_builder(builder) {
                Ok(_) => report.handlers += 1,
                Err(e) => {
                    error!(module = self.name, plugin = %e.plugin_id(), error = %e, "Rejected plugin");
                    report.rejected += 1;
                }
            }
        }

        for builder in (self.observers)(ctx) {
            match registry.observe_builder(builder) {
                Ok(_) => report.observers += 1,
                Err(e) => {
                    error!(module = self.name, plugin = %e.plugin_id(), error = %e, "Rejected observer");
                    report.rejected += 1;
                }
            }
        }

        debug!(
            module = self.name,
            handlers = report.handlers,
            observers = report.observers,
            rejected = report.rejected,
            "Loaded plugin module"
        );
        report
    }
}

impl std::fmt::Debug for PluginModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginModule")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Factory producing nothing.
pub fn no_plugins(_: &ModuleContext) -> Vec<PluginBuilder> {
    Vec::new()
}

// =============================================================================
// Link-time module registry
// =============================================================================

/// Every module registered with [`plugin_module!`](crate::plugin_module).
#[distributed_slice]
pub static PLUGIN_MODULES: [PluginModule];

/// Linked modules, sorted by name.
///
/// Link order is unspecified, so the name order is what decides which
/// module wins a shared trigger: the later name.
pub fn linked_modules() -> Vec<PluginModule> {
    let mut modules: Vec<PluginModule> = PLUGIN_MODULES.iter().copied().collect();
    modules.sort_by_key(|m| m.name);
    modules
}

/// Registers a [`PluginModule`] in [`PLUGIN_MODULES`].
#[macro_export]
macro_rules! plugin_module {
    ($ident:ident, $module:expr $(,)?) => {
        #[$crate::linkme::distributed_slice($crate::module::PLUGIN_MODULES)]
        #[linkme(crate = $crate::linkme)]
        static $ident: $crate::module::PluginModule = $module;
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::convert::Infallible;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct GreetConfig {
        greeting: String,
        loud: bool,
    }

    fn greet(ctx: &ModuleContext) -> Vec<PluginBuilder> {
        let config: GreetConfig = ctx.get_config();
        let command = if config.greeting.is_empty() {
            "hi".to_owned()
        } else {
            config.greeting
        };
        vec![
            PluginBuilder::new()
                .id("greet")
                .command(command)
                .execute(|_| async { Ok::<_, Infallible>(()) }),
            PluginBuilder::new().id("greet-broken"),
        ]
    }

    fn audit(_: &ModuleContext) -> Vec<PluginBuilder> {
        vec![
            PluginBuilder::new()
                .id("audit")
                .execute(|_| async { Ok::<_, Infallible>(()) }),
        ]
    }

    crate::plugin_module!(
        TEST_GREET,
        PluginModule::new("test-greet").handlers(greet).observers(audit)
    );

    #[test]
    fn test_load_into_reports_rejections() {
        let mut registry = PluginRegistry::new();
        let ctx = ModuleContext::new("data", serde_json::json!({ "greeting": "hello" }));
        let module = PluginModule::new("greet").handlers(greet).observers(audit);

        let report = module.load_into(&mut registry, &ctx);
        assert_eq!(
            report,
            ModuleLoadReport {
                handlers: 1,
                observers: 1,
                rejected: 1,
            }
        );
        assert!(registry.lookup("/hello").is_some());
        assert_eq!(registry.count_observers(), 1);
    }

    #[test]
    fn test_malformed_config_falls_back() {
        let ctx = ModuleContext::new("data", serde_json::json!({ "loud": "very" }));
        assert_eq!(ctx.get_config::<GreetConfig>(), GreetConfig::default());

        let ctx = ModuleContext::new("data", serde_json::Value::Null);
        assert_eq!(ctx.get_config::<GreetConfig>(), GreetConfig::default());
    }

    #[test]
    fn test_linked_modules_collected() {
        let modules = linked_modules();
        let module = modules
            .iter()
            .find(|m| m.name == "test-greet")
            .expect("module linked");

        let mut registry = PluginRegistry::new();
        module.load_into(&mut registry, &ModuleContext::default());
        assert!(registry.lookup(".hi").is_some());
    }

    #[test]
    fn test_module_store_lives_in_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ModuleContext::new(dir.path(), serde_json::Value::Null);
        let store = ctx.store("notes.json", true);
        store.set("k", 1).unwrap();
        assert!(dir.path().join("notes.json").exists());
    }
}
