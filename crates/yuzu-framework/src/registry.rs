//! Plugin registry with prefix expansion.
//!
//! The registry owns three views over its plugins:
//!
//! - **listeners**: plugins without commands, in insertion order
//! - **commands**: every trigger string (after prefix expansion) mapped to
//!   the plugin that handles it
//! - **observers**: plugins run for the bot's own sent messages
//!
//! With the default prefix set `"/."`, a plugin registered for `ping`
//! answers to both `/ping` and `.ping`; with `no_prefix` it answers to the
//! bare `ping` only. When two plugins claim the same trigger, the later
//! registration wins.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::error::RegistrationResult;
use crate::plugin::{Plugin, PluginBuilder};

/// Prefix characters used when none are configured.
pub const DEFAULT_PREFIX: &str = "/.";

/// Registry of handlers and observers.
#[derive(Debug)]
pub struct PluginRegistry {
    prefixes: Vec<char>,
    plugins: Vec<Arc<Plugin>>,
    commands: HashMap<String, Arc<Plugin>>,
    observers: Vec<Arc<Plugin>>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    /// Creates an empty registry using [`DEFAULT_PREFIX`].
    pub fn new() -> Self {
        Self::with_prefixes(DEFAULT_PREFIX)
    }

    /// Creates an empty registry where every character of `prefixes` is a prefix.
    pub fn with_prefixes(prefixes: &str) -> Self {
        Self {
            prefixes: unique_chars(prefixes),
            plugins: Vec::new(),
            commands: HashMap::new(),
            observers: Vec::new(),
        }
    }

    pub fn prefixes(&self) -> &[char] {
        &self.prefixes
    }

    /// Replaces the prefix set and rebuilds the command index.
    pub fn set_prefixes(&mut self, prefixes: &str) {
        self.prefixes = unique_chars(prefixes);
        self.reindex();
    }

    /// Registers a plugin and returns its id.
    ///
    /// Registering an id that is already present replaces that plugin in
    /// place, keeping its original position among the listeners.
    pub fn register(&mut self, plugin: Plugin) -> String {
        let id = plugin.id().to_owned();
        let plugin = Arc::new(plugin);

        match self.plugins.iter_mut().find(|p| p.id() == id) {
            Some(slot) => {
                debug!(plugin = %id, "Replacing registered plugin");
                *slot = plugin;
            }
            None => {
                debug!(
                    plugin = %id,
                    listener = plugin.is_listener(),
                    "Registering plugin"
                );
                self.plugins.push(plugin);
            }
        }

        self.reindex();
        id
    }

    /// Validates and registers a builder.
    pub fn register_builder(&mut self, builder: PluginBuilder) -> RegistrationResult<String> {
        builder.build().map(|plugin| self.register(plugin))
    }

    /// Registers every valid builder, logging and skipping the rest.
    ///
    /// Returns the number of plugins registered.
    pub fn register_all<I>(&mut self, builders: I) -> usize
    where
        I: IntoIterator<Item = PluginBuilder>,
    {
        let mut registered = 0;
        for builder in builders {
            match builder.build() {
                Ok(plugin) => {
                    self.register(plugin);
                    registered += 1;
                }
                Err(e) => {
                    error!(plugin = %e.plugin_id(), error = %e, "Skipping invalid plugin");
                }
            }
        }
        registered
    }

    /// Registers a post-send observer. Same-id registrations replace in place.
    pub fn observe(&mut self, plugin: Plugin) -> String {
        let id = plugin.id().to_owned();
        let plugin = Arc::new(plugin);
        match self.observers.iter_mut().find(|p| p.id() == id) {
            Some(slot) => *slot = plugin,
            None => self.observers.push(plugin),
        }
        debug!(observer = %id, "Registered observer");
        id
    }

    /// Validates and registers an observer builder.
    pub fn observe_builder(&mut self, builder: PluginBuilder) -> RegistrationResult<String> {
        builder.build().map(|plugin| self.observe(plugin))
    }

    /// Removes a plugin or observer by id. Returns whether anything was removed.
    pub fn unregister(&mut self, id: &str) -> bool {
        let before = self.plugins.len() + self.observers.len();
        self.plugins.retain(|p| p.id() != id);
        self.observers.retain(|p| p.id() != id);
        let removed = before != self.plugins.len() + self.observers.len();
        if removed {
            self.reindex();
        }
        removed
    }

    /// Removes everything.
    pub fn clear(&mut self) {
        self.plugins.clear();
        self.observers.clear();
        self.commands.clear();
    }

    /// Exact-match lookup of a message pattern.
    pub fn lookup(&self, pattern: &str) -> Option<Arc<Plugin>> {
        self.commands.get(pattern).cloned()
    }

    /// Plugin with the given id, listeners and command handlers alike.
    pub fn get(&self, id: &str) -> Option<Arc<Plugin>> {
        self.plugins.iter().find(|p| p.id() == id).cloned()
    }

    /// Listeners in insertion order.
    pub fn listeners(&self) -> Vec<Arc<Plugin>> {
        self.plugins
            .iter()
            .filter(|p| p.is_listener())
            .cloned()
            .collect()
    }

    /// Observers in insertion order.
    pub fn observers(&self) -> Vec<Arc<Plugin>> {
        self.observers.clone()
    }

    /// Every plugin in insertion order.
    pub fn plugins(&self) -> &[Arc<Plugin>] {
        &self.plugins
    }

    /// Indexed triggers, sorted.
    pub fn triggers(&self) -> Vec<&str> {
        let mut triggers: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        triggers.sort_unstable();
        triggers
    }

    /// Number of command plugins.
    pub fn count_plugins(&self) -> usize {
        self.plugins.iter().filter(|p| !p.is_listener()).count()
    }

    pub fn count_listeners(&self) -> usize {
        self.plugins.iter().filter(|p| p.is_listener()).count()
    }

    /// Number of indexed triggers after prefix expansion.
    pub fn count_commands(&self) -> usize {
        self.commands.len()
    }

    pub fn count_observers(&self) -> usize {
        self.observers.len()
    }

    fn reindex(&mut self) {
        self.commands.clear();
        for plugin in &self.plugins {
            let Some(commands) = plugin.commands() else {
                continue;
            };
            for command in commands {
                if plugin.no_prefix() {
                    Self::index(&mut self.commands, command.clone(), plugin);
                } else {
                    for prefix in &self.prefixes {
                        Self::index(&mut self.commands, format!("{prefix}{command}"), plugin);
                    }
                }
            }
        }
    }

    fn index(commands: &mut HashMap<String, Arc<Plugin>>, trigger: String, plugin: &Arc<Plugin>) {
        if let Some(previous) = commands.insert(trigger.clone(), Arc::clone(plugin))
            && previous.id() != plugin.id()
        {
            warn!(
                trigger = %trigger,
                previous = %previous.id(),
                plugin = %plugin.id(),
                "Command trigger claimed by a later plugin"
            );
        }
    }
}

fn unique_chars(s: &str) -> Vec<char> {
    let mut chars = Vec::new();
    for c in s.chars() {
        if !chars.contains(&c) {
            chars.push(c);
        }
    }
    chars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistrationError;
    use std::convert::Infallible;

    fn noop(id: &str) -> PluginBuilder {
        PluginBuilder::new()
            .id(id)
            .execute(|_| async { Ok::<_, Infallible>(()) })
    }

    #[test]
    fn test_prefix_expansion() {
        let mut registry = PluginRegistry::new();
        let id = registry
            .register_builder(noop("ping").command("ping"))
            .unwrap();

        assert_eq!(registry.lookup("/ping").unwrap().id(), id);
        assert_eq!(registry.lookup(".ping").unwrap().id(), id);
        assert!(registry.lookup("ping").is_none());
        assert!(registry.lookup("/pin").is_none());
        assert_eq!(registry.count_commands(), 2);
    }

    #[test]
    fn test_no_prefix_registers_bare_command() {
        let mut registry = PluginRegistry::new();
        registry
            .register_builder(noop("bare").command("ping").no_prefix(true))
            .unwrap();

        assert_eq!(registry.lookup("ping").unwrap().id(), "bare");
        assert!(registry.lookup("/ping").is_none());
        assert!(registry.lookup(".ping").is_none());
    }

    #[test]
    fn test_reregistration_is_idempotent() {
        let mut registry = PluginRegistry::new();
        registry.register_builder(noop("a")).unwrap();
        registry.register_builder(noop("b")).unwrap();
        registry.register_builder(noop("a").desc("v2")).unwrap();

        let listeners = registry.listeners();
        assert_eq!(listeners.len(), 2);
        assert_eq!(listeners[0].id(), "a");
        assert_eq!(listeners[0].desc(), "v2");
        assert_eq!(listeners[1].id(), "b");
    }

    #[test]
    fn test_last_registration_wins_trigger() {
        let mut registry = PluginRegistry::new();
        registry.register_builder(noop("first").command("x")).unwrap();
        registry.register_builder(noop("second").command("x")).unwrap();
        assert_eq!(registry.lookup("/x").unwrap().id(), "second");

        registry.unregister("second");
        assert_eq!(registry.lookup("/x").unwrap().id(), "first");
    }

    #[test]
    fn test_register_all_skips_invalid() {
        let mut registry = PluginRegistry::new();
        let registered = registry.register_all([
            noop("ok1"),
            PluginBuilder::new().id("broken").command("nope"),
            noop("ok2").command("go"),
        ]);
        assert_eq!(registered, 2);
        assert!(registry.get("broken").is_none());
        assert_eq!(registry.count_listeners(), 1);
        assert_eq!(registry.count_plugins(), 1);

        let err = registry
            .register_builder(PluginBuilder::new().id("broken"))
            .unwrap_err();
        assert_eq!(err, RegistrationError::MissingExecute { id: "broken".into() });
    }

    #[test]
    fn test_set_prefixes_reindexes() {
        let mut registry = PluginRegistry::with_prefixes("!");
        registry.register_builder(noop("p").command("ping")).unwrap();
        assert_eq!(registry.triggers(), vec!["!ping"]);

        registry.set_prefixes("#!#");
        assert_eq!(registry.prefixes(), &['#', '!']);
        assert_eq!(registry.triggers(), vec!["!ping", "#ping"]);
    }

    #[test]
    fn test_observers_separate_from_listeners() {
        let mut registry = PluginRegistry::new();
        registry.observe_builder(noop("log")).unwrap();
        registry.register_builder(noop("log")).unwrap();
        registry.observe_builder(noop("log")).unwrap();

        assert_eq!(registry.count_observers(), 1);
        assert_eq!(registry.count_listeners(), 1);

        assert!(registry.unregister("log"));
        assert_eq!(registry.count_observers(), 0);
        assert_eq!(registry.count_listeners(), 0);
        assert!(!registry.unregister("log"));
    }
}
