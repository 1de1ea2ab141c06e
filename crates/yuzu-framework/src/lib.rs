//! # Yuzu Framework
//!
//! Plugin layer of the Yuzu chat bot.
//!
//! This layer provides:
//! - [`PluginBuilder`] descriptors with admission checks combined under a
//!   [`CheckRule`], a staleness timeout and a disabled switch
//! - [`PluginRegistry`] indexing commands under every configured prefix
//! - [`Dispatcher`] running listeners, then one command, for new messages,
//!   and observers for the bot's own sends
//! - [`WatchIndex`] for continuing conversations from quoted bot replies
//! - [`PluginModule`] bundles, optionally collected at link time
//!
//! ```rust,ignore
//! let mut registry = PluginRegistry::new();
//! registry.register_builder(
//!     PluginBuilder::new()
//!         .id("ping")
//!         .command("ping")
//!         .execute(|ctx| async move { ctx.reply("pong").await.map(|_| ()) }),
//! )?;
//! ```

pub mod dispatcher;
pub mod error;
pub mod module;
pub mod plugin;
pub mod registry;
pub mod watch;

pub use linkme;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use error::{BoxError, HandlerPanic, RegistrationError, RegistrationResult};
pub use module::{
    ModuleContext, ModuleLoadReport, PLUGIN_MODULES, PluginFactory, PluginModule,
    linked_modules, no_plugins,
};
pub use plugin::{
    Admission, CheckFn, CheckRule, ExecuteFn, Plugin, PluginBuilder, fallible_check,
};
pub use registry::{DEFAULT_PREFIX, PluginRegistry};
pub use watch::{WatchEntry, WatchIndex};
