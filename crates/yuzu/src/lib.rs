//! # Yuzu
//!
//! A plugin-driven chat bot for instant-messaging transports.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐  events  ┌─────────┐  ctx  ┌────────────┐──▶ listeners (in order)
//! │ Connector │─────────▶│ Runtime │──────▶│ Dispatcher │──▶ one command by pattern
//! └───────────┘          └─────────┘       └────────────┘──▶ observers (own sends)
//! ```
//!
//! - **Core**: message normalization, the transport contract and JSON stores
//! - **Framework**: plugins, admission checks, registry and dispatch
//! - **Runtime**: configuration, logging and the reconnecting connection loop
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use yuzu::prelude::*;
//!
//! fn handlers(_: &ModuleContext) -> Vec<PluginBuilder> {
//!     vec![
//!         PluginBuilder::new()
//!             .id("ping")
//!             .commands(["ping", "p"])
//!             .execute(|ctx| async move { ctx.reply("pong").await.map(|_| ()) }),
//!     ]
//! }
//!
//! plugin_module!(PING, PluginModule::new("ping").handlers(handlers));
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = BotRuntime::new();
//!     runtime.load_linked_plugins();
//!     runtime.run(&connector).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use yuzu_core as core;
pub use yuzu_framework as framework;
pub use yuzu_runtime as runtime;

pub use yuzu_framework::plugin_module;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use yuzu::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use yuzu_runtime::{BotRuntime, YuzuConfig};

    // Plugin system
    pub use yuzu_framework::{
        BoxError, CheckRule, ModuleContext, PluginBuilder, PluginModule, WatchIndex,
        fallible_check, plugin_module,
    };

    // Message model and transport contract
    pub use yuzu_core::{
        Connection, Connector, MessageContext, OutgoingMessage, Transport, TransportError,
        TransportEvent,
    };

    // Utilities
    pub use yuzu_core::util::{format_elapse, gen_hex_id, short_to};
}
