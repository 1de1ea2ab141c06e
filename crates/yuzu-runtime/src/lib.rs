//! Process-level glue for a Yuzu bot.
//!
//! - [`config`]: `yuzu.toml` + profiles + `YUZU_*` variables, validated
//! - [`logging`]: the global `tracing` subscriber
//! - [`BotRuntime`]: owns the registry and dispatcher and keeps a
//!   [`Connector`](yuzu_core::Connector) connected until shutdown or logout
//!
//! ```ignore
//! use yuzu_runtime::BotRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = BotRuntime::builder().with_linked_plugins().build()?;
//!     runtime.run(&MyConnector::new(&runtime.config().bot)).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{
    BotConfig, ConfigError, ConfigLoader, ConfigResult, LoggingConfig, ReconnectConfig,
    YuzuConfig,
};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use runtime::{BotRuntime, RuntimeBuilder, wait_for_shutdown};

pub use tracing;

/// Logging macros for plugin code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
