//! Runtime configuration: schema, layered loading and validation.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, ENV_PREFIX, Profile};
pub use schema::{
    BotConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, ReconnectConfig, SpanEventConfig,
    YuzuConfig,
};
pub use validation::validate_config;
