//! Errors raised while loading configuration.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// A file passed to [`ConfigLoader::file`](super::ConfigLoader::file) does not exist.
    #[error("config file {} does not exist", .0.display())]
    FileNotFound(PathBuf),

    /// The file extension names a format that is not compiled in.
    #[error("no enabled config format reads {}", .0.display())]
    UnsupportedFormat(PathBuf),

    /// Merging or deserializing the sources failed.
    #[error("cannot extract configuration: {0}")]
    Extract(#[source] Box<figment::Error>),

    /// A value is out of range.
    #[error("invalid `{field}`: {reason}")]
    Invalid { field: String, reason: String },

    /// `.env` exists but could not be read.
    #[error("cannot read .env: {0}")]
    Dotenv(#[from] dotenvy::Error),
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Dotted path of the offending value, for [`ConfigError::Invalid`].
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Invalid { field, .. } => Some(field),
            _ => None,
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self::Extract(Box::new(e))
    }
}

pub type ConfigResult<T> = Result<T, ConfigError>;
