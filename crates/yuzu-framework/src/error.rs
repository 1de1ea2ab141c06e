//! Error types for the Yuzu framework.

use thiserror::Error;

/// Boxed error returned by plugin bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A plugin descriptor that cannot be registered.
///
/// Registration errors are reported per plugin; loading carries on with the
/// remaining plugins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// The descriptor has no body to run.
    #[error("plugin '{id}' has no execute function")]
    MissingExecute {
        /// Plugin id, or `<anonymous>` when none was set.
        id: String,
    },

    /// A command list was given but it is empty.
    #[error("plugin '{id}' declares an empty command list")]
    EmptyCommands { id: String },

    /// A command can never match a message pattern.
    #[error("plugin '{id}' has invalid command {command:?}: {reason}")]
    InvalidCommand {
        id: String,
        command: String,
        reason: &'static str,
    },
}

impl RegistrationError {
    /// Id of the rejected plugin.
    pub fn plugin_id(&self) -> &str {
        match self {
            Self::MissingExecute { id }
            | Self::EmptyCommands { id }
            | Self::InvalidCommand { id, .. } => id,
        }
    }
}

/// A plugin body panicked instead of returning.
#[derive(Debug, Clone, Error)]
#[error("handler panicked: {0}")]
pub struct HandlerPanic(pub String);

/// Result type for registration.
pub type RegistrationResult<T> = Result<T, RegistrationError>;
