//! Common error types for fastgeoapi.
//!
//! These errors are raised while assembling the gateway at process start.
//! None of them occur on the request path.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Startup errors that prevent the gateway from serving.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Two settings that cannot be enabled together were both enabled.
    #[error("configuration conflict: {0}")]
    ConfigConflict(String),

    /// A setting required by the selected mode is absent.
    #[error("missing setting: {0}")]
    MissingSetting(String),

    /// A setting is present but unusable.
    #[error("invalid setting {name}: {reason}")]
    InvalidSetting {
        /// The setting name, as read from the environment.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A secret could not be accepted.
    #[error("invalid secret: {0}")]
    Secret(#[from] crate::secret::SecretError),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for an [`CoreError::InvalidSetting`].
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
