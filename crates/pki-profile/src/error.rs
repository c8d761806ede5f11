//! Profile engine error types.

use thiserror::Error;

/// Result type for profile operations.
pub type Result<T> = std::result::Result<T, ProfileError>;

/// Profile engine error variants.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// The XML could not be tokenized or written.
    #[error("XML error: {0}")]
    Xml(String),

    /// The XML is well formed but does not describe a profile.
    #[error("malformed profile document: {0}")]
    Malformed(String),

    /// A policy set already holds the largest representable value id.
    #[error("policy set {0} has no value id left")]
    IdSpaceExhausted(String),

    /// The document has no policy set to edit.
    #[error("profile document has no policy set")]
    NoPolicySet,

    /// Unknown profile archetype name.
    #[error("unknown profile archetype: {0}")]
    UnknownArchetype(String),

    /// An override value could not be interpreted.
    #[error("invalid override {key}: {message}")]
    InvalidOverride {
        /// Override key as spelled by the caller.
        key: String,
        /// What was wrong with it.
        message: String,
    },

    /// Reading or writing a profile file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProfileError {
    /// Creates an invalid override error.
    #[must_use]
    pub fn invalid_override(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOverride {
            key: key.into(),
            message: message.into(),
        }
    }
}
