//! CLI error types.

use std::fmt;
use std::io;

use pki_certfix::CertFixError;
use pki_profile::ProfileError;

/// CLI error variants.
#[derive(Debug)]
pub enum CliError {
    /// Conflicting or incomplete options.
    Config(String),
    /// Malformed argument value.
    InvalidArgument(String),
    /// Output formatting failed.
    Format(String),
    /// Certificate repair failed.
    CertFix(CertFixError),
    /// Profile engine failed.
    Profile(ProfileError),
    /// I/O error.
    Io(io::Error),
}

impl CliError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Format(msg) => write!(f, "output error: {msg}"),
            Self::CertFix(e) => write!(f, "{e}"),
            Self::Profile(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CertFix(e) => Some(e),
            Self::Profile(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<CertFixError> for CliError {
    fn from(e: CertFixError) -> Self {
        Self::CertFix(e)
    }
}

impl From<ProfileError> for CliError {
    fn from(e: ProfileError) -> Self {
        Self::Profile(e)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::Format(e.to_string())
    }
}
