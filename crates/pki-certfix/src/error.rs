//! Error types for certificate repair.

use thiserror::Error;

/// Result type for certificate repair operations.
pub type Result<T> = std::result::Result<T, CertFixError>;

/// Errors raised by external tool invocations.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The program could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The program ran and exited unsuccessfully.
    #[error("command '{command}' exited with code {exit_code}: {stderr}")]
    NonZeroExit {
        /// Command line.
        command: String,
        /// Exit code, `-1` when killed by a signal.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// An argument was rejected before the program was started.
    #[error("invalid argument for {program}: {reason}")]
    InvalidArgument {
        /// Program name.
        program: String,
        /// Why the argument was rejected.
        reason: String,
    },
}

impl CommandError {
    /// Create a non-zero exit error.
    #[must_use]
    pub fn non_zero_exit(
        command: impl Into<String>,
        exit_code: i32,
        stderr: impl Into<String>,
    ) -> Self {
        Self::NonZeroExit {
            command: command.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }
}

/// Certificate repair error variants.
#[derive(Debug, Error)]
pub enum CertFixError {
    /// Invalid options, detected before anything is touched.
    #[error("configuration error: {0}")]
    Config(String),

    /// The instance is not in a state the repair can work with.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// An external tool failed.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// A system certificate could not be renewed.
    #[error("renewal of {cert_id} failed: {message}")]
    Renewal {
        /// Certificate id or serial.
        cert_id: String,
        /// Failure description.
        message: String,
    },

    /// Reading or writing instance files failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The repair succeeded but restoring the instance did not.
    #[error("failed to restore instance state: {}", .0.join("; "))]
    Unwind(Vec<String>),
}

impl CertFixError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a precondition error.
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }

    /// Create a renewal error.
    #[must_use]
    pub fn renewal(cert_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Renewal {
            cert_id: cert_id.into(),
            message: message.into(),
        }
    }

    /// Whether the error was raised before any side effect.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}
