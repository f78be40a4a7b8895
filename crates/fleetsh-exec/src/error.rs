//! Error types for fleetsh-exec

use thiserror::Error;

/// Errors carried in a single host's [`HostResult`](crate::result::HostResult)
///
/// Every variant is scoped to one host. None of them abort sibling hosts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// Failed to open the transport connection
    #[error("unable to connect: {0}")]
    ConnectionFailed(String),

    /// No offered credential was accepted
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Failed to open the command session or its input handle
    #[error("unable to get ssh session: {0}")]
    SessionSetup(String),

    /// The server refused the pseudo-terminal request
    #[error("failed to request pty: {0}")]
    PtyRequest(String),

    /// Remote command exited with a non-zero status
    #[error("command exited with status {status}")]
    CommandFailed {
        /// Exit status code
        status: u32,
    },

    /// Remote command was terminated by a signal
    #[error("command killed by signal {signal}")]
    Signaled {
        /// Signal name as reported by the server
        signal: String,
    },

    /// Channel closed without reporting an exit status
    #[error("remote command exited without exit status")]
    MissingExitStatus,

    /// I/O error on the session or on local input
    #[error("I/O error: {0}")]
    Io(String),

    /// The per-host task ended without producing a result
    #[error("host task failed: {0}")]
    TaskFailed(String),
}

/// Coarse classification of [`ExecError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Authentication,
    SessionSetup,
    Pty,
    Command,
    Io,
    Task,
}

impl ExecError {
    /// Classify the error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::ConnectionFailed(_) => ErrorKind::Connection,
            ExecError::AuthenticationFailed(_) => ErrorKind::Authentication,
            ExecError::SessionSetup(_) => ErrorKind::SessionSetup,
            ExecError::PtyRequest(_) => ErrorKind::Pty,
            ExecError::CommandFailed { .. }
            | ExecError::Signaled { .. }
            | ExecError::MissingExitStatus => ErrorKind::Command,
            ExecError::Io(_) => ErrorKind::Io,
            ExecError::TaskFailed(_) => ErrorKind::Task,
        }
    }

    /// Whether the failure happened before the host could accept input
    #[must_use]
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Connection | ErrorKind::Authentication | ErrorKind::SessionSetup | ErrorKind::Pty
        )
    }
}

impl From<std::io::Error> for ExecError {
    fn from(err: std::io::Error) -> Self {
        ExecError::Io(err.to_string())
    }
}
