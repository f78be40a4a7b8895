//! Transport traits
//!
//! The session runner drives these; [`crate::ssh`] implements them over russh.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ExecOptions, PtyConfig};
use crate::error::ExecError;
use crate::host::Host;
use crate::keys::CredentialSet;

/// Opens authenticated connections
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `host` and authenticate with `credentials`
    async fn connect(
        &self,
        host: &Host,
        credentials: &CredentialSet,
        options: &ExecOptions,
    ) -> Result<Box<dyn RemoteSession>, ExecError>;

    fn connector_type(&self) -> &'static str;
}

/// One authenticated connection carrying a single command
#[async_trait]
pub trait RemoteSession: Send {
    /// Open the command-execution channel
    async fn open_session(&mut self) -> Result<(), ExecError>;

    /// Writable handle to the remote process's stdin
    async fn input_writer(&mut self) -> Result<Arc<dyn InputWriter>, ExecError>;

    /// Allocate a pseudo-terminal
    async fn request_pty(&mut self, pty: &PtyConfig) -> Result<(), ExecError>;

    /// Start `command`
    async fn exec(&mut self, command: &str) -> Result<(), ExecError>;

    /// Next event from the running command, `None` once the channel is closed
    async fn next_event(&mut self) -> Option<SessionEvent>;

    /// Tear down the connection
    async fn close(&mut self) {}
}

/// Events observed while a command runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Bytes written to stdout (stderr too, under a pty)
    Stdout(Vec<u8>),
    /// Exit status reported by the server
    ExitStatus(u32),
    /// Process was killed by a signal
    ExitSignal(String),
    /// The server refused the exec request
    Rejected,
}

/// Shared handle to a remote process's standard input
#[async_trait]
pub trait InputWriter: Send + Sync {
    /// Write all of `data`
    async fn write(&self, data: &[u8]) -> Result<(), ExecError>;
}
