//! fleetsh-exec: Concurrent remote command execution
//!
//! Runs one shell command across a cluster of SSH hosts, streams back a
//! result per host as it completes, and lets the caller interrupt the run.

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod keys;
pub mod orchestrator;
pub mod result;
mod runner;
pub mod ssh;
pub mod traits;

pub use command::Command;
pub use config::{CTRL_C_CODE, EOF_CODE, ExecOptions, PtyConfig};
pub use engine::Executor;
pub use error::{ErrorKind, ExecError};
pub use host::{Cluster, Host, HostParseError};
pub use keys::{AuthMethod, CredentialSet};
pub use orchestrator::{LoopState, Orchestrator, Outcome, ResultSink};
pub use result::HostResult;
pub use ssh::SshConnector;
pub use traits::{Connector, InputWriter, RemoteSession, SessionEvent};
