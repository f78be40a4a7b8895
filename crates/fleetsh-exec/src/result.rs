//! Per-host result of a fleet-wide run

use std::borrow::Cow;
use std::sync::Arc;

use crate::error::ExecError;
use crate::host::Host;

/// Outcome of one session
///
/// Produced exactly once per submitted host, whether it succeeded or not.
#[derive(Debug, Clone)]
pub struct HostResult {
    /// Captured stdout bytes, possibly partial when `error` is set
    pub output: Vec<u8>,
    /// First error hit by the session, if any
    pub error: Option<ExecError>,
    /// Originating host
    pub host: Arc<Host>,
}

impl HostResult {
    /// Result for a host that produced output and no error
    #[must_use]
    pub fn success(host: Arc<Host>, output: Vec<u8>) -> Self {
        Self {
            output,
            error: None,
            host,
        }
    }

    /// Result for a host that failed before producing output
    #[must_use]
    pub fn failure(host: Arc<Host>, error: ExecError) -> Self {
        Self {
            output: Vec::new(),
            error: Some(error),
            host,
        }
    }

    /// Check if the session completed without error
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Output decoded as UTF-8, replacing invalid sequences
    #[must_use]
    pub fn output_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.output)
    }
}
