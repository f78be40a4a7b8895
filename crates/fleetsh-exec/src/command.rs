//! Handle to an in-flight fleet-wide run

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::config::CTRL_C_CODE;
use crate::result::HostResult;
use crate::traits::InputWriter;

/// Live handle returned by [`Executor::run`](crate::engine::Executor::run)
///
/// The result stream carries exactly [`Command::total`] results. Consumers
/// count against that total instead of waiting for the stream to end.
pub struct Command {
    results: mpsc::Receiver<HostResult>,
    stdins: Vec<Arc<dyn InputWriter>>,
    total: usize,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("total", &self.total)
            .field("stdins", &self.stdins.len())
            .finish_non_exhaustive()
    }
}

impl Command {
    pub(crate) fn new(
        results: mpsc::Receiver<HostResult>,
        stdins: Vec<Arc<dyn InputWriter>>,
        total: usize,
    ) -> Self {
        Self {
            results,
            stdins,
            total,
        }
    }

    /// Number of results this run will produce
    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of hosts that reached the ready-to-execute state
    #[must_use]
    pub fn stdin_count(&self) -> usize {
        self.stdins.len()
    }

    /// Wait for the next result in completion order
    pub async fn next_result(&mut self) -> Option<HostResult> {
        self.results.recv().await
    }

    /// Ask every ready host to stop by writing [`CTRL_C_CODE`] to its stdin
    ///
    /// Fire-and-forget: one task per writer, no retries, no acknowledgement.
    /// Must be called from within a tokio runtime.
    pub fn send_stop_signal(&self) {
        debug!(writers = self.stdins.len(), "sending stop signal");
        for stdin in &self.stdins {
            let stdin = stdin.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write(&[CTRL_C_CODE]).await {
                    debug!(error = %e, "failed to deliver stop signal");
                }
            });
        }
    }
}
