//! Orchestration loop
//!
//! Drains a [`Command`] to completion while reacting to operator interrupts.
//! The first interrupt arms a grace timer; when it fires the loop gives up on
//! hosts that are still running. Interrupts that arrive while the command is
//! still fanning out count too.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use crate::command::Command;
use crate::engine::Executor;
use crate::host::Cluster;
use crate::result::HostResult;

/// Default bound between an interrupt and forced termination
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Receives loop events
pub trait ResultSink {
    /// Called for each result as it arrives
    fn on_result(&mut self, result: HostResult);

    /// Called for each operator interrupt request
    fn on_interrupt(&mut self) {}
}

impl<F: FnMut(HostResult)> ResultSink for F {
    fn on_result(&mut self, result: HostResult) {
        self(result);
    }
}

/// Loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting for results, no interrupt yet
    Running,
    /// Interrupt sent, hosts are abandoned at `deadline`
    Interrupting { deadline: Instant },
    /// Terminal
    Done(Outcome),
}

/// How the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every host reported
    Completed {
        /// Results consumed
        received: usize,
    },
    /// Grace period expired after an interrupt
    TimedOut {
        /// Results consumed
        received: usize,
        /// Hosts abandoned
        outstanding: usize,
    },
    /// Result stream ended before every host reported
    Disconnected {
        received: usize,
        outstanding: usize,
    },
}

impl Outcome {
    /// Whether every host reported
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Outcome::Completed { .. })
    }
}

/// Drives a run to completion
#[derive(Debug, Clone)]
pub struct Orchestrator {
    grace_period: Duration,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Launch `command` on every host of `cluster` and drive the run to completion
    ///
    /// An interrupt during fan-out arms the grace timer right away. If fan-out
    /// finishes before it fires, every ready host gets the stop signal and the
    /// loop continues with whatever grace time is left. Otherwise every host
    /// is abandoned.
    pub async fn execute<S: ResultSink>(
        &self,
        executor: &Executor,
        cluster: &Cluster,
        command: &str,
        input: impl Into<Arc<[u8]>>,
        interrupts: &mut mpsc::Receiver<()>,
        sink: &mut S,
    ) -> Outcome {
        let launch = executor.run(cluster, command, input);
        tokio::pin!(launch);

        let mut deadline: Option<Instant> = None;
        let mut interrupts_open = true;

        let mut handle = loop {
            tokio::select! {
                handle = &mut launch => break handle,
                request = interrupts.recv(), if interrupts_open => {
                    if request.is_none() {
                        interrupts_open = false;
                        continue;
                    }
                    warn!(hosts = cluster.len(), "interrupt requested during fan-out");
                    sink.on_interrupt();
                    deadline.get_or_insert_with(|| Instant::now() + self.grace_period);
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    warn!(outstanding = cluster.len(), "grace period expired during fan-out, abandoning hosts");
                    return Outcome::TimedOut { received: 0, outstanding: cluster.len() };
                }
            }
        };

        match deadline {
            Some(deadline) => {
                handle.send_stop_signal();
                self.drive_from(&mut handle, deadline, interrupts, sink).await
            }
            None => self.drive(&mut handle, interrupts, sink).await,
        }
    }

    /// Consume results from `command` until all hosts reported or the grace
    /// period following the first interrupt on `interrupts` has elapsed
    ///
    /// Each interrupt sends a stop signal. Repeated interrupts keep the
    /// earliest deadline, so they can only shorten the wait.
    pub async fn drive<S: ResultSink>(
        &self,
        command: &mut Command,
        interrupts: &mut mpsc::Receiver<()>,
        sink: &mut S,
    ) -> Outcome {
        self.run_loop(command, interrupts, sink, LoopState::Running)
            .await
    }

    /// Like [`drive`](Self::drive), for a run that was already interrupted
    ///
    /// The stop signal is assumed sent; hosts still running at `deadline`
    /// are abandoned.
    pub async fn drive_from<S: ResultSink>(
        &self,
        command: &mut Command,
        deadline: Instant,
        interrupts: &mut mpsc::Receiver<()>,
        sink: &mut S,
    ) -> Outcome {
        self.run_loop(command, interrupts, sink, LoopState::Interrupting { deadline })
            .await
    }

    async fn run_loop<S: ResultSink>(
        &self,
        command: &mut Command,
        interrupts: &mut mpsc::Receiver<()>,
        sink: &mut S,
        mut state: LoopState,
    ) -> Outcome {
        let total = command.total();
        let mut remaining = total;
        let mut interrupts_open = true;

        if total == 0 {
            debug!("no hosts, nothing to wait for");
            state = LoopState::Done(Outcome::Completed { received: 0 });
        }

        loop {
            let deadline = match state {
                LoopState::Running => None,
                LoopState::Interrupting { deadline } => Some(deadline),
                LoopState::Done(outcome) => {
                    info!(?outcome, "run finished");
                    return outcome;
                }
            };

            tokio::select! {
                result = command.next_result() => {
                    let Some(result) = result else {
                        error!(outstanding = remaining, "result stream closed early");
                        state = LoopState::Done(Outcome::Disconnected {
                            received: total - remaining,
                            outstanding: remaining,
                        });
                        continue;
                    };
                    debug!(host = %result.host, ok = result.is_success(), "result received");
                    sink.on_result(result);
                    remaining -= 1;
                    if remaining == 0 {
                        state = LoopState::Done(Outcome::Completed { received: total });
                    }
                }
                request = interrupts.recv(), if interrupts_open => {
                    if request.is_none() {
                        interrupts_open = false;
                        continue;
                    }
                    warn!(outstanding = remaining, "interrupt requested, stopping hosts");
                    sink.on_interrupt();
                    command.send_stop_signal();
                    if state == LoopState::Running {
                        state = LoopState::Interrupting {
                            deadline: Instant::now() + self.grace_period,
                        };
                    }
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    warn!(outstanding = remaining, "grace period expired, abandoning hosts");
                    state = LoopState::Done(Outcome::TimedOut {
                        received: total - remaining,
                        outstanding: remaining,
                    });
                }
            }
        }
    }
}
