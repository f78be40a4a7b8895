//! Session runner: one command against one host

use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};

use crate::config::{EOF_CODE, ExecOptions, TRUNCATION_MARKER};
use crate::error::ExecError;
use crate::host::Host;
use crate::keys::CredentialSet;
use crate::result::HostResult;
use crate::traits::{Connector, InputWriter, RemoteSession, SessionEvent};

/// Slot a runner reports its input writer through
pub(crate) type WriterSlot = oneshot::Sender<Option<Arc<dyn InputWriter>>>;

/// Reports the input writer to the engine exactly once
///
/// Dropping an unused publisher reports absence.
struct Publisher(Option<WriterSlot>);

impl Publisher {
    fn publish(&mut self, writer: Option<Arc<dyn InputWriter>>) {
        if let Some(slot) = self.0.take() {
            // Engine may already be gone if the caller dropped the run
            let _ = slot.send(writer);
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.publish(None);
    }
}

/// Output buffer honouring an optional byte cap
struct Capture {
    buf: Vec<u8>,
    limit: Option<usize>,
    truncated: bool,
}

impl Capture {
    fn new(limit: Option<usize>) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            truncated: false,
        }
    }

    fn extend(&mut self, data: &[u8]) {
        let Some(limit) = self.limit else {
            self.buf.extend_from_slice(data);
            return;
        };
        let room = limit.saturating_sub(self.buf.len());
        if data.len() > room {
            self.buf.extend_from_slice(&data[..room]);
            self.truncated = true;
        } else {
            self.buf.extend_from_slice(data);
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.truncated {
            self.buf.extend_from_slice(TRUNCATION_MARKER);
        }
        self.buf
    }
}

/// Run `command` on `host`, publishing its input writer through `slot`
///
/// Always returns a result; every failure is recorded in it.
#[instrument(skip_all, fields(host = %host))]
pub(crate) async fn run_host(
    connector: Arc<dyn Connector>,
    host: Arc<Host>,
    credentials: CredentialSet,
    command: Arc<str>,
    input: Arc<[u8]>,
    options: Arc<ExecOptions>,
    slot: WriterSlot,
) -> HostResult {
    let mut publisher = Publisher(Some(slot));

    let mut session = match connector.connect(&host, &credentials, &options).await {
        Ok(session) => session,
        Err(e) => {
            warn!(error = %e, "connection failed");
            publisher.publish(None);
            return HostResult::failure(host, e);
        }
    };

    let result = run_session(
        session.as_mut(),
        &host,
        &command,
        input,
        &options,
        &mut publisher,
    )
    .await;
    session.close().await;
    result
}

async fn run_session(
    session: &mut dyn RemoteSession,
    host: &Arc<Host>,
    command: &str,
    input: Arc<[u8]>,
    options: &ExecOptions,
    publisher: &mut Publisher,
) -> HostResult {
    if let Err(e) = session.open_session().await {
        warn!(error = %e, "session setup failed");
        publisher.publish(None);
        return HostResult::failure(host.clone(), e);
    }

    let writer = match session.input_writer().await {
        Ok(writer) => writer,
        Err(e) => {
            warn!(error = %e, "unable to get stdin");
            publisher.publish(None);
            return HostResult::failure(host.clone(), e);
        }
    };

    let started = spawn_input_delivery(writer.clone(), input);

    if let Err(e) = session.request_pty(&options.pty).await {
        warn!(error = %e, "pty request failed");
        publisher.publish(None);
        return HostResult::failure(host.clone(), e);
    }

    debug!("ready to execute");
    publisher.publish(Some(writer));

    if let Err(e) = session.exec(command).await {
        warn!(error = %e, "exec failed");
        return HostResult::failure(host.clone(), e);
    }
    let _ = started.send(());

    let mut capture = Capture::new(options.max_output_bytes);
    let mut error = None;
    let mut exited = false;

    while let Some(event) = session.next_event().await {
        match event {
            SessionEvent::Stdout(data) => capture.extend(&data),
            SessionEvent::ExitStatus(0) => exited = true,
            SessionEvent::ExitStatus(status) => {
                exited = true;
                error = Some(ExecError::CommandFailed { status });
            }
            SessionEvent::ExitSignal(signal) => {
                exited = true;
                error = Some(ExecError::Signaled { signal });
            }
            SessionEvent::Rejected => {
                error.get_or_insert_with(|| ExecError::SessionSetup("exec request refused".into()));
            }
        }
    }

    if !exited && error.is_none() {
        error = Some(ExecError::MissingExitStatus);
    }

    let output = capture.finish();
    debug!(bytes = output.len(), failed = error.is_some(), "command finished");

    HostResult {
        output,
        error,
        host: host.clone(),
    }
}

/// Deliver `input` and the end-of-input marker once the command has started
///
/// The returned sender starts delivery; dropping it cancels delivery.
fn spawn_input_delivery(writer: Arc<dyn InputWriter>, input: Arc<[u8]>) -> oneshot::Sender<()> {
    let (started_tx, started_rx) = oneshot::channel();

    tokio::spawn(async move {
        if started_rx.await.is_err() {
            return;
        }
        if !input.is_empty() {
            if let Err(e) = writer.write(&input).await {
                debug!(error = %e, "failed to write stdin");
                return;
            }
        }
        if let Err(e) = writer.write(&[EOF_CODE]).await {
            debug!(error = %e, "failed to write end-of-input marker");
        }
    });

    started_tx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_unbounded() {
        let mut capture = Capture::new(None);
        capture.extend(b"hello ");
        capture.extend(b"world");
        assert_eq!(capture.finish(), b"hello world");
    }

    #[test]
    fn test_capture_truncates_with_marker() {
        let mut capture = Capture::new(Some(4));
        capture.extend(b"abc");
        capture.extend(b"defg");
        capture.extend(b"hij");
        let mut expected = b"abcd".to_vec();
        expected.extend_from_slice(TRUNCATION_MARKER);
        assert_eq!(capture.finish(), expected);
    }

    #[test]
    fn test_capture_exact_fit_is_not_truncated() {
        let mut capture = Capture::new(Some(3));
        capture.extend(b"abc");
        assert_eq!(capture.finish(), b"abc");
    }
}
