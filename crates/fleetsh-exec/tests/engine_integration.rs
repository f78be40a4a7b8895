use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};

use fleetsh_exec::*;

// Mock implementations

#[derive(Debug, Clone)]
enum Behavior {
    /// Connection refused
    Refuse,
    /// Server refuses to open a session channel
    FailSession,
    /// Session opens but stdin cannot be obtained
    FailStdin,
    /// Server rejects the pty request
    FailPty,
    /// Connect never completes
    HangConnect,
    /// Connect takes a while, then run until interrupted
    SlowConnect(Duration),
    /// Print output, exit with status
    Exit(u32, &'static str),
    /// Echo stdin back once the end-of-input marker arrives
    Cat,
    /// Run until interrupted, then die by signal
    UntilInterrupt,
    /// Ignore interrupts and never finish
    Hang,
    /// Close without an exit status
    NoStatus,
    /// Panic mid-command
    Panic,
}

#[derive(Default)]
struct RecordingWriter {
    bytes: Mutex<Vec<u8>>,
    notify: Notify,
}

impl RecordingWriter {
    fn bytes(&self) -> Vec<u8> {
        self.bytes.lock().unwrap().clone()
    }

    fn count(&self, byte: u8) -> usize {
        self.bytes().iter().filter(|b| **b == byte).count()
    }

    async fn wait_for(&self, byte: u8) {
        while self.count(byte) == 0 {
            self.notify.notified().await;
        }
    }
}

#[async_trait]
impl InputWriter for RecordingWriter {
    async fn write(&self, data: &[u8]) -> Result<(), ExecError> {
        self.bytes.lock().unwrap().extend_from_slice(data);
        self.notify.notify_one();
        Ok(())
    }
}

#[derive(Default)]
struct MockConnector {
    behaviors: HashMap<String, Behavior>,
    writers: Mutex<Vec<(String, Arc<RecordingWriter>)>>,
    offered: Mutex<Vec<(String, usize)>>,
}

impl MockConnector {
    fn new(behaviors: &[(&str, Behavior)]) -> Arc<Self> {
        Arc::new(Self {
            behaviors: behaviors
                .iter()
                .map(|(name, b)| ((*name).to_string(), b.clone()))
                .collect(),
            ..Self::default()
        })
    }

    fn writers(&self) -> Vec<(String, Arc<RecordingWriter>)> {
        self.writers.lock().unwrap().clone()
    }

    fn offered(&self, name: &str) -> Option<usize> {
        self.offered
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, len)| *len)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        host: &Host,
        credentials: &CredentialSet,
        _options: &ExecOptions,
    ) -> Result<Box<dyn RemoteSession>, ExecError> {
        self.offered
            .lock()
            .unwrap()
            .push((host.name.clone(), credentials.len()));

        let behavior = self
            .behaviors
            .get(&host.name)
            .cloned()
            .unwrap_or(Behavior::Exit(0, ""));
        match behavior {
            Behavior::Refuse => {
                return Err(ExecError::ConnectionFailed("connection refused".into()));
            }
            Behavior::HangConnect => std::future::pending::<()>().await,
            Behavior::SlowConnect(delay) => tokio::time::sleep(delay).await,
            _ => {}
        }

        let writer = Arc::new(RecordingWriter::default());
        self.writers
            .lock()
            .unwrap()
            .push((host.name.clone(), writer.clone()));

        Ok(Box::new(MockSession {
            behavior,
            writer,
            events: Vec::new(),
            started: false,
        }))
    }

    fn connector_type(&self) -> &'static str {
        "mock"
    }
}

struct MockSession {
    behavior: Behavior,
    writer: Arc<RecordingWriter>,
    events: Vec<SessionEvent>,
    started: bool,
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn open_session(&mut self) -> Result<(), ExecError> {
        match self.behavior {
            Behavior::FailSession => Err(ExecError::SessionSetup("channel refused".into())),
            _ => Ok(()),
        }
    }

    async fn input_writer(&mut self) -> Result<Arc<dyn InputWriter>, ExecError> {
        match self.behavior {
            Behavior::FailStdin => Err(ExecError::SessionSetup("no stdin".into())),
            _ => Ok(self.writer.clone()),
        }
    }

    async fn request_pty(&mut self, _pty: &PtyConfig) -> Result<(), ExecError> {
        match self.behavior {
            Behavior::FailPty => Err(ExecError::PtyRequest("refused".into())),
            _ => Ok(()),
        }
    }

    async fn exec(&mut self, _command: &str) -> Result<(), ExecError> {
        Ok(())
    }

    async fn next_event(&mut self) -> Option<SessionEvent> {
        if !self.started {
            self.started = true;
            match &self.behavior {
                Behavior::Exit(status, output) => {
                    self.events = vec![
                        SessionEvent::ExitStatus(*status),
                        SessionEvent::Stdout(output.as_bytes().to_vec()),
                    ];
                }
                Behavior::Cat => {
                    self.writer.wait_for(EOF_CODE).await;
                    let mut input = self.writer.bytes();
                    input.retain(|b| *b != EOF_CODE);
                    self.events = vec![SessionEvent::ExitStatus(0), SessionEvent::Stdout(input)];
                }
                Behavior::UntilInterrupt | Behavior::SlowConnect(_) => {
                    self.writer.wait_for(CTRL_C_CODE).await;
                    self.events = vec![SessionEvent::ExitSignal("INT".into())];
                }
                Behavior::Hang => std::future::pending::<()>().await,
                Behavior::NoStatus => {
                    self.events = vec![SessionEvent::Stdout(b"partial".to_vec())];
                }
                Behavior::Panic => panic!("session blew up"),
                Behavior::Refuse
                | Behavior::FailSession
                | Behavior::FailStdin
                | Behavior::FailPty
                | Behavior::HangConnect => unreachable!(),
            }
        }
        self.events.pop()
    }
}

/// Counts interrupt notifications, keeps results
#[derive(Default)]
struct Recording {
    results: Vec<HostResult>,
    interrupts: usize,
}

impl ResultSink for Recording {
    fn on_result(&mut self, result: HostResult) {
        self.results.push(result);
    }

    fn on_interrupt(&mut self) {
        self.interrupts += 1;
    }
}

fn executor(connector: Arc<MockConnector>) -> Executor {
    Executor::new(connector, CredentialSet::empty())
}

async fn collect(command: &mut Command) -> Vec<HostResult> {
    let mut results = Vec::new();
    for _ in 0..command.total() {
        let result = tokio::time::timeout(Duration::from_secs(5), command.next_result())
            .await
            .expect("result did not arrive")
            .expect("stream closed");
        results.push(result);
    }
    results
}

fn by_name<'a>(results: &'a [HostResult], name: &str) -> &'a HostResult {
    results.iter().find(|r| r.host.name == name).unwrap()
}

#[tokio::test]
async fn test_reachable_and_unreachable_hosts() {
    let connector = MockConnector::new(&[
        ("host-a", Behavior::Exit(0, "hi\n")),
        ("host-b", Behavior::Refuse),
    ]);
    let cluster = Cluster::parse(&["host-a", "host-b"]).unwrap();

    let mut command = executor(connector).run(&cluster, "echo hi", Vec::new()).await;
    assert_eq!(command.total(), 2);
    assert_eq!(command.stdin_count(), 1);

    let results = collect(&mut command).await;
    let a = by_name(&results, "host-a");
    assert_eq!(a.output_lossy(), "hi\n");
    assert!(a.is_success());

    let b = by_name(&results, "host-b");
    assert!(b.output.is_empty());
    assert_eq!(b.error.as_ref().map(ExecError::kind), Some(ErrorKind::Connection));
}

#[tokio::test]
async fn test_one_result_per_host_including_duplicates() {
    let connector = MockConnector::new(&[
        ("ok", Behavior::Exit(0, "x")),
        ("bad", Behavior::Exit(1, "y")),
        ("down", Behavior::Refuse),
        ("pty", Behavior::FailPty),
        ("sess", Behavior::FailSession),
        ("stdin", Behavior::FailStdin),
        ("boom", Behavior::Panic),
    ]);
    let names = ["ok", "bad", "down", "pty", "sess", "stdin", "boom"];
    let specs: Vec<&str> = names
        .iter()
        .cycle()
        .take(35)
        .copied()
        .collect();
    let cluster = Cluster::parse(&specs).unwrap();

    let mut command = executor(connector).run(&cluster, "true", Vec::new()).await;
    // Only ok, bad and boom reach the ready state
    assert_eq!(command.stdin_count(), 15);

    let (_tx, mut interrupts) = mpsc::channel(1);
    let mut seen = Vec::new();
    let outcome = Orchestrator::default()
        .drive(&mut command, &mut interrupts, &mut |r: HostResult| seen.push(r))
        .await;

    assert_eq!(outcome, Outcome::Completed { received: 35 });
    assert_eq!(seen.len(), 35);
    for name in names {
        assert_eq!(seen.iter().filter(|r| r.host.name == name).count(), 5);
    }
    for result in seen.iter().filter(|r| r.host.name == "sess" || r.host.name == "stdin") {
        assert_eq!(
            result.error.as_ref().map(ExecError::kind),
            Some(ErrorKind::SessionSetup)
        );
    }
}

#[tokio::test]
async fn test_session_and_stdin_failures_register_no_writer() {
    let connector = MockConnector::new(&[
        ("sess", Behavior::FailSession),
        ("stdin", Behavior::FailStdin),
        ("ok", Behavior::Exit(0, "up")),
    ]);
    let cluster = Cluster::parse(&["sess", "stdin", "ok"]).unwrap();

    let mut command = executor(connector).run(&cluster, "uptime", Vec::new()).await;
    assert_eq!(command.stdin_count(), 1);

    let results = collect(&mut command).await;
    assert_eq!(results.len(), 3);
    for name in ["sess", "stdin"] {
        let result = by_name(&results, name);
        assert!(result.output.is_empty());
        assert_eq!(
            result.error.as_ref().map(ExecError::kind),
            Some(ErrorKind::SessionSetup)
        );
    }
    assert!(by_name(&results, "ok").is_success());
}

#[tokio::test]
async fn test_setup_failures_register_no_writer() {
    let connector = MockConnector::new(&[
        ("down", Behavior::Refuse),
        ("pty", Behavior::FailPty),
        ("ok", Behavior::Exit(0, "")),
    ]);
    let cluster = Cluster::parse(&["down", "pty", "ok"]).unwrap();

    let mut command = executor(connector).run(&cluster, "true", Vec::new()).await;
    assert_eq!(command.stdin_count(), 1);

    let results = collect(&mut command).await;
    assert_eq!(
        by_name(&results, "pty").error,
        Some(ExecError::PtyRequest("refused".into()))
    );
}

#[tokio::test]
async fn test_input_delivered_then_end_marker() {
    let connector = MockConnector::new(&[("cat", Behavior::Cat)]);
    let cluster = Cluster::parse(&["cat"]).unwrap();

    let mut command = executor(connector.clone())
        .run(&cluster, "cat", b"hello\n".to_vec())
        .await;
    let results = collect(&mut command).await;

    assert_eq!(results[0].output, b"hello\n");
    let (_, writer) = &connector.writers()[0];
    assert_eq!(writer.bytes(), [b"hello\n".as_slice(), [EOF_CODE].as_slice()].concat());
}

#[tokio::test]
async fn test_end_marker_sent_without_input() {
    let connector = MockConnector::new(&[("cat", Behavior::Cat)]);
    let cluster = Cluster::parse(&["cat"]).unwrap();

    let mut command = executor(connector.clone()).run(&cluster, "cat", Vec::new()).await;
    let results = collect(&mut command).await;

    assert!(results[0].output.is_empty());
    assert_eq!(connector.writers()[0].1.bytes(), [EOF_CODE]);
}

#[tokio::test]
async fn test_stop_signal_reaches_every_ready_host_once() {
    let connector = MockConnector::new(&[
        ("a", Behavior::UntilInterrupt),
        ("b", Behavior::UntilInterrupt),
        ("c", Behavior::UntilInterrupt),
        ("down", Behavior::Refuse),
    ]);
    let cluster = Cluster::parse(&["a", "b", "c", "down"]).unwrap();

    let mut command = executor(connector.clone())
        .run(&cluster, "sleep infinity", Vec::new())
        .await;
    assert_eq!(command.stdin_count(), 3);

    let start = Instant::now();
    command.send_stop_signal();
    assert!(start.elapsed() < Duration::from_millis(50));

    let results = collect(&mut command).await;
    for name in ["a", "b", "c"] {
        assert_eq!(
            by_name(&results, name).error,
            Some(ExecError::Signaled {
                signal: "INT".into()
            })
        );
    }
    for (_, writer) in connector.writers() {
        assert_eq!(writer.count(CTRL_C_CODE), 1);
    }
}

#[tokio::test]
async fn test_stop_signal_leaves_emitted_results_alone() {
    let connector = MockConnector::new(&[
        ("fast", Behavior::Exit(0, "done")),
        ("slow", Behavior::UntilInterrupt),
    ]);
    let cluster = Cluster::parse(&["fast", "slow"]).unwrap();

    let mut command = executor(connector).run(&cluster, "x", Vec::new()).await;
    let first = command.next_result().await.unwrap();
    assert_eq!(first.host.name, "fast");

    command.send_stop_signal();
    let second = command.next_result().await.unwrap();

    assert_eq!(first.output_lossy(), "done");
    assert!(first.is_success());
    assert_eq!(second.host.name, "slow");
}

#[tokio::test]
async fn test_nonzero_exit_keeps_output() {
    let connector = MockConnector::new(&[("h", Behavior::Exit(3, "partial"))]);
    let cluster = Cluster::parse(&["h"]).unwrap();

    let mut command = executor(connector).run(&cluster, "x", Vec::new()).await;
    let results = collect(&mut command).await;

    assert_eq!(results[0].output_lossy(), "partial");
    assert_eq!(results[0].error, Some(ExecError::CommandFailed { status: 3 }));
}

#[tokio::test]
async fn test_missing_exit_status() {
    let connector = MockConnector::new(&[("h", Behavior::NoStatus)]);
    let cluster = Cluster::parse(&["h"]).unwrap();

    let mut command = executor(connector).run(&cluster, "x", Vec::new()).await;
    let results = collect(&mut command).await;

    assert_eq!(results[0].output_lossy(), "partial");
    assert_eq!(results[0].error, Some(ExecError::MissingExitStatus));
}

#[tokio::test]
async fn test_panicking_session_still_reports() {
    let connector = MockConnector::new(&[("boom", Behavior::Panic)]);
    let cluster = Cluster::parse(&["boom"]).unwrap();

    let mut command = executor(connector).run(&cluster, "x", Vec::new()).await;
    let results = collect(&mut command).await;

    assert_eq!(
        results[0].error.as_ref().map(ExecError::kind),
        Some(ErrorKind::Task)
    );
}

#[tokio::test]
async fn test_output_cap() {
    let connector = MockConnector::new(&[("h", Behavior::Exit(0, "0123456789"))]);
    let cluster = Cluster::parse(&["h"]).unwrap();

    let mut command = executor(connector)
        .with_options(ExecOptions::default().with_max_output_bytes(4))
        .run(&cluster, "x", Vec::new())
        .await;
    let results = collect(&mut command).await;

    assert!(results[0].output_lossy().starts_with("0123\n[output truncated]"));
    assert!(results[0].is_success());
}

#[tokio::test]
async fn test_password_appended_per_host_only() {
    let connector = MockConnector::new(&[]);
    let cluster = Cluster::new([
        Host::new("with-pw", "bob").with_password("secret"),
        Host::new("without-pw", "bob"),
    ]);

    let mut command = executor(connector.clone()).run(&cluster, "x", Vec::new()).await;
    collect(&mut command).await;

    assert_eq!(connector.offered("with-pw"), Some(1));
    assert_eq!(connector.offered("without-pw"), Some(0));
}

#[tokio::test]
async fn test_empty_cluster_finishes_immediately() {
    let connector = MockConnector::new(&[]);
    let mut command = executor(connector).run(&Cluster::default(), "x", Vec::new()).await;

    assert_eq!(command.total(), 0);
    assert_eq!(command.stdin_count(), 0);

    let (_tx, mut interrupts) = mpsc::channel(1);
    let outcome = tokio::time::timeout(
        Duration::from_millis(500),
        Orchestrator::default().drive(&mut command, &mut interrupts, &mut |_r: HostResult| {}),
    )
    .await
    .expect("loop waited on an empty cluster");

    assert_eq!(outcome, Outcome::Completed { received: 0 });
}

#[tokio::test]
async fn test_grace_period_abandons_stuck_hosts() {
    let connector = MockConnector::new(&[
        ("stuck", Behavior::Hang),
        ("ok", Behavior::Exit(0, "")),
    ]);
    let cluster = Cluster::parse(&["stuck", "ok"]).unwrap();
    let mut command = executor(connector.clone()).run(&cluster, "x", Vec::new()).await;

    let (tx, mut interrupts) = mpsc::channel(4);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(()).await.unwrap();
        // Keep the source open so the loop only ends on the timer
        std::future::pending::<()>().await;
    });

    let start = Instant::now();
    let mut received = Vec::new();
    let outcome = Orchestrator::new(Duration::from_millis(300))
        .drive(&mut command, &mut interrupts, &mut |r: HostResult| received.push(r))
        .await;
    let elapsed = start.elapsed();

    assert_eq!(
        outcome,
        Outcome::TimedOut {
            received: 1,
            outstanding: 1
        }
    );
    assert_eq!(received[0].host.name, "ok");
    assert!(elapsed >= Duration::from_millis(400));
    assert!(elapsed < Duration::from_secs(2));

    let stuck = connector
        .writers()
        .into_iter()
        .find(|(name, _)| name == "stuck")
        .unwrap();
    assert_eq!(stuck.1.count(CTRL_C_CODE), 1);
}

#[tokio::test]
async fn test_repeated_interrupts_do_not_extend_deadline() {
    let connector = MockConnector::new(&[("stuck", Behavior::Hang)]);
    let cluster = Cluster::parse(&["stuck"]).unwrap();
    let mut command = executor(connector.clone()).run(&cluster, "x", Vec::new()).await;

    let (tx, mut interrupts) = mpsc::channel(4);
    tx.send(()).await.unwrap();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(600)).await;
        let _ = tx.send(()).await;
        std::future::pending::<()>().await;
    });

    let start = Instant::now();
    let mut sink = Recording::default();
    let outcome = Orchestrator::new(Duration::from_secs(1))
        .drive(&mut command, &mut interrupts, &mut sink)
        .await;
    let elapsed = start.elapsed();

    assert!(matches!(outcome, Outcome::TimedOut { outstanding: 1, .. }));
    assert_eq!(sink.interrupts, 2);
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(1400));
    assert_eq!(connector.writers()[0].1.count(CTRL_C_CODE), 2);
}

#[tokio::test]
async fn test_interrupt_lets_cooperative_hosts_finish() {
    let connector = MockConnector::new(&[
        ("a", Behavior::UntilInterrupt),
        ("b", Behavior::UntilInterrupt),
    ]);
    let cluster = Cluster::parse(&["a", "b"]).unwrap();
    let mut command = executor(connector).run(&cluster, "x", Vec::new()).await;

    let (tx, mut interrupts) = mpsc::channel(1);
    tx.send(()).await.unwrap();

    let outcome = Orchestrator::new(Duration::from_secs(5))
        .drive(&mut command, &mut interrupts, &mut |_r: HostResult| {})
        .await;

    assert_eq!(outcome, Outcome::Completed { received: 2 });
}

#[tokio::test]
async fn test_interrupt_during_fan_out_stops_ready_hosts() {
    let connector = MockConnector::new(&[
        ("fast", Behavior::UntilInterrupt),
        ("slow", Behavior::SlowConnect(Duration::from_millis(300))),
    ]);
    let cluster = Cluster::parse(&["fast", "slow"]).unwrap();
    let executor = executor(connector.clone());

    // Queued before fan-out can finish
    let (tx, mut interrupts) = mpsc::channel(4);
    tx.send(()).await.unwrap();

    let start = Instant::now();
    let mut sink = Recording::default();
    let outcome = Orchestrator::new(Duration::from_secs(2))
        .execute(&executor, &cluster, "sleep infinity", Vec::new(), &mut interrupts, &mut sink)
        .await;

    assert_eq!(outcome, Outcome::Completed { received: 2 });
    assert_eq!(sink.interrupts, 1);
    assert!(start.elapsed() < Duration::from_secs(2));
    for name in ["fast", "slow"] {
        assert_eq!(
            by_name(&sink.results, name).error,
            Some(ExecError::Signaled {
                signal: "INT".into()
            })
        );
    }
    for (_, writer) in connector.writers() {
        assert_eq!(writer.count(CTRL_C_CODE), 1);
    }
}

#[tokio::test]
async fn test_grace_period_expires_during_fan_out() {
    let connector = MockConnector::new(&[
        ("fast", Behavior::UntilInterrupt),
        ("stuck", Behavior::HangConnect),
    ]);
    let cluster = Cluster::parse(&["fast", "stuck"]).unwrap();
    let executor = executor(connector);

    let (tx, mut interrupts) = mpsc::channel(4);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(()).await.unwrap();
        std::future::pending::<()>().await;
    });

    let start = Instant::now();
    let mut sink = Recording::default();
    let outcome = Orchestrator::new(Duration::from_millis(300))
        .execute(&executor, &cluster, "x", Vec::new(), &mut interrupts, &mut sink)
        .await;
    let elapsed = start.elapsed();

    assert_eq!(
        outcome,
        Outcome::TimedOut {
            received: 0,
            outstanding: 2
        }
    );
    assert_eq!(sink.interrupts, 1);
    assert!(sink.results.is_empty());
    assert!(elapsed >= Duration::from_millis(400));
    assert!(elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn test_execute_without_interrupt_completes() {
    let connector = MockConnector::new(&[
        ("a", Behavior::Exit(0, "a")),
        ("b", Behavior::Exit(0, "b")),
    ]);
    let cluster = Cluster::parse(&["a", "b"]).unwrap();

    let (_tx, mut interrupts) = mpsc::channel(1);
    let mut sink = Recording::default();
    let outcome = Orchestrator::default()
        .execute(&executor(connector), &cluster, "x", Vec::new(), &mut interrupts, &mut sink)
        .await;

    assert_eq!(outcome, Outcome::Completed { received: 2 });
    assert_eq!(sink.interrupts, 0);
}
