//! Execution engine: fan a command out across a cluster

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument};

use crate::command::Command;
use crate::config::ExecOptions;
use crate::error::ExecError;
use crate::host::Cluster;
use crate::keys::CredentialSet;
use crate::result::HostResult;
use crate::runner::run_host;
use crate::ssh::SshConnector;
use crate::traits::Connector;

/// Runs one command concurrently on every host of a cluster
pub struct Executor {
    connector: Arc<dyn Connector>,
    credentials: CredentialSet,
    options: Arc<ExecOptions>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("connector", &self.connector.connector_type())
            .field("credentials", &self.credentials)
            .field("options", &self.options)
            .finish()
    }
}

impl Executor {
    /// Create an executor over an arbitrary transport
    pub fn new(connector: Arc<dyn Connector>, credentials: CredentialSet) -> Self {
        Self {
            connector,
            credentials,
            options: Arc::new(ExecOptions::default()),
        }
    }

    /// Create an executor over SSH
    #[must_use]
    pub fn ssh(credentials: CredentialSet) -> Self {
        Self::new(Arc::new(SshConnector::new()), credentials)
    }

    /// Set run options
    #[must_use]
    pub fn with_options(mut self, options: ExecOptions) -> Self {
        self.options = Arc::new(options);
        self
    }

    /// Launch `command` on every host of `cluster`
    ///
    /// Returns once every host has either reached the ready-to-execute state
    /// or failed trying, so a stop signal sent right away reaches every host
    /// able to receive one. Results keep arriving on the returned handle.
    #[instrument(skip(self, cluster, input), fields(hosts = cluster.len()))]
    pub async fn run(&self, cluster: &Cluster, command: &str, input: impl Into<Arc<[u8]>>) -> Command {
        let total = cluster.len();
        let command: Arc<str> = Arc::from(command);
        let input = input.into();

        // One slot per host so no producer ever waits on the consumer
        let (results_tx, results_rx) = mpsc::channel(total.max(1));
        let mut slots = Vec::with_capacity(total);

        for host in cluster.hosts() {
            let (slot_tx, slot_rx) = oneshot::channel();
            slots.push(slot_rx);

            let host = host.clone();
            let inner = run_host(
                self.connector.clone(),
                host.clone(),
                self.credentials.for_host(&host),
                command.clone(),
                input.clone(),
                self.options.clone(),
                slot_tx,
            );
            let results_tx = results_tx.clone();

            tokio::spawn(async move {
                let result = match tokio::spawn(inner).await {
                    Ok(result) => result,
                    Err(e) => {
                        error!(host = %host, error = %e, "host task failed");
                        HostResult::failure(host, ExecError::TaskFailed(e.to_string()))
                    }
                };
                if results_tx.send(result).await.is_err() {
                    debug!("result stream dropped before delivery");
                }
            });
        }

        let stdins: Vec<_> = join_all(slots)
            .await
            .into_iter()
            .filter_map(|slot| slot.ok().flatten())
            .collect();

        info!(hosts = total, ready = stdins.len(), "fan-out complete");

        Command::new(results_rx, stdins, total)
    }
}
