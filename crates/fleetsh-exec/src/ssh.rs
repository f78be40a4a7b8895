//! SSH transport using russh crate

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Msg};
use russh::keys::{PrivateKeyWithHashAlg, ssh_key};
use russh::{Channel, ChannelMsg, Disconnect};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, instrument};

use crate::config::{ExecOptions, PtyConfig};
use crate::error::ExecError;
use crate::host::Host;
use crate::keys::{AuthMethod, CredentialSet};
use crate::traits::{Connector, InputWriter, RemoteSession, SessionEvent};

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // No known_hosts checking
        Ok(true)
    }
}

/// Opens russh sessions
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    config: Arc<client::Config>,
}

impl SshConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom russh client configuration
    #[must_use]
    pub fn with_config(config: client::Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    #[instrument(skip(self, host, credentials, options), fields(host = %host))]
    async fn connect(
        &self,
        host: &Host,
        credentials: &CredentialSet,
        options: &ExecOptions,
    ) -> Result<Box<dyn RemoteSession>, ExecError> {
        debug!(methods = credentials.len(), "connecting to SSH");

        let connecting = client::connect(
            self.config.clone(),
            (&host.name[..], host.port),
            SshClientHandler,
        );
        let connected = match options.connect_timeout {
            Some(limit) => timeout(limit, connecting).await.map_err(|_| {
                ExecError::ConnectionFailed(format!("timed out after {limit:?}"))
            })?,
            None => connecting.await,
        };
        let mut handle = connected.map_err(|e| ExecError::ConnectionFailed(e.to_string()))?;

        authenticate(&mut handle, &host.user, credentials).await?;

        info!(host = %host, "SSH connected and authenticated");

        Ok(Box::new(SshSession {
            handle,
            channel: None,
        }))
    }

    fn connector_type(&self) -> &'static str {
        "ssh"
    }
}

/// Offer each method in order until one is accepted
async fn authenticate(
    handle: &mut client::Handle<SshClientHandler>,
    user: &str,
    credentials: &CredentialSet,
) -> Result<(), ExecError> {
    if credentials.is_empty() {
        return Err(ExecError::AuthenticationFailed(
            "no authentication methods available".to_string(),
        ));
    }

    for method in credentials.methods() {
        let auth_res = match method {
            AuthMethod::PublicKey { key, .. } => {
                let hash_alg = handle
                    .best_supported_rsa_hash()
                    .await
                    .ok()
                    .flatten()
                    .flatten();
                handle
                    .authenticate_publickey(user, PrivateKeyWithHashAlg::new(key.clone(), hash_alg))
                    .await
            }
            AuthMethod::Password(password) => {
                handle.authenticate_password(user, password.as_str()).await
            }
        }
        .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;

        if auth_res.success() {
            debug!(method = ?method, "authentication accepted");
            return Ok(());
        }
        debug!(method = ?method, "authentication rejected");
    }

    Err(ExecError::AuthenticationFailed(format!(
        "no method accepted for user {user}"
    )))
}

/// One russh connection with at most one session channel
struct SshSession {
    handle: client::Handle<SshClientHandler>,
    channel: Option<Channel<Msg>>,
}

impl SshSession {
    fn channel(&mut self) -> Result<&mut Channel<Msg>, ExecError> {
        self.channel
            .as_mut()
            .ok_or_else(|| ExecError::SessionSetup("no session channel".to_string()))
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn open_session(&mut self) -> Result<(), ExecError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ExecError::SessionSetup(e.to_string()))?;
        self.channel = Some(channel);
        Ok(())
    }

    async fn input_writer(&mut self) -> Result<Arc<dyn InputWriter>, ExecError> {
        let writer = self.channel()?.make_writer();
        Ok(Arc::new(ChannelInput {
            writer: Mutex::new(Box::pin(writer)),
        }))
    }

    async fn request_pty(&mut self, pty: &PtyConfig) -> Result<(), ExecError> {
        let channel = self.channel()?;
        channel
            .request_pty(true, &pty.term, pty.cols, pty.rows, 0, 0, &pty.modes())
            .await
            .map_err(|e| ExecError::PtyRequest(e.to_string()))?;

        // Nothing else is in flight before exec, so the next reply is ours
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Success) => return Ok(()),
                Some(ChannelMsg::Failure) => {
                    return Err(ExecError::PtyRequest("request refused by server".to_string()));
                }
                Some(ChannelMsg::Close) | None => {
                    return Err(ExecError::PtyRequest("channel closed".to_string()));
                }
                Some(_) => {}
            }
        }
    }

    async fn exec(&mut self, command: &str) -> Result<(), ExecError> {
        debug!(command = %command, "executing remote command");
        self.channel()?
            .exec(true, command)
            .await
            .map_err(|e| ExecError::Io(e.to_string()))
    }

    async fn next_event(&mut self) -> Option<SessionEvent> {
        let channel = self.channel.as_mut()?;

        // ExitStatus often arrives after Eof, so read until Close
        loop {
            match channel.wait().await? {
                ChannelMsg::Data { data } => return Some(SessionEvent::Stdout(data.to_vec())),
                ChannelMsg::ExitStatus { exit_status } => {
                    return Some(SessionEvent::ExitStatus(exit_status));
                }
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    return Some(SessionEvent::ExitSignal(format!("{signal_name:?}")));
                }
                ChannelMsg::Failure => return Some(SessionEvent::Rejected),
                ChannelMsg::Close => return None,
                _ => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            debug!(error = %e, "disconnect failed");
        }
    }
}

/// Remote stdin backed by the session channel
struct ChannelInput {
    writer: Mutex<Pin<Box<dyn AsyncWrite + Send>>>,
}

#[async_trait]
impl InputWriter for ChannelInput {
    async fn write(&self, data: &[u8]) -> Result<(), ExecError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok(())
    }
}
