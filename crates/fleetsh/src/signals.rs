//! Operator interrupt source
//!
//! SIGINT and SIGTERM each become one interrupt request.

use tokio::sync::mpsc;
use tracing::info;

/// Start listening for termination signals
///
/// # Errors
/// Returns error if a signal handler cannot be installed
pub fn interrupt_requests() -> eyre::Result<mpsc::Receiver<()>> {
    let (tx, rx) = mpsc::channel(8);

    #[cfg(unix)]
    let (mut sigint, mut sigterm) = {
        use tokio::signal::unix::{SignalKind, signal};
        (
            signal(SignalKind::interrupt())?,
            signal(SignalKind::terminate())?,
        )
    };

    tokio::spawn(async move {
        loop {
            #[cfg(unix)]
            let received = tokio::select! {
                s = sigint.recv() => s.is_some(),
                s = sigterm.recv() => s.is_some(),
            };

            #[cfg(not(unix))]
            let received = tokio::signal::ctrl_c().await.is_ok();

            if !received {
                break;
            }
            info!("received termination signal");
            if tx.send(()).await.is_err() {
                break;
            }
        }
    });

    Ok(rx)
}
