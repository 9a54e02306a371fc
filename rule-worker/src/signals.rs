use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::SignalKind;
use tracing::{error, info};

/// Resolve on SIGINT or SIGTERM.
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = match tokio::signal::unix::signal(SignalKind::terminate()) {
        Ok(sigterm) => Some(sigterm),
        Err(e) => {
            error!(
                "failed to install SIGTERM handler, only SIGINT will stop the process: {}",
                e
            );
            None
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        Some(_) = async {
            match sigterm.as_mut() {
                Some(sigterm) => sigterm.recv().await,
                None => std::future::pending().await,
            }
        } => info!("received SIGTERM"),
    }
}

/// Resolve when the operator enters a line on stdin. A closed stdin never resolves.
pub async fn wait_for_stdin_line() {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    match lines.next_line().await {
        Ok(Some(_)) => info!("received stop command on stdin"),
        Ok(None) => std::future::pending().await,
        Err(e) => {
            error!("failed to read stdin, ignoring it as a shutdown trigger: {}", e);
            std::future::pending().await
        }
    }
}
