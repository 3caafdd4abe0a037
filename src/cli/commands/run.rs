//! Run command - supervise workers until a shutdown signal.

use crate::config::Settings;
use crate::watcher::{Supervisor, SupervisorOptions};

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("[run] failed to listen for ctrl+c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("[run] failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

pub fn supervisor_options(settings: &Settings) -> SupervisorOptions {
    SupervisorOptions {
        poll_interval: settings.poll_interval,
        poll_strategy: settings.poll_strategy,
        shutdown_grace: settings.shutdown_grace,
    }
}

/// Run until signalled. Returns `false` if shutdown exceeded its grace
/// period.
pub async fn run(settings: &Settings) -> anyhow::Result<bool> {
    settings.create_layout()?;
    let mut supervisor = Supervisor::new(settings.watch_specs(), supervisor_options(settings));

    #[cfg(feature = "http-server")]
    let http = {
        let port = settings.port;
        let ct = supervisor.cancellation_token().child_token();
        tokio::spawn(async move {
            if let Err(e) = crate::health::serve(port, ct).await {
                tracing::error!("[http] health endpoint failed: {e}");
            }
        })
    };

    supervisor.start();
    crate::log_event!("run", "ready", "press Ctrl+C to stop");

    shutdown_signal().await;
    crate::log_event!("run", "shutdown signal received");

    let clean = supervisor.shutdown().await;

    #[cfg(feature = "http-server")]
    {
        if let Err(e) = http.await {
            tracing::error!("[http] health task failed: {e}");
        }
    }

    Ok(clean)
}
