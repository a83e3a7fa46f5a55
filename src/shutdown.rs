use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Returns a token cancelled on the first SIGTERM or SIGINT.
///
/// # Errors
///
/// Returns an error if a signal handler cannot be registered.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, stepping down and stopping");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, stepping down and stopping");
            }
        }
        trigger.cancel();
    });

    Ok(token)
}
