//! Signal handling and build cancellation
//!
//! The first SIGINT or SIGTERM cancels the shared token so the running
//! processor can tear down its container, pod, or working directory. A
//! second signal skips the teardown and exits the process immediately.

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Token cancelled by the first SIGINT or SIGTERM
///
/// Spawns a listener task that lives for the rest of the process.
pub fn cancellation_token() -> CancellationToken {
    let token = CancellationToken::new();
    tokio::spawn(listen(token.clone()));
    token
}

async fn listen(token: CancellationToken) {
    let Ok(mut interrupt) = signal(SignalKind::interrupt()) else {
        return;
    };
    let Ok(mut terminate) = signal(SignalKind::terminate()) else {
        return;
    };

    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
    warn!("interrupted, tearing down the running build");
    token.cancel();

    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
    warn!("interrupted again, exiting immediately");
    std::process::exit(130);
}
