//! OS signals turned into a cancellation request.
//!
//! The first SIGINT (or SIGUSR1 on unix) cancels the running iteration and
//! lets cleanup finish. A second one exits the process at once, for when
//! cleanup itself hangs.

use futures::{Stream, StreamExt};
use tracing::{info, warn};

use exv_core::CancelSender;

/// Exit status after a forced abort, as a shell reports SIGINT.
const FORCED_EXIT_CODE: i32 = 130;

/// Relay abort signals for the lifetime of the run.
pub async fn forward(cancel: CancelSender) {
    let signals = match signal_stream() {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to install signal handlers");
            return;
        }
    };
    if relay(signals, cancel).await {
        warn!("second abort signal received, exiting without cleanup");
        std::process::exit(FORCED_EXIT_CODE);
    }
}

/// Request cancellation on the first signal. Returns true once a second
/// signal arrives, false if the stream ends first.
async fn relay<S>(signals: S, cancel: CancelSender) -> bool
where
    S: Stream<Item = ()>,
{
    futures::pin_mut!(signals);
    if signals.next().await.is_none() {
        return false;
    }
    info!("abort signal received, cancelling current iteration (repeat to exit now)");
    if cancel.send(true).is_err() {
        warn!("no run is listening for cancellation");
    }
    signals.next().await.is_some()
}

#[cfg(unix)]
fn signal_stream() -> std::io::Result<impl Stream<Item = ()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let interrupt = signal(SignalKind::interrupt())?;
    let usr1 = signal(SignalKind::user_defined1())?;
    Ok(futures::stream::unfold(
        (interrupt, usr1),
        |(mut interrupt, mut usr1)| async move {
            let got = tokio::select! {
                s = interrupt.recv() => s,
                s = usr1.recv() => s,
            };
            got.map(|()| ((), (interrupt, usr1)))
        },
    ))
}

#[cfg(not(unix))]
fn signal_stream() -> std::io::Result<impl Stream<Item = ()>> {
    Ok(futures::stream::unfold((), |()| async {
        tokio::signal::ctrl_c().await.ok().map(|()| ((), ()))
    }))
}
