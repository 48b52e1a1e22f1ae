//! # OS termination signals.
//!
//! [`wait_for_shutdown_signal`] completes on the first termination signal and
//! reports its name, so the caller can log why it is stopping the child.
//!
//! **Unix:** `SIGINT`, `SIGTERM`, `SIGQUIT`, `SIGHUP` (terminal closed).
//! **Other platforms:** `Ctrl-C` via [`tokio::signal::ctrl_c`].

use std::io;

/// Waits for a termination signal and returns its name.
///
/// Fails only if the signal handlers cannot be registered.
#[cfg(unix)]
pub(crate) async fn wait_for_shutdown_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;
    let mut sighup = signal(SignalKind::hangup())?;

    let name = tokio::select! {
        _ = sigint.recv()  => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
        _ = sighup.recv()  => "SIGHUP",
    };
    Ok(name)
}

/// Waits for a termination signal and returns its name.
#[cfg(not(unix))]
pub(crate) async fn wait_for_shutdown_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
