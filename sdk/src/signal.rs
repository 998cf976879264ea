use {
    anyhow::{Context, Result},
    tokio::signal::ctrl_c,
};

/// Suspends until the process is asked to shut down; resolves to the name
/// of the signal that fired.
pub async fn shutdown_signal() -> Result<&'static str> {
    let mut sigterm = sigterm()?;
    tokio::select! {
        result = ctrl_c() => {
            result.context("failed to install sigint signal handler")?;
            Ok("SIGINT")
        }
        () = sigterm.recv() => Ok("SIGTERM"),
    }
}

#[cfg(target_family = "unix")]
fn sigterm() -> Result<SigtermFuture> {
    use tokio::signal::unix::{SignalKind, signal};
    let inner =
        signal(SignalKind::terminate()).context("failed to install sigterm signal handler")?;
    Ok(SigtermFuture { inner })
}

#[cfg(target_family = "unix")]
struct SigtermFuture {
    inner: tokio::signal::unix::Signal,
}

#[cfg(target_family = "unix")]
impl SigtermFuture {
    async fn recv(&mut self) {
        self.inner.recv().await;
    }
}

#[cfg(not(target_family = "unix"))]
fn sigterm() -> Result<SigtermFuture> {
    Ok(SigtermFuture)
}

#[cfg(not(target_family = "unix"))]
struct SigtermFuture;

#[cfg(not(target_family = "unix"))]
impl SigtermFuture {
    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}
