// Typed client for the login manager at org.freedesktop.login1

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use zbus::proxy;
use zbus::zvariant::OwnedFd;

#[proxy(
    interface = "org.freedesktop.login1.Manager",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1"
)]
pub trait LoginManager {
    /// Takes an inhibitor lock; the returned file descriptor holds the lock
    /// until it is closed.
    fn inhibit(&self, what: &str, who: &str, why: &str, mode: &str) -> zbus::Result<OwnedFd>;

    /// Schedules a shutdown of the given kind at `usec` microseconds since
    /// the Unix epoch.
    fn schedule_shutdown(&self, kind: &str, usec: u64) -> zbus::Result<()>;

    fn suspend(&self, interactive: bool) -> zbus::Result<()>;

    fn lock_sessions(&self) -> zbus::Result<()>;

    /// Whether the host is currently between `PrepareForShutdown(true)` and
    /// the actual shutdown.
    #[zbus(property)]
    fn preparing_for_shutdown(&self) -> zbus::Result<bool>;

    #[zbus(signal)]
    fn prepare_for_shutdown(&self, start: bool) -> zbus::Result<()>;
}

/// Power state changes observed on the system bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerEvent {
    /// `PrepareForShutdown(b)`: `true` when the host begins shutting down,
    /// `false` when a scheduled shutdown was cancelled.
    PreparingForShutdown(bool),
}

/// Subscribes to `PrepareForShutdown` and forwards each occurrence into the
/// supervisor loop. The returned channel closes when the bus connection is
/// lost, which the supervisor treats as fatal.
pub async fn spawn_power_monitor(
    proxy: LoginManagerProxy<'static>,
) -> zbus::Result<mpsc::Receiver<PowerEvent>> {
    let mut stream = proxy.receive_prepare_for_shutdown().await?;
    let (tx, rx) = mpsc::channel(16);

    tokio::spawn(async move {
        info!("power monitor started, listening for PrepareForShutdown");
        while let Some(signal) = stream.next().await {
            let start = match signal.args() {
                Ok(args) => args.start,
                Err(e) => {
                    error!("failed to parse PrepareForShutdown signal: {e}");
                    continue;
                }
            };
            if tx
                .send(PowerEvent::PreparingForShutdown(start))
                .await
                .is_err()
            {
                return;
            }
        }
        debug!("PrepareForShutdown stream ended");
    });

    Ok(rx)
}
