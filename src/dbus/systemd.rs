// Typed client for the service manager at org.freedesktop.systemd1

use zbus::proxy;
use zbus::zvariant::OwnedObjectPath;
use zbus::Connection;

/// Job mode passed to all unit lifecycle calls.
pub const UNIT_MODE_REPLACE: &str = "replace";

#[proxy(
    interface = "org.freedesktop.systemd1.Manager",
    default_service = "org.freedesktop.systemd1",
    default_path = "/org/freedesktop/systemd1"
)]
pub trait SystemdManager {
    /// Resolves the object path of a loaded unit.
    fn get_unit(&self, name: &str) -> zbus::Result<OwnedObjectPath>;

    fn start_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    fn stop_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    fn restart_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;
}

#[proxy(
    interface = "org.freedesktop.systemd1.Unit",
    default_service = "org.freedesktop.systemd1",
    assume_defaults = false
)]
pub trait SystemdUnit {
    #[zbus(property)]
    fn active_state(&self) -> zbus::Result<String>;
}

/// Builds a unit proxy for a resolved object path. Property caching is on by
/// default, which is what drives the PropertiesChanged subscription.
pub async fn unit_proxy(
    connection: &Connection,
    path: OwnedObjectPath,
) -> zbus::Result<SystemdUnitProxy<'static>> {
    SystemdUnitProxy::builder(connection).path(path)?.build().await
}
