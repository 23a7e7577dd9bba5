// System-bus side of the bridge: logind and systemd clients, and the
// inhibitor lock handed out by logind.

pub mod inhibitor;
pub mod login;
pub mod systemd;

pub use inhibitor::ShutdownInhibitor;
pub use login::{spawn_power_monitor, LoginManagerProxy, PowerEvent};
pub use systemd::{SystemdManagerProxy, SystemdUnitProxy, UNIT_MODE_REPLACE};
