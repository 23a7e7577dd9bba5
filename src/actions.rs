//! Dispatches inbound commands to the login and service managers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dbus::{LoginManagerProxy, SystemdManagerProxy, UNIT_MODE_REPLACE};
use crate::topics::Command;

/// Remote calls that hang longer than this are abandoned with a warning.
pub const DBUS_CALL_TIMEOUT: Duration = Duration::from_secs(25);

const SHUTDOWN_KIND_POWEROFF: &str = "poweroff";

const ERROR_INTERACTIVE_AUTH_REQUIRED: &str =
    "org.freedesktop.DBus.Error.InteractiveAuthorizationRequired";

const POLKIT_ACTION_POWER_OFF: &str = "org.freedesktop.login1.power-off";
const POLKIT_ACTION_SUSPEND: &str = "org.freedesktop.login1.suspend";
const POLKIT_ACTION_LOCK_SESSIONS: &str = "org.freedesktop.login1.lock-sessions";
const POLKIT_ACTION_MANAGE_UNITS: &str = "org.freedesktop.systemd1.manage-units";

/// Microseconds since the Unix epoch at which a poweroff requested now should
/// fire.
pub fn poweroff_when_usec(received_at: SystemTime, delay: Duration) -> u64 {
    (received_at + delay)
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// One-line hint pointing at the polkit rule that would authorize the action.
fn polkit_hint(action: &str, action_id: &str, user: &str) -> String {
    format!(
        "{action} requires interactive authorization; consider a polkit rule like: \
         polkit.addRule(function(action, subject) {{ \
         if (action.id === \"{action_id}\" && subject.user === \"{user}\") \
         {{ return polkit.Result.YES; }} }});"
    )
}

fn current_user() -> String {
    let uid = nix::unistd::geteuid();
    nix::unistd::User::from_uid(uid)
        .ok()
        .flatten()
        .map(|user| user.name)
        .unwrap_or_else(|| uid.to_string())
}

fn is_interactive_auth_required(error: &zbus::Error) -> bool {
    matches!(
        error,
        zbus::Error::MethodError(name, _, _)
            if name.as_str() == ERROR_INTERACTIVE_AUTH_REQUIRED
    )
}

/// Owns the typed proxies and the per-action policy. Remote failures are
/// contained here; nothing in this module tears down the bridge.
pub struct ActionDispatcher {
    login: LoginManagerProxy<'static>,
    systemd: SystemdManagerProxy<'static>,
    config: Config,
}

impl ActionDispatcher {
    pub fn new(
        login: LoginManagerProxy<'static>,
        systemd: SystemdManagerProxy<'static>,
        config: Config,
    ) -> Self {
        Self {
            login,
            systemd,
            config,
        }
    }

    pub async fn dispatch(&self, command: Command) {
        match command {
            Command::Poweroff => self.schedule_poweroff().await,
            Command::Suspend => self.suspend().await,
            Command::LockAllSessions => self.lock_all_sessions().await,
            Command::StartUnit(unit) => self.unit_action("start", &unit).await,
            Command::StopUnit(unit) => self.unit_action("stop", &unit).await,
            Command::RestartUnit(unit) => self.unit_action("restart", &unit).await,
        }
    }

    /// Every poweroff message re-schedules; the shutdown time slides to the
    /// latest request.
    async fn schedule_poweroff(&self) {
        let when_usec = poweroff_when_usec(SystemTime::now(), self.config.poweroff_delay);
        info!(
            "scheduling {SHUTDOWN_KIND_POWEROFF} in {:?}",
            self.config.poweroff_delay
        );
        let result = timeout(
            DBUS_CALL_TIMEOUT,
            self.login.schedule_shutdown(SHUTDOWN_KIND_POWEROFF, when_usec),
        )
        .await;
        self.report("poweroff", POLKIT_ACTION_POWER_OFF, result);
    }

    async fn suspend(&self) {
        info!("suspending");
        let result = timeout(DBUS_CALL_TIMEOUT, self.login.suspend(false)).await;
        self.report("suspend", POLKIT_ACTION_SUSPEND, result);
    }

    async fn lock_all_sessions(&self) {
        info!("locking all sessions");
        let result = timeout(DBUS_CALL_TIMEOUT, self.login.lock_sessions()).await;
        self.report("lock-all-sessions", POLKIT_ACTION_LOCK_SESSIONS, result);
    }

    async fn unit_action(&self, verb: &str, unit: &str) {
        if !self.config.is_controlled_unit(unit) {
            warn!("unit {unit:?} is not controlled, dropping {verb} command");
            return;
        }
        info!("requesting {verb} of unit {unit:?}");
        let call = async {
            match verb {
                "start" => self.systemd.start_unit(unit, UNIT_MODE_REPLACE).await,
                "stop" => self.systemd.stop_unit(unit, UNIT_MODE_REPLACE).await,
                _ => self.systemd.restart_unit(unit, UNIT_MODE_REPLACE).await,
            }
        };
        match timeout(DBUS_CALL_TIMEOUT, call).await {
            Ok(Ok(job)) => debug!("{verb} of {unit:?} queued as {}", job.as_str()),
            Ok(Err(error)) if is_interactive_auth_required(&error) => {
                warn!(
                    "{}",
                    polkit_hint(
                        &format!("{verb} of {unit:?}"),
                        POLKIT_ACTION_MANAGE_UNITS,
                        &current_user()
                    )
                );
            }
            Ok(Err(error)) => warn!("{verb} of {unit:?} failed: {error}"),
            Err(_) => warn!("{verb} of {unit:?} timed out after {DBUS_CALL_TIMEOUT:?}"),
        }
    }

    fn report(
        &self,
        action: &str,
        polkit_action_id: &str,
        result: Result<zbus::Result<()>, tokio::time::error::Elapsed>,
    ) {
        match result {
            Ok(Ok(())) => debug!("{action} succeeded"),
            Ok(Err(error)) if is_interactive_auth_required(&error) => {
                warn!("{}", polkit_hint(action, polkit_action_id, &current_user()));
            }
            Ok(Err(error)) => warn!("{action} failed: {error}"),
            Err(_) => warn!("{action} timed out after {DBUS_CALL_TIMEOUT:?}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn when_usec_adds_the_delay() {
        let received = UNIX_EPOCH + Duration::from_secs(1_000);
        assert_eq!(
            poweroff_when_usec(received, Duration::from_secs(4)),
            1_004_000_000
        );
    }

    #[test]
    fn when_usec_floors_fractional_micros() {
        let received = UNIX_EPOCH + Duration::from_nanos(1_500);
        assert_eq!(poweroff_when_usec(received, Duration::ZERO), 1);
    }

    #[test]
    fn hint_names_the_polkit_action_and_user() {
        let hint = polkit_hint("poweroff", POLKIT_ACTION_POWER_OFF, "mqtt");
        assert!(hint.contains("polkit"));
        assert!(hint.contains("org.freedesktop.login1.power-off"));
        assert!(hint.contains("\"mqtt\""));
        assert!(!hint.contains('\n'));
    }
}
