//! Topic layout: everything lives under `systemctl/<hostname>/`.

pub const TOPIC_ROOT: &str = "systemctl";

const SUFFIX_POWEROFF: &str = "poweroff";
const SUFFIX_SUSPEND: &str = "suspend";
const SUFFIX_LOCK_ALL_SESSIONS: &str = "lock-all-sessions";
const UNIT_PREFIX: &str = "unit/system/";

/// A command arriving on one of the subscribed topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Poweroff,
    Suspend,
    LockAllSessions,
    StartUnit(String),
    StopUnit(String),
    RestartUnit(String),
}

/// Builds and parses the per-host topic tree. The hostname is captured once
/// at startup and never re-read.
#[derive(Debug, Clone)]
pub struct TopicTree {
    base: String,
}

impl TopicTree {
    pub fn new(hostname: &str) -> Self {
        Self {
            base: format!("{TOPIC_ROOT}/{hostname}"),
        }
    }

    pub fn status(&self) -> String {
        format!("{}/status", self.base)
    }

    pub fn preparing_for_shutdown(&self) -> String {
        format!("{}/preparing-for-shutdown", self.base)
    }

    pub fn poweroff(&self) -> String {
        format!("{}/{SUFFIX_POWEROFF}", self.base)
    }

    pub fn suspend(&self) -> String {
        format!("{}/{SUFFIX_SUSPEND}", self.base)
    }

    pub fn lock_all_sessions(&self) -> String {
        format!("{}/{SUFFIX_LOCK_ALL_SESSIONS}", self.base)
    }

    pub fn unit_active_state(&self, unit: &str) -> String {
        format!("{}/{UNIT_PREFIX}{unit}/active-state", self.base)
    }

    pub fn unit_start(&self, unit: &str) -> String {
        format!("{}/{UNIT_PREFIX}{unit}/start", self.base)
    }

    pub fn unit_stop(&self, unit: &str) -> String {
        format!("{}/{UNIT_PREFIX}{unit}/stop", self.base)
    }

    pub fn unit_restart(&self, unit: &str) -> String {
        format!("{}/{UNIT_PREFIX}{unit}/restart", self.base)
    }

    /// The full inbound subscription set for this host.
    pub fn command_topics(&self, controlled_units: &[String]) -> Vec<String> {
        let mut topics = vec![
            self.poweroff(),
            self.suspend(),
            self.lock_all_sessions(),
        ];
        for unit in controlled_units {
            topics.push(self.unit_start(unit));
            topics.push(self.unit_stop(unit));
            topics.push(self.unit_restart(unit));
        }
        topics
    }

    /// Maps an inbound topic back to its command. Returns `None` for topics
    /// outside this host's prefix or with an unknown suffix.
    pub fn parse_command(&self, topic: &str) -> Option<Command> {
        let suffix = topic
            .strip_prefix(self.base.as_str())?
            .strip_prefix('/')?;
        match suffix {
            SUFFIX_POWEROFF => return Some(Command::Poweroff),
            SUFFIX_SUSPEND => return Some(Command::Suspend),
            SUFFIX_LOCK_ALL_SESSIONS => return Some(Command::LockAllSessions),
            _ => {}
        }
        let rest = suffix.strip_prefix(UNIT_PREFIX)?;
        let (unit, verb) = rest.rsplit_once('/')?;
        if unit.is_empty() {
            return None;
        }
        match verb {
            "start" => Some(Command::StartUnit(unit.to_string())),
            "stop" => Some(Command::StopUnit(unit.to_string())),
            "restart" => Some(Command::RestartUnit(unit.to_string())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> TopicTree {
        TopicTree::new("h1")
    }

    #[test]
    fn outbound_topics() {
        let t = tree();
        assert_eq!(t.status(), "systemctl/h1/status");
        assert_eq!(
            t.preparing_for_shutdown(),
            "systemctl/h1/preparing-for-shutdown"
        );
        assert_eq!(
            t.unit_active_state("ssh.service"),
            "systemctl/h1/unit/system/ssh.service/active-state"
        );
    }

    #[test]
    fn subscription_set_covers_controlled_units() {
        let topics = tree().command_topics(&["foo.service".to_string()]);
        assert_eq!(
            topics,
            vec![
                "systemctl/h1/poweroff",
                "systemctl/h1/suspend",
                "systemctl/h1/lock-all-sessions",
                "systemctl/h1/unit/system/foo.service/start",
                "systemctl/h1/unit/system/foo.service/stop",
                "systemctl/h1/unit/system/foo.service/restart",
            ]
        );
    }

    #[test]
    fn parses_power_commands() {
        let t = tree();
        assert_eq!(t.parse_command("systemctl/h1/poweroff"), Some(Command::Poweroff));
        assert_eq!(t.parse_command("systemctl/h1/suspend"), Some(Command::Suspend));
        assert_eq!(
            t.parse_command("systemctl/h1/lock-all-sessions"),
            Some(Command::LockAllSessions)
        );
    }

    #[test]
    fn parses_unit_commands() {
        let t = tree();
        assert_eq!(
            t.parse_command("systemctl/h1/unit/system/foo.service/restart"),
            Some(Command::RestartUnit("foo.service".to_string()))
        );
        assert_eq!(
            t.parse_command("systemctl/h1/unit/system/bar.service/stop"),
            Some(Command::StopUnit("bar.service".to_string()))
        );
    }

    #[test]
    fn rejects_foreign_and_malformed_topics() {
        let t = tree();
        assert_eq!(t.parse_command("systemctl/h2/poweroff"), None);
        assert_eq!(t.parse_command("systemctl/h1/reboot"), None);
        assert_eq!(t.parse_command("systemctl/h1/unit/system/foo.service"), None);
        assert_eq!(t.parse_command("systemctl/h1/unit/system//restart"), None);
        assert_eq!(
            t.parse_command("systemctl/h1/unit/user/foo.service/restart"),
            None
        );
    }
}
