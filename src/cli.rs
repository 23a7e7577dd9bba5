//! Command-line adapter: parses the flag surface and assembles the immutable
//! runtime configuration.

use std::fs;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing_subscriber::filter::LevelFilter;

use crate::config::{
    poweroff_delay_from_seconds, validate_hostname, Config, MQTT_PORT_PLAIN, MQTT_PORT_TLS,
};
use crate::discovery::sanitize_object_id;
use crate::error::ConfigError;

#[derive(Debug, Parser)]
#[command(name = env!("CARGO_PKG_NAME"), version, about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Args {
    /// Hostname or address of the MQTT broker
    #[arg(long, value_name = "HOST")]
    pub mqtt_host: String,

    /// Broker port; defaults to 8883, or 1883 with --mqtt-disable-tls
    #[arg(long, value_name = "PORT")]
    pub mqtt_port: Option<u16>,

    /// Connect without TLS
    #[arg(long)]
    pub mqtt_disable_tls: bool,

    #[arg(long, value_name = "NAME")]
    pub mqtt_username: Option<String>,

    #[arg(long, value_name = "PASSWORD", conflicts_with = "mqtt_password_file")]
    pub mqtt_password: Option<String>,

    /// Read the broker password from a file
    #[arg(long, value_name = "PATH")]
    pub mqtt_password_file: Option<PathBuf>,

    /// Topic prefix the home-automation controller listens on
    #[arg(long, value_name = "PREFIX", default_value = "homeassistant")]
    pub homeassistant_discovery_prefix: String,

    /// Object id in the discovery topic; defaults to the hostname
    #[arg(long, value_name = "ID")]
    pub homeassistant_discovery_object_id: Option<String>,

    /// Seconds between a poweroff request and the scheduled shutdown
    #[arg(long, value_name = "SECONDS", default_value_t = 4.0, allow_negative_numbers = true)]
    pub poweroff_delay_seconds: f64,

    /// System unit to report ActiveState for (repeatable)
    #[arg(long = "monitor-system-unit", value_name = "UNIT")]
    pub monitor_system_units: Vec<String>,

    /// System unit accepting start/stop/restart commands (repeatable)
    #[arg(long = "control-system-unit", value_name = "UNIT")]
    pub control_system_units: Vec<String>,

    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// tracing has no `critical`; the two most severe CLI levels collapse
    /// onto `error`.
    pub fn level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Error | LogLevel::Critical => LevelFilter::ERROR,
        }
    }
}

/// Password files commonly end in a newline that is not part of the secret.
fn trim_password(raw: &str) -> String {
    raw.trim_end_matches(['\r', '\n']).to_string()
}

fn local_hostname() -> Result<String, ConfigError> {
    let raw = sysinfo::System::host_name().ok_or(ConfigError::HostnameUnavailable)?;
    validate_hostname(&raw)
}

impl Args {
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let hostname = local_hostname()?;

        let mqtt_password = match (self.mqtt_password, &self.mqtt_password_file) {
            (Some(password), _) => Some(password),
            (None, Some(path)) => {
                let raw = fs::read_to_string(path).map_err(|source| ConfigError::PasswordFile {
                    path: path.display().to_string(),
                    source,
                })?;
                Some(trim_password(&raw))
            }
            (None, None) => None,
        };
        if mqtt_password.is_some() && self.mqtt_username.is_none() {
            return Err(ConfigError::PasswordWithoutUsername);
        }

        let mqtt_tls = !self.mqtt_disable_tls;
        let mqtt_port = self
            .mqtt_port
            .unwrap_or(if mqtt_tls { MQTT_PORT_TLS } else { MQTT_PORT_PLAIN });

        let discovery_object_id = sanitize_object_id(
            self.homeassistant_discovery_object_id
                .as_deref()
                .unwrap_or(&hostname),
        );

        Ok(Config {
            mqtt_host: self.mqtt_host,
            mqtt_port,
            mqtt_tls,
            mqtt_username: self.mqtt_username,
            mqtt_password,
            discovery_prefix: self.homeassistant_discovery_prefix,
            discovery_object_id,
            poweroff_delay: poweroff_delay_from_seconds(self.poweroff_delay_seconds)?,
            monitored_units: self.monitor_system_units,
            controlled_units: self.control_system_units,
            log_level: self.log_level.level_filter(),
            hostname,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("systemctl-mqtt").chain(args.iter().copied()))
    }

    #[test]
    fn requires_the_broker_host() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["--mqtt-host", "broker.local"]).is_ok());
    }

    #[test]
    fn unit_flags_are_repeatable() {
        let args = parse(&[
            "--mqtt-host",
            "broker.local",
            "--monitor-system-unit",
            "ssh.service",
            "--monitor-system-unit",
            "cron.service",
            "--control-system-unit",
            "foo.service",
        ])
        .unwrap();
        assert_eq!(args.monitor_system_units, ["ssh.service", "cron.service"]);
        assert_eq!(args.control_system_units, ["foo.service"]);
    }

    #[test]
    fn password_and_password_file_conflict() {
        let result = parse(&[
            "--mqtt-host",
            "broker.local",
            "--mqtt-password",
            "secret",
            "--mqtt-password-file",
            "/tmp/pw",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn log_level_accepts_the_five_names() {
        for (name, filter) in [
            ("debug", LevelFilter::DEBUG),
            ("info", LevelFilter::INFO),
            ("warning", LevelFilter::WARN),
            ("error", LevelFilter::ERROR),
            ("critical", LevelFilter::ERROR),
        ] {
            let args = parse(&["--mqtt-host", "b", "--log-level", name]).unwrap();
            assert_eq!(args.log_level.level_filter(), filter);
        }
        assert!(parse(&["--mqtt-host", "b", "--log-level", "verbose"]).is_err());
    }

    #[test]
    fn password_trimming_strips_trailing_newlines_only() {
        assert_eq!(trim_password("secret\n"), "secret");
        assert_eq!(trim_password("secret\r\n"), "secret");
        assert_eq!(trim_password(" secret "), " secret ");
        assert_eq!(trim_password("se\ncret"), "se\ncret");
    }

    #[test]
    fn negative_delay_is_parsed_then_rejected() {
        let args = parse(&["--mqtt-host", "b", "--poweroff-delay-seconds", "-1"]).unwrap();
        assert!(poweroff_delay_from_seconds(args.poweroff_delay_seconds).is_err());
    }
}
