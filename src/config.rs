use std::time::Duration;

use tracing_subscriber::filter::LevelFilter;

use crate::error::ConfigError;

/// Immutable runtime configuration, assembled once by the CLI adapter.
#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_tls: bool,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub discovery_prefix: String,
    pub discovery_object_id: String,
    pub poweroff_delay: Duration,
    pub monitored_units: Vec<String>,
    pub controlled_units: Vec<String>,
    pub log_level: LevelFilter,
    pub hostname: String,
}

pub const MQTT_PORT_TLS: u16 = 8883;
pub const MQTT_PORT_PLAIN: u16 = 1883;

/// The hostname becomes a topic segment, so it has to stay within the
/// DNS-label alphabet (plus dots for fully qualified names).
pub fn validate_hostname(raw: &str) -> Result<String, ConfigError> {
    let hostname = raw.trim().to_lowercase();
    if hostname.is_empty() {
        return Err(ConfigError::InvalidHostname(raw.to_string()));
    }
    if !hostname
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '.' | '_'))
    {
        return Err(ConfigError::InvalidHostname(raw.to_string()));
    }
    Ok(hostname)
}

pub fn poweroff_delay_from_seconds(seconds: f64) -> Result<Duration, ConfigError> {
    if seconds < 0.0 || !seconds.is_finite() {
        return Err(ConfigError::NegativeDelay(seconds));
    }
    Ok(Duration::from_secs_f64(seconds))
}

impl Config {
    pub fn is_controlled_unit(&self, unit: &str) -> bool {
        self.controlled_units.iter().any(|u| u == unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_is_lowercased() {
        assert_eq!(validate_hostname("MyHost").unwrap(), "myhost");
    }

    #[test]
    fn hostname_allows_fqdn() {
        assert_eq!(
            validate_hostname("node-3.example.org").unwrap(),
            "node-3.example.org"
        );
    }

    #[test]
    fn hostname_rejects_topic_metacharacters() {
        for raw in ["", "host/name", "host name", "host+name", "host#"] {
            assert!(validate_hostname(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn delay_accepts_fractional_seconds() {
        assert_eq!(
            poweroff_delay_from_seconds(2.5).unwrap(),
            Duration::from_millis(2500)
        );
        assert_eq!(poweroff_delay_from_seconds(0.0).unwrap(), Duration::ZERO);
    }

    #[test]
    fn delay_rejects_negative() {
        assert!(poweroff_delay_from_seconds(-1.0).is_err());
        assert!(poweroff_delay_from_seconds(f64::NAN).is_err());
    }
}
