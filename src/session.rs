//! MQTT session assembly and reconnect pacing.

use std::time::Duration;

use rand::Rng;
use rumqttc::{LastWill, MqttOptions, QoS, TlsConfiguration, Transport};

use crate::config::Config;
use crate::status::STATUS_OFFLINE;
use crate::topics::TopicTree;

const KEEP_ALIVE: Duration = Duration::from_secs(60);

pub const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
pub const BACKOFF_MAX: Duration = Duration::from_secs(32);
const BACKOFF_JITTER: f64 = 0.2;

/// Broker connection options: TLS by default, credentials if configured, and
/// the retained offline will so an ungraceful death flips the status topic.
pub fn mqtt_options(config: &Config, topics: &TopicTree) -> MqttOptions {
    // The client id only has to be unique per broker, not stable.
    let client_id = format!(
        "{}-{}-{}",
        env!("CARGO_PKG_NAME"),
        config.hostname,
        std::process::id()
    );
    let mut options = MqttOptions::new(client_id, &config.mqtt_host, config.mqtt_port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_session(true);
    if config.mqtt_tls {
        options.set_transport(Transport::Tls(TlsConfiguration::default()));
    }
    if let Some(username) = &config.mqtt_username {
        options.set_credentials(
            username.clone(),
            config.mqtt_password.clone().unwrap_or_default(),
        );
    }
    options.set_last_will(LastWill::new(
        topics.status(),
        STATUS_OFFLINE,
        QoS::AtLeastOnce,
        true,
    ));
    options
}

/// Exponential reconnect backoff: 1 s doubling to 32 s, jittered by ±20 % so
/// a fleet of bridges does not reconnect in lockstep.
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            current: BACKOFF_INITIAL,
        }
    }

    pub fn reset(&mut self) {
        self.current = BACKOFF_INITIAL;
    }

    fn next_base(&mut self) -> Duration {
        let base = self.current;
        self.current = (base * 2).min(BACKOFF_MAX);
        base
    }

    pub fn next_delay(&mut self) -> Duration {
        let base = self.next_base();
        let factor = 1.0 + rand::thread_rng().gen_range(-BACKOFF_JITTER..=BACKOFF_JITTER);
        base.mul_f64(factor)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_up_to_the_cap() {
        let mut backoff = Backoff::new();
        let bases: Vec<u64> = (0..7).map(|_| backoff.next_base().as_secs()).collect();
        assert_eq!(bases, vec![1, 2, 4, 8, 16, 32, 32]);
    }

    #[test]
    fn reset_restarts_the_schedule() {
        let mut backoff = Backoff::new();
        backoff.next_base();
        backoff.next_base();
        backoff.reset();
        assert_eq!(backoff.next_base(), BACKOFF_INITIAL);
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let mut backoff = Backoff::new();
        for _ in 0..50 {
            backoff.reset();
            let delay = backoff.next_delay().as_secs_f64();
            assert!((0.8..=1.2).contains(&delay), "delay {delay} out of range");
        }
    }
}
