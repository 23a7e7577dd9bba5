use crate::config::Config;
use crate::status::{STATUS_OFFLINE, STATUS_ONLINE};
use crate::topics::TopicTree;
use rumqttc::{AsyncClient, QoS};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Component types that can be part of a device discovery
#[derive(Serialize, Clone)]
#[serde(tag = "p", rename_all = "snake_case")]
pub enum ComponentType {
    Button {
        #[serde(rename = "cmd_t")]
        command_topic: String,
    },
    Sensor {
        #[serde(rename = "stat_t")]
        state_topic: String,
    },
    BinarySensor {
        #[serde(rename = "stat_t")]
        state_topic: String,
        #[serde(rename = "pl_on")]
        payload_on: String,
        #[serde(rename = "pl_off")]
        payload_off: String,
    },
}

/// A Home Assistant component with metadata
#[derive(Serialize, Clone)]
pub struct HomeAssistantComponent {
    pub name: String,
    pub unique_id: String,
    #[serde(flatten)]
    pub component_type: ComponentType,
}

impl HomeAssistantComponent {
    pub fn button(name: String, unique_id: String, command_topic: String) -> Self {
        Self {
            name,
            unique_id,
            component_type: ComponentType::Button { command_topic },
        }
    }

    pub fn sensor(name: String, unique_id: String, state_topic: String) -> Self {
        Self {
            name,
            unique_id,
            component_type: ComponentType::Sensor { state_topic },
        }
    }

    pub fn binary_sensor(
        name: String,
        unique_id: String,
        state_topic: String,
        payload_on: String,
        payload_off: String,
    ) -> Self {
        Self {
            name,
            unique_id,
            component_type: ComponentType::BinarySensor {
                state_topic,
                payload_on,
                payload_off,
            },
        }
    }
}

/// Main device discovery payload
#[derive(Serialize)]
pub struct HomeAssistantDeviceDiscovery {
    #[serde(rename = "dev")]
    pub device: HomeAssistantDevice,
    #[serde(rename = "o")]
    pub origin: HomeAssistantOrigin,
    #[serde(rename = "avty")]
    pub availability: Vec<HomeAssistantAvailability>,
    #[serde(rename = "cmps")]
    pub components: HashMap<String, HomeAssistantComponent>,
}

#[derive(Serialize)]
pub struct HomeAssistantOrigin {
    pub name: String,
    #[serde(rename = "sw")]
    pub sw_version: String,
    #[serde(rename = "url")]
    pub support_url: String,
}

#[derive(Serialize, Clone)]
pub struct HomeAssistantDevice {
    #[serde(rename = "ids")]
    pub identifiers: Vec<String>,
    pub name: String,
}

#[derive(Serialize, Clone)]
pub struct HomeAssistantAvailability {
    pub topic: String,
    pub payload_available: String,
    pub payload_not_available: String,
}

/// Object ids and component keys may only contain `[a-z0-9_]`; everything
/// else becomes an underscore.
pub fn sanitize_object_id(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub fn device_discovery_topic(config: &Config) -> String {
    format!(
        "{}/device/{}/config",
        config.discovery_prefix, config.discovery_object_id
    )
}

pub fn build_device_discovery(config: &Config, topics: &TopicTree) -> HomeAssistantDeviceDiscovery {
    let unique_id = |key: &str| format!("{}_{key}", config.discovery_object_id);

    let mut components = HashMap::new();
    components.insert(
        "logind_poweroff".to_string(),
        HomeAssistantComponent::button(
            "poweroff".to_string(),
            unique_id("logind_poweroff"),
            topics.poweroff(),
        ),
    );
    components.insert(
        "logind_suspend".to_string(),
        HomeAssistantComponent::button(
            "suspend".to_string(),
            unique_id("logind_suspend"),
            topics.suspend(),
        ),
    );
    components.insert(
        "logind_lock_all_sessions".to_string(),
        HomeAssistantComponent::button(
            "lock all sessions".to_string(),
            unique_id("logind_lock_all_sessions"),
            topics.lock_all_sessions(),
        ),
    );
    components.insert(
        "logind_preparing_for_shutdown".to_string(),
        HomeAssistantComponent::binary_sensor(
            "preparing for shutdown".to_string(),
            unique_id("logind_preparing_for_shutdown"),
            topics.preparing_for_shutdown(),
            "true".to_string(),
            "false".to_string(),
        ),
    );
    for unit in &config.monitored_units {
        let key = format!("unit_system_{}_active_state", sanitize_object_id(unit));
        components.insert(
            key.clone(),
            HomeAssistantComponent::sensor(
                format!("{unit} active state"),
                unique_id(&key),
                topics.unit_active_state(unit),
            ),
        );
    }
    for unit in &config.controlled_units {
        let key = format!("unit_system_{}_restart", sanitize_object_id(unit));
        components.insert(
            key.clone(),
            HomeAssistantComponent::button(
                format!("{unit} restart"),
                unique_id(&key),
                topics.unit_restart(unit),
            ),
        );
    }

    HomeAssistantDeviceDiscovery {
        device: HomeAssistantDevice {
            identifiers: vec![config.hostname.clone()],
            name: config.hostname.clone(),
        },
        // The origin block tells the controller which program announced the
        // device; all three fields come from Cargo metadata.
        origin: HomeAssistantOrigin {
            name: env!("CARGO_PKG_NAME").to_string(),
            sw_version: env!("CARGO_PKG_VERSION").to_string(),
            support_url: env!("CARGO_PKG_REPOSITORY").to_string(),
        },
        availability: vec![HomeAssistantAvailability {
            topic: topics.status(),
            payload_available: STATUS_ONLINE.to_string(),
            payload_not_available: STATUS_OFFLINE.to_string(),
        }],
        components,
    }
}

/// Announces the device on every successful connect. QoS 0, unretained: the
/// controller re-reads it from the live session.
pub async fn publish_device_discovery(
    client: &AsyncClient,
    config: &Config,
    topics: &TopicTree,
) -> anyhow::Result<()> {
    let discovery = build_device_discovery(config, topics);
    let discovery_json = serde_json::to_string(&discovery)?;
    let discovery_topic = device_discovery_topic(config);

    debug!("publishing discovery to: {discovery_topic}");
    debug!("discovery payload: {discovery_json}");
    client
        .publish(discovery_topic, QoS::AtMostOnce, false, discovery_json)
        .await?;

    Ok(())
}

/// An empty payload on the config topic removes the device from the
/// controller.
pub async fn retract_device_discovery(client: &AsyncClient, config: &Config) -> anyhow::Result<()> {
    let discovery_topic = device_discovery_topic(config);
    debug!("retracting discovery at: {discovery_topic}");
    client
        .publish(discovery_topic, QoS::AtMostOnce, false, "")
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::time::Duration;

    fn config() -> Config {
        Config {
            mqtt_host: "broker.local".to_string(),
            mqtt_port: 8883,
            mqtt_tls: true,
            mqtt_username: None,
            mqtt_password: None,
            discovery_prefix: "homeassistant".to_string(),
            discovery_object_id: "h1".to_string(),
            poweroff_delay: Duration::from_secs(4),
            monitored_units: vec!["ssh.service".to_string()],
            controlled_units: vec!["foo.service".to_string()],
            log_level: tracing_subscriber::filter::LevelFilter::INFO,
            hostname: "h1".to_string(),
        }
    }

    #[test]
    fn sanitizes_object_ids() {
        assert_eq!(sanitize_object_id("My-Host.lan"), "my_host_lan");
        assert_eq!(sanitize_object_id("ssh.service"), "ssh_service");
        assert_eq!(sanitize_object_id("plain_09"), "plain_09");
    }

    #[test]
    fn discovery_topic_uses_object_id() {
        assert_eq!(
            device_discovery_topic(&config()),
            "homeassistant/device/h1/config"
        );
    }

    #[test]
    fn document_announces_all_capabilities() {
        let cfg = config();
        let doc = build_device_discovery(&cfg, &TopicTree::new(&cfg.hostname));
        let json: Value = serde_json::from_str(&serde_json::to_string(&doc).unwrap()).unwrap();

        assert_eq!(json["dev"]["ids"], serde_json::json!(["h1"]));
        assert_eq!(json["dev"]["name"], "h1");
        assert_eq!(json["o"]["name"], env!("CARGO_PKG_NAME"));
        assert_eq!(json["avty"][0]["topic"], "systemctl/h1/status");
        assert_eq!(json["avty"][0]["payload_available"], "online");

        let cmps = json["cmps"].as_object().unwrap();
        assert_eq!(cmps.len(), 6);
        assert_eq!(cmps["logind_poweroff"]["p"], "button");
        assert_eq!(cmps["logind_poweroff"]["cmd_t"], "systemctl/h1/poweroff");
        assert_eq!(cmps["logind_preparing_for_shutdown"]["p"], "binary_sensor");
        assert_eq!(cmps["logind_preparing_for_shutdown"]["pl_on"], "true");
        assert_eq!(cmps["logind_preparing_for_shutdown"]["pl_off"], "false");
        assert_eq!(
            cmps["unit_system_ssh_service_active_state"]["stat_t"],
            "systemctl/h1/unit/system/ssh.service/active-state"
        );
        assert_eq!(
            cmps["unit_system_foo_service_restart"]["cmd_t"],
            "systemctl/h1/unit/system/foo.service/restart"
        );
    }

    #[test]
    fn unique_ids_carry_the_object_id_prefix() {
        let cfg = config();
        let doc = build_device_discovery(&cfg, &TopicTree::new(&cfg.hostname));
        for (key, component) in &doc.components {
            assert_eq!(component.unique_id, format!("h1_{key}"));
        }
    }
}
