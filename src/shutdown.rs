use rumqttc::{AsyncClient, Event, EventLoop, Outgoing};
use std::time::Duration;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::time;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::discovery;
use crate::status::StatusManager;
use crate::topics::TopicTree;

pub struct ShutdownHandler {
    sigterm: Signal,
    sigint: Signal,
}

impl ShutdownHandler {
    pub fn new() -> std::io::Result<Self> {
        let sigterm = signal(SignalKind::terminate())?;
        let sigint = signal(SignalKind::interrupt())?;

        Ok(ShutdownHandler { sigterm, sigint })
    }

    pub async fn wait_for_shutdown_signal(&mut self) -> ShutdownSignal {
        tokio::select! {
            _ = self.sigint.recv() => ShutdownSignal::Interrupt,
            _ = self.sigterm.recv() => ShutdownSignal::Terminate,
        }
    }
}

#[derive(Debug)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl ShutdownSignal {
    pub fn description(&self) -> &'static str {
        match self {
            ShutdownSignal::Interrupt => "SIGINT (Ctrl+C) received",
            ShutdownSignal::Terminate => "SIGTERM received (likely from systemctl)",
        }
    }
}

/// Orderly teardown of the MQTT session: unsubscribe, announce offline,
/// retract the discovery device, then flush and disconnect. The last two
/// publishes on a clean shutdown are the offline status and the empty
/// discovery payload, in that order.
pub async fn drain_session(
    client: &AsyncClient,
    eventloop: &mut EventLoop,
    config: &Config,
    topics: &TopicTree,
    status_manager: &StatusManager,
) {
    info!("draining MQTT session...");

    for topic in topics.command_topics(&config.controlled_units) {
        if let Err(e) = client.unsubscribe(&topic).await {
            debug!("unsubscribe from {topic:?} failed: {e}");
        }
    }

    if let Err(e) = status_manager.publish_offline().await {
        error!("failed to publish offline status: {e}");
    }
    if let Err(e) = discovery::retract_device_discovery(client, config).await {
        error!("failed to retract discovery: {e}");
    }

    if let Err(e) = client.disconnect().await {
        debug!("disconnect request failed: {e}");
    }

    // Drive the eventloop until the queued messages and the DISCONNECT have
    // gone out; the broker closing the socket afterwards shows up as an
    // error, which ends the drain.
    let max_polls = 64;
    for _ in 0..max_polls {
        match time::timeout(Duration::from_secs(2), eventloop.poll()).await {
            Ok(Ok(Event::Outgoing(Outgoing::Disconnect))) => {
                debug!("DISCONNECT sent");
            }
            Ok(Ok(event)) => {
                debug!("drain event: {event:?}");
            }
            Ok(Err(e)) => {
                debug!("eventloop closed during drain: {e}");
                break;
            }
            Err(_) => {
                debug!("drain timed out waiting for the broker");
                break;
            }
        }
    }

    info!("MQTT session drained");
}
