use clap::Parser;
use rumqttc::{AsyncClient, Event, Packet, Publish, QoS};
use std::process::ExitCode;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, error, info, trace, warn};
use zbus::Connection;

pub mod actions;
pub mod cli;
pub mod config;
pub mod dbus;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod session;
pub mod shutdown;
pub mod status;
pub mod topics;

use actions::ActionDispatcher;
use config::Config;
use dbus::{
    spawn_power_monitor, LoginManagerProxy, PowerEvent, ShutdownInhibitor, SystemdManagerProxy,
};
use error::FatalError;
use monitor::{ActiveStateCache, UnitStateEvent};
use session::Backoff;
use shutdown::ShutdownHandler;
use status::StatusManager;
use topics::TopicTree;

/// Runs once per successful CONNACK: birth first, then the subscription set,
/// the discovery announcement, and the current state of every monitored unit.
async fn bootstrap_session(
    client: &AsyncClient,
    config: &Config,
    topics: &TopicTree,
    status_manager: &StatusManager,
    unit_states: &mut ActiveStateCache,
) -> anyhow::Result<()> {
    status_manager.publish_online().await?;

    for topic in topics.command_topics(&config.controlled_units) {
        client.subscribe(topic, QoS::AtLeastOnce).await?;
    }

    discovery::publish_device_discovery(client, config, topics).await?;

    for event in unit_states.start_session() {
        client
            .publish(
                topics.unit_active_state(&event.unit),
                QoS::AtLeastOnce,
                true,
                event.state,
            )
            .await?;
    }

    Ok(())
}

async fn handle_publish(publish: &Publish, topics: &TopicTree, dispatcher: &ActionDispatcher) {
    let topic = &publish.topic;
    match topics.parse_command(topic) {
        Some(command) => {
            debug!("dispatching {command:?} from topic '{topic}'");
            dispatcher.dispatch(command).await;
        }
        None => warn!("no handler for topic '{topic}', dropping message"),
    }
}

async fn handle_unit_state(
    client: &AsyncClient,
    topics: &TopicTree,
    unit_states: &mut ActiveStateCache,
    event: UnitStateEvent,
) {
    if !unit_states.observe(&event) {
        trace!("ActiveState of {:?} unchanged, suppressing", event.unit);
        return;
    }
    info!("unit {:?} is now {}", event.unit, event.state);
    if let Err(e) = client
        .publish(
            topics.unit_active_state(&event.unit),
            QoS::AtLeastOnce,
            true,
            event.state,
        )
        .await
    {
        warn!("failed to publish ActiveState of {:?}: {e}", event.unit);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let topics = TopicTree::new(&config.hostname);

    // System bus and proxies; any failure here is fatal.
    let connection = Connection::system()
        .await
        .map_err(FatalError::BusConnect)?;
    debug!("connected to the system D-Bus");
    let login = LoginManagerProxy::new(&connection)
        .await
        .map_err(FatalError::BusConnect)?;
    let systemd = SystemdManagerProxy::new(&connection)
        .await
        .map_err(FatalError::BusConnect)?;

    // The delay inhibitor is best-effort: without it shutdown reporting is
    // merely less reliable.
    let mut inhibitor = ShutdownInhibitor::new(login.clone());
    match login.preparing_for_shutdown().await {
        Ok(true) => warn!("host is already preparing for shutdown, not taking the inhibitor lock"),
        Ok(false) => {
            if let Err(e) = inhibitor.acquire().await {
                warn!("could not acquire shutdown inhibitor: {e}");
            }
        }
        Err(e) => {
            debug!("could not read PreparingForShutdown: {e}");
            if let Err(e) = inhibitor.acquire().await {
                warn!("could not acquire shutdown inhibitor: {e}");
            }
        }
    }

    let mut power_events = spawn_power_monitor(login.clone())
        .await
        .map_err(FatalError::BusConnect)?;

    let (unit_tx, mut unit_events) = mpsc::channel::<UnitStateEvent>(64);
    monitor::spawn_unit_monitors(&connection, &config.monitored_units, unit_tx).await?;
    let mut unit_states = ActiveStateCache::new();

    // MQTT session. The eventloop reconnects on every poll after an error;
    // the bootstrap below re-runs on each CONNACK.
    let mqtt_options = session::mqtt_options(&config, &topics);
    let request_capacity = 32 + 4 * config.controlled_units.len() + config.monitored_units.len();
    let (client, mut eventloop) = AsyncClient::new(mqtt_options, request_capacity);
    let status_manager = StatusManager::new(topics.clone(), client.clone());
    let dispatcher = ActionDispatcher::new(login.clone(), systemd.clone(), config.clone());
    let mut backoff = Backoff::new();

    let mut shutdown_handler = ShutdownHandler::new()?;

    // rumqttc queues requests issued while disconnected and would flush them
    // ahead of the birth message on reconnect; outbound state reports are
    // therefore gated on this flag and replayed by the session bootstrap.
    let mut connected = false;

    info!("Starting main event loop");
    let outcome: anyhow::Result<()> = loop {
        tokio::select! {
            res = eventloop.poll() => {
                match res {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(
                            "connected to MQTT broker {}:{}",
                            config.mqtt_host, config.mqtt_port
                        );
                        connected = true;
                        backoff.reset();
                        if let Err(e) =
                            bootstrap_session(&client, &config, &topics, &status_manager, &mut unit_states).await
                        {
                            warn!("session bootstrap failed: {e}");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        handle_publish(&publish, &topics, &dispatcher).await;
                    }
                    Ok(event) => {
                        trace!("MQTT event: {event:?}");
                    }
                    Err(e) => {
                        connected = false;
                        let delay = backoff.next_delay();
                        error!("MQTT connection error: {e}; retrying in {delay:?}");
                        time::sleep(delay).await;
                    }
                }
            }
            event = power_events.recv() => {
                match event {
                    Some(PowerEvent::PreparingForShutdown(start)) => {
                        info!("PrepareForShutdown({start})");
                        if connected {
                            if let Err(e) = status_manager.publish_preparing_for_shutdown(start).await {
                                warn!("failed to publish preparing-for-shutdown: {e}");
                            }
                        } else {
                            debug!("not connected, dropping preparing-for-shutdown report");
                        }
                        if start {
                            // Dropping the lock promptly is what lets the
                            // shutdown proceed.
                            inhibitor.release();
                        } else if let Err(e) = inhibitor.acquire().await {
                            warn!("could not re-acquire shutdown inhibitor: {e}");
                        }
                    }
                    None => break Err(FatalError::BusLost.into()),
                }
            }
            event = unit_events.recv(), if !config.monitored_units.is_empty() => {
                match event {
                    Some(event) if connected => {
                        handle_unit_state(&client, &topics, &mut unit_states, event).await;
                    }
                    Some(event) => {
                        unit_states.record(&event);
                    }
                    None => break Err(FatalError::BusLost.into()),
                }
            }
            signal = shutdown_handler.wait_for_shutdown_signal() => {
                info!("{}", signal.description());
                shutdown::drain_session(&client, &mut eventloop, &config, &topics, &status_manager)
                    .await;
                break Ok(());
            }
        }
    };

    inhibitor.release();
    outcome
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::Args::parse();
    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    logging::init_tracing(config.log_level);

    info!(
        "starting {} {} on host {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        config.hostname
    );

    match run(config).await {
        Ok(()) => {
            info!("shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}
