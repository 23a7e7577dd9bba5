//! Per-unit ActiveState monitoring.
//!
//! One task per monitored unit streams property changes off the system bus
//! into the supervisor, which owns the per-session dedup cache and performs
//! the actual MQTT publishes so per-unit ordering follows signal order.

use std::collections::{BTreeMap, HashMap};

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zbus::Connection;

use crate::dbus::systemd::{unit_proxy, SystemdManagerProxy, SystemdUnitProxy};
use crate::error::FatalError;

/// A fresh ActiveState observation for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStateEvent {
    pub unit: String,
    pub state: String,
}

/// Resolves every monitored unit and spawns its watcher. Resolution failures
/// are configuration mistakes and fail the boot.
pub async fn spawn_unit_monitors(
    connection: &Connection,
    units: &[String],
    events: mpsc::Sender<UnitStateEvent>,
) -> Result<(), FatalError> {
    if units.is_empty() {
        return Ok(());
    }
    let manager = SystemdManagerProxy::new(connection)
        .await
        .map_err(FatalError::BusConnect)?;
    for unit in units {
        let path = manager
            .get_unit(unit)
            .await
            .map_err(|source| FatalError::UnknownUnit {
                unit: unit.clone(),
                source,
            })?;
        debug!("monitoring unit {unit:?} at {}", path.as_str());
        let proxy = unit_proxy(connection, path)
            .await
            .map_err(FatalError::BusConnect)?;
        tokio::spawn(watch_unit(unit.clone(), proxy, events.clone()));
    }
    Ok(())
}

/// Emits the current state first, then one event per property change. The
/// supervisor's cache absorbs duplicates.
async fn watch_unit(
    unit: String,
    proxy: SystemdUnitProxy<'static>,
    events: mpsc::Sender<UnitStateEvent>,
) {
    match proxy.active_state().await {
        Ok(state) => {
            let event = UnitStateEvent {
                unit: unit.clone(),
                state,
            };
            if events.send(event).await.is_err() {
                return;
            }
        }
        Err(e) => warn!("could not read initial ActiveState of {unit:?}: {e}"),
    }

    let mut stream = proxy.receive_active_state_changed().await;
    while let Some(change) = stream.next().await {
        match change.get().await {
            Ok(state) => {
                let event = UnitStateEvent {
                    unit: unit.clone(),
                    state,
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
            Err(e) => warn!("ActiveState update for {unit:?} unreadable: {e}"),
        }
    }
    debug!("ActiveState stream for {unit:?} ended");
}

/// Tracks the latest observed state per unit and what was already published
/// on the current MQTT session.
#[derive(Debug, Default)]
pub struct ActiveStateCache {
    last_seen: BTreeMap<String, String>,
    published: HashMap<String, String>,
}

impl ActiveStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembers the latest state without touching the session dedup. Used
    /// while the MQTT session is down; the next session start replays it.
    pub fn record(&mut self, event: &UnitStateEvent) {
        self.last_seen
            .insert(event.unit.clone(), event.state.clone());
    }

    /// Records an observation. Returns `true` when the state differs from
    /// the last value published on this session and must go out now.
    pub fn observe(&mut self, event: &UnitStateEvent) -> bool {
        self.record(event);
        if self.published.get(&event.unit) == Some(&event.state) {
            return false;
        }
        self.published
            .insert(event.unit.clone(), event.state.clone());
        true
    }

    /// Starts a fresh MQTT session: forgets what the old session published
    /// and returns the current states to re-emit, in unit order.
    pub fn start_session(&mut self) -> Vec<UnitStateEvent> {
        self.published.clear();
        self.last_seen
            .iter()
            .map(|(unit, state)| {
                self.published.insert(unit.clone(), state.clone());
                UnitStateEvent {
                    unit: unit.clone(),
                    state: state.clone(),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(unit: &str, state: &str) -> UnitStateEvent {
        UnitStateEvent {
            unit: unit.to_string(),
            state: state.to_string(),
        }
    }

    #[test]
    fn suppresses_consecutive_duplicates() {
        let mut cache = ActiveStateCache::new();
        assert!(cache.observe(&event("ssh.service", "activating")));
        assert!(cache.observe(&event("ssh.service", "active")));
        assert!(!cache.observe(&event("ssh.service", "active")));
        assert!(cache.observe(&event("ssh.service", "failed")));
    }

    #[test]
    fn units_do_not_share_dedup_state() {
        let mut cache = ActiveStateCache::new();
        assert!(cache.observe(&event("a.service", "active")));
        assert!(cache.observe(&event("b.service", "active")));
    }

    #[test]
    fn session_restart_reemits_and_resets_dedup() {
        let mut cache = ActiveStateCache::new();
        cache.observe(&event("a.service", "active"));
        cache.observe(&event("b.service", "failed"));

        let replay = cache.start_session();
        assert_eq!(
            replay,
            vec![event("a.service", "active"), event("b.service", "failed")]
        );
        // Replayed values count as published on the new session.
        assert!(!cache.observe(&event("a.service", "active")));
        assert!(cache.observe(&event("a.service", "inactive")));
    }

    #[test]
    fn unknown_states_pass_through() {
        let mut cache = ActiveStateCache::new();
        assert!(cache.observe(&event("a.service", "maintenance")));
    }

    #[test]
    fn offline_observations_surface_on_the_next_session() {
        let mut cache = ActiveStateCache::new();
        cache.record(&event("a.service", "inactive"));
        assert_eq!(cache.start_session(), vec![event("a.service", "inactive")]);
    }
}
