//! Container registry.
//!
//! [`ContainerRegistry`] owns the map of tracked containers and keeps it in
//! step with the runtime. Every access to the map goes through one async
//! mutex. Whenever the registry notices it has drifted from the runtime
//! (a start for a container it already tracks, a stop for one it does not,
//! or a failed rule removal) it falls back to a full [`resync`](ContainerRegistry::resync).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use portkeeper_core::metrics as m;
use portkeeper_core::types::{Container, short_id};

use crate::command::CommandRunner;
use crate::docker::DockerClient;
use crate::error::SyncError;
use crate::event::{EventStatus, RuntimeEvent};
use crate::firewall::FirewallSynchronizer;

/// Tracks running containers and their forwarding rules.
pub struct ContainerRegistry<D: DockerClient, R: CommandRunner> {
    docker: Arc<D>,
    firewall: FirewallSynchronizer<R>,
    containers: Mutex<HashMap<String, Container>>,
}

impl<D: DockerClient, R: CommandRunner> ContainerRegistry<D, R> {
    /// Creates an empty registry.
    pub fn new(docker: Arc<D>, firewall: FirewallSynchronizer<R>) -> Self {
        Self {
            docker,
            firewall,
            containers: Mutex::new(HashMap::new()),
        }
    }

    /// The synchronizer used for rule changes.
    pub fn firewall(&self) -> &FirewallSynchronizer<R> {
        &self.firewall
    }

    /// Handles a started container.
    ///
    /// # Errors
    ///
    /// Only fails when a fallback resync fails. Inspect and rule add
    /// failures are logged and swallowed.
    pub async fn on_start(&self, id: &str) -> Result<(), SyncError> {
        let mut containers = self.containers.lock().await;

        if containers.contains_key(id) {
            drop(containers);
            warn!(container_id = %short_id(id), "start for tracked container, resyncing");
            return self.resync().await;
        }

        let container = match self.docker.inspect(id).await {
            Ok(container) => container,
            Err(e) => {
                metrics::counter!(m::REGISTRY_INSPECT_FAILURES_TOTAL).increment(1);
                warn!(container_id = %short_id(id), error = %e, "inspect failed, ignoring start");
                return Ok(());
            }
        };

        info!(container = %container, "container started");
        let summary = self.firewall.add_rules_for(&container).await;
        if summary.failed > 0 {
            error!(
                container_id = %container.short_id(),
                container_name = %container.name,
                failed = summary.failed,
                "some forwarding rules could not be added"
            );
        }

        containers.insert(id.to_owned(), container);
        metrics::gauge!(m::REGISTRY_TRACKED_CONTAINERS).set(containers.len() as f64);
        Ok(())
    }

    /// Handles a stopped or dead container.
    ///
    /// # Errors
    ///
    /// Only fails when a fallback resync fails.
    pub async fn on_stop(&self, id: &str) -> Result<(), SyncError> {
        let mut containers = self.containers.lock().await;

        if containers.contains_key(id) {
            match self.firewall.remove_rules_for(id).await {
                Ok(removed) => {
                    if let Some(container) = containers.remove(id) {
                        info!(container = %container, removed, "container stopped");
                    }
                    metrics::gauge!(m::REGISTRY_TRACKED_CONTAINERS).set(containers.len() as f64);
                    return Ok(());
                }
                Err(e) => {
                    error!(container_id = %short_id(id), error = %e, "rule removal failed, resyncing");
                }
            }
        } else {
            debug!(container_id = %short_id(id), "stop for untracked container, resyncing");
        }

        drop(containers);
        self.resync().await
    }

    /// Rebuilds the registry and all managed chains from the runtime.
    ///
    /// Containers that fail to inspect are left out. The previous map is
    /// kept if listing fails.
    ///
    /// # Errors
    ///
    /// Returns the list error, or the chain setup error from the rebuild.
    pub async fn resync(&self) -> Result<(), SyncError> {
        metrics::counter!(m::REGISTRY_RESYNCS_TOTAL).increment(1);
        let ids = self.docker.list_running().await.map_err(|e| {
            error!(error = %e, "resync: listing containers failed");
            e
        })?;

        let mut containers = self.containers.lock().await;

        let mut fresh = HashMap::with_capacity(ids.len());
        for id in ids {
            match self.docker.inspect(&id).await {
                Ok(container) => {
                    fresh.insert(id, container);
                }
                Err(e) => {
                    metrics::counter!(m::REGISTRY_INSPECT_FAILURES_TOTAL).increment(1);
                    warn!(container_id = %short_id(&id), error = %e, "resync: inspect failed, skipping");
                }
            }
        }

        *containers = fresh;
        metrics::gauge!(m::REGISTRY_TRACKED_CONTAINERS).set(containers.len() as f64);
        info!(containers = containers.len(), "resync: rebuilding firewall");

        self.firewall.rebuild(&containers).await?;
        Ok(())
    }

    /// Routes a runtime event to the matching handler.
    ///
    /// Statuses other than start, die and stop are ignored.
    pub async fn dispatch(&self, event: &RuntimeEvent) -> Result<(), SyncError> {
        metrics::counter!(m::REGISTRY_EVENTS_PROCESSED_TOTAL, m::LABEL_STATUS => event.status.label().to_owned())
            .increment(1);

        match &event.status {
            EventStatus::Start => self.on_start(&event.container_id).await,
            EventStatus::Die | EventStatus::Stop => self.on_stop(&event.container_id).await,
            EventStatus::Other(status) => {
                debug!(container_id = %short_id(&event.container_id), status = %status, "ignoring event");
                Ok(())
            }
        }
    }

    /// Number of tracked containers.
    pub async fn container_count(&self) -> usize {
        self.containers.lock().await.len()
    }

    /// Whether a container ID is tracked.
    pub async fn is_tracked(&self, id: &str) -> bool {
        self.containers.lock().await.contains_key(id)
    }

    /// A copy of one tracked container.
    pub async fn get(&self, id: &str) -> Option<Container> {
        self.containers.lock().await.get(id).cloned()
    }

    /// Copies of all tracked containers, ordered by name.
    pub async fn snapshot(&self) -> Vec<Container> {
        let mut list: Vec<Container> = self.containers.lock().await.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }
}
