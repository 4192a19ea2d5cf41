//! Multi-client simulation.
//!
//! A [`SimCluster`] runs one full [`Runtime`] per client against a shared
//! [`SimRelay`]. Clients are driven through their [`AppHandle`]s exactly as a
//! presentation layer would, and the cluster collects their snapshots for
//! invariant checks. Run it under a paused tokio clock so timers are virtual.

use std::time::Duration;

use tandem_app::{AppConfig, AppHandle, Runtime};
use tandem_proto::UserId;
use tokio::task::JoinHandle;

use crate::{
    ClientSnapshot, FakeMedia, InvariantRegistry, SimDriver, SimEnv, SimRelay, SystemSnapshot,
};

/// Relay URL handed to simulated clients.
pub const SIM_RELAY_URL: &str = "sim://relay";

/// One simulated client.
#[derive(Debug)]
pub struct SimClient {
    /// Label for assertions and violation messages
    pub label: String,
    /// User this client signs in as
    pub user: UserId,
    /// Handle to the client's runtime
    pub handle: AppHandle,
    /// The client's media backend
    pub media: FakeMedia,
    task: JoinHandle<()>,
}

impl SimClient {
    /// Observable state of this client.
    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot::new(self.label.clone(), self.handle.snapshot())
            .with_media(self.media.live_tracks(), self.media.open_peers())
    }

    /// Whether the runtime task has exited.
    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }
}

/// Clients sharing one relay.
pub struct SimCluster {
    env: SimEnv,
    relay: SimRelay,
    config: AppConfig,
    clients: Vec<SimClient>,
}

impl std::fmt::Debug for SimCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimCluster")
            .field("relay", &self.relay)
            .field("clients", &self.clients.len())
            .finish_non_exhaustive()
    }
}

impl SimCluster {
    /// Cluster with default app configuration.
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, AppConfig::default())
    }

    /// Cluster whose clients all use `config` (the relay URL is replaced).
    pub fn with_config(seed: u64, mut config: AppConfig) -> Self {
        let env = SimEnv::with_seed(seed);
        let relay = SimRelay::with_destinations(env.clone(), config.connection.destinations.clone());
        config.connection.relay_url = SIM_RELAY_URL.to_string();
        Self { env, relay, config, clients: Vec::new() }
    }

    /// The shared relay.
    pub fn relay(&self) -> &SimRelay {
        &self.relay
    }

    /// The shared environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Register `user` in the directory and start a runtime for it.
    ///
    /// Returns the client's index. The client is not connected yet.
    pub fn add_client(&mut self, label: &str, user: UserId) -> usize {
        self.relay.register_user(user, label);
        let media = FakeMedia::new();
        let driver = SimDriver::new(self.env.clone(), self.relay.clone(), media.clone());
        let (runtime, handle) = Runtime::new(driver, self.config.clone());
        let task = tokio::spawn(runtime.run());

        tracing::debug!(label, %user, "sim client started");
        self.clients.push(SimClient { label: label.to_string(), user, handle, media, task });
        self.clients.len() - 1
    }

    /// Client at `index`.
    ///
    /// # Panics
    ///
    /// Panics if no client has that index.
    pub fn client(&self, index: usize) -> &SimClient {
        &self.clients[index]
    }

    /// All clients in insertion order.
    pub fn clients(&self) -> &[SimClient] {
        &self.clients
    }

    /// Let every task run and virtual time pass by `duration`.
    pub async fn advance(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Let pending work drain without meaningful time passing.
    pub async fn settle(&self) {
        self.advance(Duration::from_millis(1)).await;
    }

    /// Snapshot of every client.
    pub fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot::from_clients(self.clients.iter().map(SimClient::snapshot).collect())
    }

    /// Assert `registry` against the current snapshot.
    pub fn check(&self, registry: &InvariantRegistry, context: &str) {
        registry.assert_all(&self.snapshot(), context);
    }

    /// Quit every client and wait for the runtimes to exit.
    pub async fn shutdown(self) {
        for client in &self.clients {
            let _ = client.handle.quit();
        }
        for client in self.clients {
            if let Err(e) = client.task.await {
                tracing::warn!(label = %client.label, error = %e, "sim client task failed");
            }
        }
    }
}
