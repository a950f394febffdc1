//! The local node.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::error::RingError;
use crate::leader::LeaderGate;
use crate::models::{NodeSettings, RingName};
use crate::placement::{PlacementEngine, WeightedPlacement};
use crate::rebalancer::{RingRebalancer, UpdateReport};
use crate::rpc::{ClusterMessage, ClusterRpc, WireMessage};
use crate::store::BuilderStore;
use crate::sync::{Reaction, SyncOrchestrator, SyncOutcome};
use crate::transport::Transport;

/// A single node of the cluster, wiring together its ring store, rebalancer and orchestrator.
pub struct Node<L, T> {
    /// The node's runtime config.
    config: Arc<Config>,
    /// The node's ring builders.
    store: BuilderStore,
    /// The leader-gated rebalancer.
    rebalancer: RingRebalancer<L>,
    /// The orchestrator propagating ring changes to peers.
    sync: SyncOrchestrator<T>,
}

impl<L: LeaderGate, T: Transport> Node<L, T> {
    /// Create a new instance using the bundled placement engine.
    pub fn new(config: Arc<Config>, leader: L, transport: T) -> Self {
        Self::with_parts(config, leader, transport, Arc::new(WeightedPlacement), ClusterRpc::new())
    }

    /// Create a new instance from the given collaborators.
    pub fn with_parts(config: Arc<Config>, leader: L, transport: T, engine: Arc<dyn PlacementEngine>, rpc: ClusterRpc) -> Self {
        let paths = config.ring_paths();
        let store = BuilderStore::new(paths.clone(), engine);
        let rebalancer = RingRebalancer::new(leader, config.allow_min_part_hours_decrease);
        let sync = SyncOrchestrator::new(paths, rpc, transport, config.broker_address.clone());
        Self {
            config,
            store,
            rebalancer,
            sync,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &BuilderStore {
        &self.store
    }

    pub fn sync(&self) -> &SyncOrchestrator<T> {
        &self.sync
    }

    /// Create the builders of all rings which do not have one yet, returning the rings created.
    ///
    /// Only the leader creates builders; peers receive them through synchronization. With
    /// `force`, existing builders are replaced.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn init_rings(&mut self, force: bool) -> Result<Vec<RingName>> {
        if !self.rebalancer.leader().is_leader() {
            tracing::debug!("not the leader, skipping ring initialization");
            return Ok(vec![]);
        }
        let (part_power, replicas) = (self.config.partition_power, self.config.replicas);
        let min_part_hours = self.config.min_part_hours.unwrap_or(0);
        let mut created = Vec::new();
        for ring in RingName::ALL {
            match self.store.initialize(ring, part_power, replicas, min_part_hours, force) {
                Ok(()) => created.push(ring),
                Err(err) => match err.downcast_ref::<RingError>() {
                    Some(RingError::AlreadyInitialized(_)) => tracing::debug!(%ring, "ring already initialized"),
                    _ => return Err(err),
                },
            }
        }
        Ok(created)
    }

    /// Bring every ring up to date with the given node settings, then propagate ring changes.
    pub fn update_rings(&mut self, node_settings: Option<&NodeSettings>, min_part_hours: Option<u32>) -> Result<SyncOutcome<UpdateReport>> {
        self.update_rings_at(node_settings, min_part_hours, Utc::now())
    }

    /// Same as `update_rings`, as of the given time.
    pub fn update_rings_at(
        &mut self, node_settings: Option<&NodeSettings>, min_part_hours: Option<u32>, now: DateTime<Utc>,
    ) -> Result<SyncOutcome<UpdateReport>> {
        let min_part_hours = min_part_hours.or(self.config.min_part_hours);
        let rebalancer = &self.rebalancer;
        self.sync
            .sync_if_changed(&mut self.store, |store| rebalancer.update_rings_at(store, node_settings, min_part_hours, now))
    }

    /// React to a message delivered by a peer.
    pub fn receive(&mut self, wire: &WireMessage) -> Result<Reaction> {
        self.sync.handle_inbound(wire, self.rebalancer.leader())
    }

    /// Retract every ring published by this node.
    pub fn mark_deleted(&self) -> Result<Vec<RingName>> {
        self.sync.publisher().mark_all_deleted()
    }

    /// Tell peers that leadership has moved.
    pub fn announce_leader_changed(&mut self) -> Result<ClusterMessage> {
        self.sync.announce_leader_changed()
    }

    /// Ask peers to stop their proxy service.
    pub fn request_stop(&mut self, peers_only: Option<bool>) -> Result<ClusterMessage> {
        self.sync.request_stop(peers_only)
    }
}
