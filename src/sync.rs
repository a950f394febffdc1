//! Cluster synchronization.
//!
//! The orchestrator wraps ring mutations in a snapshot/compare/act sequence: ring fingerprints are
//! taken before and after the mutation, and only rings whose rendered artifact actually changed
//! are published, followed by a single sync request to all peers. A pass which changes nothing,
//! for instance because `min_part_hours` suppressed the rebalance, is silent.
//!
//! It also interprets inbound cluster messages on behalf of the hook layer.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::checksum::{self, ChecksumTracker, Snapshot};
use crate::config::RingPaths;
use crate::error::RingError;
use crate::leader::LeaderGate;
use crate::models::RingName;
use crate::publisher::Publisher;
use crate::rpc::{ClusterMessage, ClusterRpc, WireMessage, KEY_BROKER_TOKEN};
use crate::store::BuilderStore;
use crate::transport::Transport;
use crate::utils;

const METRIC_SYNC_BROADCASTS: &str = "ringsync_sync_broadcasts_total";
const ERR_SYNC_AFTER_FAILED_OP: &str = "error synchronizing rings after a failed ring update";

/// The result of a synchronized mutation.
#[derive(Debug)]
pub struct SyncOutcome<R> {
    /// The output of the wrapped operation.
    pub result: R,
    /// Rings whose rendered artifact changed, and which were published.
    pub changed: Vec<RingName>,
    /// The broker token sent to peers, if a sync request was broadcast.
    pub broker_token: Option<String>,
}

/// What the local node should do in response to an inbound message.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "reaction", rename_all = "kebab-case")]
pub enum Reaction {
    /// The message was a repeat, or requires nothing of this node.
    Ignored,
    /// Stop the local proxy service. The acknowledgement has already been sent.
    StopProxy { ack: WireMessage },
    /// A peer acknowledged a stop request.
    StopAcknowledged { token: String },
    /// Published rings were marked as deleted since this node no longer leads.
    RelinquishedRings { rings: Vec<RingName> },
    /// Pull the listed artifacts from the broker, then echo the broker token.
    FetchFromBroker { broker: String, broker_token: String, files: Vec<String> },
}

/// Coordinates publication and peer synchronization of ring changes.
pub struct SyncOrchestrator<T> {
    checksums: ChecksumTracker,
    publisher: Publisher,
    rpc: ClusterRpc,
    transport: T,
    /// The address advertised to peers as builder broker.
    broker_address: String,
    /// The broker token of the last sync request sent.
    last_broker_token: Option<String>,
    /// The file recording the trigger of the last inbound message handled.
    ///
    /// Each hook invocation runs in a fresh process, so repeats are detected through this file.
    trigger_path: PathBuf,
}

impl<T: Transport> SyncOrchestrator<T> {
    /// Create a new instance over the given ring layout.
    pub fn new(paths: RingPaths, rpc: ClusterRpc, transport: T, broker_address: impl Into<String>) -> Self {
        metrics::register_counter!(METRIC_SYNC_BROADCASTS, metrics::Unit::Count, "the number of ring sync requests broadcast to peers");
        Self {
            trigger_path: paths.trigger_path(),
            checksums: ChecksumTracker::new(paths.clone()),
            publisher: Publisher::new(paths),
            rpc,
            transport,
            broker_address: broker_address.into(),
            last_broker_token: None,
        }
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The broker token of the last sync request sent.
    pub fn last_broker_token(&self) -> Option<&str> {
        self.last_broker_token.as_deref()
    }

    /// Run the given ring mutation, then publish and broadcast any resulting ring changes.
    ///
    /// Changes are propagated even when the operation fails part way through, since rings
    /// written before the failure are already final. The operation's error is returned after.
    #[tracing::instrument(level = "debug", skip(self, store, op))]
    pub fn sync_if_changed<R, F>(&mut self, store: &mut BuilderStore, op: F) -> Result<SyncOutcome<R>>
    where
        F: FnOnce(&mut BuilderStore) -> Result<R>,
    {
        let before = self.checksums.snapshot().context("error fingerprinting rings")?;
        let res = op(store);
        match (res, self.propagate_changes(store, &before)) {
            (Ok(result), Ok((changed, broker_token))) => Ok(SyncOutcome {
                result,
                changed,
                broker_token,
            }),
            (Err(op_err), Ok(_)) => Err(op_err),
            (Ok(_), Err(sync_err)) => Err(sync_err),
            (Err(op_err), Err(sync_err)) => {
                tracing::error!(error = ?op_err, "ring update failed before synchronization failed");
                Err(sync_err.context(format!("{}: {:#}", ERR_SYNC_AFTER_FAILED_OP, op_err)))
            }
        }
    }

    /// Publish every ring changed since `before` and broadcast a single sync request for them.
    fn propagate_changes(&mut self, store: &BuilderStore, before: &Snapshot) -> Result<(Vec<RingName>, Option<String>)> {
        let after = self.checksums.snapshot().context("error fingerprinting rings")?;
        let changed: Vec<_> = before
            .rings
            .changed(&after.rings)
            .into_iter()
            .filter(|ring| after.rings.get(*ring).is_some())
            .collect();
        if changed.is_empty() {
            if before.builders != after.builders {
                tracing::debug!("builders changed without ring changes, nothing to synchronize");
            } else {
                tracing::debug!("no ring changes detected");
            }
            return Ok((changed, None));
        }

        tracing::info!(rings = ?changed, "rings changed, synchronizing");
        for ring in changed.iter().copied() {
            self.publisher.publish(store, ring)?;
        }
        let broker_token = self.rpc.new_token();
        let msg = self.rpc.sync_rings_request(self.broker_address.as_str(), broker_token.as_str());
        self.transport
            .broadcast(&msg.to_wire())
            .context("error broadcasting ring sync request")?;
        metrics::increment_counter!(METRIC_SYNC_BROADCASTS);
        self.last_broker_token = Some(broker_token.clone());
        Ok((changed, Some(broker_token)))
    }

    /// Check if every peer response has adopted the last broker token sent.
    pub fn peers_converged(&self, responses: &[HashMap<String, String>]) -> bool {
        let token = match self.last_broker_token.as_deref() {
            Some(token) => token,
            None => return false,
        };
        checksum::all_equal(responses, KEY_BROKER_TOKEN, true)
            && checksum::first_available(responses, KEY_BROKER_TOKEN).map(String::as_str) == Some(token)
    }

    /// Announce to peers that leadership has moved.
    pub fn announce_leader_changed(&mut self) -> Result<ClusterMessage> {
        let msg = self.rpc.notify_leader_changed();
        self.transport
            .broadcast(&msg.to_wire())
            .context("error broadcasting leader change")?;
        Ok(msg)
    }

    /// Ask peers to gracefully stop their proxy service.
    pub fn request_stop(&mut self, peers_only: Option<bool>) -> Result<ClusterMessage> {
        let msg = self.rpc.stop_proxy_request(peers_only);
        self.transport
            .broadcast(&msg.to_wire())
            .context("error broadcasting stop request")?;
        Ok(msg)
    }

    /// The trigger of the last inbound message this node handled, across invocations.
    pub fn last_trigger(&self) -> Result<Option<String>> {
        let data = utils::read_optional(&self.trigger_path)
            .map_err(RingError::persistence)
            .context("error reading last handled trigger")?;
        Ok(data.map(|data| String::from_utf8_lossy(&data).trim().to_string()))
    }

    /// Interpret an inbound message and decide how this node reacts to it.
    ///
    /// A message whose trigger matches the last one handled is ignored. The trigger is only
    /// recorded once the reaction has succeeded, so a failed delivery may be retried.
    #[tracing::instrument(level = "debug", skip(self, wire, leader))]
    pub fn handle_inbound(&mut self, wire: &WireMessage, leader: &dyn LeaderGate) -> Result<Reaction> {
        let msg = ClusterMessage::from_wire(wire)?;
        if self.last_trigger()?.as_deref() == Some(msg.trigger()) {
            tracing::debug!(trigger = msg.trigger(), "duplicate message, ignoring");
            return Ok(Reaction::Ignored);
        }
        let trigger = msg.trigger().to_string();
        let reaction = self.react(msg, leader)?;
        utils::write_atomic(&self.trigger_path, trigger.as_bytes())
            .map_err(RingError::persistence)
            .context("error recording handled trigger")?;
        Ok(reaction)
    }

    fn react(&mut self, msg: ClusterMessage, leader: &dyn LeaderGate) -> Result<Reaction> {
        let peers_only = msg.peers_only();
        match msg {
            ClusterMessage::StopRequest { token, peers_only: echo, .. } => {
                let ack = self.rpc.stop_proxy_ack(token, echo).to_wire();
                self.transport.broadcast(&ack).context("error sending stop acknowledgement")?;
                tracing::info!(peers_only, "stop requested by leader, acknowledged");
                Ok(Reaction::StopProxy { ack })
            }
            ClusterMessage::StopAck { token, .. } => {
                tracing::info!(%token, peers_only, "stop acknowledged by peer");
                Ok(Reaction::StopAcknowledged { token })
            }
            ClusterMessage::LeaderChanged { .. } => {
                if leader.is_leader() {
                    return Ok(Reaction::Ignored);
                }
                let rings = self.publisher.mark_all_deleted()?;
                Ok(Reaction::RelinquishedRings { rings })
            }
            ClusterMessage::SyncRequest {
                broker,
                broker_token,
                builders_only,
                ..
            } => {
                if leader.is_leader() {
                    return Ok(Reaction::Ignored);
                }
                let files = RingName::ALL
                    .iter()
                    .flat_map(|ring| {
                        let mut files = vec![ring.builder_file_name()];
                        if !builders_only {
                            files.push(ring.ring_file_name());
                        }
                        files
                    })
                    .collect();
                tracing::info!(%broker, builders_only, "sync requested");
                Ok(Reaction::FetchFromBroker { broker, broker_token, files })
            }
        }
    }
}
