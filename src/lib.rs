//! Leader-gated ring rebalancing and cluster synchronization for object-storage proxy nodes.

pub mod checksum;
pub mod cli;
pub mod config;
pub mod error;
#[cfg(test)]
mod fixtures;
pub mod leader;
pub mod models;
pub mod node;
pub mod placement;
pub mod publisher;
pub mod rebalancer;
pub mod rpc;
#[cfg(test)]
mod rpc_test;
pub mod store;
#[cfg(test)]
mod store_test;
pub mod sync;
pub mod transport;
mod utils;

// Public exports for binaries and embedding hook layers.
pub use crate::{
    config::{Config, RingPaths},
    error::RingError,
    leader::{CommandLeaderGate, FnGate, LeaderGate, LeaderState},
    models::{Device, NodeSettings, RingBuilder, RingData, RingName},
    node::Node,
    placement::{PlacementEngine, RebalanceOutcome, WeightedPlacement},
    rpc::{ClusterMessage, ClusterRpc, WireMessage},
    sync::{Reaction, SyncOrchestrator, SyncOutcome},
    transport::{StdoutTransport, Transport},
};
