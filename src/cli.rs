//! The hook entrypoint.
//!
//! Each subcommand performs a single coordination step for the local node and exits. Outbound
//! cluster messages, and reactions to inbound ones, are printed as JSON lines on stdout for the
//! hook layer to deliver. Logs go to stderr.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use structopt::StructOpt;

use crate::config::Config;
use crate::leader::CommandLeaderGate;
use crate::models::NodeSettings;
use crate::node::Node;
use crate::rpc::WireMessage;
use crate::transport::StdoutTransport;

/// Ring synchronization for object-storage proxy nodes.
#[derive(StructOpt)]
#[structopt(name = "ringsync")]
pub struct RingSync {
    #[structopt(subcommand)]
    action: RingSyncSubcommands,
}

#[derive(StructOpt)]
pub enum RingSyncSubcommands {
    /// Create the builders of all rings.
    #[structopt(name = "init")]
    Init(Init),
    /// Add this node's devices, rebalance, and synchronize peers if any ring changed.
    #[structopt(name = "update")]
    Update(Update),
    /// Handle one cluster message read as JSON from stdin.
    #[structopt(name = "receive")]
    Receive,
    /// Mark every ring published by this node as deleted.
    #[structopt(name = "mark-deleted")]
    MarkDeleted,
    /// Announce to peers that leadership has moved.
    #[structopt(name = "announce-leader")]
    AnnounceLeader,
    /// Ask peers to stop their proxy service.
    #[structopt(name = "stop-proxies")]
    StopProxies(StopProxies),
}

#[derive(StructOpt)]
pub struct Init {
    /// Replace builders which already exist.
    #[structopt(long)]
    force: bool,
}

#[derive(StructOpt)]
pub struct Update {
    /// A JSON file describing this node's storage settings.
    #[structopt(long, parse(from_os_str))]
    node_settings: Option<PathBuf>,
    /// The desired minimum number of hours between rebalances, overriding MIN_PART_HOURS.
    #[structopt(long)]
    min_part_hours: Option<u32>,
}

#[derive(StructOpt)]
pub struct StopProxies {
    /// The value of the peers-only flag carried by the request.
    #[structopt(long)]
    peers_only: Option<bool>,
}

impl RingSync {
    /// Run the selected subcommand. This blocks on disk and leader command I/O.
    pub fn run(self, cfg: Arc<Config>) -> Result<()> {
        let leader = CommandLeaderGate::new(&cfg.leader_command);
        let mut node = Node::new(cfg, leader, StdoutTransport);
        match self.action {
            RingSyncSubcommands::Init(opts) => {
                let created = node.init_rings(opts.force)?;
                tracing::info!(rings = ?created, "ring initialization finished");
            }
            RingSyncSubcommands::Update(opts) => {
                let settings = opts.node_settings.as_deref().map(read_node_settings).transpose()?;
                let outcome = node.update_rings(settings.as_ref(), opts.min_part_hours)?;
                let report = outcome.result;
                tracing::info!(
                    changed = ?outcome.changed,
                    devices_added = ?report.devices_added,
                    throttled = ?report.throttled,
                    skipped = ?report.skipped,
                    "ring update finished",
                );
                if !report.rejected.is_empty() {
                    for err in report.rejected.iter() {
                        tracing::error!(error = %err, "device rejected");
                    }
                    bail!("{} device description(s) rejected", report.rejected.len());
                }
            }
            RingSyncSubcommands::Receive => {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf).context("error reading cluster message from stdin")?;
                let wire: WireMessage = serde_json::from_str(&buf).context("error decoding cluster message")?;
                let reaction = node.receive(&wire)?;
                let line = serde_json::to_string(&reaction).context("error encoding reaction")?;
                let stdout = std::io::stdout();
                let mut handle = stdout.lock();
                writeln!(handle, "{}", line).context("error writing reaction to stdout")?;
            }
            RingSyncSubcommands::MarkDeleted => {
                node.mark_deleted()?;
            }
            RingSyncSubcommands::AnnounceLeader => {
                node.announce_leader_changed()?;
            }
            RingSyncSubcommands::StopProxies(opts) => {
                node.request_stop(opts.peers_only)?;
            }
        }
        Ok(())
    }
}

fn read_node_settings(path: &std::path::Path) -> Result<NodeSettings> {
    let data = std::fs::read(path).with_context(|| format!("error reading node settings from {}", path.display()))?;
    serde_json::from_slice(&data).with_context(|| format!("error decoding node settings from {}", path.display()))
}
