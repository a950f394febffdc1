//! Leadership gating.
//!
//! Leader election itself is owned by an outside system. This module only answers whether the
//! local node is the leader at the instant of asking. Answers are never cached: leadership may
//! move between two coordination decisions, so every decision must ask again.

use std::process::Command;

use tokio::sync::watch;

const METRIC_IS_LEADER: &str = "ringsync_is_leader";

/// A capability answering whether the local node is currently the elected leader.
pub trait LeaderGate {
    fn is_leader(&self) -> bool;
}

/// A gate answering from a function or closure.
pub struct FnGate<F>(pub F);

impl<F: Fn() -> bool> LeaderGate for FnGate<F> {
    fn is_leader(&self) -> bool {
        (self.0)()
    }
}

impl<L: LeaderGate + ?Sized> LeaderGate for &L {
    fn is_leader(&self) -> bool {
        (**self).is_leader()
    }
}

/// Different states which a leader elector may be in.
#[derive(Clone, Debug, PartialEq)]
pub enum LeaderState {
    /// This node is the leader.
    Leading,
    /// A different node, identified by the encapsulated string, is the leader.
    Following(String),
    /// The lease state is unknown, or the elector is starting or stopping.
    Standby,
}

/// A gate backed by the state channel of an in-process leader elector.
impl LeaderGate for watch::Receiver<LeaderState> {
    fn is_leader(&self) -> bool {
        matches!(*self.borrow(), LeaderState::Leading)
    }
}

/// A gate backed by an external command, such as a hook tool, which prints a boolean.
///
/// Any failure to run the command, or unrecognized output, is treated as not being the leader.
#[derive(Clone, Debug)]
pub struct CommandLeaderGate {
    program: String,
    args: Vec<String>,
}

impl CommandLeaderGate {
    /// Create a new instance from a whitespace separated command line.
    pub fn new(command_line: &str) -> Self {
        let mut parts = command_line.split_whitespace().map(String::from);
        let program = parts.next().unwrap_or_default();
        metrics::register_gauge!(METRIC_IS_LEADER, metrics::Unit::Count, "1.0 if this node reported itself as leader on the last query");
        Self { program, args: parts.collect() }
    }

    /// Parse the output of a leader command.
    pub fn parse_output(output: &str) -> bool {
        matches!(output.trim(), "True" | "true" | "1" | "yes")
    }
}

impl LeaderGate for CommandLeaderGate {
    fn is_leader(&self) -> bool {
        let is_leader = match Command::new(&self.program).args(&self.args).output() {
            Ok(output) if output.status.success() => Self::parse_output(&String::from_utf8_lossy(&output.stdout)),
            Ok(output) => {
                tracing::error!(program = %self.program, status = ?output.status, "leader command failed");
                false
            }
            Err(err) => {
                tracing::error!(error = ?err, program = %self.program, "error running leader command");
                false
            }
        };
        metrics::gauge!(METRIC_IS_LEADER, if is_leader { 1.0 } else { 0.0 });
        is_leader
    }
}
