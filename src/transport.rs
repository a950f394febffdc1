//! Message delivery.
//!
//! Delivery is owned by the embedding hook layer; this crate only hands it fully formed wire
//! messages.

use std::io::Write;

use anyhow::{Context, Result};

use crate::rpc::WireMessage;

/// Delivers wire messages to every peer.
pub trait Transport {
    fn broadcast(&mut self, msg: &WireMessage) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn broadcast(&mut self, msg: &WireMessage) -> Result<()> {
        (**self).broadcast(msg)
    }
}

/// An in-memory outbox, drained by the caller.
impl Transport for Vec<WireMessage> {
    fn broadcast(&mut self, msg: &WireMessage) -> Result<()> {
        self.push(msg.clone());
        Ok(())
    }
}

/// Writes each message as a JSON line on stdout, for the hook layer to relay.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdoutTransport;

impl Transport for StdoutTransport {
    fn broadcast(&mut self, msg: &WireMessage) -> Result<()> {
        let line = serde_json::to_string(msg).context("error encoding cluster message")?;
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{}", line).context("error writing cluster message to stdout")?;
        handle.flush().context("error flushing stdout")
    }
}
