//! Cluster RPC messages.
//!
//! Messages are tagged variants internally, and are flattened into a single-intent mapping of
//! named fields only at the transport boundary. In the flat form, `trigger` is always set and
//! exactly one intent is populated: `stop-proxy-service`, `stop-proxy-service-ack`,
//! `leader-changed-notification`, or `broker-token` together with `builder-broker`. All other
//! fields are explicit nulls. Receivers dispatch on which intent is present.

use serde::{Deserialize, Serialize};

use crate::error::RingError;
use crate::utils;

pub const KEY_TRIGGER: &str = "trigger";
pub const KEY_BROKER_TOKEN: &str = "broker-token";
pub const KEY_BUILDER_BROKER: &str = "builder-broker";
pub const KEY_PEERS_ONLY: &str = "peers-only";
pub const KEY_LEADER_CHANGED: &str = "leader-changed-notification";
pub const KEY_STOP_PROXY: &str = "stop-proxy-service";
pub const KEY_STOP_PROXY_ACK: &str = "stop-proxy-service-ack";
pub const KEY_SYNC_ONLY_BUILDERS: &str = "sync-only-builders";

/// The flat wire form of a cluster message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct WireMessage {
    pub trigger: Option<String>,
    pub broker_token: Option<String>,
    pub builder_broker: Option<String>,
    pub peers_only: Option<String>,
    pub leader_changed_notification: Option<String>,
    pub stop_proxy_service: Option<String>,
    pub stop_proxy_service_ack: Option<String>,
    pub sync_only_builders: Option<String>,
}

/// A message exchanged between nodes of the cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClusterMessage {
    /// Ask peers to pull ring state from the given broker.
    SyncRequest {
        trigger: String,
        broker: String,
        broker_token: String,
        builders_only: bool,
    },
    /// Announce that leadership has moved.
    LeaderChanged { trigger: String, token: String },
    /// Ask peers to gracefully stop their proxy service.
    StopRequest { trigger: String, token: String, peers_only: Option<String> },
    /// Acknowledge a stop request, echoing its token.
    StopAck { trigger: String, token: String, peers_only: Option<String> },
}

impl ClusterMessage {
    /// The trigger token of this message.
    pub fn trigger(&self) -> &str {
        match self {
            Self::SyncRequest { trigger, .. } | Self::LeaderChanged { trigger, .. } | Self::StopRequest { trigger, .. } | Self::StopAck { trigger, .. } => {
                trigger
            }
        }
    }

    /// Check if this message carries a truthy `peers-only` flag.
    pub fn peers_only(&self) -> bool {
        match self {
            Self::StopRequest { peers_only, .. } | Self::StopAck { peers_only, .. } => {
                matches!(peers_only.as_deref(), Some("1" | "true" | "True" | "yes"))
            }
            _ => false,
        }
    }

    /// Flatten this message into its wire form.
    pub fn to_wire(&self) -> WireMessage {
        let mut wire = WireMessage {
            trigger: Some(self.trigger().to_string()),
            ..Default::default()
        };
        match self {
            Self::SyncRequest {
                broker,
                broker_token,
                builders_only,
                ..
            } => {
                wire.builder_broker = Some(broker.clone());
                wire.broker_token = Some(broker_token.clone());
                if *builders_only {
                    wire.sync_only_builders = Some("1".into());
                }
            }
            Self::LeaderChanged { token, .. } => wire.leader_changed_notification = Some(token.clone()),
            Self::StopRequest { token, peers_only, .. } => {
                wire.stop_proxy_service = Some(token.clone());
                wire.peers_only = peers_only.clone();
            }
            Self::StopAck { token, peers_only, .. } => {
                wire.stop_proxy_service_ack = Some(token.clone());
                wire.peers_only = peers_only.clone();
            }
        }
        wire
    }

    /// Interpret a wire message, rejecting messages without exactly one intent.
    pub fn from_wire(wire: &WireMessage) -> Result<Self, RingError> {
        let trigger = wire
            .trigger
            .clone()
            .ok_or_else(|| RingError::InvalidMessage(format!("missing {}", KEY_TRIGGER)))?;
        let sync = match (&wire.builder_broker, &wire.broker_token) {
            (Some(broker), Some(token)) => Some((broker.clone(), token.clone())),
            (None, None) => None,
            _ => {
                return Err(RingError::InvalidMessage(format!(
                    "{} and {} must be set together",
                    KEY_BUILDER_BROKER, KEY_BROKER_TOKEN
                )))
            }
        };
        let intents = [
            sync.is_some(),
            wire.leader_changed_notification.is_some(),
            wire.stop_proxy_service.is_some(),
            wire.stop_proxy_service_ack.is_some(),
        ];
        match intents.iter().filter(|set| **set).count() {
            0 => return Err(RingError::InvalidMessage("message carries no intent".into())),
            1 => (),
            _ => return Err(RingError::InvalidMessage("message carries more than one intent".into())),
        }

        if let Some((broker, broker_token)) = sync {
            return Ok(Self::SyncRequest {
                trigger,
                broker,
                broker_token,
                builders_only: matches!(wire.sync_only_builders.as_deref(), Some("1" | "true" | "True")),
            });
        }
        if let Some(token) = wire.leader_changed_notification.clone() {
            return Ok(Self::LeaderChanged { trigger, token });
        }
        if let Some(token) = wire.stop_proxy_service.clone() {
            return Ok(Self::StopRequest {
                trigger,
                token,
                peers_only: wire.peers_only.clone(),
            });
        }
        let token = wire.stop_proxy_service_ack.clone().unwrap_or_default();
        Ok(Self::StopAck {
            trigger,
            token,
            peers_only: wire.peers_only.clone(),
        })
    }
}

/// Constructs cluster messages, minting a fresh trigger token for each one.
pub struct ClusterRpc {
    tokens: Box<dyn Fn() -> String + Send + Sync>,
}

impl Default for ClusterRpc {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterRpc {
    /// Create a new instance minting random tokens.
    pub fn new() -> Self {
        Self::with_tokens(utils::new_token)
    }

    /// Create a new instance using the given token source.
    pub fn with_tokens(tokens: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self { tokens: Box::new(tokens) }
    }

    /// Mint a new token.
    pub fn new_token(&self) -> String {
        (self.tokens)()
    }

    /// Ask peers to pull ring and builder state from the given broker.
    pub fn sync_rings_request(&self, broker: impl Into<String>, broker_token: impl Into<String>) -> ClusterMessage {
        ClusterMessage::SyncRequest {
            trigger: self.new_token(),
            broker: broker.into(),
            broker_token: broker_token.into(),
            builders_only: false,
        }
    }

    /// Ask peers to pull only builder state from the given broker.
    pub fn sync_builders_request(&self, broker: impl Into<String>, broker_token: impl Into<String>) -> ClusterMessage {
        ClusterMessage::SyncRequest {
            trigger: self.new_token(),
            broker: broker.into(),
            broker_token: broker_token.into(),
            builders_only: true,
        }
    }

    /// Announce that leadership has moved.
    ///
    /// The notification carries the trigger token itself, letting receivers drop repeats.
    pub fn notify_leader_changed(&self) -> ClusterMessage {
        let token = self.new_token();
        ClusterMessage::LeaderChanged { trigger: token.clone(), token }
    }

    /// Ask peers to gracefully stop their proxy service.
    ///
    /// The flag is encoded as `True` or `False`, the form existing peers emit.
    pub fn stop_proxy_request(&self, peers_only: Option<bool>) -> ClusterMessage {
        let token = self.new_token();
        ClusterMessage::StopRequest {
            trigger: token.clone(),
            token,
            peers_only: peers_only.map(|val| if val { "True" } else { "False" }.to_string()),
        }
    }

    /// Acknowledge a stop request, echoing its token and `peers-only` value verbatim.
    pub fn stop_proxy_ack(&self, echo_token: impl Into<String>, echo_peers_only: Option<String>) -> ClusterMessage {
        ClusterMessage::StopAck {
            trigger: self.new_token(),
            token: echo_token.into(),
            peers_only: echo_peers_only,
        }
    }
}
