//! Runtime configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::models::RingName;

/// The default directory holding builders and rendered rings.
pub const DEFAULT_CONF_DIR: &str = "/etc/swift";
/// The default web-servable directory rings are published to.
pub const DEFAULT_WWW_DIR: &str = "/var/www/html/swift-rings";
/// The suffix appended to a published ring artifact to mark it as deleted.
pub const TOMBSTONE_SUFFIX: &str = "deleted";
/// The file in the conf dir recording the trigger of the last handled cluster message.
pub const LAST_TRIGGER_FILE: &str = "last-trigger";

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The logging config, which uses Rust's `env_logger` directives.
    #[serde(default = "Config::default_rust_log")]
    pub rust_log: String,
    /// The directory holding this node's builders and rendered rings.
    #[serde(default = "Config::default_conf_dir")]
    pub swift_conf_dir: String,
    /// The directory from which rings are served to peers.
    #[serde(default = "Config::default_www_dir")]
    pub www_dir: String,
    /// The address peers use to reach this node when it acts as builder broker.
    pub broker_address: String,

    /// The partition power used when initializing rings.
    #[serde(default = "Config::default_partition_power")]
    pub partition_power: u8,
    /// The replica count used when initializing rings.
    #[serde(default = "Config::default_replicas")]
    pub replicas: u8,
    /// The desired minimum number of hours between rebalances of a ring.
    ///
    /// Rings are initialized with this value, or 0 if unset. When unset, update passes leave the
    /// value carried by existing rings untouched.
    #[serde(default)]
    pub min_part_hours: Option<u32>,
    /// Allow `min_part_hours` to be lowered on rings which already carry a higher value.
    #[serde(default)]
    pub allow_min_part_hours_decrease: bool,

    /// The command used to ask the leader election system whether this node is the leader.
    #[serde(default = "Config::default_leader_command")]
    pub leader_command: String,
}

impl Config {
    /// Create a new config instance.
    ///
    /// Currently this routing just parses the runtime environment and builds the application
    /// config from that.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        envy::from_env().context("error building config from env")
    }

    /// Create a config whose directories are rooted at the given path.
    pub fn for_root(root: &Path, broker_address: impl Into<String>) -> Self {
        Self {
            rust_log: Self::default_rust_log(),
            swift_conf_dir: root.join("swift").to_string_lossy().into_owned(),
            www_dir: root.join("www").to_string_lossy().into_owned(),
            broker_address: broker_address.into(),
            partition_power: Self::default_partition_power(),
            replicas: Self::default_replicas(),
            min_part_hours: None,
            allow_min_part_hours_decrease: false,
            leader_command: Self::default_leader_command(),
        }
    }

    /// Create a new config instance for testing, rooted in a new temp dir.
    #[cfg(test)]
    pub fn new_test() -> Result<(std::sync::Arc<Self>, tempfile::TempDir)> {
        let tmpdir = tempfile::tempdir().context("error creating tmp dir in test")?;
        let config = Self::for_root(tmpdir.path(), "10.0.0.1");
        Ok((std::sync::Arc::new(config), tmpdir))
    }

    /// The ring artifact paths derived from this config.
    pub fn ring_paths(&self) -> RingPaths {
        RingPaths::new(&self.swift_conf_dir, &self.www_dir)
    }

    fn default_rust_log() -> String {
        "info".into()
    }

    fn default_conf_dir() -> String {
        DEFAULT_CONF_DIR.into()
    }

    fn default_www_dir() -> String {
        DEFAULT_WWW_DIR.into()
    }

    fn default_partition_power() -> u8 {
        8
    }

    fn default_replicas() -> u8 {
        3
    }

    fn default_leader_command() -> String {
        "is-leader".into()
    }
}

/// The on-disk layout of ring artifacts.
#[derive(Clone, Debug, PartialEq)]
pub struct RingPaths {
    /// The directory holding builders and rendered rings.
    pub conf_dir: PathBuf,
    /// The web-servable directory rings are published to.
    pub www_dir: PathBuf,
}

impl RingPaths {
    pub fn new(conf_dir: impl Into<PathBuf>, www_dir: impl Into<PathBuf>) -> Self {
        Self {
            conf_dir: conf_dir.into(),
            www_dir: www_dir.into(),
        }
    }

    /// The path of the given ring's builder.
    pub fn builder_path(&self, ring: RingName) -> PathBuf {
        self.conf_dir.join(ring.builder_file_name())
    }

    /// The path of the given ring's rendered artifact.
    pub fn ring_path(&self, ring: RingName) -> PathBuf {
        self.conf_dir.join(ring.ring_file_name())
    }

    /// The path of the given ring's published artifact.
    pub fn www_ring_path(&self, ring: RingName) -> PathBuf {
        self.www_dir.join(ring.ring_file_name())
    }

    /// The path of the given ring's published builder.
    pub fn www_builder_path(&self, ring: RingName) -> PathBuf {
        self.www_dir.join(ring.builder_file_name())
    }

    /// The path recording the trigger of the last handled cluster message.
    pub fn trigger_path(&self) -> PathBuf {
        self.conf_dir.join(LAST_TRIGGER_FILE)
    }

    /// The path of the given ring's tombstone marker.
    pub fn tombstone_path(&self, ring: RingName) -> PathBuf {
        self.www_dir.join(format!("{}.{}", ring.ring_file_name(), TOMBSTONE_SUFFIX))
    }
}
