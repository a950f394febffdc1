use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::models::{NodeSettings, RingName};
use crate::placement::WeightedPlacement;
use crate::store::BuilderStore;

/// Build node settings for a node with the given ip, zone and block devices.
pub fn node_settings(ip: &str, zone: u32, devices: &[&str]) -> NodeSettings {
    NodeSettings {
        ip: Some(ip.into()),
        zone: Some(zone),
        region: None,
        object_port: Some(6000),
        container_port: Some(6001),
        account_port: Some(6002),
        weight: None,
        devices: devices.iter().map(|dev| dev.to_string()).collect(),
    }
}

/// Open a store over the given config, using the bundled placement engine.
pub fn store(config: &Config) -> BuilderStore {
    BuilderStore::new(config.ring_paths(), Arc::new(WeightedPlacement))
}

/// Open a store over the given config with every ring initialized.
pub fn initialized_store(config: &Config, part_power: u8, replicas: u8, min_part_hours: u32) -> Result<BuilderStore> {
    let mut store = store(config);
    for ring in RingName::ALL {
        store.initialize(ring, part_power, replicas, min_part_hours, false)?;
    }
    Ok(store)
}

/// Read every file of the conf and www dirs, for byte-for-byte comparisons.
pub fn read_tree(config: &Config) -> Result<Vec<(String, Vec<u8>)>> {
    let mut files = Vec::new();
    for dir in [&config.swift_conf_dir, &config.www_dir] {
        let dir = Path::new(dir);
        if !dir.exists() {
            continue;
        }
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            files.push((entry.path().to_string_lossy().into_owned(), std::fs::read(entry.path())?));
        }
    }
    files.sort();
    Ok(files)
}
