//! A three node cluster with one leader, driven through the public API.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use tempfile::TempDir;

use ringsync::checksum::{self, ChecksumTracker};
use ringsync::{Config, FnGate, Node, NodeSettings, Reaction, RingName, WireMessage};

type TestNode = Node<FnGate<fn() -> bool>, Vec<WireMessage>>;

fn leading() -> bool {
    true
}

fn following() -> bool {
    false
}

fn node(root: &Path, address: &str, leader: fn() -> bool) -> TestNode {
    let config = Config::for_root(root, address);
    Node::new(Arc::new(config), FnGate(leader), Vec::new())
}

fn node_settings(ip: &str, devices: &[&str]) -> NodeSettings {
    NodeSettings {
        ip: Some(ip.into()),
        zone: Some(1),
        region: Some(1),
        object_port: Some(6000),
        container_port: Some(6001),
        account_port: Some(6002),
        weight: Some(100.0),
        devices: devices.iter().map(|dev| dev.to_string()).collect(),
    }
}

/// Copy the given files from one directory to another, as the transport does when fetching.
fn fetch(from: &Path, to: &Path, files: &[String]) -> Result<()> {
    std::fs::create_dir_all(to)?;
    for file in files {
        std::fs::copy(from.join(file), to.join(file))?;
    }
    Ok(())
}

fn read_dir(dir: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        files.push((entry.file_name().to_string_lossy().into_owned(), std::fs::read(entry.path())?));
    }
    files.sort();
    Ok(files)
}

fn ring_checksums(node: &TestNode) -> Result<HashMap<String, String>> {
    let tracker = ChecksumTracker::new(node.config().ring_paths());
    let mut sums = HashMap::new();
    for ring in RingName::ALL {
        if let Some(sum) = tracker.ring_checksum(ring)? {
            sums.insert(ring.to_string(), sum);
        }
    }
    Ok(sums)
}

#[test]
fn leader_update_converges_cluster() -> Result<()> {
    let dirs = (TempDir::new()?, TempDir::new()?, TempDir::new()?);
    let mut leader = node(dirs.0.path(), "10.0.0.1", leading);
    let mut followers = vec![node(dirs.1.path(), "10.0.0.2", following), node(dirs.2.path(), "10.0.0.3", following)];

    // Bootstrap: the leader creates the rings with a first device, and the followers pull them.
    leader.init_rings(false)?;
    let bootstrap = leader.update_rings(Some(&node_settings("10.0.0.1", &["sdb"])), Some(0))?;
    assert!(bootstrap.changed == RingName::ALL.to_vec(), "expected every ring to be published got {:?}", bootstrap.changed);
    let bootstrap_msg = leader.sync().transport()[0].clone();
    for follower in followers.iter_mut() {
        match follower.receive(&bootstrap_msg)? {
            Reaction::FetchFromBroker { broker, files, .. } => {
                assert!(broker == "10.0.0.1", "expected leader as broker got {}", broker);
                fetch(&leader.config().ring_paths().www_dir, &follower.config().ring_paths().conf_dir, &files)?;
            }
            other => bail!("expected fetch reaction got {:?}", other),
        }
    }

    let object_before = leader.store().load(RingName::Object)?;
    let checksums_before = ring_checksums(&leader)?;
    let followers_before = followers
        .iter()
        .map(|follower| read_dir(&follower.config().ring_paths().conf_dir))
        .collect::<Result<Vec<_>>>()?;

    // Every node receives the same update with two new devices.
    let settings = node_settings("10.0.0.4", &["sdc", "sdd"]);
    let outcome = leader.update_rings(Some(&settings), Some(0))?;
    for follower in followers.iter_mut() {
        let outcome = follower.update_rings(Some(&settings), Some(0))?;
        assert!(outcome.changed.is_empty(), "expected follower not to change rings got {:?}", outcome.changed);
        assert!(follower.sync().transport().is_empty(), "expected follower not to broadcast got {:?}", follower.sync().transport());
    }

    let object_after = leader.store().load(RingName::Object)?;
    assert!(
        object_after.devs.len() == object_before.devs.len() + 2,
        "expected 2 more devices got {} -> {}",
        object_before.devs.len(),
        object_after.devs.len()
    );
    let checksums_after = ring_checksums(&leader)?;
    for ring in RingName::ALL {
        let key = ring.to_string();
        assert!(checksums_before.get(&key) != checksums_after.get(&key), "expected {} ring checksum to change", ring);
    }
    assert!(outcome.changed == RingName::ALL.to_vec(), "expected every ring to be published got {:?}", outcome.changed);
    let sent = leader.sync().transport();
    assert!(sent.len() == 2, "expected exactly one broadcast for this update got {}", sent.len() - 1);
    let sync_msg = sent[1].clone();
    assert!(
        sync_msg.broker_token.is_some() && sync_msg.broker_token != bootstrap_msg.broker_token,
        "expected a fresh broker token got {:?}",
        sync_msg.broker_token
    );
    for (follower, before) in followers.iter().zip(followers_before.iter()) {
        let after = read_dir(&follower.config().ring_paths().conf_dir)?;
        assert!(&after == before, "expected follower artifacts to be untouched");
    }

    // Followers pull the new state and echo the broker token back.
    let mut responses = Vec::new();
    for follower in followers.iter_mut() {
        match follower.receive(&sync_msg)? {
            Reaction::FetchFromBroker { broker_token, files, .. } => {
                fetch(&leader.config().ring_paths().www_dir, &follower.config().ring_paths().conf_dir, &files)?;
                let mut response = ring_checksums(follower)?;
                response.insert("broker-token".into(), broker_token);
                responses.push(response);
            }
            other => bail!("expected fetch reaction got {:?}", other),
        }
        let repeat = follower.receive(&sync_msg)?;
        assert!(repeat == Reaction::Ignored, "expected duplicate sync request to be ignored got {:?}", repeat);
    }

    assert!(leader.sync().peers_converged(&responses), "expected followers to converge on the last broker token");
    let mut observations = responses.clone();
    observations.push(ring_checksums(&leader)?);
    for ring in RingName::ALL {
        assert!(checksum::all_equal(&observations, ring.as_str(), true), "expected every node to agree on the {} ring", ring);
    }
    Ok(())
}
