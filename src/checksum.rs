//! Change detection over ring artifacts.
//!
//! Fingerprints are only ever compared for equality, so a fast non-cryptographic hash is used.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Result;

use crate::config::RingPaths;
use crate::models::RingName;
use crate::utils;

/// A mapping of ring name to the fingerprint of one of its artifacts.
///
/// A `None` fingerprint means the artifact does not exist.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChecksumSet(BTreeMap<RingName, Option<String>>);

impl ChecksumSet {
    /// The fingerprint recorded for the given ring.
    pub fn get(&self, ring: RingName) -> Option<&str> {
        self.0.get(&ring).and_then(|sum| sum.as_deref())
    }

    /// The rings whose fingerprint differs in `other`.
    pub fn changed(&self, other: &ChecksumSet) -> Vec<RingName> {
        RingName::ALL
            .iter()
            .copied()
            .filter(|ring| self.0.get(ring) != other.0.get(ring))
            .collect()
    }
}

/// Fingerprints of both artifact kinds of every ring, taken at one point in time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub builders: ChecksumSet,
    pub rings: ChecksumSet,
}

/// Computes fingerprints over builder and ring artifacts.
#[derive(Clone, Debug)]
pub struct ChecksumTracker {
    paths: RingPaths,
}

impl ChecksumTracker {
    pub fn new(paths: RingPaths) -> Self {
        Self { paths }
    }

    /// The fingerprint of the given ring's builder, if it exists.
    pub fn builder_checksum(&self, ring: RingName) -> Result<Option<String>> {
        file_checksum(&self.paths.builder_path(ring))
    }

    /// The fingerprint of the given ring's rendered artifact, if it exists.
    pub fn ring_checksum(&self, ring: RingName) -> Result<Option<String>> {
        file_checksum(&self.paths.ring_path(ring))
    }

    /// Fingerprint every ring's builder and rendered artifact.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let (mut builders, mut rings) = (BTreeMap::new(), BTreeMap::new());
        for ring in RingName::ALL {
            builders.insert(ring, self.builder_checksum(ring)?);
            rings.insert(ring, self.ring_checksum(ring)?);
        }
        Ok(Snapshot {
            builders: ChecksumSet(builders),
            rings: ChecksumSet(rings),
        })
    }
}

/// The fingerprint of the file at the given path, as 16 hex chars, if the file exists.
pub fn file_checksum(path: &Path) -> Result<Option<String>> {
    Ok(utils::read_optional(path)?.map(|data| format!("{:016x}", seahash::hash(&data))))
}

/// Check if all observations agree on the value of `key`.
///
/// Observations lacking the key are ignored, unless `must_exist` is set, in which case every
/// observation must carry it.
pub fn all_equal<V: PartialEq>(observations: &[HashMap<String, V>], key: &str, must_exist: bool) -> bool {
    let mut expected: Option<&V> = None;
    for observation in observations {
        match (observation.get(key), expected) {
            (None, _) if must_exist => return false,
            (None, _) => continue,
            (Some(val), None) => expected = Some(val),
            (Some(val), Some(first)) if val != first => return false,
            (Some(_), Some(_)) => continue,
        }
    }
    true
}

/// The first value of `key` found across the given observations.
pub fn first_available<'a, V>(observations: &'a [HashMap<String, V>], key: &str) -> Option<&'a V> {
    observations.iter().find_map(|observation| observation.get(key))
}
