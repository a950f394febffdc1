//! Publication of rings to the web-servable directory peers pull from.

use anyhow::{Context, Result};

use crate::config::RingPaths;
use crate::error::{RingError, ERR_ENCODE_ARTIFACT, ERR_WRITE_ARTIFACT};
use crate::models::{RingData, RingName};
use crate::store::BuilderStore;
use crate::utils;

/// Publishes rendered rings, and retracts them when this node stops serving them.
#[derive(Clone, Debug)]
pub struct Publisher {
    paths: RingPaths,
}

impl Publisher {
    pub fn new(paths: RingPaths) -> Self {
        Self { paths }
    }

    /// Render the current builder of the given ring and publish it, along with the builder.
    ///
    /// Any tombstone left for the ring by `mark_all_deleted` is cleared once the new artifact
    /// is in place.
    #[tracing::instrument(level = "debug", skip(self, store))]
    pub fn publish(&self, store: &BuilderStore, ring: RingName) -> Result<()> {
        let builder = store.load(ring)?;
        let ring_data = serde_json::to_vec(&RingData::render(&builder)).context(ERR_ENCODE_ARTIFACT)?;
        let builder_data = serde_json::to_vec_pretty(&builder).context(ERR_ENCODE_ARTIFACT)?;
        utils::write_atomic(&self.paths.www_builder_path(ring), &builder_data)
            .and_then(|_| utils::write_atomic(&self.paths.www_ring_path(ring), &ring_data))
            .map_err(RingError::persistence)
            .context(ERR_WRITE_ARTIFACT)?;

        let tombstone = self.paths.tombstone_path(ring);
        if tombstone.exists() {
            std::fs::remove_file(&tombstone)
                .map_err(RingError::persistence)
                .with_context(|| format!("error removing tombstone {}", tombstone.display()))?;
        }
        tracing::info!(%ring, version = builder.version, "ring published");
        Ok(())
    }

    /// Mark every published ring as deleted, returning the rings which were marked.
    ///
    /// Each published artifact is moved aside to its tombstone path so that it is no longer
    /// served as authoritative. Builder state is left untouched.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn mark_all_deleted(&self) -> Result<Vec<RingName>> {
        let mut marked = Vec::new();
        for ring in RingName::ALL {
            let path = self.paths.www_ring_path(ring);
            if !path.exists() {
                continue;
            }
            std::fs::rename(&path, self.paths.tombstone_path(ring))
                .map_err(RingError::persistence)
                .with_context(|| format!("error marking {} as deleted", path.display()))?;
            marked.push(ring);
        }
        if !marked.is_empty() {
            tracing::info!(rings = ?marked, "published rings marked as deleted");
        }
        Ok(marked)
    }

    /// Check if the given ring is currently marked as deleted.
    pub fn is_marked_deleted(&self, ring: RingName) -> bool {
        self.paths.tombstone_path(ring).exists()
    }
}
