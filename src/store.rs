//! Ring builder storage.
//!
//! Each ring's builder lives in its own file under the configured conf dir. Every write goes
//! through `utils::write_atomic`, so other processes reading the conf dir never observe a
//! partially written builder or ring.

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::config::RingPaths;
use crate::error::{RingError, ERR_DECODE_BUILDER, ERR_ENCODE_ARTIFACT, ERR_READ_BUILDER, ERR_READ_RING, ERR_WRITE_ARTIFACT};
use crate::models::{Device, RingBuilder, RingData, RingName};
use crate::placement::PlacementEngine;
use crate::utils;

const METRIC_DEVICES_ADDED: &str = "ringsync_devices_added_total";

/// Storage of ring builders, keyed by ring name.
pub struct BuilderStore {
    /// The on-disk layout of ring artifacts.
    paths: RingPaths,
    /// The placement primitive used to create and mutate builders.
    engine: Arc<dyn PlacementEngine>,
}

impl BuilderStore {
    /// Create a new instance.
    pub fn new(paths: RingPaths, engine: Arc<dyn PlacementEngine>) -> Self {
        metrics::register_counter!(METRIC_DEVICES_ADDED, metrics::Unit::Count, "the number of devices added to rings");
        Self { paths, engine }
    }

    pub fn paths(&self) -> &RingPaths {
        &self.paths
    }

    pub fn engine(&self) -> &dyn PlacementEngine {
        self.engine.as_ref()
    }

    /// Check if the given ring has a builder on disk.
    pub fn is_initialized(&self, ring: RingName) -> bool {
        self.paths.builder_path(ring).exists()
    }

    /// Create a new builder for the given ring.
    ///
    /// Fails with `AlreadyInitialized` if the ring already has a builder, unless `force` is set,
    /// in which case the existing builder is replaced.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn initialize(&mut self, ring: RingName, part_power: u8, replicas: u8, min_part_hours: u32, force: bool) -> Result<()> {
        if self.is_initialized(ring) && !force {
            bail!(RingError::AlreadyInitialized(ring));
        }
        let builder = self
            .engine
            .initialize(part_power, replicas, min_part_hours)
            .with_context(|| format!("error initializing {} ring", ring))?;
        self.save(ring, &builder)?;
        tracing::info!(%ring, part_power, replicas, min_part_hours, "ring initialized");
        Ok(())
    }

    /// Load the builder of the given ring.
    pub fn load(&self, ring: RingName) -> Result<RingBuilder> {
        let path = self.paths.builder_path(ring);
        let data = utils::read_optional(&path)
            .map_err(RingError::persistence)
            .context(ERR_READ_BUILDER)?
            .ok_or_else(|| RingError::persistence(anyhow::anyhow!("no builder found at {}", path.display())))?;
        serde_json::from_slice(&data)
            .map_err(RingError::persistence)
            .with_context(|| format!("{} {}", ERR_DECODE_BUILDER, path.display()))
    }

    /// Persist the builder of the given ring, atomically replacing the previous version.
    pub fn save(&mut self, ring: RingName, builder: &RingBuilder) -> Result<()> {
        let data = serde_json::to_vec_pretty(builder).context(ERR_ENCODE_ARTIFACT)?;
        utils::write_atomic(&self.paths.builder_path(ring), &data)
            .map_err(RingError::persistence)
            .context(ERR_WRITE_ARTIFACT)
    }

    /// Render the given builder into the ring's distributable artifact in the conf dir.
    pub fn write_ring(&mut self, ring: RingName, builder: &RingBuilder) -> Result<()> {
        let data = serde_json::to_vec(&RingData::render(builder)).context(ERR_ENCODE_ARTIFACT)?;
        utils::write_atomic(&self.paths.ring_path(ring), &data)
            .map_err(RingError::persistence)
            .context(ERR_WRITE_ARTIFACT)
    }

    /// The version of the rendered ring in the conf dir, if one exists and can be decoded.
    pub fn ring_version(&self, ring: RingName) -> Result<Option<u64>> {
        let data = match utils::read_optional(&self.paths.ring_path(ring))
            .map_err(RingError::persistence)
            .context(ERR_READ_RING)?
        {
            Some(data) => data,
            None => return Ok(None),
        };
        match serde_json::from_slice::<RingData>(&data) {
            Ok(ring_data) => Ok(Some(ring_data.version)),
            Err(err) => {
                tracing::warn!(%ring, error = %err, "undecodable rendered ring, treating it as missing");
                Ok(None)
            }
        }
    }

    /// Add a device to the given ring, returning `false` if it was already a member.
    #[tracing::instrument(level = "debug", skip(self, device))]
    pub fn add_device(&mut self, ring: RingName, device: Device) -> Result<bool> {
        let mut builder = self.load(ring)?;
        if !self.add_device_to(ring, &mut builder, device) {
            return Ok(false);
        }
        self.save(ring, &builder)?;
        Ok(true)
    }

    /// Add a device to an already loaded builder, returning `false` if it was already a member.
    pub(crate) fn add_device_to(&self, ring: RingName, builder: &mut RingBuilder, device: Device) -> bool {
        if builder.contains(&device) {
            tracing::debug!(%ring, device = %device.device, "device already present in ring");
            return false;
        }
        let (ip, name) = (device.ip.clone(), device.device.clone());
        let id = self.engine.add_device(builder, device);
        metrics::increment_counter!(METRIC_DEVICES_ADDED, "ring" => ring.as_str());
        tracing::info!(%ring, id, %ip, device = %name, "added device to ring");
        true
    }

    /// Get the minimum partition hours of the given ring.
    pub fn get_min_part_hours(&self, ring: RingName) -> Result<u32> {
        Ok(self.load(ring)?.min_part_hours)
    }

    /// Set the minimum partition hours of the given ring, returning `true` if the value changed.
    ///
    /// Lowering the value is refused unless `allow_decrease` is set.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn set_min_part_hours(&mut self, ring: RingName, hours: u32, allow_decrease: bool) -> Result<bool> {
        let mut builder = self.load(ring)?;
        let changed = builder
            .set_min_part_hours(hours, allow_decrease)
            .with_context(|| format!("error updating min_part_hours of {} ring", ring))?;
        if changed {
            self.save(ring, &builder)?;
            tracing::info!(%ring, hours, "min_part_hours updated");
        }
        Ok(changed)
    }
}
