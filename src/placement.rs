//! Partition placement.
//!
//! The placement engine is the primitive which actually computes partition assignments. The
//! coordination layer only decides when it runs and what happens with its output, so it is
//! modelled as a trait which may be backed by any placement implementation.
//!
//! The bundled `WeightedPlacement` engine assigns each device a share of the ring's
//! `partitions * replicas` slots proportional to its weight, never places two replicas of the
//! same partition on one device, and prefers spreading replicas of a partition across zones.

use anyhow::{ensure, Result};
use chrono::{DateTime, Duration, Utc};

use crate::models::{Device, RingBuilder};

/// The largest partition power accepted when creating a builder.
pub const MAX_PART_POWER: u8 = 20;

/// The result of a rebalance attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum RebalanceOutcome {
    /// Placement changed, with the number of replica slots which were (re)assigned.
    Rebalanced { moved: usize },
    /// Placement is already balanced.
    Unchanged,
    /// The ring was rebalanced too recently, placement was not touched.
    Throttled { remaining: Duration },
}

/// A ring placement primitive.
pub trait PlacementEngine: Send + Sync {
    /// Create a new, empty builder.
    fn initialize(&self, part_power: u8, replicas: u8, min_part_hours: u32) -> Result<RingBuilder> {
        ensure!(part_power <= MAX_PART_POWER, "partition power {} exceeds the maximum of {}", part_power, MAX_PART_POWER);
        ensure!(replicas >= 1, "a ring needs at least one replica");
        Ok(RingBuilder::new(part_power, replicas, min_part_hours))
    }

    /// Add a device to the given builder, returning its device ID.
    fn add_device(&self, builder: &mut RingBuilder, device: Device) -> u32 {
        builder.devs.push(device);
        (builder.devs.len() - 1) as u32
    }

    /// Rebalance the given builder as of `now`.
    fn rebalance(&self, builder: &mut RingBuilder, now: DateTime<Utc>) -> Result<RebalanceOutcome>;
}

/// A deterministic, weight-proportional placement engine.
#[derive(Clone, Debug, Default)]
pub struct WeightedPlacement;

impl PlacementEngine for WeightedPlacement {
    #[tracing::instrument(level = "debug", skip(self, builder))]
    fn rebalance(&self, builder: &mut RingBuilder, now: DateTime<Utc>) -> Result<RebalanceOutcome> {
        if let Some(remaining) = builder.throttled_for(now) {
            return Ok(RebalanceOutcome::Throttled { remaining });
        }
        let total_weight: f64 = builder.devs.iter().map(|dev| dev.weight).filter(|weight| *weight > 0.0).sum();
        if total_weight <= 0.0 {
            return Ok(RebalanceOutcome::Unchanged);
        }

        let (parts, replicas) = (builder.partition_count(), builder.replicas as usize);
        let mut table = builder.replica2part2dev.clone();
        table.resize_with(replicas, Vec::new);
        for row in table.iter_mut() {
            row.resize(parts, None);
        }

        // The number of slots each device should ideally hold.
        let slots = (parts * replicas) as f64;
        let desired: Vec<f64> = builder
            .devs
            .iter()
            .map(|dev| if dev.weight > 0.0 { dev.weight / total_weight * slots } else { 0.0 })
            .collect();
        let mut assigned = vec![0usize; builder.devs.len()];
        for dev_id in table.iter().flatten().flatten() {
            if let Some(count) = assigned.get_mut(*dev_id as usize) {
                *count += 1;
            }
        }

        // Shed slots from devices holding more than their share. Later replicas go first so that
        // the primary assignment of a partition is the most stable.
        for row in table.iter_mut().rev() {
            for slot in row.iter_mut() {
                let dev_id = match slot {
                    Some(dev_id) => *dev_id as usize,
                    None => continue,
                };
                let over = match (assigned.get(dev_id), desired.get(dev_id)) {
                    (Some(count), Some(want)) => *count as f64 > want.ceil(),
                    _ => true, // Unknown device, release it.
                };
                if over {
                    *slot = None;
                    if let Some(count) = assigned.get_mut(dev_id) {
                        *count -= 1;
                    }
                }
            }
        }

        // Fill every open slot with the most under-assigned eligible device.
        for replica in 0..replicas {
            for part in 0..parts {
                if table[replica][part].is_some() {
                    continue;
                }
                let holders: Vec<usize> = (0..replicas).filter_map(|r| table[r][part]).map(|id| id as usize).collect();
                if let Some(dev_id) = pick_device(&builder.devs, &desired, &assigned, &holders) {
                    table[replica][part] = Some(dev_id as u32);
                    assigned[dev_id] += 1;
                }
            }
        }

        if table == builder.replica2part2dev {
            return Ok(RebalanceOutcome::Unchanged);
        }
        let moved = table
            .iter()
            .flatten()
            .zip(builder.replica2part2dev.iter().flatten().chain(std::iter::repeat(&None)))
            .filter(|(new, old)| new != old)
            .count();
        builder.replica2part2dev = table;
        builder.last_rebalance = Some(now);
        builder.version += 1;
        tracing::debug!(moved, version = builder.version, "placement changed");
        Ok(RebalanceOutcome::Rebalanced { moved })
    }
}

/// Select the device for an open slot of a partition currently held by `holders`.
///
/// Devices already holding the partition are never eligible. Among the rest, devices in a zone
/// not yet used by the partition win, then the device with the largest deficit, then the
/// lowest device ID.
fn pick_device(devs: &[Device], desired: &[f64], assigned: &[usize], holders: &[usize]) -> Option<usize> {
    let mut best: Option<(bool, f64, usize)> = None;
    for (dev_id, dev) in devs.iter().enumerate() {
        if dev.weight <= 0.0 || holders.contains(&dev_id) {
            continue;
        }
        let new_zone = !holders.iter().any(|holder| devs.get(*holder).map(|other| other.zone == dev.zone).unwrap_or(false));
        let deficit = desired[dev_id] - assigned[dev_id] as f64;
        let better = match best {
            None => true,
            Some((best_zone, best_deficit, _)) => (new_zone, deficit) > (best_zone, best_deficit),
        };
        if better {
            best = Some((new_zone, deficit, dev_id));
        }
    }
    best.map(|(_, _, dev_id)| dev_id)
}
