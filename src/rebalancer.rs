//! Leader-gated ring rebalancing.
//!
//! Only the elected leader ever mutates ring state. A pass over the rings is a no-op when this
//! node is not the leader, or when any ring has not been initialized yet. Otherwise each ring is
//! loaded, has its `min_part_hours` brought in line with the desired value, gains any new devices,
//! and is then handed to the placement primitive. Rings are processed in order and each one is
//! persisted on its own, so a failure part way through leaves earlier rings updated.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};

use crate::error::RingError;
use crate::leader::LeaderGate;
use crate::models::{NodeSettings, RingName};
use crate::placement::RebalanceOutcome;
use crate::store::BuilderStore;

const METRIC_REBALANCES: &str = "ringsync_rebalances_total";
const METRIC_REBALANCES_THROTTLED: &str = "ringsync_rebalances_throttled_total";

/// The reason an update pass was skipped entirely.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NotLeader,
    Uninitialized,
}

/// A summary of what an update pass did.
#[derive(Debug, Default)]
pub struct UpdateReport {
    /// Set when the pass did not touch any ring.
    pub skipped: Option<SkipReason>,
    /// The number of devices added, per ring.
    pub devices_added: BTreeMap<RingName, usize>,
    /// Rings whose `min_part_hours` was updated.
    pub min_part_hours_updated: Vec<RingName>,
    /// Rings whose placement changed.
    pub rebalanced: Vec<RingName>,
    /// Rings which could not be rebalanced yet due to `min_part_hours`.
    pub throttled: Vec<RingName>,
    /// Device descriptions which were rejected. Other devices of the pass were still processed.
    pub rejected: Vec<RingError>,
}

/// Decides whether and how rings get rebalanced.
pub struct RingRebalancer<L> {
    /// The leader gate consulted before every decision and every write.
    leader: L,
    /// Allow `min_part_hours` to be lowered.
    allow_min_part_hours_decrease: bool,
}

impl<L: LeaderGate> RingRebalancer<L> {
    /// Create a new instance.
    pub fn new(leader: L, allow_min_part_hours_decrease: bool) -> Self {
        metrics::register_counter!(METRIC_REBALANCES, metrics::Unit::Count, "the number of rebalances which changed placement");
        metrics::register_counter!(METRIC_REBALANCES_THROTTLED, metrics::Unit::Count, "the number of rebalances skipped due to min_part_hours");
        Self {
            leader,
            allow_min_part_hours_decrease,
        }
    }

    /// The leader gate this rebalancer consults.
    pub fn leader(&self) -> &L {
        &self.leader
    }

    /// Update all rings as of now.
    pub fn update_rings(&self, store: &mut BuilderStore, node_settings: Option<&NodeSettings>, min_part_hours: Option<u32>) -> Result<UpdateReport> {
        self.update_rings_at(store, node_settings, min_part_hours, Utc::now())
    }

    /// Update all rings as of the given time.
    #[tracing::instrument(level = "debug", skip(self, store, node_settings))]
    pub fn update_rings_at(
        &self, store: &mut BuilderStore, node_settings: Option<&NodeSettings>, min_part_hours: Option<u32>, now: DateTime<Utc>,
    ) -> Result<UpdateReport> {
        let mut report = UpdateReport::default();
        if !self.leader.is_leader() {
            tracing::debug!("not the leader, skipping ring update");
            report.skipped = Some(SkipReason::NotLeader);
            return Ok(report);
        }
        if let Some(ring) = RingName::ALL.iter().find(|ring| !store.is_initialized(**ring)) {
            tracing::info!(%ring, "ring not initialized yet, skipping ring update");
            report.skipped = Some(SkipReason::Uninitialized);
            return Ok(report);
        }

        for ring in RingName::ALL {
            self.update_ring(store, ring, node_settings, min_part_hours, now, &mut report)?;
        }
        Ok(report)
    }

    fn update_ring(
        &self, store: &mut BuilderStore, ring: RingName, node_settings: Option<&NodeSettings>, min_part_hours: Option<u32>, now: DateTime<Utc>,
        report: &mut UpdateReport,
    ) -> Result<()> {
        let mut builder = store.load(ring)?;
        let original = builder.clone();

        if let Some(hours) = min_part_hours {
            match builder.set_min_part_hours(hours, self.allow_min_part_hours_decrease) {
                Ok(true) => {
                    tracing::info!(%ring, hours, "updating min_part_hours");
                    report.min_part_hours_updated.push(ring);
                }
                Ok(false) => (),
                Err(err) => tracing::warn!(%ring, error = %err, "min_part_hours left unchanged"),
            }
        }

        if let Some(settings) = node_settings {
            let mut added = 0;
            for device in settings.devices_for(ring) {
                match device {
                    Ok(device) => {
                        if store.add_device_to(ring, &mut builder, device) {
                            added += 1;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(%ring, error = %err, "rejecting device");
                        if !report.rejected.iter().any(|known| known.to_string() == err.to_string()) {
                            report.rejected.push(err);
                        }
                    }
                }
            }
            if added > 0 {
                report.devices_added.insert(ring, added);
            }
        }

        let outcome = store
            .engine()
            .rebalance(&mut builder, now)
            .with_context(|| format!("error rebalancing {} ring", ring))?;
        match &outcome {
            RebalanceOutcome::Rebalanced { moved } => {
                tracing::info!(%ring, moved, "ring rebalanced");
                metrics::increment_counter!(METRIC_REBALANCES, "ring" => ring.as_str());
                report.rebalanced.push(ring);
            }
            RebalanceOutcome::Throttled { remaining } => {
                tracing::info!(%ring, remaining_minutes = remaining.num_minutes(), "ring rebalanced too recently, skipping");
                metrics::increment_counter!(METRIC_REBALANCES_THROTTLED, "ring" => ring.as_str());
                report.throttled.push(ring);
            }
            RebalanceOutcome::Unchanged => tracing::debug!(%ring, "ring already balanced"),
        }

        // A ring whose last render failed lags behind its builder until rendered again.
        let render = matches!(outcome, RebalanceOutcome::Rebalanced { .. })
            || (builder.version > 0 && store.ring_version(ring)? != Some(builder.version));
        if builder == original && !render {
            return Ok(());
        }
        // Leadership may have moved while this ring was being prepared.
        if !self.leader.is_leader() {
            tracing::warn!(%ring, "leadership lost, aborting ring update before write");
            bail!(RingError::StaleLeadership);
        }
        if builder != original {
            store.save(ring, &builder)?;
        }
        if render {
            if builder == original {
                tracing::warn!(%ring, version = builder.version, "rendered ring behind its builder, rendering again");
            }
            store.write_ring(ring, &builder)?;
        }
        Ok(())
    }
}
