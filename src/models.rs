//! Ring data models.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RingError;

/// The default weight given to devices which do not declare one.
pub const DEFAULT_DEVICE_WEIGHT: f64 = 100.0;
/// The default region given to devices which do not declare one.
pub const DEFAULT_DEVICE_REGION: u32 = 1;

/// The fixed set of rings managed by a cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RingName {
    Account,
    Container,
    Object,
}

impl RingName {
    /// All rings, in the order in which they are processed.
    pub const ALL: [RingName; 3] = [RingName::Account, RingName::Container, RingName::Object];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::Container => "container",
            Self::Object => "object",
        }
    }

    /// The file name of this ring's builder artifact.
    pub fn builder_file_name(&self) -> String {
        format!("{}.builder", self.as_str())
    }

    /// The file name of this ring's rendered, distributable artifact.
    pub fn ring_file_name(&self) -> String {
        format!("{}.ring", self.as_str())
    }
}

impl fmt::Display for RingName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RingName {
    type Err = RingError;

    fn from_str(val: &str) -> Result<Self, Self::Err> {
        match val {
            "account" => Ok(Self::Account),
            "container" => Ok(Self::Container),
            "object" => Ok(Self::Object),
            other => Err(RingError::UnknownRing(other.into())),
        }
    }
}

/// A storage device which is a member of a ring.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub region: u32,
    pub zone: u32,
    pub ip: String,
    pub port: u16,
    /// The block device name, e.g. `sdb`.
    pub device: String,
    pub weight: f64,
    #[serde(default)]
    pub meta: String,
}

impl Device {
    /// Check if this device identifies the same member as the other device.
    ///
    /// Membership is keyed on the `(ip, port, device)` tuple only.
    pub fn same_member(&self, other: &Device) -> bool {
        self.ip == other.ip && self.port == other.port && self.device == other.device
    }
}

/// The storage settings of a single node, as handed over by the hook layer.
///
/// All fields are optional on the wire so that a partial description surfaces as an
/// `InvalidDeviceSpec` instead of a decoding failure.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeSettings {
    pub ip: Option<String>,
    pub zone: Option<u32>,
    pub region: Option<u32>,
    pub object_port: Option<u16>,
    pub container_port: Option<u16>,
    pub account_port: Option<u16>,
    pub weight: Option<f64>,
    #[serde(default)]
    pub devices: Vec<String>,
}

impl NodeSettings {
    /// The service port used by this node for the given ring.
    pub fn port_for(&self, ring: RingName) -> Option<u16> {
        match ring {
            RingName::Account => self.account_port,
            RingName::Container => self.container_port,
            RingName::Object => self.object_port,
        }
    }

    /// Build the device descriptions for the given ring, one entry per declared block device.
    ///
    /// Each entry is validated independently, so one malformed device does not prevent the
    /// others from being added.
    pub fn devices_for(&self, ring: RingName) -> Vec<Result<Device, RingError>> {
        self.devices.iter().map(|name| self.device(ring, name)).collect()
    }

    fn device(&self, ring: RingName, name: &str) -> Result<Device, RingError> {
        let ip = match self.ip.as_deref().map(str::trim) {
            Some(ip) if !ip.is_empty() => ip.to_string(),
            _ => return Err(RingError::InvalidDeviceSpec(format!("device {:?} has no ip", name))),
        };
        let port = match self.port_for(ring) {
            Some(port) if port != 0 => port,
            _ => return Err(RingError::InvalidDeviceSpec(format!("device {:?} has no {} port", name, ring))),
        };
        let zone = self
            .zone
            .ok_or_else(|| RingError::InvalidDeviceSpec(format!("device {:?} has no zone", name)))?;
        let weight = self.weight.unwrap_or(DEFAULT_DEVICE_WEIGHT);
        if !weight.is_finite() || weight <= 0.0 {
            return Err(RingError::InvalidDeviceSpec(format!("device {:?} has invalid weight {}", name, weight)));
        }
        let device = name.trim();
        if device.is_empty() {
            return Err(RingError::InvalidDeviceSpec("empty device name".into()));
        }
        Ok(Device {
            region: self.region.unwrap_or(DEFAULT_DEVICE_REGION),
            zone,
            ip,
            port,
            device: device.into(),
            weight,
            meta: String::new(),
        })
    }
}

/// The mutable, authoritative source representation of a ring.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RingBuilder {
    pub part_power: u8,
    pub replicas: u8,
    pub min_part_hours: u32,
    /// All member devices; a device's index in this list is its ID.
    pub devs: Vec<Device>,
    /// Device assignment table, indexed by replica then by partition.
    pub replica2part2dev: Vec<Vec<Option<u32>>>,
    /// The time of the last rebalance which changed placement.
    pub last_rebalance: Option<DateTime<Utc>>,
    /// Incremented each time a rebalance changes placement.
    pub version: u64,
}

impl RingBuilder {
    /// Create a new empty builder.
    pub fn new(part_power: u8, replicas: u8, min_part_hours: u32) -> Self {
        Self {
            part_power,
            replicas,
            min_part_hours,
            devs: Vec::new(),
            replica2part2dev: Vec::new(),
            last_rebalance: None,
            version: 0,
        }
    }

    /// The number of partitions in this ring.
    pub fn partition_count(&self) -> usize {
        1usize << self.part_power
    }

    /// Check if the given device is already a member of this ring.
    pub fn contains(&self, device: &Device) -> bool {
        self.devs.iter().any(|dev| dev.same_member(device))
    }

    /// Update the minimum partition hours of this ring, returning `true` if the value changed.
    ///
    /// Lowering the value requires `allow_decrease`; otherwise the update is refused with an error.
    pub fn set_min_part_hours(&mut self, hours: u32, allow_decrease: bool) -> Result<bool> {
        if hours == self.min_part_hours {
            return Ok(false);
        }
        if hours < self.min_part_hours && !allow_decrease {
            bail!(
                "refusing to lower min_part_hours from {} to {} without an explicit override",
                self.min_part_hours,
                hours
            );
        }
        self.min_part_hours = hours;
        Ok(true)
    }

    /// The time remaining before this ring may be rebalanced again, if any.
    pub fn throttled_for(&self, now: DateTime<Utc>) -> Option<Duration> {
        let last = self.last_rebalance?;
        let next = last + Duration::hours(i64::from(self.min_part_hours));
        if now < next {
            Some(next - now)
        } else {
            None
        }
    }
}

/// The rendered, distributable form of a ring.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RingData {
    pub part_power: u8,
    pub replicas: u8,
    pub version: u64,
    pub devs: Vec<Device>,
    pub replica2part2dev: Vec<Vec<Option<u32>>>,
}

impl RingData {
    /// Render the distributable form of the given builder.
    pub fn render(builder: &RingBuilder) -> Self {
        Self {
            part_power: builder.part_power,
            replicas: builder.replicas,
            version: builder.version,
            devs: builder.devs.clone(),
            replica2part2dev: builder.replica2part2dev.clone(),
        }
    }
}
