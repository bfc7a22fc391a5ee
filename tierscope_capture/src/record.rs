//! Canonical representation of benchmark telemetry records
//!
//! This module defines the in-memory shape of the three kinds of record a
//! tiered storage benchmark run emits: per-epoch counter snapshots, per-epoch
//! object placement snapshots and per-request latency samples. The counter
//! snapshot has a nested wire form that differs from its in-memory form; serde
//! converts between the two.

use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};

/// Cumulative counters for a single virtual device.
///
/// All values are cumulative since the start of the benchmark and must never
/// decrease between consecutive snapshots.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VdevCounters {
    /// Blocks written since start.
    pub written: u64,
    /// Blocks read since start.
    pub read: u64,
    /// Accumulated read latency since start.
    #[serde(default)]
    pub read_latency: u64,
}

/// Space accounting for a single tier, in blocks.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Free blocks.
    pub free: u64,
    /// Total blocks.
    pub total: u64,
}

impl Usage {
    /// Blocks in use, or `None` if the record claims more free than total
    /// space.
    #[must_use]
    pub fn used(&self) -> Option<u64> {
        self.total.checked_sub(self.free)
    }
}

/// A single storage tier at one point in time.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TierSnapshot {
    /// Devices in this tier, in device order.
    pub vdevs: Vec<VdevCounters>,
    /// Space accounting, if the record carried any for this tier.
    pub usage: Option<Usage>,
}

/// One counter telemetry record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "wire::Epoch", into = "wire::Epoch")]
pub struct EpochSnapshot {
    /// Wall-clock time of the snapshot in milliseconds.
    pub epoch_ms: u64,
    /// Tiers ordered fastest first.
    pub tiers: Vec<TierSnapshot>,
}

mod wire {
    use serde::{Deserialize, Serialize};

    use super::{EpochSnapshot, TierSnapshot, Usage, VdevCounters};

    #[derive(Debug, Default, Serialize, Deserialize)]
    pub(super) struct Tier {
        #[serde(default)]
        pub(super) vdevs: Vec<VdevCounters>,
    }

    #[derive(Debug, Default, Serialize, Deserialize)]
    pub(super) struct Storage {
        #[serde(default)]
        pub(super) tiers: Vec<Tier>,
    }

    /// The shape written by the benchmark: device counters are nested under
    /// `storage` and usage is a sibling list indexed by tier.
    #[derive(Debug, Serialize, Deserialize)]
    pub(super) struct Epoch {
        pub(super) epoch_ms: u64,
        #[serde(default)]
        pub(super) storage: Storage,
        #[serde(default)]
        pub(super) usage: Vec<Usage>,
    }

    impl From<Epoch> for EpochSnapshot {
        fn from(epoch: Epoch) -> Self {
            let len = epoch.storage.tiers.len().max(epoch.usage.len());
            let mut vdevs = epoch.storage.tiers.into_iter().map(|t| t.vdevs);
            let mut usage = epoch.usage.into_iter();
            let tiers = (0..len)
                .map(|_| TierSnapshot {
                    vdevs: vdevs.next().unwrap_or_default(),
                    usage: usage.next(),
                })
                .collect();
            EpochSnapshot {
                epoch_ms: epoch.epoch_ms,
                tiers,
            }
        }
    }

    impl From<EpochSnapshot> for Epoch {
        fn from(snapshot: EpochSnapshot) -> Self {
            let mut tiers = Vec::with_capacity(snapshot.tiers.len());
            let mut usage = Vec::with_capacity(snapshot.tiers.len());
            for tier in snapshot.tiers {
                tiers.push(Tier { vdevs: tier.vdevs });
                if let Some(u) = tier.usage {
                    usage.push(u);
                }
            }
            Epoch {
                epoch_ms: snapshot.epoch_ms,
                storage: Storage { tiers },
                usage,
            }
        }
    }
}

/// A file resident in a tier: opaque tier-local metadata and the object size
/// in bytes. Serialized as a two element array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry(pub serde_json::Value, pub u64);

impl FileEntry {
    /// Tier-local metadata, passed through untouched.
    #[must_use]
    pub fn metadata(&self) -> &serde_json::Value {
        &self.0
    }

    /// Object size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.1
    }
}

/// A single request served for an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// How long the request took.
    pub response_time: Duration,
}

/// The objects resident in one tier at one point in time.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierPlacement {
    /// Object id to file entry.
    #[serde(default)]
    pub files: BTreeMap<String, FileEntry>,
    /// Object id to the requests served for it during this timestep.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reqs: Option<BTreeMap<String, Vec<Request>>>,
}

/// One placement telemetry record: a list of tiers, fastest first.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlacementSnapshot {
    /// Tiers ordered fastest first.
    pub tiers: Vec<TierPlacement>,
}

impl PlacementSnapshot {
    /// Whether any tier carries per-request response times.
    #[must_use]
    pub fn has_requests(&self) -> bool {
        self.tiers.iter().any(|t| t.reqs.is_some())
    }
}

/// A single filesystem benchmark request observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencySample {
    /// Access-frequency class assigned by the benchmark.
    pub group: u32,
    /// Object size in bytes.
    pub size: u64,
    /// Read latency in nanoseconds.
    pub read_latency_ns: u64,
    /// Write latency in nanoseconds.
    pub write_latency_ns: u64,
}
