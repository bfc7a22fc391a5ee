//! Derived series assembly
//!
//! [`assemble`] runs every stage of the pipeline over a fully loaded run and
//! returns [`DerivedSeries`], the only thing a renderer needs. Each series is
//! tagged with the device, tier, cohort or group it describes.

use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use serde::Serialize;
use tierscope_capture::{
    jsonl,
    record::{EpochSnapshot, LatencySample, PlacementSnapshot, VdevCounters},
    table, validate,
};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    delta::{self, CounterRegression},
    latency::{self, Distribution, Ladder},
    placement::{self, Timestep},
    rate::{self, Converter},
};

/// Errors produced while loading or assembling a run
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A JSONL telemetry stream failed to read
    #[error("Failed to read {path:?}: {source}")]
    Records {
        /// Path of the stream
        path: PathBuf,
        /// Underlying reader error
        #[source]
        source: jsonl::Error,
    },
    /// A latency table failed to read
    #[error("Failed to read {path:?}: {source}")]
    Table {
        /// Path of the table
        path: PathBuf,
        /// Underlying reader error
        #[source]
        source: table::Error,
    },
    /// Counter snapshots are out of order
    #[error(transparent)]
    Epochs(#[from] validate::Error),
    /// A device counter went backward
    #[error("Tier {tier} vdev {vdev} {direction} counter: {source}")]
    Counter {
        /// Tier index, 0 is fastest
        tier: usize,
        /// Device index within the tier
        vdev: usize,
        /// `read` or `written`
        direction: &'static str,
        /// The regression
        #[source]
        source: CounterRegression,
    },
    /// A tier reports more free than total blocks
    #[error("Tier {tier} reports more free than total blocks at epoch {epoch_ms}")]
    Usage {
        /// Tier index, 0 is fastest
        tier: usize,
        /// Epoch of the offending snapshot
        epoch_ms: u64,
    },
    /// A placement snapshot could not be grouped
    #[error("Placement timestep {timestep}: {source}")]
    Placement {
        /// Index of the snapshot in the placement stream
        timestep: usize,
        /// Underlying grouping error
        #[source]
        source: placement::Error,
    },
    /// Rate conversion is misconfigured
    #[error(transparent)]
    Rate(#[from] rate::Error),
    /// The size ladder is misconfigured
    #[error(transparent)]
    Ladder(#[from] latency::Error),
}

/// A latency table and the label it is reported under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyTable {
    /// Label of the table, e.g. a migration policy
    pub label: String,
    /// Samples in row order
    pub samples: Vec<LatencySample>,
}

/// Every record of one benchmark run, fully materialised.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inputs {
    /// Counter snapshots in file order
    pub epochs: Vec<EpochSnapshot>,
    /// Placement snapshots in file order
    pub placements: Vec<PlacementSnapshot>,
    /// Latency tables in configuration order
    pub latency: Vec<LatencyTable>,
}

impl Inputs {
    /// Load the inputs named by `config` from `run_dir`.
    ///
    /// Inputs that do not exist are skipped with a warning and left empty.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing input fails to read or decode.
    pub fn load(config: &Config, run_dir: &Path) -> Result<Self, Error> {
        let epochs = read_stream(&run_dir.join(&config.inputs.metrics))?;
        let placements = read_stream(&run_dir.join(&config.inputs.placement))?;

        let mut latency = Vec::with_capacity(config.latency_sources.len());
        for source in &config.latency_sources {
            let path = run_dir.join(&source.path);
            if !path.exists() {
                warn!(path = %path.display(), label = %source.label, "latency table not found, skipping");
                continue;
            }
            let samples = table::read_path(&path).map_err(|source| Error::Table {
                path: path.clone(),
                source,
            })?;
            latency.push(LatencyTable {
                label: source.label.clone(),
                samples,
            });
        }

        info!(
            epochs = epochs.len(),
            placements = placements.len(),
            latency_tables = latency.len(),
            "loaded run"
        );
        Ok(Self {
            epochs,
            placements,
            latency,
        })
    }
}

fn read_stream<T>(path: &Path) -> Result<Vec<T>, Error>
where
    T: serde::de::DeserializeOwned,
{
    if !path.exists() {
        warn!(path = %path.display(), "telemetry stream not found, skipping");
        return Ok(Vec::new());
    }
    let records = jsonl::Source::open(path)
        .and_then(|source| source.read_all())
        .map_err(|source| Error::Records {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(records)
}

/// A single virtual device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Device {
    /// Tier index, 0 is fastest
    pub tier: usize,
    /// Device index within the tier
    pub vdev: usize,
}

/// Read and write throughput of one device over time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceThroughput {
    /// The device
    pub device: Device,
    /// Milliseconds since the first counter snapshot of the run
    pub time_ms: Vec<u64>,
    /// Read rate at each point of `time_ms`
    pub read: Vec<f64>,
    /// Write rate at each point of `time_ms`
    pub written: Vec<f64>,
}

/// Capacity of one tier over time, in the configured capacity unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierUsageSeries {
    /// Tier index, 0 is fastest
    pub tier: usize,
    /// Milliseconds since the first counter snapshot of the run
    pub time_ms: Vec<u64>,
    /// Used capacity
    pub used: Vec<f64>,
    /// Total capacity
    pub total: Vec<f64>,
}

/// Mean tier of one cohort, one value per placement timestep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortSeries {
    /// Cohort name
    pub name: String,
    /// Mean tier per timestep, absent where the cohort had no live members
    pub mean_tier: Vec<Option<f64>>,
}

/// Everything derived from the placement stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlacementSeries {
    /// Longitudinal mean-tier series, in cohort order
    pub cohorts: Vec<CohortSeries>,
    /// Per-timestep matrices and request latency
    pub timesteps: Vec<Timestep>,
}

/// Latency distributions of one access-frequency group in one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencySeries {
    /// Label of the originating table
    pub source: String,
    /// Access-frequency group id
    pub group: u32,
    /// Display name of the group
    pub name: String,
    /// Distributions of the occupied size classes, in ladder order
    pub distributions: Vec<Distribution>,
}

/// The output of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DerivedSeries {
    /// Per-device throughput, ordered by device
    pub throughput: Vec<DeviceThroughput>,
    /// Per-tier capacity usage, ordered by tier
    pub usage: Vec<TierUsageSeries>,
    /// Cohort residency
    pub placement: PlacementSeries,
    /// Latency by size class, per table and group
    pub latency: Vec<LatencySeries>,
}

/// Derive every series from `inputs`.
///
/// # Errors
///
/// Returns an error on out-of-order epochs, counter regressions, impossible
/// usage records, placement snapshots that cannot be grouped, or a
/// misconfigured converter or ladder. No partial output is produced.
pub fn assemble(config: &Config, inputs: &Inputs) -> Result<DerivedSeries, Error> {
    validate::epochs_non_decreasing(&inputs.epochs)?;
    let converter = Converter::from_config(config)?;
    let ladder = Ladder::new(&config.ladder_bounds())?;

    let series = DerivedSeries {
        throughput: throughput(&converter, &inputs.epochs)?,
        usage: usage(config, &inputs.epochs)?,
        placement: placement(config, &inputs.placements)?,
        latency: latency(config, &ladder, &inputs.latency),
    };
    info!(
        devices = series.throughput.len(),
        tiers = series.usage.len(),
        timesteps = series.placement.timesteps.len(),
        latency_series = series.latency.len(),
        "assembled derived series"
    );
    Ok(series)
}

#[derive(Default)]
struct Readings {
    time_ms: Vec<u64>,
    read: Vec<u64>,
    written: Vec<u64>,
}

fn throughput(
    converter: &Converter,
    epochs: &[EpochSnapshot],
) -> Result<Vec<DeviceThroughput>, Error> {
    let Some(origin) = epochs.first().map(|e| e.epoch_ms) else {
        return Ok(Vec::new());
    };

    let mut devices: FxHashMap<Device, Readings> = FxHashMap::default();
    for epoch in epochs {
        let time_ms = epoch.epoch_ms.saturating_sub(origin);
        for (tier, snapshot) in epoch.tiers.iter().enumerate() {
            for (vdev, &VdevCounters { read, written, .. }) in snapshot.vdevs.iter().enumerate() {
                let readings = devices.entry(Device { tier, vdev }).or_default();
                readings.time_ms.push(time_ms);
                readings.read.push(read);
                readings.written.push(written);
            }
        }
    }

    let mut series = devices
        .into_iter()
        .map(|(device, readings)| -> Result<DeviceThroughput, Error> {
            let regression = |direction| {
                move |source| Error::Counter {
                    tier: device.tier,
                    vdev: device.vdev,
                    direction,
                    source,
                }
            };
            let read = delta::decode(&readings.read).map_err(regression("read"))?;
            let written = delta::decode(&readings.written).map_err(regression("written"))?;
            if readings.time_ms.len() < epochs.len() {
                debug!(
                    tier = device.tier,
                    vdev = device.vdev,
                    present = readings.time_ms.len(),
                    "device absent from some snapshots"
                );
            }
            Ok(DeviceThroughput {
                device,
                time_ms: readings.time_ms,
                read: converter.convert(&read),
                written: converter.convert(&written),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    series.sort_by_key(|s| s.device);
    Ok(series)
}

fn usage(config: &Config, epochs: &[EpochSnapshot]) -> Result<Vec<TierUsageSeries>, Error> {
    let Some(origin) = epochs.first().map(|e| e.epoch_ms) else {
        return Ok(Vec::new());
    };
    let block_size = config.block_size.as_u64();
    let unit = config.capacity_unit.as_u64();

    let mut tiers: Vec<TierUsageSeries> = Vec::new();
    for epoch in epochs {
        for (tier, snapshot) in epoch.tiers.iter().enumerate() {
            let Some(usage) = snapshot.usage else {
                continue;
            };
            let used = usage.used().ok_or(Error::Usage {
                tier,
                epoch_ms: epoch.epoch_ms,
            })?;
            while tiers.len() <= tier {
                tiers.push(TierUsageSeries {
                    tier: tiers.len(),
                    time_ms: Vec::new(),
                    used: Vec::new(),
                    total: Vec::new(),
                });
            }
            let series = &mut tiers[tier];
            series.time_ms.push(epoch.epoch_ms.saturating_sub(origin));
            series.used.push(rate::scale(used, block_size, unit));
            series.total.push(rate::scale(usage.total, block_size, unit));
        }
    }
    tiers.retain(|t| !t.time_ms.is_empty());
    Ok(tiers)
}

fn placement(config: &Config, snapshots: &[PlacementSnapshot]) -> Result<PlacementSeries, Error> {
    let mut cohorts: Vec<CohortSeries> = config
        .cohorts
        .iter()
        .map(|c| CohortSeries {
            name: c.name.clone(),
            mean_tier: Vec::with_capacity(snapshots.len()),
        })
        .collect();

    let mut timesteps = Vec::with_capacity(snapshots.len());
    for (timestep, snapshot) in snapshots.iter().enumerate() {
        let step = placement::group(snapshot, &config.cohorts, placement::numeric_suffix)
            .map_err(|source| Error::Placement { timestep, source })?;
        for (series, state) in cohorts.iter_mut().zip(&step.cohorts) {
            series.mean_tier.push(state.mean_tier);
        }
        timesteps.push(step);
    }
    Ok(PlacementSeries { cohorts, timesteps })
}

fn latency(config: &Config, ladder: &Ladder, tables: &[LatencyTable]) -> Vec<LatencySeries> {
    let mut series = Vec::new();
    for table in tables {
        for (group, samples) in latency::by_group(&table.samples) {
            debug!(source = %table.label, group, samples = samples.len(), "bucketizing group");
            series.push(LatencySeries {
                source: table.label.clone(),
                group,
                name: config.group_name(group),
                distributions: latency::bucketize(ladder, samples),
            });
        }
    }
    series
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, fs, time::Duration};

    use approx::assert_relative_eq;
    use tierscope_capture::record::{FileEntry, Request, TierPlacement, TierSnapshot, Usage};

    use super::*;
    use crate::config::Cohort;

    fn vdev(read: u64, written: u64) -> VdevCounters {
        VdevCounters {
            written,
            read,
            read_latency: 0,
        }
    }

    fn epoch(epoch_ms: u64, tiers: Vec<Vec<VdevCounters>>) -> EpochSnapshot {
        EpochSnapshot {
            epoch_ms,
            tiers: tiers
                .into_iter()
                .map(|vdevs| TierSnapshot { vdevs, usage: None })
                .collect(),
        }
    }

    fn byte_config() -> Config {
        let mut config = Config::default();
        config.throughput.unit = byte_unit::Byte::from_u64(1);
        config
    }

    #[test]
    fn empty_run_yields_empty_series() {
        let series = assemble(&Config::default(), &Inputs::default()).expect("valid");
        assert!(series.throughput.is_empty());
        assert!(series.usage.is_empty());
        assert!(series.placement.timesteps.is_empty());
        assert_eq!(series.placement.cohorts.len(), 3);
        assert!(series.latency.is_empty());
    }

    #[test]
    fn throughput_per_device_relative_to_first_epoch() {
        let inputs = Inputs {
            epochs: vec![
                epoch(10_000, vec![vec![vdev(100, 0), vdev(0, 7)]]),
                epoch(10_500, vec![vec![vdev(100, 0), vdev(0, 7)]]),
                epoch(11_000, vec![vec![vdev(150, 0), vdev(0, 9)]]),
            ],
            ..Inputs::default()
        };
        let series = assemble(&byte_config(), &inputs).expect("valid");
        assert_eq!(series.throughput.len(), 2);

        let first = &series.throughput[0];
        assert_eq!(first.device, Device { tier: 0, vdev: 0 });
        assert_eq!(first.time_ms, vec![0, 500, 1_000]);
        assert_eq!(first.read, vec![0.0, 0.0, 409_600.0]);
        assert_eq!(first.written, vec![0.0, 0.0, 0.0]);

        let second = &series.throughput[1];
        assert_eq!(second.device, Device { tier: 0, vdev: 1 });
        assert_eq!(second.written, vec![0.0, 0.0, 16_384.0]);
    }

    #[test]
    fn device_missing_from_some_snapshots_uses_its_own_readings() {
        let inputs = Inputs {
            epochs: vec![
                epoch(0, vec![vec![vdev(1, 1)]]),
                epoch(500, vec![vec![vdev(2, 2)], vec![vdev(40, 40)]]),
                epoch(1_000, vec![vec![vdev(3, 3)], vec![vdev(41, 41)]]),
            ],
            ..Inputs::default()
        };
        let series = assemble(&byte_config(), &inputs).expect("valid");
        let late = &series.throughput[1];
        assert_eq!(late.device, Device { tier: 1, vdev: 0 });
        assert_eq!(late.time_ms, vec![500, 1_000]);
        assert_eq!(late.read, vec![0.0, 8_192.0]);
    }

    #[test]
    fn counter_regression_names_the_device() {
        let inputs = Inputs {
            epochs: vec![
                epoch(0, vec![vec![vdev(100, 0)], vec![vdev(100, 0)]]),
                epoch(500, vec![vec![vdev(100, 0)], vec![vdev(100, 0)]]),
                epoch(1_000, vec![vec![vdev(150, 0)], vec![vdev(150, 0)]]),
                epoch(1_500, vec![vec![vdev(150, 0)], vec![vdev(140, 0)]]),
            ],
            ..Inputs::default()
        };
        match assemble(&Config::default(), &inputs) {
            Err(Error::Counter {
                tier: 1,
                vdev: 0,
                direction: "read",
                source,
            }) => assert_eq!(
                source,
                CounterRegression {
                    index: 3,
                    previous: 150,
                    current: 140,
                }
            ),
            other => panic!("expected counter regression, got {other:?}"),
        }
    }

    #[test]
    fn epochs_out_of_order_abort() {
        let inputs = Inputs {
            epochs: vec![epoch(1_000, vec![]), epoch(500, vec![])],
            ..Inputs::default()
        };
        assert!(matches!(
            assemble(&Config::default(), &inputs),
            Err(Error::Epochs(_))
        ));
    }

    #[test]
    fn usage_in_capacity_unit() {
        let mut config = Config::default();
        config.capacity_unit = byte_unit::Byte::from_u64(4_096 * 1_024);
        let mut first = epoch(0, vec![vec![], vec![]]);
        first.tiers[0].usage = Some(Usage {
            free: 1_024,
            total: 4_096,
        });
        let mut second = epoch(500, vec![vec![], vec![]]);
        second.tiers[0].usage = Some(Usage {
            free: 0,
            total: 4_096,
        });
        let inputs = Inputs {
            epochs: vec![first, second],
            ..Inputs::default()
        };

        let series = assemble(&config, &inputs).expect("valid");
        assert_eq!(series.usage.len(), 1);
        let tier = &series.usage[0];
        assert_eq!(tier.tier, 0);
        assert_eq!(tier.time_ms, vec![0, 500]);
        assert_relative_eq!(tier.used[0], 3.0);
        assert_relative_eq!(tier.used[1], 4.0);
        assert_relative_eq!(tier.total[1], 4.0);
    }

    #[test]
    fn free_above_total_is_an_error() {
        let mut bad = epoch(0, vec![vec![]]);
        bad.tiers[0].usage = Some(Usage { free: 2, total: 1 });
        let inputs = Inputs {
            epochs: vec![bad],
            ..Inputs::default()
        };
        assert!(matches!(
            assemble(&Config::default(), &inputs),
            Err(Error::Usage { tier: 0, epoch_ms: 0 })
        ));
    }

    fn placement_snapshot(tiers: &[&[u64]]) -> PlacementSnapshot {
        PlacementSnapshot {
            tiers: tiers
                .iter()
                .map(|objects| TierPlacement {
                    files: objects
                        .iter()
                        .map(|o| (format!("o_{o}"), FileEntry(serde_json::Value::Null, 1_000)))
                        .collect(),
                    reqs: None,
                })
                .collect(),
        }
    }

    #[test]
    fn cohort_means_over_time() {
        let mut config = Config::default();
        config.cohorts = vec![
            Cohort {
                name: "cold".to_string(),
                start: 0,
                end: 2,
                capacity: 4,
            },
            Cohort {
                name: "hot".to_string(),
                start: 2,
                end: 4,
                capacity: 4,
            },
        ];
        let mut last = placement_snapshot(&[&[0, 1], &[]]);
        last.tiers[0].reqs = Some(BTreeMap::from([(
            "o_0".to_string(),
            vec![Request {
                response_time: Duration::from_nanos(2_000),
            }],
        )]));
        let inputs = Inputs {
            placements: vec![
                placement_snapshot(&[&[2, 3], &[0, 1]]),
                placement_snapshot(&[&[0], &[1, 2, 3]]),
                last,
            ],
            ..Inputs::default()
        };

        let series = assemble(&config, &inputs).expect("valid");
        let placement = &series.placement;
        assert_eq!(placement.timesteps.len(), 3);
        assert_eq!(placement.cohorts[0].name, "cold");
        assert_eq!(placement.cohorts[0].mean_tier, vec![Some(2.0), Some(1.5), Some(1.0)]);
        assert_eq!(placement.cohorts[1].mean_tier, vec![Some(1.0), Some(2.0), None]);
        assert_eq!(placement.timesteps[0].request_latency, None);
        assert_eq!(placement.timesteps[2].request_latency, Some(vec![2.0, 0.0]));
    }

    #[test]
    fn placement_error_names_the_timestep() {
        let inputs = Inputs {
            placements: vec![
                placement_snapshot(&[&[0]]),
                placement_snapshot(&[&[1], &[1]]),
            ],
            ..Inputs::default()
        };
        assert!(matches!(
            assemble(&Config::default(), &inputs),
            Err(Error::Placement {
                timestep: 1,
                source: placement::Error::DuplicateObject { .. }
            })
        ));
    }

    #[test]
    fn latency_per_source_and_group() {
        let sample = |group, size| LatencySample {
            group,
            size,
            read_latency_ns: 2_000,
            write_latency_ns: 4_000,
        };
        let inputs = Inputs {
            latency: vec![
                LatencyTable {
                    label: "LFU".to_string(),
                    samples: vec![sample(1, 64_000), sample(0, 100), sample(1, 9_000_000)],
                },
                LatencyTable {
                    label: "RL".to_string(),
                    samples: vec![sample(2, 300_000)],
                },
            ],
            ..Inputs::default()
        };

        let series = assemble(&Config::default(), &inputs).expect("valid");
        let identity: Vec<(&str, u32, &str)> = series
            .latency
            .iter()
            .map(|s| (s.source.as_str(), s.group, s.name.as_str()))
            .collect();
        assert_eq!(
            identity,
            vec![
                ("LFU", 0, "Seldomly Accessed"),
                ("LFU", 1, "Occasionally Accessed"),
                ("RL", 2, "Often Accessed"),
            ]
        );
        let occasionally = &series.latency[1].distributions;
        assert_eq!(occasionally.len(), 2);
        assert_eq!(occasionally[0].bucket.label, "64KB");
        assert_eq!(occasionally[1].bucket.bound, latency::Bound::Unbounded);
        assert_eq!(occasionally[0].read_us, vec![2.0]);
        assert_eq!(occasionally[0].write_us, vec![4.0]);
    }

    #[test]
    fn load_reads_present_inputs_and_skips_missing() {
        let dir = tempfile::tempdir().expect("create temp dir");
        fs::write(
            dir.path().join("betree-metrics.jsonl"),
            concat!(
                r#"{"epoch_ms":0,"storage":{"tiers":[{"vdevs":[{"written":0,"read":0}]}]},"usage":[{"free":1,"total":2}]}"#,
                "\n",
                r#"{"epoch_ms":500,"storage":{"tiers":[{"vdevs":[{"written":2,"read":1}]}]},"usage":[{"free":0,"total":2}]}"#,
                "\n",
            ),
        )
        .expect("write metrics");
        fs::write(
            dir.path().join("filesystem_measurements.csv"),
            "group,size,read_latency_ns,write_latency_ns\n0,64000,1000,2000\n",
        )
        .expect("write latency table");

        let config = Config::default();
        let inputs = Inputs::load(&config, dir.path()).expect("valid run");
        assert_eq!(inputs.epochs.len(), 2);
        assert!(inputs.placements.is_empty());
        assert_eq!(inputs.latency.len(), 1);
        assert_eq!(inputs.latency[0].label, "filesystem");

        let series = assemble(&config, &inputs).expect("valid");
        assert_eq!(series.throughput.len(), 1);
        assert_eq!(series.usage.len(), 1);
        assert_eq!(series.latency.len(), 1);
    }

    #[test]
    fn load_reports_malformed_stream_with_path() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("tier_state.jsonl");
        fs::write(&path, "[]\nnot json\n").expect("write placement");

        match Inputs::load(&Config::default(), dir.path()) {
            Err(Error::Records {
                path: p,
                source: jsonl::Error::MalformedRecord { line: 2, .. },
            }) => assert_eq!(p, path),
            other => panic!("expected malformed record, got {other:?}"),
        }
    }
}
