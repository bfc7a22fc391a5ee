//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program. Every constant the
//! pipeline depends on -- block size, sampling interval, cohort boundaries,
//! the size ladder -- lives here rather than in the modules that use it.
use std::{
    collections::BTreeMap,
    fs,
    io,
    ops::Range,
    path::{Path, PathBuf},
};

use byte_unit::Byte;
use serde::Deserialize;

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// A quantity that must be non-zero is zero
    #[error("{field} must be non-zero")]
    Zero {
        /// Name of the offending field
        field: &'static str,
    },
    /// A cohort's rank range is inverted or exceeds its capacity
    #[error("Cohort {name} ranks {start}..{end} do not fit capacity {capacity}")]
    CohortRange {
        /// Cohort name
        name: String,
        /// First rank, inclusive
        start: usize,
        /// Last rank, exclusive
        end: usize,
        /// Fixed cohort capacity
        capacity: usize,
    },
    /// Two cohorts claim the same ranks, or are not in rank order
    #[error("Cohort {second} overlaps or precedes cohort {first}")]
    CohortOverlap {
        /// The earlier cohort
        first: String,
        /// The later cohort
        second: String,
    },
    /// The size ladder is not strictly ascending
    #[error("Size ladder bound {index} is not greater than its predecessor")]
    Ladder {
        /// Index of the offending bound
        index: usize,
    },
}

fn default_block_size() -> Byte {
    Byte::from_u64(4_096)
}

fn default_interval_ms() -> u64 {
    500
}

fn default_per_ms() -> u64 {
    1_000
}

fn default_throughput_unit() -> Byte {
    Byte::from_u64(1_024 * 1_024)
}

fn default_capacity_unit() -> Byte {
    Byte::from_u64(1_024 * 1_024 * 1_024)
}

fn default_metrics_path() -> PathBuf {
    PathBuf::from("betree-metrics.jsonl")
}

fn default_placement_path() -> PathBuf {
    PathBuf::from("tier_state.jsonl")
}

fn default_latency_sources() -> Vec<LatencySource> {
    vec![LatencySource {
        label: "filesystem".to_string(),
        path: PathBuf::from("filesystem_measurements.csv"),
    }]
}

fn default_cohorts() -> Vec<Cohort> {
    vec![
        Cohort {
            name: "Seldomly Accessed".to_string(),
            start: 0,
            end: 4_030,
            capacity: 4_096,
        },
        Cohort {
            name: "Occasionally Accessed".to_string(),
            start: 4_030,
            end: 4_678,
            capacity: 676,
        },
        Cohort {
            name: "Often Accessed".to_string(),
            start: 4_678,
            end: 4_728,
            capacity: 64,
        },
    ]
}

fn default_size_ladder() -> Vec<Byte> {
    [64_000, 256_000, 1_000_000, 4_000_000]
        .into_iter()
        .map(Byte::from_u64)
        .collect()
}

fn default_access_groups() -> BTreeMap<u32, String> {
    BTreeMap::from([
        (0, "Seldomly Accessed".to_string()),
        (1, "Occasionally Accessed".to_string()),
        (2, "Often Accessed".to_string()),
    ])
}

/// Main configuration struct for this program
#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Size of one storage block. Counter and usage records count blocks.
    #[serde(default = "default_block_size")]
    pub block_size: Byte,
    /// Throughput rate conversion.
    #[serde(default)]
    pub throughput: Throughput,
    /// Unit tier capacity is reported in.
    #[serde(default = "default_capacity_unit")]
    pub capacity_unit: Byte,
    /// Where to find the telemetry streams, relative to the run directory.
    #[serde(default)]
    pub inputs: Inputs,
    /// Latency tables to bucketize, each under its own label.
    #[serde(default = "default_latency_sources")]
    pub latency_sources: Vec<LatencySource>,
    /// Rank-defined object cohorts, in rank order.
    #[serde(default = "default_cohorts")]
    pub cohorts: Vec<Cohort>,
    /// Ascending upper bounds of the latency size classes. Sizes above the
    /// last bound fall into one final unbounded class.
    #[serde(default = "default_size_ladder")]
    pub size_ladder: Vec<Byte>,
    /// Human-readable names for access-frequency groups.
    #[serde(default = "default_access_groups")]
    pub access_groups: BTreeMap<u32, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            throughput: Throughput::default(),
            capacity_unit: default_capacity_unit(),
            inputs: Inputs::default(),
            latency_sources: default_latency_sources(),
            cohorts: default_cohorts(),
            size_ladder: default_size_ladder(),
            access_groups: default_access_groups(),
        }
    }
}

/// Throughput rate conversion settings
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Throughput {
    /// Milliseconds between two counter snapshots.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Rates are expressed per this many milliseconds.
    #[serde(default = "default_per_ms")]
    pub per_ms: u64,
    /// Rates are expressed in multiples of this many bytes.
    #[serde(default = "default_throughput_unit")]
    pub unit: Byte,
}

impl Default for Throughput {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            per_ms: default_per_ms(),
            unit: default_throughput_unit(),
        }
    }
}

/// Input file locations
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Inputs {
    /// Counter telemetry, one epoch snapshot per line.
    #[serde(default = "default_metrics_path")]
    pub metrics: PathBuf,
    /// Placement telemetry, one placement snapshot per line.
    #[serde(default = "default_placement_path")]
    pub placement: PathBuf,
}

impl Default for Inputs {
    fn default() -> Self {
        Self {
            metrics: default_metrics_path(),
            placement: default_placement_path(),
        }
    }
}

/// A labelled latency table
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LatencySource {
    /// Label distinguishing this table from others, e.g. a migration policy.
    pub label: String,
    /// Path of the CSV table, relative to the run directory.
    pub path: PathBuf,
}

/// A fixed-capacity cohort of objects defined by absolute rank.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Cohort {
    /// Name of the cohort.
    pub name: String,
    /// First rank belonging to the cohort.
    pub start: usize,
    /// One past the last rank belonging to the cohort.
    pub end: usize,
    /// Fixed number of cells in the cohort matrix.
    pub capacity: usize,
}

impl Cohort {
    /// The absolute rank range of this cohort.
    #[must_use]
    pub fn ranks(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Side length of the square matrix holding `capacity` cells.
    #[must_use]
    pub fn side(&self) -> usize {
        let mut side = self.capacity.isqrt();
        if side * side < self.capacity {
            side += 1;
        }
        side
    }
}

impl Config {
    /// Parse and validate a configuration from YAML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML does not deserialize or the result fails
    /// [`Config::validate`].
    pub fn parse(contents: &str) -> Result<Self, Error> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not parse.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        Self::parse(&contents)
    }

    /// Check the relationships between fields that serde cannot.
    ///
    /// # Errors
    ///
    /// Returns an error on zero units or intervals, cohort ranges that do not
    /// fit their capacity, overlapping cohorts, or a non-ascending ladder.
    pub fn validate(&self) -> Result<(), Error> {
        if self.block_size.as_u64() == 0 {
            return Err(Error::Zero {
                field: "block_size",
            });
        }
        if self.throughput.interval_ms == 0 {
            return Err(Error::Zero {
                field: "throughput.interval_ms",
            });
        }
        if self.throughput.unit.as_u64() == 0 {
            return Err(Error::Zero {
                field: "throughput.unit",
            });
        }
        if self.capacity_unit.as_u64() == 0 {
            return Err(Error::Zero {
                field: "capacity_unit",
            });
        }

        for cohort in &self.cohorts {
            if cohort.capacity == 0
                || cohort.end < cohort.start
                || cohort.end - cohort.start > cohort.capacity
            {
                return Err(Error::CohortRange {
                    name: cohort.name.clone(),
                    start: cohort.start,
                    end: cohort.end,
                    capacity: cohort.capacity,
                });
            }
        }
        for pair in self.cohorts.windows(2) {
            if pair[1].start < pair[0].end {
                return Err(Error::CohortOverlap {
                    first: pair[0].name.clone(),
                    second: pair[1].name.clone(),
                });
            }
        }

        for (index, pair) in self.size_ladder.windows(2).enumerate() {
            if pair[1].as_u64() <= pair[0].as_u64() {
                return Err(Error::Ladder { index: index + 1 });
            }
        }
        Ok(())
    }

    /// The size ladder as plain byte counts.
    #[must_use]
    pub fn ladder_bounds(&self) -> Vec<u64> {
        self.size_ladder.iter().copied().map(Byte::as_u64).collect()
    }

    /// Display name of an access-frequency group.
    #[must_use]
    pub fn group_name(&self, group: u32) -> String {
        self.access_groups
            .get(&group)
            .cloned()
            .unwrap_or_else(|| format!("group {group}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = Config::parse("{}").expect("defaults are valid");
        assert_eq!(config, Config::default());
        assert_eq!(config.block_size.as_u64(), 4_096);
        assert_eq!(config.throughput.interval_ms, 500);
        assert_eq!(config.cohorts.len(), 3);
        assert_eq!(config.ladder_bounds(), vec![64_000, 256_000, 1_000_000, 4_000_000]);
    }

    #[test]
    fn default_cohort_sides() {
        let sides: Vec<usize> = Config::default().cohorts.iter().map(Cohort::side).collect();
        assert_eq!(sides, vec![64, 26, 8]);
    }

    #[test]
    fn side_rounds_up_for_non_square_capacity() {
        let cohort = Cohort {
            name: "a".to_string(),
            start: 0,
            end: 3,
            capacity: 5,
        };
        assert_eq!(cohort.side(), 3);
    }

    #[test]
    fn config_overrides_from_yaml() {
        let contents = r#"
block_size: 8 KiB
throughput:
  interval_ms: 250
  unit: 1 KiB
cohorts:
  - name: hot
    start: 0
    end: 2000
    capacity: 2025
  - name: cold
    start: 2000
    end: 2300
    capacity: 324
size_ladder: [1000, 2000]
latency_sources:
  - label: LFU
    path: zip-lfu.csv
  - label: RL
    path: zip-rl.csv
access_groups:
  0: rare
"#;
        let config = Config::parse(contents).expect("valid config");
        assert_eq!(config.block_size.as_u64(), 8_192);
        assert_eq!(config.throughput.interval_ms, 250);
        assert_eq!(config.throughput.per_ms, 1_000);
        assert_eq!(config.throughput.unit.as_u64(), 1_024);
        assert_eq!(config.cohorts[1].side(), 18);
        assert_eq!(config.latency_sources.len(), 2);
        assert_eq!(config.group_name(0), "rare");
        assert_eq!(config.group_name(7), "group 7");
        assert_eq!(config.inputs, Inputs::default());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            Config::parse("colors: [red]"),
            Err(Error::SerdeYaml(_))
        ));
    }

    #[test]
    fn cohort_larger_than_capacity_is_rejected() {
        let contents = "cohorts: [{name: a, start: 0, end: 10, capacity: 9}]";
        assert!(matches!(
            Config::parse(contents),
            Err(Error::CohortRange { .. })
        ));
    }

    #[test]
    fn overlapping_cohorts_are_rejected() {
        let contents = r"
cohorts:
  - {name: a, start: 0, end: 10, capacity: 16}
  - {name: b, start: 9, end: 12, capacity: 4}
";
        assert!(matches!(
            Config::parse(contents),
            Err(Error::CohortOverlap { .. })
        ));
    }

    #[test]
    fn non_ascending_ladder_is_rejected() {
        assert!(matches!(
            Config::parse("size_ladder: [100, 100]"),
            Err(Error::Ladder { index: 1 })
        ));
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(matches!(
            Config::parse("throughput: {interval_ms: 0}"),
            Err(Error::Zero { .. })
        ));
    }

    #[test]
    fn missing_file_is_reported_with_path() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("absent.yaml");
        match Config::from_path(&path) {
            Err(Error::ReadFile { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected read error, got {other:?}"),
        }
    }
}
