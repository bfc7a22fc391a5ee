//! Size-bucketed latency distributions
//!
//! Filesystem benchmark samples vary in object size. To compare them we sort
//! every sample into one class of a fixed, ascending [`Ladder`] of upper
//! bounds and collect read and write latency per class.

use std::collections::BTreeMap;

use average::{Estimate, Max, Mean, Min, concatenate};
use byte_unit::{Byte, UnitType};
use serde::Serialize;
use tierscope_capture::record::LatencySample;

const NANOS_PER_MICRO: f64 = 1_000.0;

/// Errors produced when building a [`Ladder`]
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A bound is not strictly greater than the one before it
    #[error("Ladder bound {index} ({bound}) is not greater than its predecessor")]
    NotAscending {
        /// Position of the offending bound
        index: usize,
        /// The offending bound in bytes
        bound: u64,
    },
}

/// Upper bound of a size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    /// Sizes up to and including this many bytes
    Bytes(u64),
    /// Every size above the last bounded class
    Unbounded,
}

/// One size class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeBucket {
    /// Upper bound of the class
    pub bound: Bound,
    /// Human-readable name of the class, decimal units
    pub label: String,
}

fn label(bytes: u64) -> String {
    let adjusted = Byte::from_u64(bytes).get_appropriate_unit(UnitType::Decimal);
    format!("{}{}", adjusted.get_value(), adjusted.get_unit())
}

/// An ascending sequence of size classes ending in one unbounded class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ladder {
    bounds: Vec<u64>,
    buckets: Vec<SizeBucket>,
}

impl Ladder {
    /// Build a ladder from ascending upper bounds in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `bounds` is not strictly ascending.
    pub fn new(bounds: &[u64]) -> Result<Self, Error> {
        for (index, pair) in bounds.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(Error::NotAscending {
                    index: index + 1,
                    bound: pair[1],
                });
            }
        }

        let mut buckets: Vec<SizeBucket> = bounds
            .iter()
            .map(|&bytes| SizeBucket {
                bound: Bound::Bytes(bytes),
                label: label(bytes),
            })
            .collect();
        let overflow = match bounds.last() {
            Some(&last) => format!(">{}", label(last)),
            None => "any".to_string(),
        };
        buckets.push(SizeBucket {
            bound: Bound::Unbounded,
            label: overflow,
        });

        Ok(Self {
            bounds: bounds.to_vec(),
            buckets,
        })
    }

    /// Index of the class `size` belongs to: the smallest bound not less
    /// than `size`, else the final unbounded class.
    #[must_use]
    pub fn classify(&self, size: u64) -> usize {
        self.bounds.partition_point(|&bound| bound < size)
    }

    /// Every class, in ascending order.
    #[must_use]
    pub fn buckets(&self) -> &[SizeBucket] {
        &self.buckets
    }
}

concatenate!(Extremes, [Min, min, min], [Max, max, max], [Mean, mean, mean]);

/// Quantile `p` of ascending `sorted`, interpolating linearly between the two
/// nearest ranks. `sorted` must not be empty.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn interpolate(sorted: &[f64], p: f64) -> f64 {
    let last = sorted.len() - 1;
    let rank = p * last as f64;
    let lower = (rank as usize).min(last);
    let upper = (lower + 1).min(last);
    let weight = rank - lower as f64;
    let (low, high) = (sorted[lower], sorted[upper]);
    (low + (high - low) * weight).max(low).min(high)
}

/// Box-plot summary of a set of latencies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    /// Smallest value
    pub min: f64,
    /// Largest value
    pub max: f64,
    /// Arithmetic mean
    pub mean: f64,
    /// 25th percentile
    pub q1: f64,
    /// 50th percentile
    pub median: f64,
    /// 75th percentile
    pub q3: f64,
}

impl Summary {
    /// Summarise `values`, or `None` if there are none.
    #[must_use]
    pub fn of(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let extremes: Extremes = values.iter().copied().collect();
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        Some(Self {
            min: extremes.min(),
            max: extremes.max(),
            mean: extremes.mean(),
            q1: interpolate(&sorted, 0.25),
            median: interpolate(&sorted, 0.5),
            q3: interpolate(&sorted, 0.75),
        })
    }
}

/// Latencies of every sample in one size class, in microseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Distribution {
    /// The size class
    pub bucket: SizeBucket,
    /// Read latencies in sample order
    pub read_us: Vec<f64>,
    /// Write latencies in sample order
    pub write_us: Vec<f64>,
    /// Summary of `read_us`
    pub read: Summary,
    /// Summary of `write_us`
    pub write: Summary,
}

fn micros(nanos: u64) -> f64 {
    nanos as f64 / NANOS_PER_MICRO
}

/// Sort `samples` into the classes of `ladder`.
///
/// Only classes holding at least one sample are returned, in ladder order.
#[must_use]
pub fn bucketize<'a, I>(ladder: &Ladder, samples: I) -> Vec<Distribution>
where
    I: IntoIterator<Item = &'a LatencySample>,
{
    let mut read: Vec<Vec<f64>> = vec![Vec::new(); ladder.buckets.len()];
    let mut write: Vec<Vec<f64>> = vec![Vec::new(); ladder.buckets.len()];
    for sample in samples {
        let index = ladder.classify(sample.size);
        read[index].push(micros(sample.read_latency_ns));
        write[index].push(micros(sample.write_latency_ns));
    }

    ladder
        .buckets
        .iter()
        .zip(read.into_iter().zip(write))
        .filter_map(|(bucket, (read_us, write_us))| {
            let read = Summary::of(&read_us)?;
            let write = Summary::of(&write_us)?;
            Some(Distribution {
                bucket: bucket.clone(),
                read_us,
                write_us,
                read,
                write,
            })
        })
        .collect()
}

/// Split `samples` by access-frequency group, keeping sample order.
#[must_use]
pub fn by_group(samples: &[LatencySample]) -> BTreeMap<u32, Vec<&LatencySample>> {
    let mut groups: BTreeMap<u32, Vec<&LatencySample>> = BTreeMap::new();
    for sample in samples {
        groups.entry(sample.group).or_default().push(sample);
    }
    groups
}
