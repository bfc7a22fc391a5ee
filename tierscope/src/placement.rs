//! Tier placement grouping
//!
//! A placement snapshot lists, per tier, the objects that tier currently
//! holds. To follow groups of objects over time we need an order over the
//! whole object universe that does not depend on where objects happen to
//! live. This module provides it in three steps:
//!
//! 1. [`flatten`] collects every `(object, tier)` pair, tiers numbered from 1
//!    (fastest), and sorts the pairs by a numeric key extracted from the
//!    object id. [`numeric_suffix`] is the usual key.
//! 2. [`partition`] slices the sorted sequence by absolute rank. Cohort
//!    boundaries are configuration, never computed from the data, so an
//!    object keeps its rank -- and cohort -- across timesteps.
//! 3. [`Matrix::fill`] lays a cohort out as a zero-padded square grid and
//!    [`mean_tier`] averages its non-zero cells.
//!
//! Zero is the "not present" sentinel throughout. A cohort with no live
//! members has no mean tier, not a mean tier of zero.
//!
//! [`request_latency`] is the odd one out: it reports `0.0` for a tier that
//! served no requests. That convention is preserved deliberately and differs
//! from the cohort rule above.

use std::ops::Range;

use average::Mean;
use rustc_hash::FxHashSet;
use serde::Serialize;
use tierscope_capture::record::PlacementSnapshot;
use tracing::debug;

use crate::config::Cohort;

/// Tier value of a matrix cell with no object.
pub const NOT_PRESENT: u8 = 0;

/// Errors produced while grouping a placement snapshot
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The key function could not rank an object id
    #[error("Object id {id} has no numeric rank key")]
    UnrankableObject {
        /// The object id
        id: String,
    },
    /// An object id is listed by more than one tier
    #[error("Object id {id} is resident in more than one tier")]
    DuplicateObject {
        /// The object id
        id: String,
    },
    /// A tier reports requests for an object it does not hold
    #[error("Tier {tier} has requests for object {id} it does not hold")]
    UnknownObject {
        /// The object id
        id: String,
        /// 1-based tier index
        tier: usize,
    },
    /// A tier reports requests for an object of size zero
    #[error("Tier {tier} has requests for zero sized object {id}")]
    ZeroSizedObject {
        /// The object id
        id: String,
        /// 1-based tier index
        tier: usize,
    },
    /// A cohort's rank range holds more ranks than its capacity
    #[error("Cohort {name} spans {ranks} ranks but has capacity {capacity}")]
    CohortCapacity {
        /// Cohort name
        name: String,
        /// Width of the rank range
        ranks: usize,
        /// Fixed cohort capacity
        capacity: usize,
    },
    /// More tiers than a matrix cell can name
    #[error("Snapshot has {count} tiers, at most 255 are supported")]
    TooManyTiers {
        /// Number of tiers in the snapshot
        count: usize,
    },
}

/// Extract the trailing run of ASCII digits of `id` as an unsigned integer.
///
/// Returns `None` if `id` does not end in a digit or the digits overflow.
#[must_use]
pub fn numeric_suffix(id: &str) -> Option<u64> {
    let digits = id.bytes().rev().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    id[id.len() - digits..].parse().ok()
}

/// An object and the tier holding it, with its sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ranked<'a> {
    /// Object id
    pub id: &'a str,
    /// Sort key extracted from the id
    pub key: u64,
    /// 1-based tier index, 1 is fastest
    pub tier: u8,
}

/// Flatten `snapshot` into `(object, tier)` pairs sorted by `key`.
///
/// Ties on the key are broken by the id itself so the order is total.
///
/// # Errors
///
/// Returns an error if `key` cannot rank an id, an id appears in more than one
/// tier, or there are more than 255 tiers.
pub fn flatten<'a, F>(snapshot: &'a PlacementSnapshot, key: F) -> Result<Vec<Ranked<'a>>, Error>
where
    F: Fn(&str) -> Option<u64>,
{
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    let mut ranked = Vec::new();
    for (index, tier) in snapshot.tiers.iter().enumerate() {
        let tier_index = u8::try_from(index + 1).map_err(|_| Error::TooManyTiers {
            count: snapshot.tiers.len(),
        })?;
        for id in tier.files.keys() {
            let id = id.as_str();
            if !seen.insert(id) {
                return Err(Error::DuplicateObject { id: id.to_string() });
            }
            let key = key(id).ok_or_else(|| Error::UnrankableObject { id: id.to_string() })?;
            ranked.push(Ranked {
                id,
                key,
                tier: tier_index,
            });
        }
    }
    ranked.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.id.cmp(b.id)));
    Ok(ranked)
}

/// The members of `sorted` whose rank falls in `ranks`.
///
/// Ranks past the end of `sorted` are simply absent.
#[must_use]
pub fn partition<T>(sorted: &[T], ranks: Range<usize>) -> &[T] {
    let end = ranks.end.min(sorted.len());
    let start = ranks.start.min(end);
    &sorted[start..end]
}

/// A square grid of tier indices, filled row by row in rank order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Matrix {
    rows: Vec<Vec<u8>>,
}

impl Matrix {
    /// Lay out `tiers` in a `side` by `side` grid, padding with
    /// [`NOT_PRESENT`]. Values beyond `side * side` are dropped.
    #[must_use]
    pub fn fill<I>(side: usize, tiers: I) -> Self
    where
        I: IntoIterator<Item = u8>,
    {
        let mut cells = vec![NOT_PRESENT; side * side];
        for (cell, tier) in cells.iter_mut().zip(tiers) {
            *cell = tier;
        }
        let rows = if side == 0 {
            Vec::new()
        } else {
            cells.chunks(side).map(<[u8]>::to_vec).collect()
        };
        Self { rows }
    }

    /// Rows of the grid.
    #[must_use]
    pub fn rows(&self) -> &[Vec<u8>] {
        &self.rows
    }

    /// Side length of the grid.
    #[must_use]
    pub fn side(&self) -> usize {
        self.rows.len()
    }

    /// Every cell, row by row.
    pub fn cells(&self) -> impl Iterator<Item = u8> + '_ {
        self.rows.iter().flatten().copied()
    }
}

/// Mean of the cells that are not [`NOT_PRESENT`], or `None` if there are
/// none.
#[must_use]
pub fn mean_tier<I>(cells: I) -> Option<f64>
where
    I: IntoIterator<Item = u8>,
{
    let mean: Mean = cells
        .into_iter()
        .filter(|&tier| tier != NOT_PRESENT)
        .map(f64::from)
        .collect();
    if mean.is_empty() {
        None
    } else {
        Some(mean.mean())
    }
}

/// One cohort at one timestep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortState {
    /// Cohort name
    pub name: String,
    /// Number of live objects in the cohort
    pub members: usize,
    /// Tier of every member, in rank order, zero-padded
    pub matrix: Matrix,
    /// Mean tier of the live members, absent for an empty cohort
    pub mean_tier: Option<f64>,
}

/// Everything derived from one placement snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timestep {
    /// Cohorts in configuration order
    pub cohorts: Vec<CohortState>,
    /// Mean size-normalized request latency per tier, fastest first, in
    /// nanoseconds per byte. Absent when the snapshot carries no requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_latency: Option<Vec<f64>>,
}

/// Group the objects of `snapshot` into `cohorts`.
///
/// # Errors
///
/// Returns [`Error::CohortCapacity`] if a cohort's rank range is wider than
/// its capacity. See also [`flatten`] and [`request_latency`].
pub fn group<F>(snapshot: &PlacementSnapshot, cohorts: &[Cohort], key: F) -> Result<Timestep, Error>
where
    F: Fn(&str) -> Option<u64>,
{
    for cohort in cohorts {
        let ranks = cohort.ranks().len();
        if ranks > cohort.capacity {
            return Err(Error::CohortCapacity {
                name: cohort.name.clone(),
                ranks,
                capacity: cohort.capacity,
            });
        }
    }
    let ranked = flatten(snapshot, key)?;
    let cohorts = cohorts
        .iter()
        .map(|cohort| {
            let members = partition(&ranked, cohort.ranks());
            let matrix = Matrix::fill(cohort.side(), members.iter().map(|m| m.tier));
            let mean_tier = mean_tier(matrix.cells());
            if mean_tier.is_none() {
                debug!(cohort = %cohort.name, "cohort has no live members");
            }
            CohortState {
                name: cohort.name.clone(),
                members: members.len(),
                matrix,
                mean_tier,
            }
        })
        .collect();
    Ok(Timestep {
        cohorts,
        request_latency: request_latency(snapshot)?,
    })
}

/// Mean size-normalized request latency per tier.
///
/// For every tier this is the sum over its requests of response time divided
/// by object size, divided by the number of requests. A tier without requests
/// reports `0.0`. Returns `None` if no tier carries requests at all.
///
/// # Errors
///
/// Returns an error if a tier has requests for an object it does not hold or
/// for an object of size zero.
pub fn request_latency(snapshot: &PlacementSnapshot) -> Result<Option<Vec<f64>>, Error> {
    if !snapshot.has_requests() {
        return Ok(None);
    }

    let mut latencies = Vec::with_capacity(snapshot.tiers.len());
    for (index, tier) in snapshot.tiers.iter().enumerate() {
        let mut total = 0.0;
        let mut count: u64 = 0;
        for (id, requests) in tier.reqs.iter().flatten() {
            let entry = tier.files.get(id).ok_or_else(|| Error::UnknownObject {
                id: id.clone(),
                tier: index + 1,
            })?;
            let size = entry.size();
            if size == 0 {
                return Err(Error::ZeroSizedObject {
                    id: id.clone(),
                    tier: index + 1,
                });
            }
            for request in requests {
                total += request.response_time.as_nanos() as f64 / size as f64;
                count += 1;
            }
        }
        latencies.push(if count == 0 { 0.0 } else { total / count as f64 });
    }
    Ok(Some(latencies))
}
