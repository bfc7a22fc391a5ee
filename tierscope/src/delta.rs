//! Cumulative counter decoding
//!
//! Device counters are recorded as running totals. This module turns a
//! sequence of totals for one counter into per-interval deltas. The first
//! reading has no predecessor and its delta is defined to be zero, whatever
//! the raw value. A total that goes backward is a restart or wraparound of the
//! producer; it is reported, never clamped, and the caller decides whether to
//! split the series.

/// A cumulative counter decreased between two consecutive readings.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("counter regressed at reading {index}: prev={previous}, curr={current}")]
pub struct CounterRegression {
    /// Index of the reading smaller than its predecessor
    pub index: usize,
    /// The preceding reading
    pub previous: u64,
    /// The offending reading
    pub current: u64,
}

/// Decode cumulative `readings` into per-interval deltas.
///
/// The output has the same length as the input and its first element, if any,
/// is zero.
///
/// # Errors
///
/// Returns [`CounterRegression`] for the first reading smaller than its
/// predecessor.
pub fn decode(readings: &[u64]) -> Result<Vec<u64>, CounterRegression> {
    let mut deltas = Vec::with_capacity(readings.len());
    let mut previous = None;
    for (index, &current) in readings.iter().enumerate() {
        let delta = match previous {
            None => 0,
            Some(previous) => {
                current
                    .checked_sub(previous)
                    .ok_or(CounterRegression {
                        index,
                        previous,
                        current,
                    })?
            }
        };
        deltas.push(delta);
        previous = Some(current);
    }
    Ok(deltas)
}
