//! Validation logic for telemetry streams
//!
//! Counter snapshots are meant to arrive with non-decreasing `epoch_ms`.
//! Time axes and rate conversion both assume it, so a violation is reported
//! with the index of the first offending snapshot rather than repaired.

use crate::record::EpochSnapshot;

/// Validation errors
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// `epoch_ms` went backward between two consecutive snapshots
    #[error("epoch_ms not non-decreasing at snapshot {index}: prev={previous}, curr={current}")]
    EpochRegression {
        /// Index of the snapshot whose epoch is smaller than its predecessor
        index: usize,
        /// `epoch_ms` of the preceding snapshot
        previous: u64,
        /// `epoch_ms` of the offending snapshot
        current: u64,
    },
}

/// Checks that `epoch_ms` never decreases across `snapshots`.
///
/// # Errors
///
/// Returns [`Error::EpochRegression`] for the first snapshot that is older
/// than its predecessor.
pub fn epochs_non_decreasing(snapshots: &[EpochSnapshot]) -> Result<(), Error> {
    for (index, window) in snapshots.windows(2).enumerate() {
        let previous = window[0].epoch_ms;
        let current = window[1].epoch_ms;
        if current < previous {
            return Err(Error::EpochRegression {
                index: index + 1,
                previous,
                current,
            });
        }
    }
    Ok(())
}
