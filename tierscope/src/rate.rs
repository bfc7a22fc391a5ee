//! Unit and rate conversion
//!
//! Counters count blocks per sampling interval. Rendering wants bytes-ish
//! units per second-ish durations. [`Converter`] does the arithmetic
//!
//! ```text
//! rate = delta * unit_size / target_unit_bytes * (target_unit_ms / interval_ms)
//! ```
//!
//! and nothing else.

use crate::config;

/// Errors produced by [`Converter`]
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The sampling interval is zero
    #[error("Sampling interval must be non-zero")]
    ZeroInterval,
    /// The target unit is zero bytes
    #[error("Target unit must be non-zero")]
    ZeroUnit,
}

/// Scale a block count into multiples of `target_unit_bytes`.
#[must_use]
pub fn scale(blocks: u64, unit_size: u64, target_unit_bytes: u64) -> f64 {
    blocks as f64 * unit_size as f64 / target_unit_bytes as f64
}

/// Converts per-interval deltas into rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Converter {
    unit_size: u64,
    interval_ms: u64,
    target_unit_bytes: u64,
    target_unit_ms: u64,
}

impl Converter {
    /// Create a new `Converter`.
    ///
    /// `unit_size` is the number of bytes one counted unit stands for,
    /// `interval_ms` the time between readings. Rates come out in multiples
    /// of `target_unit_bytes` per `target_unit_ms`.
    ///
    /// # Errors
    ///
    /// Returns an error if `interval_ms` or `target_unit_bytes` is zero.
    pub fn new(
        unit_size: u64,
        interval_ms: u64,
        target_unit_bytes: u64,
        target_unit_ms: u64,
    ) -> Result<Self, Error> {
        if interval_ms == 0 {
            return Err(Error::ZeroInterval);
        }
        if target_unit_bytes == 0 {
            return Err(Error::ZeroUnit);
        }
        Ok(Self {
            unit_size,
            interval_ms,
            target_unit_bytes,
            target_unit_ms,
        })
    }

    /// Build a `Converter` from the throughput section of the configuration.
    ///
    /// # Errors
    ///
    /// See [`Converter::new`].
    pub fn from_config(config: &config::Config) -> Result<Self, Error> {
        Self::new(
            config.block_size.as_u64(),
            config.throughput.interval_ms,
            config.throughput.unit.as_u64(),
            config.throughput.per_ms,
        )
    }

    /// Rate for a single delta.
    #[must_use]
    pub fn rate(&self, delta: u64) -> f64 {
        scale(delta, self.unit_size, self.target_unit_bytes)
            * (self.target_unit_ms as f64 / self.interval_ms as f64)
    }

    /// Rates for a sequence of deltas, element for element.
    #[must_use]
    pub fn convert(&self, deltas: &[u64]) -> Vec<f64> {
        deltas.iter().map(|&d| self.rate(d)).collect()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn blocks_per_half_second_to_bytes_per_second() {
        let converter = Converter::new(4_096, 500, 1, 1_000).expect("valid");
        assert_eq!(converter.convert(&[0, 0, 50]), vec![0.0, 0.0, 409_600.0]);
    }

    #[test]
    fn mebibytes_per_second() {
        let converter = Converter::new(4_096, 500, 1_024 * 1_024, 1_000).expect("valid");
        // 256 blocks of 4 KiB is 1 MiB per half second.
        assert_relative_eq!(converter.rate(256), 2.0);
    }

    #[test]
    fn default_config_is_mib_per_second() {
        let converter =
            Converter::from_config(&config::Config::default()).expect("defaults are valid");
        assert_relative_eq!(converter.rate(512), 4.0);
    }

    #[test]
    fn zero_interval_and_unit_are_rejected() {
        assert_eq!(Converter::new(4_096, 0, 1, 1_000), Err(Error::ZeroInterval));
        assert_eq!(Converter::new(4_096, 500, 0, 1_000), Err(Error::ZeroUnit));
    }

    #[test]
    fn scale_blocks_to_gibibytes() {
        assert_relative_eq!(scale(262_144, 4_096, 1_024 * 1_024 * 1_024), 1.0);
    }

    proptest! {
        #[test]
        fn rate_is_linear_in_delta(delta in 0u64..1_000_000_000, interval in 1u64..10_000) {
            let converter = Converter::new(4_096, interval, 1_024, 1_000).expect("valid");
            let single = converter.rate(delta);
            let double = converter.rate(delta * 2);
            prop_assert!(single >= 0.0);
            prop_assert!((double - 2.0 * single).abs() <= 1e-9 * double.max(1.0));
        }
    }
}
