//! Derived series from tiered storage benchmark telemetry.
//!
//! This library supports the tierscope binary found elsewhere in this project.
//! It takes the records decoded by `tierscope_capture` and turns cumulative
//! device counters, object placement snapshots and latency samples into flat
//! series: per-device throughput, per-tier usage, per-cohort mean tier and
//! size-bucketed latency distributions. Rendering is someone else's problem.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod delta;
pub mod latency;
pub mod placement;
pub mod rate;
pub mod series;
