//! Crate regarding tierscope's telemetry inputs
//!
//! A tiered storage benchmark run leaves behind counter snapshots and object
//! placement snapshots as JSONL, plus per-request latency samples as CSV. This
//! crate decodes those files into the records in [`record`] and nothing more;
//! deriving series from them is the business of the `tierscope` crate.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::perf)]
#![deny(clippy::suspicious)]
#![deny(clippy::complexity)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

pub mod format;
pub mod jsonl;
pub mod record;
pub mod table;
pub mod validate;
