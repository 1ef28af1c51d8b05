//! Drives a mixed key-value workload against one overlay: builds the
//! initial membership, runs insert/lookup/update/delete/churn in the fixed
//! phase order, then a concurrent K-query sub-experiment, recording
//! `(op_class, hops)` for every completed operation and tallying errors by
//! kind for the ones that were recoverable.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(missing_docs, clippy::all)]

pub mod driver;
pub mod key_source;
pub mod synthetic;

pub use driver::{run, WorkloadDescriptor, WorkloadOutcome};
pub use key_source::KeySource;
pub use synthetic::SyntheticKeySource;
