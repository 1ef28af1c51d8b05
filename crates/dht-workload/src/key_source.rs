//! The key–value source boundary: an external collaborator the driver
//! reads from but never owns or constructs itself (the CSV adapter lives in
//! `dht-cli`; `dht-workload` only depends on this trait).

use dht_core::Value;

/// A finite source of `(key_bytes, value_record)` pairs in a stable order.
/// The driver reads at most `inserts + lookups + updates + deletes` items
/// from it over the lifetime of one run.
pub trait KeySource: Iterator<Item = (Vec<u8>, Value)> {}

impl<T: Iterator<Item = (Vec<u8>, Value)>> KeySource for T {}
