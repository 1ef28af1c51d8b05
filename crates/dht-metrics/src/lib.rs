//! Per-operation-class hop statistics and the JSON-shaped result record the
//! runner hands to the external serializer, modeled on the compact,
//! serde-friendly, well-tested manifest shape `sezkp_merkle` uses for its
//! commit manifests.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(missing_docs, clippy::all)]

use dht_core::OpClass;
use dht_workload::{WorkloadDescriptor, WorkloadOutcome};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `(count, mean, median, p95)` over a group of hop counts. `None` fields
/// (serialized as JSON `null`) mark an empty group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    /// Number of operations in this group.
    pub count: usize,
    /// Arithmetic mean hop count.
    pub mean: Option<f64>,
    /// Median hop count; for an even count, the lower of the two middles.
    pub median: Option<f64>,
    /// 95th percentile, nearest-rank (`ceil(0.95*n)`, 1-indexed).
    pub p95: Option<f64>,
}

impl Stats {
    /// Aggregate a slice of hop counts into `(count, mean, median, p95)`.
    #[must_use]
    pub fn from_hops(hops: &[u32]) -> Self {
        if hops.is_empty() {
            return Self { count: 0, mean: None, median: None, p95: None };
        }
        let mut sorted: Vec<u32> = hops.to_vec();
        sorted.sort_unstable();
        let count = sorted.len();
        let sum: f64 = sorted.iter().map(|&h| f64::from(h)).sum();
        let mean = sum / count as f64;
        let median = if count % 2 == 1 {
            f64::from(sorted[count / 2])
        } else {
            f64::from(sorted[count / 2 - 1])
        };
        let rank = ((0.95 * count as f64).ceil() as usize).clamp(1, count);
        let p95 = f64::from(sorted[rank - 1]);
        Self { count, mean: Some(mean), median: Some(median), p95: Some(p95) }
    }
}

/// Per-op-class stats for one protocol run, keyed by `OpClass::as_str`.
/// A `BTreeMap` (rather than a hash map) keeps key order deterministic so
/// that identical runs serialize to byte-identical JSON.
pub type ProtocolSection = BTreeMap<String, Stats>;

/// Echo of the workload descriptor, included in the result record so a
/// reader of `results.json` doesn't need the invoking command line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ParamsEcho {
    /// Number of initial nodes.
    pub n: usize,
    /// Number of inserts.
    pub inserts: usize,
    /// Number of lookups.
    pub lookups: usize,
    /// Number of updates.
    pub updates: usize,
    /// Number of deletes.
    pub deletes: usize,
    /// Number of churn (join+leave) events.
    pub join_leave: usize,
    /// K-query fan-out.
    pub k: usize,
    /// RNG seed.
    pub seed: u64,
}

impl From<&WorkloadDescriptor> for ParamsEcho {
    fn from(d: &WorkloadDescriptor) -> Self {
        Self {
            n: d.n,
            inserts: d.inserts,
            lookups: d.lookups,
            updates: d.updates,
            deletes: d.deletes,
            join_leave: d.join_leave,
            k: d.k,
            seed: d.seed,
        }
    }
}

/// The JSON-shaped result record: per-protocol, per-op-class stats, the
/// echoed descriptor, and a merged error tally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Chord's per-op-class stats.
    pub chord: ProtocolSection,
    /// Pastry's per-op-class stats.
    pub pastry: ProtocolSection,
    /// Echo of the workload descriptor.
    pub params: ParamsEcho,
    /// Recoverable-error counts by kind, merged across both protocol runs.
    pub errors: BTreeMap<String, u64>,
}

/// Group `(op_class, hops)` records into a [`ProtocolSection`].
#[must_use]
pub fn aggregate(records: &[(OpClass, u32)]) -> ProtocolSection {
    let mut by_class: BTreeMap<String, Vec<u32>> = BTreeMap::new();
    for class in OpClass::ALL {
        by_class.insert(class.as_str().to_string(), Vec::new());
    }
    for (class, hops) in records {
        by_class.entry(class.as_str().to_string()).or_default().push(*hops);
    }
    by_class
        .into_iter()
        .map(|(name, hops)| (name, Stats::from_hops(&hops)))
        .collect()
}

fn merge_error_tallies(
    a: &BTreeMap<&'static str, u64>,
    b: &BTreeMap<&'static str, u64>,
) -> BTreeMap<String, u64> {
    let mut merged: BTreeMap<String, u64> = BTreeMap::new();
    for (k, v) in a {
        *merged.entry((*k).to_string()).or_insert(0) += v;
    }
    for (k, v) in b {
        *merged.entry((*k).to_string()).or_insert(0) += v;
    }
    merged
}

/// Build the full result record from both protocols' workload outcomes.
#[must_use]
pub fn build_result_record(
    chord_outcome: &WorkloadOutcome,
    pastry_outcome: &WorkloadOutcome,
    descriptor: &WorkloadDescriptor,
) -> ResultRecord {
    let chord_errors: BTreeMap<&'static str, u64> = chord_outcome.errors.iter().map(|(k, v)| (*k, *v)).collect();
    let pastry_errors: BTreeMap<&'static str, u64> = pastry_outcome.errors.iter().map(|(k, v)| (*k, *v)).collect();
    ResultRecord {
        chord: aggregate(&chord_outcome.records),
        pastry: aggregate(&pastry_outcome.records),
        params: ParamsEcho::from(descriptor),
        errors: merge_error_tallies(&chord_errors, &pastry_errors),
    }
}

/// One row of the K-query grid summary: `(protocol, N, join_leave)` with
/// `(K, seed, kquery_mean_hops, kquery_p95_hops)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridSummaryRow {
    /// Which overlay this row describes (`"chord"` or `"pastry"`).
    pub protocol: String,
    /// Initial node count for this cell.
    pub n: usize,
    /// Churn event count for this cell.
    pub join_leave: usize,
    /// K-query fan-out.
    pub k: usize,
    /// RNG seed.
    pub seed: u64,
    /// Mean K-query hop count for this cell, `None` if K-query ran 0 times.
    pub kquery_mean_hops: Option<f64>,
    /// p95 K-query hop count for this cell.
    pub kquery_p95_hops: Option<f64>,
}

impl GridSummaryRow {
    /// Build one grid row from a protocol's name, cell parameters, and its
    /// K-query stats for that cell.
    #[must_use]
    pub fn new(protocol: &str, n: usize, join_leave: usize, k: usize, seed: u64, kquery: &Stats) -> Self {
        Self {
            protocol: protocol.to_string(),
            n,
            join_leave,
            k,
            seed,
            kquery_mean_hops: kquery.mean,
            kquery_p95_hops: kquery.p95,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_group_reports_sentinel_stats() {
        let stats = Stats::from_hops(&[]);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean, None);
        assert_eq!(stats.median, None);
        assert_eq!(stats.p95, None);
    }

    #[test]
    fn median_uses_lower_of_two_middles_for_even_counts() {
        let stats = Stats::from_hops(&[1, 2, 3, 4]);
        assert_eq!(stats.median, Some(2.0));
    }

    #[test]
    fn median_is_exact_middle_for_odd_counts() {
        let stats = Stats::from_hops(&[1, 2, 3]);
        assert_eq!(stats.median, Some(2.0));
    }

    #[test]
    fn p95_uses_nearest_rank_one_indexed() {
        // 20 values 1..=20: ceil(0.95*20) = 19th smallest = 19.
        let hops: Vec<u32> = (1..=20).collect();
        let stats = Stats::from_hops(&hops);
        assert_eq!(stats.p95, Some(19.0));
    }

    #[test]
    fn aggregate_reports_all_op_classes_even_when_unused() {
        let records = vec![(OpClass::Insert, 1), (OpClass::Insert, 3)];
        let section = aggregate(&records);
        assert_eq!(section.len(), OpClass::ALL.len());
        assert_eq!(section["insert"].count, 2);
        assert_eq!(section["lookup"].count, 0);
    }

    #[test]
    fn result_record_serializes_to_stable_json() {
        let mut chord = WorkloadOutcome::default();
        chord.records.push((OpClass::Insert, 2));
        let pastry = WorkloadOutcome::default();
        let descriptor = WorkloadDescriptor {
            n: 3,
            inserts: 1,
            lookups: 0,
            updates: 0,
            deletes: 0,
            join_leave: 0,
            k: 0,
            seed: 1,
        };
        let record = build_result_record(&chord, &pastry, &descriptor);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"insert\""));
        assert!(json.contains("\"params\""));
    }
}
