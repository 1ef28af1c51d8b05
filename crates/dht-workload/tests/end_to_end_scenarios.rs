//! The six concrete end-to-end scenarios (seed = 1, m = 160, b = 4, L = 16),
//! run against both protocols, mirroring `sezkp-core/tests/invariants.rs`'s
//! placement convention: integration-level scenario coverage lives under
//! `tests/`, alongside the crate it exercises, one file per concern.

use dht_chord::ChordOverlay;
use dht_core::OpClass;
use dht_metrics::aggregate;
use dht_pastry::PastryOverlay;
use dht_workload::{run, SyntheticKeySource, WorkloadDescriptor};

fn fresh_chord() -> ChordOverlay {
    ChordOverlay::new(dht_idspace::ID_BITS)
}

fn fresh_pastry() -> PastryOverlay {
    PastryOverlay::new(dht_pastry::DEFAULT_B_BITS, dht_pastry::DEFAULT_LEAF_SIZE)
}

/// Scenario 1: `N=3, inserts=10, lookups=10`, `lookup.mean <= 2.0` for both
/// protocols.
#[test]
fn scenario_1_small_ring_lookup_mean_is_bounded() {
    let descriptor = WorkloadDescriptor {
        n: 3,
        inserts: 10,
        lookups: 10,
        updates: 0,
        deletes: 0,
        join_leave: 0,
        k: 0,
        seed: 1,
    };

    let mut chord = fresh_chord();
    let chord_outcome = run(&mut chord, &mut SyntheticKeySource::new(), &descriptor).unwrap();
    let chord_stats = aggregate(&chord_outcome.records);
    assert_eq!(chord_stats["insert"].count, 10);
    assert_eq!(chord_stats["lookup"].count, 10);
    assert!(chord_stats["lookup"].mean.unwrap() <= 2.0, "chord lookup.mean too high");

    let mut pastry = fresh_pastry();
    let pastry_outcome = run(&mut pastry, &mut SyntheticKeySource::new(), &descriptor).unwrap();
    let pastry_stats = aggregate(&pastry_outcome.records);
    assert_eq!(pastry_stats["insert"].count, 10);
    assert_eq!(pastry_stats["lookup"].count, 10);
    assert!(pastry_stats["lookup"].mean.unwrap() <= 2.0, "pastry lookup.mean too high");
}

/// Scenario 2: `N=20, inserts=100, lookups=100, updates=50, deletes=50`;
/// `delete.count = 50` and exactly 50 keys remain resident overlay-wide.
#[test]
fn scenario_2_delete_audit_leaves_fifty_resident_keys() {
    let descriptor = WorkloadDescriptor {
        n: 20,
        inserts: 100,
        lookups: 100,
        updates: 50,
        deletes: 50,
        join_leave: 0,
        k: 0,
        seed: 1,
    };

    let mut chord = fresh_chord();
    let chord_outcome = run(&mut chord, &mut SyntheticKeySource::new(), &descriptor).unwrap();
    assert_eq!(aggregate(&chord_outcome.records)["delete"].count, 50);
    assert_eq!(chord.total_keys(), 50);

    let mut pastry = fresh_pastry();
    let pastry_outcome = run(&mut pastry, &mut SyntheticKeySource::new(), &descriptor).unwrap();
    assert_eq!(aggregate(&pastry_outcome.records)["delete"].count, 50);
    assert_eq!(pastry.total_keys(), 50);
}

/// Scenario 3: `N=50, inserts=200, lookups=200, updates=50, deletes=50,
/// join_leave=20, K=20`; all four statistics present for all six op classes,
/// and K-query `count = 20`.
#[test]
fn scenario_3_all_op_classes_report_full_statistics() {
    let descriptor = WorkloadDescriptor {
        n: 50,
        inserts: 200,
        lookups: 200,
        updates: 50,
        deletes: 50,
        join_leave: 20,
        k: 20,
        seed: 1,
    };

    for (name, outcome) in [
        ("chord", run(&mut fresh_chord(), &mut SyntheticKeySource::new(), &descriptor).unwrap()),
        ("pastry", run(&mut fresh_pastry(), &mut SyntheticKeySource::new(), &descriptor).unwrap()),
    ] {
        let stats = aggregate(&outcome.records);
        for class in [
            OpClass::Join,
            OpClass::Leave,
            OpClass::Insert,
            OpClass::Lookup,
            OpClass::Update,
            OpClass::Delete,
        ] {
            let s = &stats[class.as_str()];
            assert!(s.count > 0, "{name}: {class} has no recorded operations");
            assert!(s.mean.is_some(), "{name}: {class}.mean missing");
            assert!(s.median.is_some(), "{name}: {class}.median missing");
            assert!(s.p95.is_some(), "{name}: {class}.p95 missing");
        }
        assert_eq!(stats["kquery"].count, 20, "{name}: kquery.count mismatch");
    }
}

/// Scenario 4: `N=100, join_leave=50`, same workload as scenario 3; after
/// churn, key residency holds for all 150 surviving keys
/// (200 inserted - 50 deleted).
#[test]
fn scenario_4_residency_holds_for_surviving_keys_after_heavy_churn() {
    let descriptor = WorkloadDescriptor {
        n: 100,
        inserts: 200,
        lookups: 200,
        updates: 50,
        deletes: 50,
        join_leave: 50,
        k: 20,
        seed: 1,
    };

    let mut chord = fresh_chord();
    run(&mut chord, &mut SyntheticKeySource::new(), &descriptor).unwrap();
    chord.validate_invariants().expect("chord invariants should hold post-churn");
    assert_eq!(chord.total_keys(), 150);

    let mut pastry = fresh_pastry();
    run(&mut pastry, &mut SyntheticKeySource::new(), &descriptor).unwrap();
    pastry.validate_invariants().expect("pastry invariants should hold post-churn");
    assert_eq!(pastry.total_keys(), 150);
}

/// Scenario 5: two runs with an identical descriptor and seed produce
/// byte-identical result records.
#[test]
fn scenario_5_identical_descriptor_and_seed_are_deterministic() {
    let descriptor = WorkloadDescriptor {
        n: 30,
        inserts: 40,
        lookups: 40,
        updates: 10,
        deletes: 10,
        join_leave: 10,
        k: 10,
        seed: 1,
    };

    let run_once = || {
        let mut chord = fresh_chord();
        let chord_outcome = run(&mut chord, &mut SyntheticKeySource::new(), &descriptor).unwrap();
        let mut pastry = fresh_pastry();
        let pastry_outcome = run(&mut pastry, &mut SyntheticKeySource::new(), &descriptor).unwrap();
        dht_metrics::build_result_record(&chord_outcome, &pastry_outcome, &descriptor)
    };

    let a = serde_json::to_string(&run_once()).unwrap();
    let b = serde_json::to_string(&run_once()).unwrap();
    assert_eq!(a, b, "identical seed/descriptor must serialize byte-identically");
}
