//! The workload procedure itself: materialize nodes, stabilize, run the
//! fixed op-class phase order, then the K-query sub-experiment.

use crate::key_source::KeySource;
use dht_core::{Error, Key, OpClass, Overlay, RouteCursor, RouteOutcome, SteppedRouter};
use dht_idspace::Id;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Multiplicative constant used to fold a task index into the parent seed
/// when deriving an independent child RNG stream (Weyl/golden-ratio
/// constant, chosen only for its good avalanche behavior under XOR-fold).
const GOLDEN_RATIO: u64 = 0x9E37_79B9_7F4A_7C15;

/// Bounded retry count for `DuplicateId` disambiguation before a node
/// creation is treated as fatal.
const MAX_DUPLICATE_RETRY: u32 = 8;

/// The recognized workload options (spec §4.5's options table).
#[derive(Debug, Clone, Copy)]
pub struct WorkloadDescriptor {
    /// Number of initial nodes.
    pub n: usize,
    /// Number of insert ops drawn from the source head.
    pub inserts: usize,
    /// Number of lookup ops over already-inserted keys.
    pub lookups: usize,
    /// Number of update ops over already-inserted keys.
    pub updates: usize,
    /// Number of delete ops over already-inserted keys.
    pub deletes: usize,
    /// Number of churn events (one join immediately followed by one leave).
    pub join_leave: usize,
    /// Fan-out of the concurrent K-query sub-experiment.
    pub k: usize,
    /// Seed driving every random choice in the run.
    pub seed: u64,
}

/// Every completed operation's `(op_class, hops)` plus a tally of
/// recoverable errors by kind.
#[derive(Debug, Clone, Default)]
pub struct WorkloadOutcome {
    /// One entry per operation that completed (successfully or with a
    /// recoverable error excluded from hop statistics).
    pub records: Vec<(OpClass, u32)>,
    /// Count of recoverable errors by `Error::kind_name`.
    pub errors: HashMap<&'static str, u64>,
}

impl WorkloadOutcome {
    fn tally(&mut self, err: &Error) {
        *self.errors.entry(err.kind_name()).or_insert(0) += 1;
    }
}

fn fork_stream(seed: u64, task_index: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed ^ task_index.wrapping_mul(GOLDEN_RATIO))
}

fn join_unique_node<O: Overlay>(
    overlay: &mut O,
    rng: &mut ChaCha8Rng,
    label_prefix: &str,
) -> dht_core::Result<(Id, u32)> {
    for _ in 0..MAX_DUPLICATE_RETRY {
        let suffix: u64 = rng.random();
        let label = format!("{label_prefix}#{suffix:016x}");
        let id = Id::hash(label.as_bytes());
        match overlay.join(id) {
            Ok(hops) => return Ok((id, hops)),
            Err(Error::DuplicateId { .. }) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(Error::DuplicateId { attempts: MAX_DUPLICATE_RETRY })
}

fn random_live_id<O: Overlay>(overlay: &O, rng: &mut ChaCha8Rng) -> Id {
    let ids = overlay.live_ids();
    ids[rng.random_range(0..ids.len())]
}

/// Run the full workload against `overlay`, reading key/value pairs from
/// `source`.
///
/// # Errors
/// Returns the first structural error encountered (`OverlayEmpty`,
/// `IdFormat`, or `DuplicateId` past its retry budget); the workload aborts
/// immediately in that case. Recoverable errors (`KeyNotFound`,
/// `RoutingDiverged`) are tallied in the returned outcome instead.
pub fn run<O>(
    overlay: &mut O,
    source: &mut dyn KeySource,
    descriptor: &WorkloadDescriptor,
) -> dht_core::Result<WorkloadOutcome>
where
    O: Overlay + SteppedRouter,
{
    let mut rng = ChaCha8Rng::seed_from_u64(descriptor.seed);
    let mut outcome = WorkloadOutcome::default();
    let mut inserted: Vec<Key> = Vec::with_capacity(descriptor.inserts);

    // --- materialize the initial membership ---
    for i in 0..descriptor.n {
        let (_, hops) = join_unique_node(overlay, &mut rng, &format!("node-{i}"))?;
        outcome.records.push((OpClass::Join, hops));
        overlay.maintenance_barrier();
    }
    debug!(n = overlay.len(), "workload: initial overlay formed");

    // --- insert ---
    for _ in 0..descriptor.inserts {
        let Some((key_bytes, value)) = source.next() else {
            break;
        };
        if overlay.is_empty() {
            return Err(Error::OverlayEmpty);
        }
        let origin = random_live_id(overlay, &mut rng);
        let key = Key::new(key_bytes);
        match overlay.put(origin, key.clone(), value) {
            Ok(hops) => {
                outcome.records.push((OpClass::Insert, hops));
                inserted.push(key);
            }
            Err(e) if e.is_recoverable() => outcome.tally(&e),
            Err(e) => return Err(e),
        }
    }

    // --- lookup ---
    for _ in 0..descriptor.lookups {
        if inserted.is_empty() || overlay.is_empty() {
            break;
        }
        let key = inserted[rng.random_range(0..inserted.len())].clone();
        let origin = random_live_id(overlay, &mut rng);
        match overlay.get(origin, &key) {
            Ok((_, hops)) => outcome.records.push((OpClass::Lookup, hops)),
            Err(e) if e.is_recoverable() => outcome.tally(&e),
            Err(e) => return Err(e),
        }
    }

    // --- update ---
    for _ in 0..descriptor.updates {
        if inserted.is_empty() || overlay.is_empty() {
            break;
        }
        let key = inserted[rng.random_range(0..inserted.len())].clone();
        let value = source
            .next()
            .map_or_else(|| serde_json::json!({ "updated": true }), |(_, v)| v);
        let origin = random_live_id(overlay, &mut rng);
        match overlay.update(origin, key, value) {
            Ok(hops) => outcome.records.push((OpClass::Update, hops)),
            Err(e) if e.is_recoverable() => outcome.tally(&e),
            Err(e) => return Err(e),
        }
    }

    // --- delete ---
    for _ in 0..descriptor.deletes {
        if inserted.is_empty() || overlay.is_empty() {
            break;
        }
        let idx = rng.random_range(0..inserted.len());
        let key = inserted.swap_remove(idx);
        let origin = random_live_id(overlay, &mut rng);
        match overlay.delete(origin, &key) {
            Ok(hops) => outcome.records.push((OpClass::Delete, hops)),
            Err(e) if e.is_recoverable() => outcome.tally(&e),
            Err(e) => return Err(e),
        }
    }

    // --- churn: interleaved join+leave pairs, as the fifth phase ---
    for i in 0..descriptor.join_leave {
        let (joined_id, hops) = join_unique_node(overlay, &mut rng, &format!("churn-{i}"))?;
        outcome.records.push((OpClass::Join, hops));
        overlay.maintenance_barrier();

        if overlay.is_empty() {
            continue;
        }
        let leaving = loop {
            let candidate = random_live_id(overlay, &mut rng);
            if overlay.len() == 1 || candidate != joined_id {
                break candidate;
            }
        };
        let hops = overlay.leave(leaving)?;
        outcome.records.push((OpClass::Leave, hops));
        overlay.maintenance_barrier();
    }

    // --- K-query: K concurrent lookups over a disjoint key sample ---
    if descriptor.k > 0 && !inserted.is_empty() && !overlay.is_empty() {
        let sample_size = descriptor.k.min(inserted.len());
        let mut pool = inserted.clone();
        let mut sample = Vec::with_capacity(sample_size);
        for task in 0..sample_size {
            let mut child = fork_stream(descriptor.seed, task as u64);
            let idx = child.random_range(0..pool.len());
            sample.push(pool.swap_remove(idx));
        }

        let budget = overlay.hop_budget();
        let mut cursors = Vec::with_capacity(sample.len());
        for (task, key) in sample.iter().enumerate() {
            let mut child = fork_stream(descriptor.seed, task as u64);
            let origin = {
                let ids = overlay.live_ids();
                ids[child.random_range(0..ids.len())]
            };
            cursors.push(RouteCursor::new(origin, key.id(), budget));
        }

        let results: Vec<(RouteOutcome, u32)> = dht_scheduler::run_to_completion(overlay, cursors);
        for (outcome_result, hops) in results {
            match outcome_result {
                RouteOutcome::Delivered { .. } => outcome.records.push((OpClass::KQuery, hops)),
                RouteOutcome::Diverged => outcome.tally(&Error::RoutingDiverged { hops, budget }),
                RouteOutcome::Forwarded { .. } => unreachable!(),
            }
        }
        trace!(k = sample_size, "workload: k-query sub-experiment complete");
    }

    Ok(outcome)
}
