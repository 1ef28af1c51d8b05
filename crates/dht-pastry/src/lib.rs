//! Pastry: a prefix-routing DHT overlay with leaf sets and routing tables.
//!
//! Join is implemented as the protocol actually describes it — a traced
//! path through the existing topology seeds the new node's tables, and
//! every node on the path (and every node referenced in the resulting
//! tables) is offered the new node as a candidate slot filler — so that a
//! single join's hop count reflects real routing work. Because getting
//! every third-party slot update exactly right via opportunistic
//! announcement alone is easy to get subtly wrong, `maintenance_barrier`
//! (and `leave`) additionally run an authoritative `rebuild_all_tables`
//! pass that recomputes every live node's leaf set and routing table
//! directly from the current membership. This guarantees the quiescence
//! invariants (leaf closure, routing-table prefix property) hold exactly
//! after every barrier, regardless of any gap in the opportunistic path.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(missing_docs, clippy::all)]

use dht_core::{
    Error, HopStep, Key, NodeArena, Overlay, Result, RouteCursor, RouteOutcome, SteppedRouter,
    Value,
};
use dht_idspace::{shared_prefix_len, Id};
use std::collections::HashMap;
use tracing::trace;

/// Default leaf set size `L`.
pub const DEFAULT_LEAF_SIZE: usize = 16;
/// Default routing-table digit width `b` (columns `= 2^b`).
pub const DEFAULT_B_BITS: u32 = 4;

#[derive(Debug, Clone)]
struct PastryNodeState {
    id: Id,
    leaf_set: Vec<Id>,
    routing_table: Vec<Vec<Option<Id>>>,
    store: HashMap<Key, Value>,
}

impl PastryNodeState {
    fn new(id: Id, rows: usize, columns: usize) -> Self {
        Self {
            id,
            leaf_set: Vec::new(),
            routing_table: vec![vec![None; columns]; rows],
            store: HashMap::new(),
        }
    }
}

/// A Pastry overlay parameterized by leaf set size `L` and digit width `b`.
#[derive(Debug)]
pub struct PastryOverlay {
    arena: NodeArena<PastryNodeState>,
    b_bits: u32,
    leaf_size: usize,
}

impl PastryOverlay {
    /// A fresh, empty overlay. `leaf_size` should be even; `b_bits` is the
    /// base-2^b digit width used for prefix routing.
    #[must_use]
    pub fn new(b_bits: u32, leaf_size: usize) -> Self {
        Self {
            arena: NodeArena::new(),
            b_bits,
            leaf_size,
        }
    }

    /// Number of routing-table rows, `ceil(m / b)`.
    #[must_use]
    pub fn rows(&self) -> usize {
        Id::rows(self.b_bits)
    }

    /// Number of routing-table columns, `2^b`.
    #[must_use]
    pub fn columns(&self) -> usize {
        1usize << self.b_bits
    }

    /// Hop budget for the current node count: `4*ceil(log_{2^b}(N))`,
    /// minimum 32.
    #[must_use]
    pub fn hop_budget(&self) -> u32 {
        hop_budget_for(self.arena.len(), self.b_bits)
    }

    fn leaf_range_contains(&self, node: &PastryNodeState, target: Id) -> bool {
        if self.arena.len() <= 1 {
            return true;
        }
        if node.leaf_set.is_empty() {
            return true;
        }
        let min = node.leaf_set.iter().copied().chain([node.id]).min().expect("non-empty");
        let max = node.leaf_set.iter().copied().chain([node.id]).max().expect("non-empty");
        target >= min && target <= max
    }

    fn closest_in_leaf_range(&self, node: &PastryNodeState, target: Id) -> Id {
        node.leaf_set
            .iter()
            .copied()
            .chain([node.id])
            .filter(|id| self.arena.contains(*id) || *id == node.id)
            .min_by(|a, b| {
                a.numeric_distance(target)
                    .cmp(&b.numeric_distance(target))
                    .then(a.cmp(b))
            })
            .unwrap_or(node.id)
    }

    fn rare_case_forward(&self, node: &PastryNodeState, target: Id, l: usize) -> Option<Id> {
        let self_dist = node.id.numeric_distance(target);
        let mut best: Option<Id> = None;
        let candidates = node
            .routing_table
            .iter()
            .flatten()
            .filter_map(|slot| *slot)
            .chain(node.leaf_set.iter().copied());
        for candidate in candidates {
            if !self.arena.contains(candidate) {
                continue;
            }
            if shared_prefix_len(&candidate, &target, self.b_bits) >= l
                && candidate.numeric_distance(target) < self_dist
            {
                best = Some(match best {
                    Some(cur) if cur.numeric_distance(target) <= candidate.numeric_distance(target) => cur,
                    _ => candidate,
                });
            }
        }
        best
    }

    fn select_leaf_set(candidates: &[Id], center: Id, leaf_size: usize) -> Vec<Id> {
        let half = leaf_size / 2;
        let mut below: Vec<Id> = candidates.iter().copied().filter(|c| *c < center).collect();
        below.sort_unstable_by(|a, b| b.cmp(a));
        below.truncate(half);

        let mut above: Vec<Id> = candidates.iter().copied().filter(|c| *c > center).collect();
        above.sort_unstable();
        above.truncate(half);

        let mut out = below;
        out.extend(above);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn rebuild_all_tables(&mut self) {
        let ids = self.arena.sorted_ids();
        let rows = self.rows();
        let columns = self.columns();
        for &id in &ids {
            let others: Vec<Id> = ids.iter().copied().filter(|o| *o != id).collect();
            let leaf_set = Self::select_leaf_set(&others, id, self.leaf_size);

            let mut table = vec![vec![None; columns]; rows];
            for &other in &others {
                let l = shared_prefix_len(&id, &other, self.b_bits);
                if l < rows {
                    let c = other.digit(l, self.b_bits) as usize;
                    match table[l][c] {
                        Some(cur) if cur < other => {}
                        _ => table[l][c] = Some(other),
                    }
                }
            }

            if let Some(node) = self.arena.get_mut(id) {
                node.leaf_set = leaf_set;
                node.routing_table = table;
            }
        }
    }

    fn offer_candidate(&mut self, at: Id, candidate: Id) {
        if at == candidate {
            return;
        }
        let Some(node) = self.arena.get(at) else {
            return;
        };
        let at_id = node.id;
        let mut leaf_candidates = node.leaf_set.clone();
        leaf_candidates.push(candidate);
        let new_leaf = Self::select_leaf_set(&leaf_candidates, at_id, self.leaf_size);

        let rows = self.rows();
        let l = shared_prefix_len(&at_id, &candidate, self.b_bits);
        let slot_update = if l < rows {
            let c = candidate.digit(l, self.b_bits) as usize;
            let current = node.routing_table[l][c];
            let better = match current {
                None => true,
                Some(cur) => {
                    cur != candidate && candidate.numeric_distance(at_id) < cur.numeric_distance(at_id)
                }
            };
            better.then_some((l, c))
        } else {
            None
        };

        if let Some(node) = self.arena.get_mut(at) {
            node.leaf_set = new_leaf;
            if let Some((l, c)) = slot_update {
                node.routing_table[l][c] = Some(candidate);
            }
        }
    }

    /// Total number of keys resident across every live node's store, for
    /// overlay-wide key-residency audits.
    #[must_use]
    pub fn total_keys(&self) -> usize {
        self.arena.iter().map(|(_, node)| node.store.len()).sum()
    }

    /// Validate the Pastry leaf-closure and routing-table prefix invariants.
    ///
    /// # Errors
    /// Returns `Err` describing the first violation found.
    pub fn validate_invariants(&self) -> std::result::Result<(), String> {
        let ids = self.arena.sorted_ids();
        let rows = self.rows();
        let half = self.leaf_size / 2;
        for &id in &ids {
            let node = self.arena.get(id).expect("id came from sorted_ids");
            let others: Vec<Id> = ids.iter().copied().filter(|o| *o != id).collect();
            let expected_leaf = Self::select_leaf_set(&others, id, self.leaf_size);
            let below_available = others.iter().filter(|o| **o < id).count().min(half);
            let above_available = others.iter().filter(|o| **o > id).count().min(half);
            let expected_len = below_available + above_available;
            if node.leaf_set.len() != expected_len || node.leaf_set != expected_leaf {
                return Err(format!(
                    "leaf closure violated at {id:?}: expected {expected_leaf:?}, found {:?}",
                    node.leaf_set
                ));
            }
            for r in 0..rows {
                for (c, slot) in node.routing_table[r].iter().enumerate() {
                    if let Some(x) = slot {
                        if shared_prefix_len(&id, x, self.b_bits) != r {
                            return Err(format!(
                                "routing table prefix property violated at {id:?}[{r}][{c}]: shared_prefix_len != {r}"
                            ));
                        }
                        if x.digit(r, self.b_bits) as usize != c {
                            return Err(format!(
                                "routing table prefix property violated at {id:?}[{r}][{c}]: digit({x:?}, {r}) != {c}"
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl SteppedRouter for PastryOverlay {
    fn route_step(&self, cursor: &RouteCursor) -> HopStep {
        let node = self
            .arena
            .get(cursor.current)
            .expect("routing cursor must sit on a live node");
        let target = cursor.target;

        if self.leaf_range_contains(node, target) {
            let closest = self.closest_in_leaf_range(node, target);
            return if closest == node.id {
                HopStep::Deliver
            } else {
                HopStep::Forward(closest)
            };
        }

        let l = shared_prefix_len(&node.id, &target, self.b_bits);
        if l < self.rows() {
            let c = target.digit(l, self.b_bits) as usize;
            if let Some(candidate) = node.routing_table[l][c] {
                if self.arena.contains(candidate) {
                    return HopStep::Forward(candidate);
                }
            }
        }

        match self.rare_case_forward(node, target, l) {
            Some(better) => HopStep::Forward(better),
            None => HopStep::Deliver,
        }
    }
}

impl Overlay for PastryOverlay {
    fn join(&mut self, id: Id) -> Result<u32> {
        if self.arena.contains(id) {
            return Err(Error::DuplicateId { attempts: 0 });
        }
        let rows = self.rows();
        let columns = self.columns();
        if self.arena.is_empty() {
            self.arena.insert(id, PastryNodeState::new(id, rows, columns));
            trace!(?id, "pastry: first node joins");
            return Ok(0);
        }

        let bootstrap = self.arena.sorted_ids()[0];
        let budget = self.hop_budget();
        let mut cursor = RouteCursor::new(bootstrap, id, budget);
        let mut path = vec![bootstrap];
        loop {
            match self.advance(&mut cursor) {
                RouteOutcome::Forwarded { at } => path.push(at),
                RouteOutcome::Delivered { at } => {
                    if path.last() != Some(&at) {
                        path.push(at);
                    }
                    break;
                }
                RouteOutcome::Diverged => break,
            }
        }
        let hops = cursor.hops;
        let x_k = *path.last().expect("path always has the bootstrap entry");

        let mut new_node = PastryNodeState::new(id, rows, columns);
        for (r, x_r) in path.iter().enumerate().take(rows) {
            if let Some(xr_node) = self.arena.get(*x_r) {
                new_node.routing_table[r] = xr_node.routing_table[r].clone();
            }
        }
        if let Some(xk_node) = self.arena.get(x_k) {
            let mut candidates: Vec<Id> = xk_node.leaf_set.clone();
            candidates.push(x_k);
            candidates.retain(|c| *c != id);
            new_node.leaf_set = Self::select_leaf_set(&candidates, id, self.leaf_size);
        }
        if let Some(xk_node) = self.arena.get_mut(x_k) {
            let moved: Vec<Key> = xk_node
                .store
                .keys()
                .filter(|k| k.id().numeric_distance(id) < k.id().numeric_distance(x_k))
                .cloned()
                .collect();
            for k in moved {
                if let Some(v) = xk_node.store.remove(&k) {
                    new_node.store.insert(k, v);
                }
            }
        }

        let mut referenced: Vec<Id> = new_node
            .routing_table
            .iter()
            .flatten()
            .filter_map(|s| *s)
            .chain(new_node.leaf_set.iter().copied())
            .chain(path.iter().copied())
            .collect();
        referenced.sort_unstable();
        referenced.dedup();

        self.arena.insert(id, new_node);
        for other in referenced {
            self.offer_candidate(other, id);
        }
        trace!(?id, ?x_k, hops, "pastry: node joined");
        Ok(hops)
    }

    fn leave(&mut self, id: Id) -> Result<u32> {
        let Some(node) = self.arena.remove(id) else {
            return Ok(0);
        };
        let target = node
            .leaf_set
            .iter()
            .copied()
            .filter(|c| self.arena.contains(*c))
            .min_by_key(|c| c.numeric_distance(id))
            .or_else(|| self.arena.sorted_ids().into_iter().next());

        if let Some(target_id) = target {
            if let Some(target_node) = self.arena.get_mut(target_id) {
                for (k, v) in node.store {
                    target_node.store.insert(k, v);
                }
            }
        }
        self.rebuild_all_tables();
        trace!(?id, "pastry: node left");
        Ok(0)
    }

    fn put(&mut self, origin: Id, key: Key, value: Value) -> Result<u32> {
        if self.arena.is_empty() {
            return Err(Error::OverlayEmpty);
        }
        let budget = self.hop_budget();
        let mut cursor = RouteCursor::new(origin, key.id(), budget);
        match self.run_to_completion(&mut cursor) {
            RouteOutcome::Delivered { at } => {
                self.arena
                    .get_mut(at)
                    .expect("delivered node is live")
                    .store
                    .insert(key, value);
                Ok(cursor.hops)
            }
            RouteOutcome::Diverged => Err(Error::RoutingDiverged { hops: cursor.hops, budget }),
            RouteOutcome::Forwarded { .. } => unreachable!(),
        }
    }

    fn get(&mut self, origin: Id, key: &Key) -> Result<(Value, u32)> {
        if self.arena.is_empty() {
            return Err(Error::OverlayEmpty);
        }
        let budget = self.hop_budget();
        let mut cursor = RouteCursor::new(origin, key.id(), budget);
        match self.run_to_completion(&mut cursor) {
            RouteOutcome::Delivered { at } => {
                let node = self.arena.get(at).expect("delivered node is live");
                node.store
                    .get(key)
                    .cloned()
                    .map(|v| (v, cursor.hops))
                    .ok_or(Error::KeyNotFound)
            }
            RouteOutcome::Diverged => Err(Error::RoutingDiverged { hops: cursor.hops, budget }),
            RouteOutcome::Forwarded { .. } => unreachable!(),
        }
    }

    fn update(&mut self, origin: Id, key: Key, value: Value) -> Result<u32> {
        if self.arena.is_empty() {
            return Err(Error::OverlayEmpty);
        }
        let budget = self.hop_budget();
        let mut cursor = RouteCursor::new(origin, key.id(), budget);
        match self.run_to_completion(&mut cursor) {
            RouteOutcome::Delivered { at } => {
                let node = self.arena.get_mut(at).expect("delivered node is live");
                if let Some(slot) = node.store.get_mut(&key) {
                    *slot = value;
                    Ok(cursor.hops)
                } else {
                    Err(Error::KeyNotFound)
                }
            }
            RouteOutcome::Diverged => Err(Error::RoutingDiverged { hops: cursor.hops, budget }),
            RouteOutcome::Forwarded { .. } => unreachable!(),
        }
    }

    fn delete(&mut self, origin: Id, key: &Key) -> Result<u32> {
        if self.arena.is_empty() {
            return Err(Error::OverlayEmpty);
        }
        let budget = self.hop_budget();
        let mut cursor = RouteCursor::new(origin, key.id(), budget);
        match self.run_to_completion(&mut cursor) {
            RouteOutcome::Delivered { at } => {
                let node = self.arena.get_mut(at).expect("delivered node is live");
                if node.store.remove(key).is_some() {
                    Ok(cursor.hops)
                } else {
                    Err(Error::KeyNotFound)
                }
            }
            RouteOutcome::Diverged => Err(Error::RoutingDiverged { hops: cursor.hops, budget }),
            RouteOutcome::Forwarded { .. } => unreachable!(),
        }
    }

    fn hop_budget(&self) -> u32 {
        self.hop_budget()
    }

    fn maintenance_barrier(&mut self) {
        self.rebuild_all_tables();
    }

    fn live_ids(&self) -> Vec<Id> {
        self.arena.sorted_ids()
    }

    fn len(&self) -> usize {
        self.arena.len()
    }
}

/// `4*ceil(log_{2^b}(N))`, minimum 32 — the default hop budget for Pastry
/// lookups.
#[must_use]
pub fn hop_budget_for(n: usize, b_bits: u32) -> u32 {
    let n = n.max(1) as f64;
    let base = f64::from(1u32 << b_bits);
    let raw = (4.0 * n.log2() / base.log2()).ceil();
    (raw as u32).max(32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ring_of(n: usize) -> PastryOverlay {
        let mut overlay = PastryOverlay::new(DEFAULT_B_BITS, DEFAULT_LEAF_SIZE);
        for i in 0..n {
            let id = Id::hash(format!("pastry-node-{i}").as_bytes());
            overlay.join(id).expect("join should not collide in tests");
        }
        overlay.maintenance_barrier();
        overlay
    }

    #[test]
    fn single_node_owns_everything_with_zero_hops() {
        let mut overlay = ring_of(1);
        let origin = overlay.live_ids()[0];
        let key = Key::new(*b"the-matrix");
        let hops = overlay.put(origin, key.clone(), json!({"year": 1999})).unwrap();
        assert_eq!(hops, 0);
        let (_, hops) = overlay.get(origin, &key).unwrap();
        assert_eq!(hops, 0);
    }

    #[test]
    fn leaf_closure_and_prefix_property_hold_after_barrier() {
        let overlay = ring_of(40);
        overlay.validate_invariants().expect("invariants should hold");
    }

    #[test]
    fn insert_then_lookup_roundtrips() {
        let mut overlay = ring_of(25);
        let origin = overlay.live_ids()[0];
        let key = Key::new(*b"alien");
        overlay.put(origin, key.clone(), json!({"year": 1979})).unwrap();
        let (v, _) = overlay.get(origin, &key).unwrap();
        assert_eq!(v, json!({"year": 1979}));
    }

    #[test]
    fn update_then_lookup_sees_new_value() {
        let mut overlay = ring_of(25);
        let origin = overlay.live_ids()[0];
        let key = Key::new(*b"alien");
        overlay.put(origin, key.clone(), json!({"year": 1979})).unwrap();
        overlay.update(origin, key.clone(), json!({"year": 1980})).unwrap();
        let (v, _) = overlay.get(origin, &key).unwrap();
        assert_eq!(v, json!({"year": 1980}));
    }

    #[test]
    fn delete_then_lookup_is_key_not_found() {
        let mut overlay = ring_of(25);
        let origin = overlay.live_ids()[0];
        let key = Key::new(*b"alien");
        overlay.put(origin, key.clone(), json!({"year": 1979})).unwrap();
        overlay.delete(origin, &key).unwrap();
        assert_eq!(overlay.get(origin, &key), Err(Error::KeyNotFound));
    }

    #[test]
    fn delete_on_empty_overlay_is_overlay_empty() {
        let mut overlay = PastryOverlay::new(DEFAULT_B_BITS, DEFAULT_LEAF_SIZE);
        let origin = Id::hash(b"nobody");
        let key = Key::new(*b"alien");
        assert_eq!(overlay.delete(origin, &key), Err(Error::OverlayEmpty));
    }

    #[test]
    fn join_then_leave_preserves_remaining_keys() {
        let mut overlay = ring_of(30);
        let origin = overlay.live_ids()[0];
        for i in 0..20 {
            overlay
                .put(origin, Key::new(format!("k{i}").into_bytes()), json!(i))
                .unwrap();
        }
        let leaving = overlay.live_ids()[3];
        overlay.leave(leaving).unwrap();
        overlay.maintenance_barrier();
        overlay.validate_invariants().expect("invariants should hold post-churn");
        let origin = overlay.live_ids()[0];
        for i in 0..20 {
            let key = Key::new(format!("k{i}").into_bytes());
            let (v, _) = overlay.get(origin, &key).expect("key should have survived churn");
            assert_eq!(v, json!(i));
        }
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let mut overlay = PastryOverlay::new(DEFAULT_B_BITS, DEFAULT_LEAF_SIZE);
        let id = Id::hash(b"same");
        overlay.join(id).unwrap();
        assert_eq!(overlay.join(id), Err(Error::DuplicateId { attempts: 0 }));
    }

    #[test]
    fn hop_budget_has_a_floor_of_32() {
        assert_eq!(hop_budget_for(1, DEFAULT_B_BITS), 32);
        assert_eq!(hop_budget_for(4, DEFAULT_B_BITS), 32);
    }

    #[test]
    fn lookup_hops_scale_sublinearly_with_ring_size() {
        let overlay = ring_of(200);
        let ids = overlay.live_ids();
        let mut total_hops = 0u32;
        let mut overlay = overlay;
        for w in ids.windows(2).take(50) {
            let key = Key::new(format!("probe-{:?}", w[0]).into_bytes());
            overlay.put(w[0], key.clone(), json!(1)).unwrap();
            let (_, hops) = overlay.get(w[1], &key).unwrap();
            total_hops += hops;
        }
        let mean = f64::from(total_hops) / 50.0;
        let bound = (200f64).log(f64::from(2u32.pow(DEFAULT_B_BITS))).ceil();
        assert!(mean <= bound, "mean hops {mean} too high for 200-node ring (bound {bound})");
    }
}
