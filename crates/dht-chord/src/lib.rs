//! Chord: a modular-ring DHT overlay.
//!
//! Routing, join/leave and maintenance follow the algorithm in the overlay
//! specification directly; the one generalization beyond the textbook
//! description is that delivery is decided by the *responsibility*
//! predicate (`target` falls in `(predecessor(n), n]`) rather than only by
//! the `(self, successor]` check — this lets a single `route_step` serve
//! both "find the successor of an id" (join) and "find the owner of a key"
//! (put/get/update/delete) without a second code path, and makes the
//! single-node ring a trivial special case rather than an edge case in the
//! interval arithmetic.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(missing_docs, clippy::all)]

use dht_core::{
    Error, HopStep, Key, NodeArena, OpClass, Overlay, Result, RouteCursor, RouteOutcome,
    SteppedRouter, Value,
};
use dht_idspace::{in_interval, Id, ID_BITS};
use std::collections::HashMap;
use tracing::trace;

/// Number of successors retained in a node's fault-tolerance list.
const DEFAULT_SUCCESSOR_LIST_LEN: usize = 4;

/// Upper bound on stabilization rounds a maintenance barrier will run before
/// giving up on reaching a fixed point (pathological topologies only; a
/// healthy ring converges in O(log N) rounds).
const MAX_STABILIZE_ROUNDS: usize = 256;

/// Per-node Chord routing state.
#[derive(Debug, Clone)]
struct ChordNodeState {
    id: Id,
    successor_list: Vec<Id>,
    predecessor: Option<Id>,
    finger: Vec<Option<Id>>,
    fix_finger_next: usize,
    store: HashMap<Key, Value>,
}

impl ChordNodeState {
    fn new(id: Id, m_bits: u32) -> Self {
        Self {
            id,
            successor_list: vec![id],
            predecessor: None,
            finger: vec![None; m_bits as usize],
            fix_finger_next: 0,
            store: HashMap::new(),
        }
    }

    fn successor(&self) -> Id {
        self.successor_list.first().copied().unwrap_or(self.id)
    }
}

/// A Chord ring of up to `2^m` identifiers.
#[derive(Debug)]
pub struct ChordOverlay {
    arena: NodeArena<ChordNodeState>,
    m_bits: u32,
    successor_list_len: usize,
}

impl ChordOverlay {
    /// A fresh, empty Chord ring over `m_bits`-bit identifiers (160 per the
    /// overlay's default identifier width).
    #[must_use]
    pub fn new(m_bits: u32) -> Self {
        Self {
            arena: NodeArena::new(),
            m_bits,
            successor_list_len: DEFAULT_SUCCESSOR_LIST_LEN,
        }
    }

    /// Ring width in bits.
    #[must_use]
    pub const fn m_bits(&self) -> u32 {
        self.m_bits
    }

    /// Hop budget for the current node count: `2*ceil(log2(N))`, minimum 32.
    #[must_use]
    pub fn hop_budget(&self) -> u32 {
        hop_budget_for(self.arena.len())
    }

    fn responsible(&self, node: &ChordNodeState, target: Id) -> bool {
        if self.arena.len() <= 1 {
            return true;
        }
        match node.predecessor {
            Some(pred) if self.arena.contains(pred) => in_interval(target, pred, node.id, true, false),
            _ => false,
        }
    }

    fn closest_preceding_finger(&self, node: &ChordNodeState, target: Id) -> Id {
        for i in (0..self.m_bits as usize).rev() {
            if let Some(candidate) = node.finger[i] {
                if self.arena.contains(candidate)
                    && in_interval(candidate, node.id, target, true, true)
                {
                    return candidate;
                }
            }
        }
        node.id
    }

    fn find_successor_from(&self, start: Id, target: Id) -> (Id, u32) {
        let budget = self.hop_budget();
        let mut cursor = RouteCursor::new(start, target, budget);
        match self.run_to_completion(&mut cursor) {
            RouteOutcome::Delivered { at } => (at, cursor.hops),
            RouteOutcome::Diverged => (cursor.current, cursor.hops),
            RouteOutcome::Forwarded { .. } => unreachable!("run_to_completion never returns Forwarded"),
        }
    }

    fn stabilize_node(&mut self, id: Id) -> bool {
        let Some(node) = self.arena.get(id) else {
            return false;
        };
        let succ = node.successor();
        if succ == id {
            return false;
        }
        let mut changed = false;
        let mut effective_succ = succ;

        if let Some(succ_node) = self.arena.get(succ) {
            if let Some(p) = succ_node.predecessor {
                if p != id && self.arena.contains(p) && in_interval(p, id, succ, true, true) {
                    if let Some(node) = self.arena.get_mut(id) {
                        node.successor_list.insert(0, p);
                        node.successor_list.truncate(self.successor_list_len);
                    }
                    effective_succ = p;
                    changed = true;
                }
            }
        } else {
            // successor has departed without a clean handoff reaching us yet;
            // drop it and fall back to the next entry in the list.
            if let Some(node) = self.arena.get_mut(id) {
                node.successor_list.retain(|s| *s != succ);
                if node.successor_list.is_empty() {
                    node.successor_list.push(id);
                }
            }
            return true;
        }

        changed |= self.notify(effective_succ, id);
        changed
    }

    fn notify(&mut self, target: Id, candidate: Id) -> bool {
        let Some(node) = self.arena.get_mut(target) else {
            return false;
        };
        let should_set = match node.predecessor {
            None => true,
            Some(p) => p == candidate || (self.arena.contains(p) && in_interval(candidate, p, target, true, true)),
        };
        if should_set && node.predecessor != Some(candidate) {
            node.predecessor = Some(candidate);
            true
        } else {
            false
        }
    }

    fn fix_all_fingers(&mut self, id: Id) {
        for i in 0..self.m_bits as usize {
            let target = id.add_pow2(i as u32);
            let (owner, _) = self.find_successor_from(id, target);
            if let Some(node) = self.arena.get_mut(id) {
                node.finger[i] = Some(owner);
            }
        }
        if let Some(node) = self.arena.get_mut(id) {
            node.fix_finger_next = 0;
        }
    }

    /// Advance exactly one rotating finger-table slot (the steady-state,
    /// one-tick-at-a-time shape of the real protocol), rather than the
    /// full sweep `maintenance_barrier` performs to reach quiescence.
    pub fn fix_next_finger(&mut self, id: Id) {
        let Some(i) = self.arena.get(id).map(|n| n.fix_finger_next) else {
            return;
        };
        let target_id = self.arena.get(id).map(|n| n.id);
        let Some(self_id) = target_id else { return };
        let target = self_id.add_pow2(i as u32);
        let (owner, _) = self.find_successor_from(self_id, target);
        if let Some(node) = self.arena.get_mut(id) {
            node.finger[i] = Some(owner);
            node.fix_finger_next = (i + 1) % self.m_bits as usize;
        }
    }

    fn check_predecessor(&mut self, id: Id) {
        let dead = self
            .arena
            .get(id)
            .and_then(|n| n.predecessor)
            .filter(|p| !self.arena.contains(*p));
        if dead.is_some() {
            if let Some(node) = self.arena.get_mut(id) {
                node.predecessor = None;
            }
        }
    }

    /// Total number of keys resident across every live node's store, for
    /// overlay-wide key-residency audits.
    #[must_use]
    pub fn total_keys(&self) -> usize {
        self.arena.iter().map(|(_, node)| node.store.len()).sum()
    }

    /// Validate the two Chord quantified invariants over the whole ring:
    /// successor consistency and full-ring coverage. Returns a description
    /// of the first violation found, if any.
    ///
    /// # Errors
    /// Returns `Err` describing the first violated invariant.
    pub fn validate_invariants(&self) -> std::result::Result<(), String> {
        let ids = self.arena.sorted_ids();
        if ids.is_empty() {
            return Ok(());
        }
        for &id in &ids {
            let node = self.arena.get(id).expect("id came from sorted_ids");
            let succ = node.successor();
            if succ != id {
                let succ_node = self
                    .arena
                    .get(succ)
                    .ok_or_else(|| format!("{id:?}'s successor {succ:?} is not live"))?;
                if succ_node.predecessor != Some(id) {
                    return Err(format!(
                        "successor consistency violated: {id:?}'s successor {succ:?} has predecessor {:?}",
                        succ_node.predecessor
                    ));
                }
            }
        }
        // Coverage: walk the ring once; every node's (predecessor, id] must
        // tile the whole space with no gap or overlap.
        let n = ids.len();
        for (k, &id) in ids.iter().enumerate() {
            let prev = ids[(k + n - 1) % n];
            let node = self.arena.get(id).expect("id came from sorted_ids");
            match node.predecessor {
                Some(p) if p == prev => {}
                other => {
                    return Err(format!(
                        "coverage violated at {id:?}: expected predecessor {prev:?}, found {other:?}"
                    ))
                }
            }
        }
        Ok(())
    }
}

impl SteppedRouter for ChordOverlay {
    fn route_step(&self, cursor: &RouteCursor) -> HopStep {
        let node = self
            .arena
            .get(cursor.current)
            .expect("routing cursor must sit on a live node");
        if self.responsible(node, cursor.target) {
            return HopStep::Deliver;
        }
        let succ = node.successor();
        if in_interval(cursor.target, node.id, succ, true, false) {
            HopStep::Forward(succ)
        } else {
            HopStep::Forward(self.closest_preceding_finger(node, cursor.target))
        }
    }
}

impl Overlay for ChordOverlay {
    fn join(&mut self, id: Id) -> Result<u32> {
        if self.arena.contains(id) {
            return Err(Error::DuplicateId { attempts: 0 });
        }
        if self.arena.is_empty() {
            self.arena.insert(id, ChordNodeState::new(id, self.m_bits));
            trace!(?id, "chord: first node joins, ring is now size 1");
            return Ok(0);
        }

        let bootstrap = self.arena.sorted_ids()[0];
        let (succ, hops) = self.find_successor_from(bootstrap, id);

        let old_pred = self.arena.get(succ).and_then(|n| n.predecessor);
        let mut new_node = ChordNodeState::new(id, self.m_bits);
        new_node.successor_list = vec![succ];

        if let Some(succ_node) = self.arena.get_mut(succ) {
            let handoff_start = old_pred.unwrap_or(succ);
            let moved: Vec<Key> = succ_node
                .store
                .keys()
                .filter(|k| in_interval(k.id(), handoff_start, id, true, false))
                .cloned()
                .collect();
            for k in moved {
                if let Some(v) = succ_node.store.remove(&k) {
                    new_node.store.insert(k, v);
                }
            }
        }

        self.arena.insert(id, new_node);
        trace!(?id, ?succ, hops, "chord: node joined");
        Ok(hops)
    }

    fn leave(&mut self, id: Id) -> Result<u32> {
        let Some(node) = self.arena.remove(id) else {
            return Ok(0);
        };
        let succ = node
            .successor_list
            .iter()
            .copied()
            .find(|s| *s != id && self.arena.contains(*s));

        if let Some(succ_id) = succ {
            if let Some(succ_node) = self.arena.get_mut(succ_id) {
                for (k, v) in node.store {
                    succ_node.store.insert(k, v);
                }
                if succ_node.predecessor == Some(id) {
                    succ_node.predecessor = node.predecessor;
                }
            }
            if let Some(pred_id) = node.predecessor {
                if let Some(pred_node) = self.arena.get_mut(pred_id) {
                    for s in &mut pred_node.successor_list {
                        if *s == id {
                            *s = succ_id;
                        }
                    }
                }
            }
        }
        trace!(?id, "chord: node left");
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
        for round in 0..MAX_STABILIZE_ROUNDS {
            let ids = self.arena.sorted_ids();
            let mut changed = false;
            for id in ids.iter().copied() {
                self.check_predecessor(id);
                changed |= self.stabilize_node(id);
            }
            if !changed {
                trace!(round, nodes = ids.len(), "chord: stabilization reached fixed point");
                break;
            }
        }
        for id in self.arena.sorted_ids() {
            self.fix_all_fingers(id);
        }
    }

    fn live_ids(&self) -> Vec<Id> {
        self.arena.sorted_ids()
    }

    fn len(&self) -> usize {
        self.arena.len()
    }
}

/// `2*ceil(log2(N))`, minimum 32 — the default hop budget for Chord lookups.
#[must_use]
pub fn hop_budget_for(n: usize) -> u32 {
    let n = n.max(1) as f64;
    let raw = (2.0 * n.log2()).ceil();
    (raw as u32).max(32)
}
