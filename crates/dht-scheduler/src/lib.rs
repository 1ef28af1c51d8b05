//! The K-query scheduler: a pointerless, round-robin state machine that
//! advances many in-flight routes one hop at a time, in the same
//! `Iterator`-over-an-explicit-stack style `sezkp_scheduler::DfsScheduler`
//! uses for its DFS traversal. No threads, channels, or async runtime are
//! involved — concurrency is simulated by interleaving single-hop steps
//! across tasks in round-robin order, which is deterministic by
//! construction and is exactly the suspension point the concurrency model
//! requires: one logical forward per schedulable step.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(missing_docs, clippy::all)]

use dht_core::{RouteCursor, RouteOutcome, SteppedRouter};
use tracing::trace;

/// One scheduling event: either a single hop taken by one task, or the
/// terminal signal that every task has reached a final outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Task `task` took one routing step, reaching `outcome` after `hops`
    /// hops so far.
    Hop {
        /// Index of the task (stable for the scheduler's lifetime).
        task: usize,
        /// The outcome of this step.
        outcome: RouteOutcome,
        /// Cumulative hops on this task's cursor after the step.
        hops: u32,
    },
    /// Every task has reached a terminal outcome (delivered or diverged).
    Done,
}

struct TaskSlot {
    cursor: RouteCursor,
    finished: bool,
}

/// Round-robin scheduler over a fixed set of in-flight routes.
pub struct KQueryScheduler<'a, R> {
    router: &'a R,
    tasks: Vec<TaskSlot>,
    next_index: usize,
    done_emitted: bool,
}

impl<'a, R: SteppedRouter> KQueryScheduler<'a, R> {
    /// Start a scheduler over `cursors`, one per concurrent query, indexed
    /// in the order given (index order is the deterministic schedule).
    #[must_use]
    pub fn new(router: &'a R, cursors: Vec<RouteCursor>) -> Self {
        let empty = cursors.is_empty();
        Self {
            router,
            tasks: cursors
                .into_iter()
                .map(|cursor| TaskSlot { cursor, finished: false })
                .collect(),
            next_index: 0,
            done_emitted: empty,
        }
    }

    /// Number of tasks under management.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

impl<'a, R: SteppedRouter> Iterator for KQueryScheduler<'a, R> {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        if self.tasks.is_empty() {
            return if self.done_emitted {
                None
            } else {
                self.done_emitted = true;
                Some(Event::Done)
            };
        }
        loop {
            if self.tasks.iter().all(|t| t.finished) {
                return if self.done_emitted {
                    None
                } else {
                    self.done_emitted = true;
                    Some(Event::Done)
                };
            }
            let idx = self.next_index;
            self.next_index = (self.next_index + 1) % self.tasks.len();
            if self.tasks[idx].finished {
                continue;
            }
            let outcome = self.router.advance(&mut self.tasks[idx].cursor);
            let hops = self.tasks[idx].cursor.hops;
            if !matches!(outcome, RouteOutcome::Forwarded { .. }) {
                self.tasks[idx].finished = true;
            }
            trace!(task = idx, ?outcome, hops, "kquery: hop");
            return Some(Event::Hop { task: idx, outcome, hops });
        }
    }
}

/// Drive `cursors` to completion under `router`, returning each task's
/// terminal outcome and hop count, indexed exactly as `cursors` was given.
pub fn run_to_completion<R: SteppedRouter>(
    router: &R,
    cursors: Vec<RouteCursor>,
) -> Vec<(RouteOutcome, u32)> {
    let n = cursors.len();
    let mut finals: Vec<Option<(RouteOutcome, u32)>> = vec![None; n];
    let scheduler = KQueryScheduler::new(router, cursors);
    for event in scheduler {
        if let Event::Hop { task, outcome, hops } = event {
            if !matches!(outcome, RouteOutcome::Forwarded { .. }) {
                finals[task] = Some((outcome, hops));
            }
        }
    }
    finals
        .into_iter()
        .map(|f| f.expect("every task reaches a terminal outcome before Done"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dht_chord::ChordOverlay;
    use dht_core::{Key, Overlay};
    use dht_idspace::ID_BITS;
    use serde_json::json;

    fn ring_of(n: usize) -> ChordOverlay {
        let mut overlay = ChordOverlay::new(ID_BITS);
        for i in 0..n {
            overlay
                .join(dht_idspace::Id::hash(format!("sched-node-{i}").as_bytes()))
                .unwrap();
        }
        overlay.maintenance_barrier();
        overlay
    }

    #[test]
    fn round_robin_delivers_every_task() {
        let mut overlay = ring_of(30);
        let ids = overlay.live_ids();
        let origin = ids[0];
        let keys: Vec<Key> = (0..10).map(|i| Key::new(format!("kq-{i}").into_bytes())).collect();
        for k in &keys {
            overlay.put(origin, k.clone(), json!(1)).unwrap();
        }

        let budget = overlay.hop_budget();
        let cursors: Vec<RouteCursor> = keys
            .iter()
            .map(|k| RouteCursor::new(origin, k.id(), budget))
            .collect();
        let results = run_to_completion(&overlay, cursors);
        assert_eq!(results.len(), keys.len());
        for (outcome, _hops) in results {
            assert!(matches!(outcome, RouteOutcome::Delivered { .. }));
        }
    }

    #[test]
    fn empty_task_set_emits_only_done() {
        let overlay = ring_of(5);
        let scheduler = KQueryScheduler::new(&overlay, Vec::new());
        let events: Vec<Event> = scheduler.collect();
        assert_eq!(events, vec![Event::Done]);
    }

    #[test]
    fn per_task_hop_counts_are_independent_of_interleaving() {
        let mut overlay = ring_of(40);
        let origin = overlay.live_ids()[0];
        let key = Key::new(*b"solo");
        overlay.put(origin, key.clone(), json!(1)).unwrap();

        let budget = overlay.hop_budget();
        let solo_cursor = RouteCursor::new(origin, key.id(), budget);
        let (solo_outcome, solo_hops) =
            run_to_completion(&overlay, vec![solo_cursor]).pop().unwrap();

        let mut many = vec![RouteCursor::new(origin, key.id(), budget)];
        for i in 0..9 {
            many.push(RouteCursor::new(
                origin,
                Key::new(format!("filler-{i}").into_bytes()).id(),
                budget,
            ));
        }
        let batch_results = run_to_completion(&overlay, many);
        let (batch_outcome, batch_hops) = batch_results[0];
        assert_eq!(solo_outcome, batch_outcome);
        assert_eq!(solo_hops, batch_hops);
    }
}
