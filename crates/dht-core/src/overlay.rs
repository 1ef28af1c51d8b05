//! The capability set Chord and Pastry both implement, letting the workload
//! driver and metrics aggregator stay polymorphic over the protocol.

use crate::key::{Key, Value};
use crate::Result;
use dht_idspace::Id;

/// The operation classes the metrics aggregator groups hop counts by.
///
/// `KQuery` is a distinct class from `Lookup`: K-query hop costs are never
/// folded into the sequential lookup statistics, even though both are
/// routing lookups at the protocol level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpClass {
    /// Node join.
    Join,
    /// Node leave.
    Leave,
    /// Key insertion.
    Insert,
    /// Key lookup.
    Lookup,
    /// Key update.
    Update,
    /// Key deletion.
    Delete,
    /// A lookup issued as part of the concurrent K-query sub-experiment.
    KQuery,
}

impl OpClass {
    /// All op classes, in the canonical phase order the workload driver
    /// executes them: insert, lookup, update, delete, churn, K-query.
    pub const ALL: [Self; 7] = [
        Self::Insert,
        Self::Lookup,
        Self::Update,
        Self::Delete,
        Self::Join,
        Self::Leave,
        Self::KQuery,
    ];

    /// Stable lowercase name, used as the JSON object key in the result
    /// record.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Insert => "insert",
            Self::Lookup => "lookup",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::KQuery => "kquery",
        }
    }
}

impl std::fmt::Display for OpClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared capability set implemented by `ChordOverlay` and `PastryOverlay`.
///
/// Every routed operation returns the hop count it incurred rather than
/// accumulating it in ambient state, so the workload driver can record
/// `(op_class, hops)` uniformly across protocols.
pub trait Overlay {
    /// Create a node with identifier `id` and join it into the overlay,
    /// bootstrapping through an existing live node chosen by the overlay
    /// itself (or becoming the first node if none are live yet).
    ///
    /// # Errors
    /// Returns [`crate::Error::DuplicateId`] (with `attempts: 0`) immediately
    /// if `id` collides with a live node; this trait performs no retry
    /// itself, bounded disambiguation-by-rehash lives one layer up, in the
    /// workload driver that picks the candidate `id` in the first place.
    /// Returns [`crate::Error::RoutingDiverged`] if the join route exceeds
    /// the hop budget.
    fn join(&mut self, id: Id) -> Result<u32>;

    /// Remove `id` from the overlay gracefully, handing off its keys.
    ///
    /// # Errors
    /// Returns [`crate::Error::OverlayEmpty`] if `id` is not live.
    fn leave(&mut self, id: Id) -> Result<u32>;

    /// Insert `key -> value`, routed from `origin`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OverlayEmpty`] if no node is live, or
    /// [`crate::Error::RoutingDiverged`] if the route exceeds the hop
    /// budget.
    fn put(&mut self, origin: Id, key: Key, value: Value) -> Result<u32>;

    /// Look up `key`, routed from `origin`.
    ///
    /// # Errors
    /// Returns [`crate::Error::KeyNotFound`] if the owning node holds no
    /// value for `key`, or the structural errors documented on [`Self::put`].
    fn get(&mut self, origin: Id, key: &Key) -> Result<(Value, u32)>;

    /// Update an existing `key` in place, routed from `origin`.
    ///
    /// # Errors
    /// Returns [`crate::Error::KeyNotFound`] if `key` does not already
    /// exist, or the structural errors documented on [`Self::put`].
    fn update(&mut self, origin: Id, key: Key, value: Value) -> Result<u32>;

    /// Delete `key`, routed from `origin`.
    ///
    /// # Errors
    /// Returns [`crate::Error::KeyNotFound`] if `key` does not exist, or the
    /// structural errors documented on [`Self::put`].
    fn delete(&mut self, origin: Id, key: &Key) -> Result<u32>;

    /// Hop budget applied to every routed operation at the overlay's
    /// current node count; protocol-specific (Chord and Pastry scale this
    /// differently), which is why it is part of the shared capability set
    /// rather than left for callers to recompute.
    fn hop_budget(&self) -> u32;

    /// Run protocol maintenance (Chord: stabilize + fix_fingers +
    /// check_predecessor to a fixed point; Pastry: third-party table
    /// repair) to a quiescent fixed point. Never runs concurrently with
    /// workload operations.
    fn maintenance_barrier(&mut self);

    /// Identifiers of every currently live node, in ascending ring order.
    fn live_ids(&self) -> Vec<Id>;

    /// Number of currently live nodes.
    fn len(&self) -> usize;

    /// Whether the overlay has no live nodes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
