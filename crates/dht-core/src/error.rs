//! Typed errors shared by every overlay/workload library crate.
//!
//! CLI code converts these into `anyhow::Error` at the process boundary via
//! `?`/`.context(...)`; library crates never depend on `anyhow` themselves.

use dht_idspace::IdSpaceError;
use thiserror::Error;

/// Error kinds produced by the overlay core.
///
/// `CsvSchema` is deliberately absent: it belongs to the ingestion layer
/// (`dht-cli`), not the core, per the error-handling design.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Update/delete/lookup against a key absent at the owning node.
    /// Recorded as an operation-level error; not fatal.
    #[error("key not found")]
    KeyNotFound,

    /// The routed operation exceeded its hop budget.
    /// Counted in the error tally; the operation is excluded from statistics.
    #[error("routing diverged after {hops} hops (budget {budget})")]
    RoutingDiverged {
        /// Hops taken before the budget was exhausted.
        hops: u32,
        /// The budget that was exceeded.
        budget: u32,
    },

    /// An operation was issued before any node had joined the overlay.
    /// Fatal for the current workload run.
    #[error("overlay has no live nodes")]
    OverlayEmpty,

    /// A malformed identifier reached the overlay (programmer error).
    /// Fatal for the current run.
    #[error("malformed identifier: {0}")]
    IdFormat(#[from] IdSpaceError),

    /// Two nodes hashed to the same identifier and retry-by-disambiguation
    /// was exhausted.
    #[error("duplicate identifier after {attempts} disambiguation attempts")]
    DuplicateId {
        /// Number of disambiguation attempts made before giving up.
        attempts: u32,
    },
}

impl Error {
    /// Stable, short name used as the key in the metrics error tally
    /// (`spec`'s `errors: { "RoutingDiverged": int, ... }` shape).
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::KeyNotFound => "KeyNotFound",
            Self::RoutingDiverged { .. } => "RoutingDiverged",
            Self::OverlayEmpty => "OverlayEmpty",
            Self::IdFormat(_) => "IdFormat",
            Self::DuplicateId { .. } => "DuplicateId",
        }
    }

    /// Whether this error is locally recoverable (tallied, workload
    /// continues) as opposed to structural (aborts the current run).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::KeyNotFound | Self::RoutingDiverged { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_match_spec_vocabulary() {
        assert_eq!(Error::KeyNotFound.kind_name(), "KeyNotFound");
        assert_eq!(
            Error::RoutingDiverged { hops: 5, budget: 4 }.kind_name(),
            "RoutingDiverged"
        );
        assert_eq!(Error::OverlayEmpty.kind_name(), "OverlayEmpty");
        assert_eq!(Error::DuplicateId { attempts: 3 }.kind_name(), "DuplicateId");
    }

    #[test]
    fn recoverability_split() {
        assert!(Error::KeyNotFound.is_recoverable());
        assert!(Error::RoutingDiverged { hops: 1, budget: 1 }.is_recoverable());
        assert!(!Error::OverlayEmpty.is_recoverable());
        assert!(!Error::DuplicateId { attempts: 1 }.is_recoverable());
    }
}
