//! Shared substrate for the Chord and Pastry overlay simulator: the key/value
//! data model, the node arena, the `Overlay` capability trait, the stepped
//! router used by both the sequential workload driver and the K-query
//! scheduler, and the typed error enum returned by every library crate.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(missing_docs, clippy::all)]

pub mod arena;
pub mod error;
pub mod key;
pub mod overlay;
pub mod router;

pub use arena::NodeArena;
pub use error::Error;
pub use key::{Key, Value};
pub use overlay::{OpClass, Overlay};
pub use router::{HopStep, RouteCursor, RouteOutcome, SteppedRouter};

/// Convenience alias used throughout the library crates.
pub type Result<T> = std::result::Result<T, Error>;
