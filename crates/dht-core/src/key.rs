//! The key/value data model routed over both overlays.

use dht_idspace::Id;
use serde::{Deserialize, Serialize};

/// A byte-string key, derived from a movie record's primary field. Keys
/// compare and hash by their raw bytes; routing identity is always derived
/// via [`Key::id`], never by comparing `Key`s directly as ring positions.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(pub Vec<u8>);

impl Key {
    /// Build a key from anything that can be viewed as bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// The routing identifier `H(key)`.
    #[must_use]
    pub fn id(&self) -> Id {
        Id::hash(&self.0)
    }

    /// Borrow the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{s}"),
            Err(_) => write!(f, "{:?}", self.0),
        }
    }
}

/// Opaque payload attached to a key: a subset of movie attributes,
/// represented as arbitrary JSON. Immutable from the overlay's perspective
/// except via `Overlay::update`.
pub type Value = serde_json::Value;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_deterministic() {
        let a = Key::new(*b"the-matrix");
        let b = Key::new(*b"the-matrix");
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn distinct_keys_usually_hash_differently() {
        let a = Key::new(*b"alpha");
        let b = Key::new(*b"beta");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn display_renders_utf8() {
        let k = Key::new(*b"the-matrix");
        assert_eq!(k.to_string(), "the-matrix");
    }
}
