//! A synthetic key–value source standing in for the external CSV dataset,
//! used in tests and by the CLI's `--synthetic` escape hatch — the same
//! role `sezkp_trace::generator` plays for the proving workspace's traces.

use serde_json::json;

/// Deterministically generates `(format!("key-{i}"), {"seq": i})` pairs,
/// counting up from zero. Infinite: the driver stops reading once it has
/// consumed as many items as the workload descriptor calls for.
#[derive(Debug, Clone, Default)]
pub struct SyntheticKeySource {
    next_index: u64,
}

impl SyntheticKeySource {
    /// A source starting at `key-0`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Iterator for SyntheticKeySource {
    type Item = (Vec<u8>, dht_core::Value);

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.next_index;
        self.next_index += 1;
        Some((format!("key-{i}").into_bytes(), json!({ "seq": i })))
    }
}
