//! Persisted map `resource_url -> (signature, producing_process_id)`.
//!
//! Owned by the [`crate::workflow::Workflow`] but kept as its own type so it
//! can be serialized independently of the graph topology (forward
//! compatibility: old signature files stay readable even if the graph
//! representation changes shape).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One recorded signature: the opaque equality token plus who produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignatureRecord {
    pub signature: String,
    pub producing_process_id: Option<String>,
}

/// `resource_url -> SignatureRecord`, insertion ordered so serialized output
/// is stable and diffs are readable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignatureStore {
    entries: IndexMap<String, SignatureRecord>,
}

impl SignatureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, url: &str) -> Option<&SignatureRecord> {
        self.entries.get(url)
    }

    pub fn signature_of(&self, url: &str) -> Option<&str> {
        self.entries.get(url).map(|r| r.signature.as_str())
    }

    /// Records that `url` was produced with `signature`, iff it existed
    /// after its producer succeeded. Callers are responsible for only
    /// calling this once that precondition holds.
    pub fn record(&mut self, url: impl Into<String>, signature: impl Into<String>, producing_process_id: Option<String>) {
        self.entries.insert(
            url.into(),
            SignatureRecord {
                signature: signature.into(),
                producing_process_id,
            },
        );
    }

    pub fn remove(&mut self, url: &str) -> Option<SignatureRecord> {
        self.entries.shift_remove(url)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SignatureRecord)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_lookup_round_trip() {
        let mut store = SignatureStore::new();
        store.record("file:///tmp/a", "abc123", Some("p1".to_string()));
        assert_eq!(store.signature_of("file:///tmp/a"), Some("abc123"));
        assert_eq!(
            store.get("file:///tmp/a").unwrap().producing_process_id.as_deref(),
            Some("p1")
        );
    }

    #[test]
    fn remove_drops_entry() {
        let mut store = SignatureStore::new();
        store.record("file:///tmp/a", "abc123", None);
        assert!(store.remove("file:///tmp/a").is_some());
        assert!(store.signature_of("file:///tmp/a").is_none());
    }
}
