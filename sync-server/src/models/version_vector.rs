//! Version vectors used to detect concurrent writes to the same file.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MalformedVectorError {
    #[error("version vector entry for client {0:?} is not a non-negative integer")]
    InvalidCounter(String),
    #[error("version vector is not a JSON object")]
    NotAnObject,
}

/// Per-client logical clocks. Kept as a `BTreeMap` rather than a `HashMap` so
/// serialization is deterministic — two vectors with identical content always
/// produce byte-identical JSON, which matters for hashing and for tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionVector(BTreeMap<String, u64>);

impl VersionVector {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn from_map(map: BTreeMap<String, u64>) -> Self {
        Self(map)
    }

    pub fn get(&self, client_id: &str) -> u64 {
        self.0.get(client_id).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.0.iter()
    }

    /// Bump this client's counter by one, returning the new vector.
    pub fn increment(&self, client_id: &str) -> Self {
        let mut next = self.0.clone();
        let entry = next.entry(client_id.to_string()).or_insert(0);
        *entry += 1;
        Self(next)
    }

    /// `self` dominates `other` if every entry in `self` is >= the corresponding
    /// entry in `other`, and at least one entry is strictly greater (or `self`
    /// has an entry `other` lacks). A vector does not dominate itself.
    pub fn dominates(&self, other: &Self) -> bool {
        if self == other {
            return false;
        }
        self.0
            .iter()
            .chain(other.0.iter())
            .map(|(k, _)| k)
            .collect::<std::collections::HashSet<_>>()
            .into_iter()
            .all(|k| self.get(k) >= other.get(k))
    }

    /// Two vectors are concurrent when neither dominates the other and they
    /// are not equal — this is the signal for a write-write conflict.
    pub fn concurrent(&self, other: &Self) -> bool {
        self != other && !self.dominates(other) && !other.dominates(self)
    }

    pub fn equal(&self, other: &Self) -> bool {
        self == other
    }

    /// Entrywise max, used when reconciling a client's vector against the
    /// server's after a successful merge.
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.0.clone();
        for (client_id, counter) in other.0.iter() {
            let entry = merged.entry(client_id.clone()).or_insert(0);
            *entry = (*entry).max(*counter);
        }
        Self(merged)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.0).expect("BTreeMap<String, u64> always serializes")
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, MalformedVectorError> {
        let obj = value.as_object().ok_or(MalformedVectorError::NotAnObject)?;
        let mut map = BTreeMap::new();
        for (client_id, counter) in obj {
            let n = counter
                .as_u64()
                .ok_or_else(|| MalformedVectorError::InvalidCounter(client_id.clone()))?;
            map.insert(client_id.clone(), n);
        }
        Ok(Self(map))
    }
}

impl PartialOrd for VersionVector {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            Some(Ordering::Equal)
        } else if self.dominates(other) {
            Some(Ordering::Greater)
        } else if other.dominates(self) {
            Some(Ordering::Less)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vv(pairs: &[(&str, u64)]) -> VersionVector {
        VersionVector::from_map(pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect())
    }

    #[test]
    fn empty_vectors_are_equal() {
        assert_eq!(VersionVector::new(), VersionVector::new());
    }

    #[test]
    fn increment_bumps_single_client() {
        let v0 = VersionVector::new();
        let v1 = v0.increment("client-a");
        assert_eq!(v1.get("client-a"), 1);
        assert_eq!(v1.get("client-b"), 0);
        let v2 = v1.increment("client-a");
        assert_eq!(v2.get("client-a"), 2);
    }

    #[test]
    fn dominates_requires_strictly_more_information() {
        let v1 = vv(&[("a", 1)]);
        let v2 = vv(&[("a", 2)]);
        assert!(v2.dominates(&v1));
        assert!(!v1.dominates(&v2));
        assert!(!v1.dominates(&v1));
    }

    #[test]
    fn concurrent_when_neither_side_has_full_information() {
        let va = vv(&[("a", 2), ("b", 1)]);
        let vb = vv(&[("a", 1), ("b", 2)]);
        assert!(va.concurrent(&vb));
        assert!(vb.concurrent(&va));
        assert!(!va.dominates(&vb));
        assert!(!vb.dominates(&va));
    }

    #[test]
    fn merge_takes_entrywise_max() {
        let va = vv(&[("a", 3), ("b", 1)]);
        let vb = vv(&[("a", 1), ("b", 2), ("c", 5)]);
        let merged = va.merge(&vb);
        assert_eq!(merged.get("a"), 3);
        assert_eq!(merged.get("b"), 2);
        assert_eq!(merged.get("c"), 5);
    }

    #[test]
    fn merge_dominates_both_inputs() {
        let va = vv(&[("a", 3), ("b", 1)]);
        let vb = vv(&[("a", 1), ("b", 2), ("c", 5)]);
        let merged = va.merge(&vb);
        assert!(merged.dominates(&va) || merged == va);
        assert!(merged.dominates(&vb) || merged == vb);
    }

    #[test]
    fn json_round_trip_preserves_ordering() {
        let v = vv(&[("zebra", 1), ("alpha", 2)]);
        let json = v.to_json();
        assert_eq!(json.to_string(), r#"{"alpha":2,"zebra":1}"#);
        let parsed = VersionVector::from_json(&json).unwrap();
        assert_eq!(parsed, v);
    }

    #[test]
    fn from_json_rejects_non_integer_counters() {
        let value = serde_json::json!({ "client-a": "not-a-number" });
        assert!(VersionVector::from_json(&value).is_err());
    }

    #[test]
    fn from_json_rejects_non_object() {
        let value = serde_json::json!([1, 2, 3]);
        assert!(VersionVector::from_json(&value).is_err());
    }
}
