//! Version vectors, client side.
//!
//! Mirrors the server's `VersionVector` exactly — same `BTreeMap<String,
//! u64>` representation for deterministic JSON, same dominates/concurrent/
//! merge semantics — because both sides must agree on what "concurrent"
//! means for the protocol to work. Duplicated rather than shared because
//! client and server are independent binaries with no shared library crate.

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

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionVector(BTreeMap<String, u64>);

impl VersionVector {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, client_id: &str) -> u64 {
        self.0.get(client_id).copied().unwrap_or(0)
    }

    pub fn increment(&self, client_id: &str) -> Self {
        let mut next = self.0.clone();
        let entry = next.entry(client_id.to_string()).or_insert(0);
        *entry += 1;
        Self(next)
    }

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

    pub fn concurrent(&self, other: &Self) -> bool {
        self != other && !self.dominates(other) && !other.dominates(self)
    }

    pub fn equal(&self, other: &Self) -> bool {
        self == other
    }

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

    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }

    pub fn from_json_str(s: &str) -> Result<Self, anyhow::Error> {
        let value: serde_json::Value = serde_json::from_str(s)?;
        Self::from_json(&value).map_err(anyhow::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vv(pairs: &[(&str, u64)]) -> VersionVector {
        let mut map = BTreeMap::new();
        for (k, v) in pairs {
            map.insert(k.to_string(), *v);
        }
        VersionVector(map)
    }

    #[test]
    fn dominates_requires_strictly_more_information() {
        let v1 = vv(&[("a", 1)]);
        let v2 = vv(&[("a", 2)]);
        assert!(v2.dominates(&v1));
        assert!(!v1.dominates(&v2));
    }

    #[test]
    fn concurrent_when_neither_side_has_full_information() {
        let va = vv(&[("a", 2), ("b", 1)]);
        let vb = vv(&[("a", 1), ("b", 2)]);
        assert!(va.concurrent(&vb));
    }

    #[test]
    fn json_round_trip() {
        let v = vv(&[("zebra", 1), ("alpha", 2)]);
        let parsed = VersionVector::from_json(&v.to_json()).unwrap();
        assert_eq!(parsed, v);
    }
}
