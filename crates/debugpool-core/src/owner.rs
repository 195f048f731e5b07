//! Ownership records and the persisted status snapshot.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Sentinel string stored for a device that is permanently marked bad.
pub const BAD_MARKER: &str = "x";

/// Current owner of one device.
///
/// Persisted as `null` (free), an integer pid, or [`BAD_MARKER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Owner {
    /// Nobody holds the device
    #[default]
    Free,
    /// Held by the process with this pid
    OwnedBy(u32),
    /// Does not reach a working debug adapter; only a reconcile clears it
    Bad,
}

impl Owner {
    /// Check if the device can be handed out.
    pub fn is_free(&self) -> bool {
        matches!(self, Owner::Free)
    }

    /// Get the owning pid, if any.
    pub fn pid(&self) -> Option<u32> {
        match self {
            Owner::OwnedBy(pid) => Some(*pid),
            _ => None,
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Free => write!(f, "free"),
            Owner::OwnedBy(pid) => write!(f, "pid {pid}"),
            Owner::Bad => write!(f, "bad"),
        }
    }
}

impl Serialize for Owner {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Owner::Free => serializer.serialize_none(),
            Owner::OwnedBy(pid) => serializer.serialize_u32(*pid),
            Owner::Bad => serializer.serialize_str(BAD_MARKER),
        }
    }
}

struct OwnerVisitor;

impl<'de> Visitor<'de> for OwnerVisitor {
    type Value = Owner;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "null, a process id, or {BAD_MARKER:?}")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Owner, E> {
        Ok(Owner::Free)
    }

    fn visit_none<E: de::Error>(self) -> Result<Owner, E> {
        Ok(Owner::Free)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Owner, E> {
        u32::try_from(v)
            .map(Owner::OwnedBy)
            .map_err(|_| E::custom(format!("pid out of range: {v}")))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Owner, E> {
        u32::try_from(v)
            .map(Owner::OwnedBy)
            .map_err(|_| E::custom(format!("pid out of range: {v}")))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Owner, E> {
        if v == BAD_MARKER {
            Ok(Owner::Bad)
        } else {
            Err(E::invalid_value(de::Unexpected::Str(v), &self))
        }
    }
}

impl<'de> Deserialize<'de> for Owner {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(OwnerVisitor)
    }
}

/// Full mapping of every known device to its owner.
///
/// Keys are kept sorted so allocation scans devices in a deterministic order
/// and the persisted file is stable across rewrites.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusSnapshot {
    records: BTreeMap<String, Owner>,
}

impl StatusSnapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the owner of a device.
    pub fn get(&self, device: &str) -> Option<Owner> {
        self.records.get(device).copied()
    }

    /// Check if the device has a record.
    pub fn contains(&self, device: &str) -> bool {
        self.records.contains_key(device)
    }

    /// Set the owner of a device, adding a record if needed.
    ///
    /// Returns the previous owner.
    pub fn set(&mut self, device: impl Into<String>, owner: Owner) -> Option<Owner> {
        self.records.insert(device.into(), owner)
    }

    /// Update an existing record only.
    ///
    /// Returns `false` if the device is not recorded.
    pub fn update(&mut self, device: &str, owner: Owner) -> bool {
        match self.records.get_mut(device) {
            Some(slot) => {
                *slot = owner;
                true
            }
            None => false,
        }
    }

    /// First free device in key order that is not in `excluded`.
    pub fn first_free(&self, excluded: &HashSet<String>) -> Option<&str> {
        self.records
            .iter()
            .find(|(device, owner)| owner.is_free() && !excluded.contains(device.as_str()))
            .map(|(device, _)| device.as_str())
    }

    /// Iterate over all records in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Owner)> {
        self.records.iter().map(|(device, owner)| (device.as_str(), *owner))
    }

    /// Number of recorded devices.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if no device is recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<(String, Owner)> for StatusSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, Owner)>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_owner_json_encoding() {
        assert_eq!(serde_json::to_string(&Owner::Free).unwrap(), "null");
        assert_eq!(serde_json::to_string(&Owner::OwnedBy(4242)).unwrap(), "4242");
        assert_eq!(serde_json::to_string(&Owner::Bad).unwrap(), "\"x\"");
    }

    #[test]
    fn test_snapshot_from_original_file_format() {
        let json = r#"{"ttyACM0": null, "ttyACM1": 1234, "ttyACM2": "x"}"#;
        let snapshot: StatusSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snapshot.get("ttyACM0"), Some(Owner::Free));
        assert_eq!(snapshot.get("ttyACM1"), Some(Owner::OwnedBy(1234)));
        assert_eq!(snapshot.get("ttyACM2"), Some(Owner::Bad));
        assert_eq!(snapshot.get("ttyACM3"), None);
    }

    #[test]
    fn test_unknown_marker_rejected() {
        let result = serde_json::from_str::<StatusSnapshot>(r#"{"ttyACM0": "busy"}"#);
        assert!(result.is_err());
        let result = serde_json::from_str::<StatusSnapshot>(r#"{"ttyACM0": -3}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_snapshot_serializes_sorted() {
        let mut snapshot = StatusSnapshot::new();
        snapshot.set("ttyACM2", Owner::Bad);
        snapshot.set("ttyACM0", Owner::Free);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(json, r#"{"ttyACM0":null,"ttyACM2":"x"}"#);
    }

    #[test]
    fn test_first_free_skips_excluded_and_bad() {
        let snapshot: StatusSnapshot = [
            ("ttyACM0".to_string(), Owner::Bad),
            ("ttyACM1".to_string(), Owner::Free),
            ("ttyACM2".to_string(), Owner::Free),
            ("ttyACM3".to_string(), Owner::OwnedBy(7)),
        ]
        .into_iter()
        .collect();

        assert_eq!(snapshot.first_free(&HashSet::new()), Some("ttyACM1"));

        let excluded: HashSet<String> = ["ttyACM1".to_string()].into_iter().collect();
        assert_eq!(snapshot.first_free(&excluded), Some("ttyACM2"));

        let excluded: HashSet<String> = ["ttyACM1".to_string(), "ttyACM2".to_string()]
            .into_iter()
            .collect();
        assert_eq!(snapshot.first_free(&excluded), None);
    }

    #[test]
    fn test_update_requires_record() {
        let mut snapshot = StatusSnapshot::new();
        assert!(!snapshot.update("ttyACM0", Owner::Bad));
        snapshot.set("ttyACM0", Owner::Free);
        assert!(snapshot.update("ttyACM0", Owner::Bad));
        assert_eq!(snapshot.get("ttyACM0"), Some(Owner::Bad));
    }

    fn owner() -> impl Strategy<Value = Owner> {
        prop_oneof![
            Just(Owner::Free),
            Just(Owner::Bad),
            any::<u32>().prop_map(Owner::OwnedBy),
        ]
    }

    proptest! {
        /// Whatever is stored must come back out of the file unchanged.
        #[test]
        fn snapshot_survives_persistence(
            records in proptest::collection::btree_map("ttyACM[0-9]{1,2}", owner(), 0..12)
        ) {
            let snapshot: StatusSnapshot = records.into_iter().collect();
            let json = serde_json::to_string_pretty(&snapshot).unwrap();
            let back: StatusSnapshot = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(back, snapshot);
        }
    }
}
