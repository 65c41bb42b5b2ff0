//! Device registry
//!
//! Ordered map from device address to the latest scan observation. New
//! addresses are appended; repeated addresses are replaced in place without
//! moving, so a list view stays stable while a scan is running.

use std::collections::HashMap;

use crate::ble::types::{ScanObservation, Upsert};

#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    /// Observations in first-seen order
    entries: Vec<ScanObservation>,

    /// Address -> position in `entries`
    index: HashMap<String, usize>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for the observation's address
    pub fn upsert(&mut self, observation: ScanObservation) -> Upsert {
        match self.index.get(&observation.address) {
            Some(&position) => {
                self.entries[position] = observation;
                Upsert::Updated
            }
            None => {
                self.index
                    .insert(observation.address.clone(), self.entries.len());
                self.entries.push(observation);
                Upsert::Inserted
            }
        }
    }

    /// Current observations in first-seen order
    pub fn list(&self) -> &[ScanObservation] {
        &self.entries
    }

    pub fn get(&self, address: &str) -> Option<&ScanObservation> {
        self.index.get(address).map(|&position| &self.entries[position])
    }

    pub fn contains(&self, address: &str) -> bool {
        self.index.contains_key(address)
    }

    /// Forget every device
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
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
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_insert_then_update_in_place() {
        let mut registry = DeviceRegistry::new();

        let result = registry.upsert(ScanObservation::new("AA:BB").with_name("X"));
        assert_eq!(result, Upsert::Inserted);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list()[0].address, "AA:BB");

        let result = registry.upsert(ScanObservation::new("AA:BB").with_name("Y"));
        assert_eq!(result, Upsert::Updated);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.list()[0].name.as_deref(), Some("Y"));
    }

    #[test]
    fn test_update_keeps_first_seen_order() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(ScanObservation::new("01"));
        registry.upsert(ScanObservation::new("02"));
        registry.upsert(ScanObservation::new("03"));
        registry.upsert(ScanObservation::new("01").with_rssi(-40));

        let order: Vec<&str> = registry.list().iter().map(|o| o.address.as_str()).collect();
        assert_eq!(order, vec!["01", "02", "03"]);
        assert_eq!(registry.get("01").and_then(|o| o.rssi), Some(-40));
    }

    #[test]
    fn test_unnamed_devices_are_distinct() {
        let mut registry = DeviceRegistry::new();
        assert_eq!(registry.upsert(ScanObservation::new("01")), Upsert::Inserted);
        assert_eq!(registry.upsert(ScanObservation::new("02")), Upsert::Inserted);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_clear() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(ScanObservation::new("01"));
        registry.clear();
        assert!(registry.is_empty());
        assert!(!registry.contains("01"));
        assert_eq!(registry.upsert(ScanObservation::new("01")), Upsert::Inserted);
    }

    proptest! {
        #[test]
        fn size_matches_distinct_addresses(addresses in prop::collection::vec(0u8..16, 0..64)) {
            let mut registry = DeviceRegistry::new();
            let mut seen = HashSet::new();

            for a in &addresses {
                let address = format!("00:00:00:00:00:{:02X}", a);
                let expected = if seen.insert(address.clone()) {
                    Upsert::Inserted
                } else {
                    Upsert::Updated
                };
                prop_assert_eq!(registry.upsert(ScanObservation::new(address)), expected);
            }

            prop_assert_eq!(registry.len(), seen.len());
        }

        #[test]
        fn last_write_wins(rssis in prop::collection::vec(-100i16..0, 1..32)) {
            let mut registry = DeviceRegistry::new();
            for rssi in &rssis {
                registry.upsert(ScanObservation::new("AA:BB").with_rssi(*rssi));
            }
            prop_assert_eq!(registry.get("AA:BB").and_then(|o| o.rssi), rssis.last().copied());
        }
    }
}
