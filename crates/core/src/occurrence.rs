use std::collections::HashMap;

use tracing::{debug, warn};

use crate::device::DeviceRecord;
use crate::hosts::HostSet;

/// Devices in first-seen order, each with the hosts it was observed on.
#[derive(Debug, Clone, Default)]
pub struct OccurrenceMap {
    entries: Vec<(DeviceRecord, HostSet)>,
    index_by_key: HashMap<String, usize>,
}

impl OccurrenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, device: DeviceRecord, hosts: &HostSet) {
        let key = device.identity_key();
        match self.index_by_key.get(&key) {
            Some(&index) => self.entries[index].1.update(hosts),
            None => {
                self.index_by_key.insert(key, self.entries.len());
                self.entries.push((device, hosts.clone()));
            }
        }
    }

    pub fn hosts_for(&self, device: &DeviceRecord) -> Option<&HostSet> {
        self.index_by_key
            .get(&device.identity_key())
            .map(|&index| &self.entries[index].1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeviceRecord, &HostSet)> {
        self.entries.iter().map(|(device, hosts)| (device, hosts))
    }
}

/// Keeps the devices whose host set is exactly `target`.
///
/// Output order is first-occurrence order of the map.
pub fn reduce_homogeneous(occurrences: &OccurrenceMap, target: &HostSet) -> Vec<DeviceRecord> {
    let mut homogeneous = Vec::new();
    for (device, hosts) in occurrences.iter() {
        if hosts == target {
            homogeneous.push(device.clone());
        } else if hosts.is_subset(target) {
            debug!("  device '{device}' not found on all hosts: {hosts}");
        } else {
            warn!("  device '{device}' reported by hosts outside the queried set: {hosts}");
        }
    }
    homogeneous
}
