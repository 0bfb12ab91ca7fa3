use std::collections::BTreeMap;

use tracing::debug;

use crate::device::is_pci_address;
use crate::hosts::HostSet;
use crate::remote::CommandResult;

/// Controller and disk addresses read from one `/sys/block` symlink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerLink {
    pub controller: String,
    pub disk: String,
}

/// Parses a `ls -l /sys/block/` line for an NVMe disk behind a VMD domain:
///
/// ```text
/// nvme0n1 -> ../devices/pci0000:5d/0000:5d:05.5/pci10000:00/10000:00:02.0/10000:01:00.0/nvme/nvme0/nvme0n1
/// ```
///
/// The VMD controller is the first address after the root bus, the disk is
/// the endpoint behind the VMD root port. Disks attached directly to a root
/// port have no second `pci` bus segment and yield `None`.
pub fn parse_controller_link(line: &str) -> Option<ControllerLink> {
    let (_, target) = line.split_once("->")?;
    let path = target.trim_start().strip_prefix("../devices/")?;
    let mut segments = path.split('/');

    let root_bus = segments.next()?;
    let controller = segments.next()?;
    let domain_bus = segments.next()?;
    let _root_port = segments.next().filter(|segment| is_address(segment))?;
    let disk = segments.next()?;

    if !is_bus(root_bus)
        || !is_pci_address(controller)
        || !is_bus(domain_bus)
        || !is_pci_address(disk)
    {
        return None;
    }
    Some(ControllerLink {
        controller: controller.to_string(),
        disk: disk.to_string(),
    })
}

fn is_bus(segment: &str) -> bool {
    segment.strip_prefix("pci").is_some_and(|bus| {
        !bus.is_empty() && bus.chars().all(|ch| is_lower_hex(ch) || ch == ':')
    })
}

fn is_address(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|ch| is_lower_hex(ch) || ch == ':' || ch == '.')
}

fn is_lower_hex(ch: char) -> bool {
    ch.is_ascii_digit() || ('a'..='f').contains(&ch)
}

/// disk address -> controller address -> hosts reporting that pairing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerMapping {
    disks: BTreeMap<String, BTreeMap<String, HostSet>>,
}

impl ControllerMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_result(result: &CommandResult) -> Self {
        let mut mapping = Self::new();
        for group in &result.output {
            for link in group.stdout.iter().filter_map(|line| parse_controller_link(line)) {
                mapping.record(link, &group.hosts);
            }
        }
        mapping
    }

    pub fn record(&mut self, link: ControllerLink, hosts: &HostSet) {
        self.disks
            .entry(link.disk)
            .or_default()
            .entry(link.controller)
            .or_default()
            .update(hosts);
    }

    pub fn hosts_for(&self, disk: &str, controller: &str) -> Option<&HostSet> {
        self.disks.get(disk)?.get(controller)
    }

    pub fn is_empty(&self) -> bool {
        self.disks.is_empty()
    }

    /// Controllers seen behind a disk on every host of `target`, mapped to the
    /// disks they serve.
    pub fn reduce(&self, target: &HostSet) -> BTreeMap<String, Vec<String>> {
        let mut controllers: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (disk, by_controller) in &self.disks {
            for (controller, hosts) in by_controller {
                if hosts == target {
                    controllers
                        .entry(controller.clone())
                        .or_default()
                        .push(disk.clone());
                } else {
                    debug!(
                        "  - disk {disk} managed by controller {controller} not found on all hosts: {hosts}"
                    );
                }
            }
        }
        controllers
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_controller_link, ControllerLink, ControllerMapping};
    use crate::hosts::HostSet;
    use crate::remote::{CommandResult, OutputGroup};

    const VMD_DISK: &str = "lrwxrwxrwx 1 root root 0 Mar  2 10:11 nvme0n1 -> ../devices/pci0000:5d/0000:5d:05.5/pci10000:00/10000:00:02.0/10000:01:00.0/nvme/nvme0/nvme0n1";
    const DIRECT_DISK: &str = "lrwxrwxrwx 1 root root 0 Mar  2 10:11 nvme2n1 -> ../devices/pci0000:80/0000:80:03.0/0000:81:00.0/nvme/nvme2/nvme2n1";

    fn lines(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn parses_vmd_backed_disk() {
        assert_eq!(
            parse_controller_link(VMD_DISK),
            Some(ControllerLink {
                controller: "0000:5d:05.5".to_string(),
                disk: "10000:01:00.0".to_string(),
            })
        );
    }

    #[test]
    fn ignores_directly_attached_disks_and_noise() {
        assert_eq!(parse_controller_link(DIRECT_DISK), None);
        assert_eq!(parse_controller_link("total 0"), None);
        assert_eq!(
            parse_controller_link("nvme0n1 -> ../devices/virtual/block/nvme0n1"),
            None
        );
    }

    #[test]
    fn reduce_iterates_controllers_of_each_disk() {
        let target = HostSet::from_iter(["h1", "h2"]);
        let other = VMD_DISK.replace("0000:5d:05.5", "0000:ae:05.5");
        let result = CommandResult {
            passed: true,
            output: vec![
                OutputGroup::new(HostSet::from_iter(["h1"]), lines(&[VMD_DISK, DIRECT_DISK])),
                OutputGroup::new(HostSet::from_iter(["h2"]), lines(&[VMD_DISK, other.as_str()])),
            ],
        };
        let mapping = ControllerMapping::from_result(&result);
        assert_eq!(
            mapping.hosts_for("10000:01:00.0", "0000:ae:05.5"),
            Some(&HostSet::from_iter(["h2"]))
        );

        let controllers = mapping.reduce(&target);
        assert_eq!(controllers.len(), 1);
        assert_eq!(
            controllers.get("0000:5d:05.5"),
            Some(&vec!["10000:01:00.0".to_string()])
        );
    }

    #[test]
    fn reduce_groups_every_disk_behind_a_controller() {
        let target = HostSet::from_iter(["h1"]);
        let second = VMD_DISK.replace("10000:01:00.0", "10000:02:00.0");
        let mut mapping = ControllerMapping::new();
        for line in [VMD_DISK, second.as_str()] {
            mapping.record(parse_controller_link(line).unwrap(), &target);
        }
        let controllers = mapping.reduce(&target);
        assert_eq!(
            controllers["0000:5d:05.5"],
            vec!["10000:01:00.0".to_string(), "10000:02:00.0".to_string()]
        );
    }
}
