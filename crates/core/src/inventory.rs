use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::controller::ControllerMapping;
use crate::device::{DeviceCategory, DeviceRecord};
use crate::error::{Result, StorageInventoryError};
use crate::hosts::HostSet;
use crate::occurrence::reduce_homogeneous;
use crate::parse::{collect_occurrences, DeviceFilter, ParseShortfall};
use crate::remote::RemoteExecutor;

const LSPCI_PREFIX: &str = "lspci -vmm -D | grep -E '^(Slot|Class|Device|NUMANode):'";
pub const CONTROLLER_MAPPING_COMMAND: &str = "ls -l /sys/block/ | grep nvme || :";

/// Device families, declared in the order `scan` visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeviceFamily {
    #[serde(rename = "NVMe")]
    Nvme,
    #[serde(rename = "VMD")]
    Vmd,
}

impl DeviceFamily {
    pub const ALL: [DeviceFamily; 2] = [DeviceFamily::Nvme, DeviceFamily::Vmd];

    pub fn name(self) -> &'static str {
        match self {
            DeviceFamily::Nvme => "NVMe",
            DeviceFamily::Vmd => "VMD",
        }
    }

    pub fn type_search(self) -> &'static str {
        match self {
            DeviceFamily::Nvme => {
                r"grep -E 'Class:\s+Non-Volatile memory controller' -B 1 -A 2"
            }
            DeviceFamily::Vmd => {
                r"grep -E 'Device:\s+Volume Management Device NVMe RAID Controller' -B 2 -A 1"
            }
        }
    }

    pub fn discovery_command(self) -> String {
        format!("{LSPCI_PREFIX} | {} || :", self.type_search())
    }

    fn joined_names() -> String {
        let mut names = Self::ALL.iter().map(|family| family.name()).collect::<Vec<_>>();
        names.sort_unstable();
        names.join(" & ")
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceFamily {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "nvme" => Ok(DeviceFamily::Nvme),
            "vmd" => Ok(DeviceFamily::Vmd),
            other => Err(format!("unknown device family '{other}'")),
        }
    }
}

/// Devices present identically on every host of a fixed host set.
///
/// Each `scan` clears the previous results before querying the hosts, so a
/// failed scan leaves the inventory empty rather than stale.
#[derive(Debug)]
pub struct StorageInventory<E> {
    executor: E,
    hosts: HostSet,
    devices: Vec<DeviceRecord>,
    shortfalls: Vec<ParseShortfall>,
}

impl<E: RemoteExecutor> StorageInventory<E> {
    pub fn new(executor: E, hosts: &HostSet) -> Self {
        Self {
            executor,
            hosts: hosts.clone(),
            devices: Vec::new(),
            shortfalls: Vec::new(),
        }
    }

    pub fn hosts(&self) -> &HostSet {
        &self.hosts
    }

    pub fn devices(&self) -> &[DeviceRecord] {
        &self.devices
    }

    /// Slots skipped by the last scan because a field line was missing.
    pub fn diagnostics(&self) -> &[ParseShortfall] {
        &self.shortfalls
    }

    /// Detects the NVMe disks and VMD controllers that exist on every host.
    ///
    /// `device_filter` is a regex matched against each device description; a
    /// leading `-` excludes matches instead. `family` restricts the scan to
    /// one device family.
    pub fn scan(
        &mut self,
        device_filter: Option<&str>,
        family: Option<DeviceFamily>,
    ) -> Result<()> {
        info!("{}", "-".repeat(80));
        info!("Scanning {} for NVMe/VMD devices", self.hosts);
        self.devices.clear();
        self.shortfalls.clear();

        let scanned = self.scan_families(device_filter, family);
        if scanned.is_err() {
            self.devices.clear();
        }
        scanned
    }

    fn scan_families(
        &mut self,
        device_filter: Option<&str>,
        family: Option<DeviceFamily>,
    ) -> Result<()> {
        let filter = DeviceFilter::from_option(device_filter)?;
        for key in DeviceFamily::ALL {
            if family.is_some_and(|family| family != key) {
                continue;
            }
            let (found, shortfalls) = self.discover(key, filter.as_ref())?;
            self.shortfalls.extend(shortfalls);
            if key == DeviceFamily::Vmd {
                if found.is_empty() {
                    continue;
                }
                let controllers = self.get_controller_mapping()?;
                for device in found {
                    if controllers.contains_key(device.address()) {
                        self.devices
                            .push(device.with_category(DeviceCategory::Controller));
                    } else {
                        debug!("  dropping VMD device without homogeneous disks: {device}");
                    }
                }
            } else {
                self.devices.extend(found);
            }
        }

        if self.devices.is_empty() {
            let families = match family {
                Some(family) => family.name().to_string(),
                None => DeviceFamily::joined_names(),
            };
            return Err(raise(StorageInventoryError::NonHomogeneous { families }));
        }

        info!("Found {} homogeneous device(s) on {}", self.devices.len(), self.hosts);
        for device in &self.devices {
            info!("  {} ({})", device, device.category());
        }
        Ok(())
    }

    /// Devices of one family found on every host, with `device_filter`
    /// applied. Skipped slots are logged but not kept in `diagnostics()`.
    pub fn get_device_information(
        &self,
        family: DeviceFamily,
        device_filter: Option<&str>,
    ) -> Result<Vec<DeviceRecord>> {
        let filter = DeviceFilter::from_option(device_filter)?;
        let (found, _) = self.discover(family, filter.as_ref())?;
        Ok(found)
    }

    fn discover(
        &self,
        family: DeviceFamily,
        filter: Option<&DeviceFilter>,
    ) -> Result<(Vec<DeviceRecord>, Vec<ParseShortfall>)> {
        debug!(
            "Detecting {family} devices on {}{}",
            self.hosts,
            match filter {
                Some(_) => " with a device filter",
                None => "",
            }
        );

        let command = family.discovery_command();
        let result = self.executor.run(&self.hosts, &command)?;
        if !result.passed {
            return Err(raise(StorageInventoryError::CommandFailure {
                command,
                hosts: result.failed_hosts().to_string(),
            }));
        }

        let parsed = collect_occurrences(&result, filter);
        let found = reduce_homogeneous(&parsed.occurrences, &self.hosts);

        if found.is_empty() {
            debug!("No {family} devices found on all hosts");
        } else {
            debug!("{family} devices found on all hosts:");
            for device in &found {
                debug!("  {device}");
            }
        }
        Ok((found, parsed.shortfalls))
    }

    /// VMD controller addresses that front the same disks on every host,
    /// mapped to those disks.
    pub fn get_controller_mapping(&self) -> Result<BTreeMap<String, Vec<String>>> {
        debug!("Determining the controllers for each VMD disk");
        let result = self.executor.run(&self.hosts, CONTROLLER_MAPPING_COMMAND)?;
        if !result.passed {
            return Err(raise(StorageInventoryError::CommandFailure {
                command: CONTROLLER_MAPPING_COMMAND.to_string(),
                hosts: result.failed_hosts().to_string(),
            }));
        }

        let controllers = ControllerMapping::from_result(&result).reduce(&self.hosts);
        if controllers.is_empty() {
            return Err(raise(StorageInventoryError::NonHomogeneousControllers));
        }

        debug!("Controller/disk mapping");
        for (controller, disks) in &controllers {
            debug!("  {controller}: {}", disks.join(", "));
        }
        Ok(controllers)
    }
}

fn raise(err: StorageInventoryError) -> StorageInventoryError {
    error!("{err}");
    err
}
