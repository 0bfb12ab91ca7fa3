use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::device::{DeviceCategory, DeviceRecord};
use crate::error::{Result, StorageInventoryError};
use crate::hosts::HostSet;
use crate::occurrence::OccurrenceMap;
use crate::remote::CommandResult;

/// One recognised line of `lspci -vmm -D` output.
///
/// Example group:
///
/// ```text
/// Slot:   0000:81:00.0
/// Class:  Non-Volatile memory controller
/// Device: NVMe Datacenter SSD [Optane]
/// NUMANode:       1
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaggedField {
    Slot(String),
    Class(String),
    Device(String),
    NumaNode(String),
}

pub fn tokenize_line(line: &str) -> Option<TaggedField> {
    let (tag, rest) = line.trim_start().split_once(':')?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let value = rest.trim();

    let field = match tag {
        "Slot" => TaggedField::Slot(leading_run(value, |ch| {
            ch.is_ascii_hexdigit() || ch == ':' || ch == '.'
        })),
        "Class" => TaggedField::Class(value.to_string()),
        "Device" => TaggedField::Device(value.to_string()),
        "NUMANode" => TaggedField::NumaNode(leading_run(value, |ch| ch.is_ascii_digit())),
        _ => return None,
    };

    let empty = match &field {
        TaggedField::Slot(value)
        | TaggedField::Class(value)
        | TaggedField::Device(value)
        | TaggedField::NumaNode(value) => value.is_empty(),
    };
    (!empty).then_some(field)
}

fn leading_run(value: &str, accept: impl Fn(char) -> bool) -> String {
    value.chars().take_while(|&ch| accept(ch)).collect()
}

/// A slot whose Class, Device or NUMANode line was missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseShortfall {
    pub hosts: HostSet,
    pub address: String,
    pub index: usize,
    pub slots: Vec<String>,
    pub classes: Vec<String>,
    pub models: Vec<String>,
    pub numa_nodes: Vec<String>,
}

impl ParseShortfall {
    fn log(&self) {
        error!(
            "  error creating a device record on {} for {} with index {} of the following lists:",
            self.hosts, self.address, self.index
        );
        error!("    - slots:  {:?}", self.slots);
        error!("    - class:  {:?}", self.classes);
        error!("    - device: {:?}", self.models);
        error!("    - numa:   {:?}", self.numa_nodes);
    }
}

/// Pairs the i-th Slot with the i-th Class, Device and NUMANode.
pub fn parse_device_block<S: AsRef<str>>(
    hosts: &HostSet,
    lines: &[S],
) -> Vec<std::result::Result<DeviceRecord, ParseShortfall>> {
    let mut slots = Vec::new();
    let mut classes = Vec::new();
    let mut models = Vec::new();
    let mut numa_nodes = Vec::new();

    for line in lines {
        match tokenize_line(line.as_ref()) {
            Some(TaggedField::Slot(value)) => slots.push(value),
            Some(TaggedField::Class(value)) => classes.push(value),
            Some(TaggedField::Device(value)) => models.push(value),
            Some(TaggedField::NumaNode(value)) => numa_nodes.push(value),
            None => {}
        }
    }

    slots
        .iter()
        .enumerate()
        .map(|(index, address)| {
            match (classes.get(index), models.get(index), numa_nodes.get(index)) {
                (Some(class), Some(model), Some(numa)) => Ok(DeviceRecord::new(
                    address.clone(),
                    class.clone(),
                    model.clone(),
                    numa.clone(),
                    DeviceCategory::Disk,
                )),
                _ => Err(ParseShortfall {
                    hosts: hosts.clone(),
                    address: address.clone(),
                    index,
                    slots: slots.clone(),
                    classes: classes.clone(),
                    models: models.clone(),
                    numa_nodes: numa_nodes.clone(),
                }),
            }
        })
        .collect()
}

/// Regex applied to a device description.
///
/// A leading `-` inverts the filter: matching devices are dropped instead of
/// kept.
#[derive(Debug, Clone)]
pub enum DeviceFilter {
    Include(Regex),
    Exclude(Regex),
}

impl DeviceFilter {
    pub fn parse(filter: &str) -> Result<Self> {
        let (pattern, exclude) = match filter.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (filter, false),
        };
        let regex = Regex::new(pattern).map_err(|source| StorageInventoryError::InvalidFilter {
            filter: filter.to_string(),
            source,
        })?;
        Ok(if exclude {
            DeviceFilter::Exclude(regex)
        } else {
            DeviceFilter::Include(regex)
        })
    }

    /// Empty or missing filters are no-ops.
    pub fn from_option(filter: Option<&str>) -> Result<Option<Self>> {
        filter
            .filter(|value| !value.is_empty())
            .map(Self::parse)
            .transpose()
    }

    pub fn excludes(&self, device: &DeviceRecord) -> bool {
        let description = device.description();
        match self {
            DeviceFilter::Include(regex) => {
                let excluded = !regex.is_match(&description);
                if excluded {
                    debug!(
                        "  excluding device not matching '{}': {device}",
                        regex.as_str()
                    );
                }
                excluded
            }
            DeviceFilter::Exclude(regex) => {
                let excluded = regex.is_match(&description);
                if excluded {
                    debug!("  excluding device matching '{}': {device}", regex.as_str());
                }
                excluded
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParsedDevices {
    pub occurrences: OccurrenceMap,
    pub shortfalls: Vec<ParseShortfall>,
}

/// Builds the device occurrence map for every output group of a discovery
/// command.
pub fn collect_occurrences(
    result: &CommandResult,
    filter: Option<&DeviceFilter>,
) -> ParsedDevices {
    let mut parsed = ParsedDevices::default();

    for group in &result.output {
        for item in parse_device_block(&group.hosts, group.stdout.as_slice()) {
            let device = match item {
                Ok(device) => device,
                Err(shortfall) => {
                    shortfall.log();
                    parsed.shortfalls.push(shortfall);
                    continue;
                }
            };
            if filter.is_some_and(|filter| filter.excludes(&device)) {
                continue;
            }
            parsed.occurrences.record(device, &group.hosts);
        }
    }

    parsed
}
