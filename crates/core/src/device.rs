use std::fmt;
use std::hash::{Hash, Hasher};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static PCI_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{4,5}:[0-9a-fA-F]{2}:[0-9a-fA-F]{2}\.[0-9a-fA-F]")
        .expect("PCI address pattern compiles")
});

const KEY_SEPARATOR: &str = "\u{1f}";

/// Every PCI address (`dddd:bb:ss.f`, with a 4 or 5 digit domain) in `value`.
pub fn find_pci_addresses(value: &str) -> Vec<String> {
    PCI_ADDRESS
        .find_iter(value)
        .map(|found| found.as_str().to_string())
        .collect()
}

pub fn is_pci_address(value: &str) -> bool {
    PCI_ADDRESS
        .find(value)
        .is_some_and(|found| found.start() == 0 && found.end() == value.len())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCategory {
    #[default]
    Disk,
    Controller,
}

impl fmt::Display for DeviceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceCategory::Disk => f.write_str("disk"),
            DeviceCategory::Controller => f.write_str("controller"),
        }
    }
}

/// One PCI storage device as reported by `lspci -vmm -D`.
///
/// Identity is the address, class, model and NUMA node. The category is a
/// classification applied after discovery and does not take part in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    address: String,
    storage_class: String,
    model: String,
    numa_node: String,
    category: DeviceCategory,
}

impl DeviceRecord {
    pub fn new(
        address: impl Into<String>,
        storage_class: impl Into<String>,
        model: impl Into<String>,
        numa_node: impl Into<String>,
        category: DeviceCategory,
    ) -> Self {
        Self {
            address: address.into(),
            storage_class: storage_class.into(),
            model: model.into(),
            numa_node: numa_node.into(),
            category,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn storage_class(&self) -> &str {
        &self.storage_class
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn numa_node(&self) -> &str {
        &self.numa_node
    }

    pub fn category(&self) -> DeviceCategory {
        self.category
    }

    /// `"{class}: {model}"`, the text device filters are matched against.
    pub fn description(&self) -> String {
        format!("{}: {}", self.storage_class, self.model)
    }

    pub fn with_category(&self, category: DeviceCategory) -> Self {
        Self {
            category,
            ..self.clone()
        }
    }

    pub(crate) fn identity_key(&self) -> String {
        [
            self.address.as_str(),
            self.storage_class.as_str(),
            self.model.as_str(),
            self.numa_node.as_str(),
        ]
        .join(KEY_SEPARATOR)
    }
}

impl fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {}",
            self.address,
            self.description(),
            self.numa_node
        )
    }
}

impl PartialEq for DeviceRecord {
    fn eq(&self, other: &Self) -> bool {
        self.identity_key() == other.identity_key()
    }
}

impl Eq for DeviceRecord {}

impl Hash for DeviceRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity_key().hash(state);
    }
}
