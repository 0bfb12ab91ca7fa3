use std::fs;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::{DeviceCategory, DeviceRecord};
use crate::hosts::HostSet;
use crate::inventory::{DeviceFamily, StorageInventory};
use crate::parse::ParseShortfall;
use crate::remote::RemoteExecutor;

pub const REPORT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub hosts: HostSet,
    pub device_filter: Option<String>,
    pub family: Option<DeviceFamily>,
    pub scan_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryReport {
    pub report_version: String,
    pub generated_at: String,
    #[serde(default = "default_scan_id")]
    pub scan_id: String,
    pub hosts: HostSet,
    #[serde(default)]
    pub device_filter: Option<String>,
    #[serde(default)]
    pub family: Option<DeviceFamily>,
    #[serde(default)]
    pub elapsed_ms: u64,
    pub devices: Vec<DeviceEntry>,
    #[serde(default)]
    pub diagnostics: Vec<ParseShortfall>,
}

fn default_scan_id() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceEntry {
    pub address: String,
    pub storage_class: String,
    pub model: String,
    pub numa_node: String,
    pub category: DeviceCategory,
}

impl From<&DeviceRecord> for DeviceEntry {
    fn from(device: &DeviceRecord) -> Self {
        Self {
            address: device.address().to_string(),
            storage_class: device.storage_class().to_string(),
            model: device.model().to_string(),
            numa_node: device.numa_node().to_string(),
            category: device.category(),
        }
    }
}

impl InventoryReport {
    pub fn disk_count(&self) -> usize {
        self.count(DeviceCategory::Disk)
    }

    pub fn controller_count(&self) -> usize {
        self.count(DeviceCategory::Controller)
    }

    fn count(&self, category: DeviceCategory) -> usize {
        self.devices
            .iter()
            .filter(|device| device.category == category)
            .count()
    }
}

/// Scans `options.hosts` through `executor` and snapshots the result.
pub fn run_inventory_scan<E: RemoteExecutor>(
    executor: E,
    options: &ScanOptions,
) -> Result<InventoryReport> {
    let started = Instant::now();
    let scan_id = options
        .scan_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut inventory = StorageInventory::new(executor, &options.hosts);
    inventory
        .scan(options.device_filter.as_deref(), options.family)
        .with_context(|| format!("storage scan of {} failed", options.hosts))?;

    Ok(InventoryReport {
        report_version: REPORT_VERSION.to_string(),
        generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        scan_id,
        hosts: options.hosts.clone(),
        device_filter: options.device_filter.clone(),
        family: options.family,
        elapsed_ms: started.elapsed().as_millis() as u64,
        devices: inventory.devices().iter().map(DeviceEntry::from).collect(),
        diagnostics: inventory.diagnostics().to_vec(),
    })
}

pub fn write_report(report: &InventoryReport, output_path: impl AsRef<Path>) -> Result<()> {
    let path = output_path.as_ref();
    let payload = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    fs::write(path, payload)
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    Ok(())
}

pub fn load_report(path: impl AsRef<Path>) -> Result<InventoryReport> {
    let path = path.as_ref();
    let data =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
}
