use std::cell::Cell;
use std::path::PathBuf;

use anyhow::Result;
use fleet_storage_core::{
    set_storage_yaml, CommandResult, DeviceCategory, DeviceFamily, HostSet, OutputGroup,
    RemoteExecutor, ReplayExecutor, StorageInventory, StorageInventoryError,
    CONTROLLER_MAPPING_COMMAND,
};

const NVME_X: &[&str] = &[
    "Slot:\t0000:81:00.0",
    "Class:\tNon-Volatile memory controller",
    "Device:\tNVMe X",
    "NUMANode:\t1",
];

fn fixture_path(name: &str) -> PathBuf {
    // cargo test runs from the package root (crates/core); fixtures live at the
    // workspace root.
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.pop();
    path.pop();
    path.push("fixtures");
    path.push(name);
    path
}

fn hosts(expression: &str) -> HostSet {
    HostSet::parse(expression).expect("valid host set")
}

fn group(expression: &str, lines: &[&str]) -> OutputGroup {
    OutputGroup::new(
        hosts(expression),
        lines.iter().map(|line| line.to_string()).collect(),
    )
}

fn passed(output: Vec<OutputGroup>) -> CommandResult {
    CommandResult {
        passed: true,
        output,
    }
}

fn nvme_only(output: Vec<OutputGroup>) -> ReplayExecutor {
    let mut executor = ReplayExecutor::new();
    executor.record(DeviceFamily::Nvme.discovery_command(), passed(output));
    executor.record(DeviceFamily::Vmd.discovery_command(), passed(Vec::new()));
    executor
}

#[test]
fn identical_nvme_output_yields_one_disk() -> Result<()> {
    let executor = nvme_only(vec![group("h[1-2]", NVME_X)]);
    let mut inventory = StorageInventory::new(executor, &hosts("h[1-2]"));
    inventory.scan(None, None)?;

    let devices = inventory.devices();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].address(), "0000:81:00.0");
    assert_eq!(devices[0].category(), DeviceCategory::Disk);
    Ok(())
}

#[test]
fn per_host_output_is_regrouped_before_reduction() -> Result<()> {
    let executor = nvme_only(vec![group("h1", NVME_X), group("h2", NVME_X)]);
    let mut inventory = StorageInventory::new(executor, &hosts("h[1-2]"));
    inventory.scan(None, Some(DeviceFamily::Nvme))?;
    assert_eq!(inventory.devices().len(), 1);
    Ok(())
}

#[test]
fn device_missing_on_one_host_is_non_homogeneous() {
    let executor = nvme_only(vec![group("h1", NVME_X), group("h2", &[])]);
    let mut inventory = StorageInventory::new(executor, &hosts("h[1-2]"));
    let err = inventory.scan(None, None).unwrap_err();

    assert!(matches!(
        err,
        StorageInventoryError::NonHomogeneous { ref families } if families == "NVMe & VMD"
    ));
    assert!(inventory.devices().is_empty());
}

#[test]
fn exclusion_filter_drops_homogeneous_devices() {
    let executor = nvme_only(vec![group("h[1-2]", NVME_X)]);
    let mut inventory = StorageInventory::new(executor, &hosts("h[1-2]"));
    let err = inventory
        .scan(Some("-NVMe X"), Some(DeviceFamily::Nvme))
        .unwrap_err();
    assert!(matches!(
        err,
        StorageInventoryError::NonHomogeneous { ref families } if families == "NVMe"
    ));
}

#[test]
fn inclusion_filter_keeps_matching_devices() -> Result<()> {
    let executor = nvme_only(vec![group("h[1-2]", NVME_X)]);
    let mut inventory = StorageInventory::new(executor, &hosts("h[1-2]"));
    inventory.scan(Some("NVMe X$"), None)?;
    assert_eq!(inventory.devices().len(), 1);
    Ok(())
}

#[test]
fn numa_mismatch_is_not_homogeneous() {
    let other_numa = [NVME_X[0], NVME_X[1], NVME_X[2], "NUMANode:\t0"];
    let executor = nvme_only(vec![group("h1", NVME_X), group("h2", &other_numa)]);
    let mut inventory = StorageInventory::new(executor, &hosts("h[1-2]"));
    assert!(inventory.scan(None, None).is_err());
}

#[test]
fn shortfalls_are_reported_without_failing_the_scan() -> Result<()> {
    let mut truncated = NVME_X.to_vec();
    truncated.push("Slot:\t0000:82:00.0");
    let executor = nvme_only(vec![group("h[1-2]", &truncated)]);
    let mut inventory = StorageInventory::new(executor, &hosts("h[1-2]"));
    inventory.scan(None, None)?;

    assert_eq!(inventory.devices().len(), 1);
    assert_eq!(inventory.diagnostics().len(), 1);
    assert_eq!(inventory.diagnostics()[0].address, "0000:82:00.0");
    Ok(())
}

#[test]
fn vmd_controllers_are_promoted_only_when_mapped() -> Result<()> {
    let executor = ReplayExecutor::from_path(&fixture_path("replay-vmd-pair.json"))?;
    let mut inventory = StorageInventory::new(executor, &hosts("wolf-[1-2]"));
    inventory.scan(None, None)?;

    let summary = inventory
        .devices()
        .iter()
        .map(|device| (device.address(), device.category()))
        .collect::<Vec<_>>();
    assert_eq!(
        summary,
        vec![
            ("0000:81:00.0", DeviceCategory::Disk),
            ("0000:5d:05.5", DeviceCategory::Controller),
        ]
    );
    assert!(!inventory
        .devices()
        .iter()
        .any(|device| device.address() == "0000:ae:05.5"));
    Ok(())
}

#[test]
fn controller_mapping_lists_disks_per_controller() -> Result<()> {
    let executor = ReplayExecutor::from_path(&fixture_path("replay-vmd-pair.json"))?;
    let inventory = StorageInventory::new(executor, &hosts("wolf-[1-2]"));
    let controllers = inventory.get_controller_mapping()?;
    assert_eq!(controllers.len(), 1);
    assert_eq!(controllers["0000:5d:05.5"], vec!["10000:01:00.0".to_string()]);
    Ok(())
}

#[test]
fn unmapped_vmd_devices_fail_the_vmd_scan() {
    let mut executor = ReplayExecutor::new();
    executor.record(
        DeviceFamily::Vmd.discovery_command(),
        passed(vec![group(
            "h[1-2]",
            &[
                "Slot:\t0000:5d:05.5",
                "Class:\tRAID bus controller",
                "Device:\tVolume Management Device NVMe RAID Controller",
                "NUMANode:\t0",
            ],
        )]),
    );
    executor.record(CONTROLLER_MAPPING_COMMAND, passed(vec![group("h[1-2]", &[])]));

    let mut inventory = StorageInventory::new(executor, &hosts("h[1-2]"));
    let err = inventory.scan(None, Some(DeviceFamily::Vmd)).unwrap_err();
    assert!(matches!(
        err,
        StorageInventoryError::NonHomogeneousControllers
    ));
    assert!(inventory.devices().is_empty());
}

/// Serves `healthy` until `failing` is switched on, then serves `broken`.
struct SwitchingExecutor {
    healthy: ReplayExecutor,
    broken: ReplayExecutor,
    failing: Cell<bool>,
}

impl RemoteExecutor for SwitchingExecutor {
    fn run(&self, hosts: &HostSet, command: &str) -> fleet_storage_core::Result<CommandResult> {
        if self.failing.get() {
            self.broken.run(hosts, command)
        } else {
            self.healthy.run(hosts, command)
        }
    }
}

fn failed_on_h2() -> CommandResult {
    CommandResult {
        passed: false,
        output: vec![
            group("h1", &[]),
            OutputGroup {
                hosts: hosts("h2"),
                stdout: Vec::new(),
                exit_status: Some(255),
            },
        ],
    }
}

#[test]
fn failed_discovery_command_is_terminal_and_clears_inventory() -> Result<()> {
    let mut broken = nvme_only(vec![group("h[1-2]", NVME_X)]);
    broken.record(DeviceFamily::Vmd.discovery_command(), failed_on_h2());
    let executor = SwitchingExecutor {
        healthy: nvme_only(vec![group("h[1-2]", NVME_X)]),
        broken,
        failing: Cell::new(false),
    };

    let mut inventory = StorageInventory::new(&executor, &hosts("h[1-2]"));
    inventory.scan(None, None)?;
    assert_eq!(inventory.devices().len(), 1);

    executor.failing.set(true);
    let err = inventory.scan(None, None).unwrap_err();
    assert!(matches!(
        err,
        StorageInventoryError::CommandFailure { ref hosts, .. } if hosts == "h2"
    ));
    assert!(inventory.devices().is_empty());
    Ok(())
}

#[test]
fn failed_controller_mapping_command_fails_the_scan() {
    let mut executor = nvme_only(vec![group("h[1-2]", NVME_X)]);
    executor.record(
        DeviceFamily::Vmd.discovery_command(),
        passed(vec![group(
            "h[1-2]",
            &[
                "Slot:\t0000:5d:05.5",
                "Class:\tRAID bus controller",
                "Device:\tVolume Management Device NVMe RAID Controller",
                "NUMANode:\t0",
            ],
        )]),
    );
    executor.record(CONTROLLER_MAPPING_COMMAND, failed_on_h2());

    let mut inventory = StorageInventory::new(executor, &hosts("h[1-2]"));
    let err = inventory.scan(None, None).unwrap_err();
    assert!(matches!(
        err,
        StorageInventoryError::CommandFailure { ref command, ref hosts }
            if command == CONTROLLER_MAPPING_COMMAND && hosts == "h2"
    ));
    assert!(inventory.devices().is_empty());
}

#[test]
fn device_queries_outside_a_scan_leave_diagnostics_alone() -> Result<()> {
    let mut truncated = NVME_X.to_vec();
    truncated.push("Slot:\t0000:82:00.0");
    let executor = nvme_only(vec![group("h[1-2]", &truncated)]);
    let mut inventory = StorageInventory::new(executor, &hosts("h[1-2]"));

    for _ in 0..3 {
        let found = inventory.get_device_information(DeviceFamily::Nvme, None)?;
        assert_eq!(found.len(), 1);
    }
    assert!(inventory.diagnostics().is_empty());

    inventory.scan(None, None)?;
    inventory.scan(None, None)?;
    assert_eq!(inventory.diagnostics().len(), 1);
    Ok(())
}

#[test]
fn pmem_storage_yaml_and_invalid_tier_type() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("storage.yaml");
    set_storage_yaml(&path, 1, 2, "pmem", None)?;

    let written = std::fs::read_to_string(&path)?;
    let lines = written.lines().collect::<Vec<_>>();
    let tier_zero = lines.iter().position(|line| *line == "        0:").unwrap();
    let tier_one = lines.iter().position(|line| *line == "        1:").unwrap();
    assert_eq!(lines[tier_zero + 1], "          class: dcpm");
    assert!(lines[tier_zero..tier_one].contains(&"          scm_mount: /mnt/daos0"));
    assert_eq!(lines[tier_one + 1], "          class: nvme");

    let bogus = dir.path().join("bogus.yaml");
    let err = set_storage_yaml(&bogus, 1, 2, "bogus", None).unwrap_err();
    assert!(matches!(
        err,
        StorageInventoryError::InvalidConfiguration { .. }
    ));
    assert!(!bogus.exists());
    Ok(())
}
