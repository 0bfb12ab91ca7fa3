pub mod controller;
pub mod device;
pub mod error;
pub mod hosts;
pub mod inventory;
pub mod markdown;
pub mod occurrence;
pub mod parse;
pub mod remote;
pub mod report;
pub mod storage_yaml;

pub use controller::{parse_controller_link, ControllerLink, ControllerMapping};
pub use device::{find_pci_addresses, is_pci_address, DeviceCategory, DeviceRecord};
pub use error::{Result, StorageInventoryError};
pub use hosts::{HostSet, MAX_EXPANDED_HOSTS};
pub use inventory::{DeviceFamily, StorageInventory, CONTROLLER_MAPPING_COMMAND};
pub use markdown::render_markdown_summary;
pub use occurrence::{reduce_homogeneous, OccurrenceMap};
pub use parse::{
    collect_occurrences, parse_device_block, tokenize_line, DeviceFilter, ParseShortfall,
    ParsedDevices, TaggedField,
};
pub use remote::{
    CommandResult, OutputGroup, RemoteExecutor, ReplayEntry, ReplayExecutor, ReplayFixture,
    SshExecutor, SshOptions,
};
pub use report::{
    load_report, run_inventory_scan, write_report, DeviceEntry, InventoryReport, ScanOptions,
    REPORT_VERSION,
};
pub use storage_yaml::{
    render_storage_yaml, set_storage_yaml, write_storage_yaml, StorageYamlOptions, TierType,
    DEFAULT_SCM_SIZE,
};
