use std::collections::BTreeMap;

use crate::device::DeviceCategory;
use crate::report::InventoryReport;

pub fn render_markdown_summary(report: &InventoryReport) -> String {
    let mut out = String::new();
    out.push_str("# Fleet Storage Inventory\n\n");
    out.push_str(&format!(
        "- Report version: `{}`\n- Generated at: `{}`\n- Scan id: `{}`\n- Hosts ({}): `{}`\n- Scan elapsed: `{} ms`\n",
        report.report_version,
        report.generated_at,
        report.scan_id,
        report.hosts.len(),
        report.hosts,
        report.elapsed_ms
    ));
    if let Some(filter) = &report.device_filter {
        out.push_str(&format!("- Device filter: `{}`\n", filter));
    }
    if let Some(family) = report.family {
        out.push_str(&format!("- Family: `{}`\n", family));
    }
    out.push('\n');

    render_category(
        &mut out,
        report,
        DeviceCategory::Disk,
        "## NVMe Disks\n\n",
        "No homogeneous NVMe disks.\n\n",
    );
    render_category(
        &mut out,
        report,
        DeviceCategory::Controller,
        "## VMD Controllers\n\n",
        "No homogeneous VMD controllers.\n\n",
    );

    let mut by_numa: BTreeMap<&str, usize> = BTreeMap::new();
    for device in &report.devices {
        *by_numa.entry(device.numa_node.as_str()).or_insert(0) += 1;
    }
    if !by_numa.is_empty() {
        out.push_str("## NUMA Placement\n\n");
        for (numa_node, count) in by_numa {
            out.push_str(&format!("- node `{}`: {} device(s)\n", numa_node, count));
        }
        out.push('\n');
    }

    if !report.diagnostics.is_empty() {
        out.push_str("## Parse Diagnostics\n\n");
        for shortfall in &report.diagnostics {
            out.push_str(&format!(
                "- `{}` (index {}) on `{}`: slots {}, class {}, device {}, numa {}\n",
                shortfall.address,
                shortfall.index,
                shortfall.hosts,
                shortfall.slots.len(),
                shortfall.classes.len(),
                shortfall.models.len(),
                shortfall.numa_nodes.len()
            ));
        }
    }

    out
}

fn render_category(
    out: &mut String,
    report: &InventoryReport,
    category: DeviceCategory,
    heading: &str,
    empty: &str,
) {
    out.push_str(heading);
    let mut any = false;
    for device in report
        .devices
        .iter()
        .filter(|device| device.category == category)
    {
        any = true;
        out.push_str(&format!(
            "- `{}` {}: {} (NUMA {})\n",
            device.address, device.storage_class, device.model, device.numa_node
        ));
    }
    if any {
        out.push('\n');
    } else {
        out.push_str(empty);
    }
}
