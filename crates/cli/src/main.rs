use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::ArgAction;
use clap::{Args, Parser, Subcommand, ValueEnum};
use fleet_storage_core::{
    load_report, render_markdown_summary, run_inventory_scan, write_report, write_storage_yaml,
    DeviceFamily, HostSet, InventoryReport, ReplayExecutor, ScanOptions, SshExecutor, SshOptions,
    StorageYamlOptions, TierType, DEFAULT_SCM_SIZE,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "fleet-storage",
    version,
    about = "Find the NVMe disks and VMD controllers present identically on every host."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scan hosts for homogeneous NVMe/VMD devices and emit a JSON report.
    Scan(ScanArgs),
    /// Print the devices recorded in an existing report.
    Show(ShowArgs),
    /// Write the server_config storage tier section.
    StorageYaml(StorageYamlArgs),
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum CliFamily {
    Nvme,
    Vmd,
}

impl From<CliFamily> for DeviceFamily {
    fn from(value: CliFamily) -> Self {
        match value {
            CliFamily::Nvme => DeviceFamily::Nvme,
            CliFamily::Vmd => DeviceFamily::Vmd,
        }
    }
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum CliTierType {
    Pmem,
    #[value(name = "md_on_ssd", alias = "md-on-ssd")]
    MdOnSsd,
}

impl From<CliTierType> for TierType {
    fn from(value: CliTierType) -> Self {
        match value {
            CliTierType::Pmem => TierType::Pmem,
            CliTierType::MdOnSsd => TierType::MdOnSsd,
        }
    }
}

#[derive(Debug, Args)]
struct ScanArgs {
    /// Hosts to scan as a node set, e.g. `wolf-[1-4],boro-2`.
    #[arg(long, value_name = "NODESET")]
    hosts: String,

    /// Regex matched against "<class>: <device>"; prefix with `-` to exclude matches.
    #[arg(long, allow_hyphen_values = true)]
    filter: Option<String>,

    /// Restrict the scan to one device family.
    #[arg(long)]
    family: Option<CliFamily>,

    /// Serve command output from a replay fixture instead of ssh.
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// ssh binary used to reach the hosts.
    #[arg(long, default_value = "ssh")]
    ssh_program: String,

    /// ssh ConnectTimeout in seconds.
    #[arg(long, default_value_t = 10, value_name = "SECONDS")]
    connect_timeout: u64,

    /// Seconds a host may take to finish the remote command before it is killed.
    #[arg(long, default_value_t = 120, value_name = "SECONDS")]
    command_timeout: u64,

    /// Extra argument passed to ssh before the host (repeatable).
    #[arg(
        long = "ssh-arg",
        value_name = "ARG",
        action = ArgAction::Append,
        allow_hyphen_values = true
    )]
    ssh_args: Vec<String>,

    /// Output report path.
    #[arg(long, default_value = "fleet-storage-report.json", value_name = "FILE")]
    output: PathBuf,

    /// Optional markdown summary output file.
    #[arg(long, value_name = "FILE")]
    md: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ShowArgs {
    /// Input report file.
    #[arg(long, value_name = "FILE")]
    report: PathBuf,

    /// Optional markdown summary output file.
    #[arg(long, value_name = "FILE")]
    md: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct StorageYamlArgs {
    /// File to write the storage section to.
    #[arg(long, value_name = "FILE")]
    output: PathBuf,

    /// Number of engines.
    #[arg(long, default_value_t = 1)]
    engines: usize,

    /// Storage tiers per engine.
    #[arg(long, default_value_t = 2)]
    tiers: usize,

    /// Storage type for tier 0.
    #[arg(long)]
    tier_type: CliTierType,

    /// scm_size used by ram tiers.
    #[arg(long, default_value_t = DEFAULT_SCM_SIZE)]
    scm_size: u64,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan(args) => run_scan_command(args),
        Commands::Show(args) => run_show_command(args),
        Commands::StorageYaml(args) => run_storage_yaml_command(args),
    }
}

fn run_scan_command(args: ScanArgs) -> Result<()> {
    let ScanArgs {
        hosts,
        filter,
        family,
        replay,
        ssh_program,
        connect_timeout,
        command_timeout,
        ssh_args,
        output,
        md,
    } = args;

    let hosts = HostSet::parse(&hosts).with_context(|| format!("invalid --hosts '{hosts}'"))?;
    let options = ScanOptions {
        hosts,
        device_filter: filter,
        family: family.map(Into::into),
        scan_id: None,
    };

    let report = match replay {
        Some(path) => {
            info!("Replaying recorded command output from {}", path.display());
            run_inventory_scan(ReplayExecutor::from_path(&path)?, &options)?
        }
        None => {
            let executor = SshExecutor::new(SshOptions {
                program: ssh_program,
                connect_timeout_secs: connect_timeout,
                command_timeout_secs: command_timeout,
                extra_args: ssh_args,
                ..SshOptions::default()
            });
            run_inventory_scan(executor, &options)?
        }
    };

    write_report(&report, &output)?;
    println!("Report written to {}", output.display());
    print_devices(&report);

    if let Some(md_path) = md {
        write_markdown(&report, &md_path)?;
    }
    Ok(())
}

fn run_show_command(args: ShowArgs) -> Result<()> {
    let report = load_report(&args.report)?;
    print_devices(&report);
    if let Some(md_path) = args.md {
        write_markdown(&report, &md_path)?;
    }
    Ok(())
}

fn run_storage_yaml_command(args: StorageYamlArgs) -> Result<()> {
    let options = StorageYamlOptions {
        engines: args.engines,
        tiers: args.tiers,
        tier_type: args.tier_type.into(),
        scm_size: args.scm_size,
    };
    write_storage_yaml(&args.output, &options)?;
    println!(
        "Storage section ({} engine(s), {} tier(s), {}) written to {}",
        options.engines,
        options.tiers,
        options.tier_type,
        args.output.display()
    );
    Ok(())
}

fn print_devices(report: &InventoryReport) {
    println!(
        "{} host(s), {} disk(s), {} controller(s), {} parse diagnostic(s).",
        report.hosts.len(),
        report.disk_count(),
        report.controller_count(),
        report.diagnostics.len()
    );
    for device in &report.devices {
        println!(
            "- {} [{:?}] {}: {} numa={}",
            device.address, device.category, device.storage_class, device.model, device.numa_node
        );
    }
}

fn write_markdown(report: &InventoryReport, md_path: &Path) -> Result<()> {
    let markdown = render_markdown_summary(report);
    fs::write(md_path, markdown)
        .with_context(|| format!("failed to write markdown summary to {}", md_path.display()))?;
    println!("Markdown summary written to {}", md_path.display());
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
