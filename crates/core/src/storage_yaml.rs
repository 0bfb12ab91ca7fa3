use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{Result, StorageInventoryError};

pub const DEFAULT_SCM_SIZE: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierType {
    Pmem,
    MdOnSsd,
}

impl TierType {
    pub fn keyword(self) -> &'static str {
        match self {
            TierType::Pmem => "pmem",
            TierType::MdOnSsd => "md_on_ssd",
        }
    }
}

impl fmt::Display for TierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for TierType {
    type Err = StorageInventoryError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "pmem" => Ok(TierType::Pmem),
            "md_on_ssd" => Ok(TierType::MdOnSsd),
            other => Err(StorageInventoryError::InvalidConfiguration {
                tier_type: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageYamlOptions {
    pub engines: usize,
    pub tiers: usize,
    pub tier_type: TierType,
    #[serde(default = "default_scm_size")]
    pub scm_size: u64,
}

fn default_scm_size() -> u64 {
    DEFAULT_SCM_SIZE
}

/// Renders the `server_config` storage section, one tier list per engine.
///
/// Tier 0 is the SCM tier (`dcpm` for pmem, `ram` for md_on_ssd); every other
/// tier is an empty `nvme` bdev tier.
pub fn render_storage_yaml(options: &StorageYamlOptions) -> Vec<String> {
    let mut lines = vec!["server_config:".to_string(), "  engines:".to_string()];
    for engine in 0..options.engines {
        lines.push(format!("    {engine}:"));
        lines.push("      storage:".to_string());
        for tier in 0..options.tiers {
            lines.push(format!("        {tier}:"));
            match (tier, options.tier_type) {
                (0, TierType::Pmem) => {
                    lines.push("          class: dcpm".to_string());
                    lines.push(format!("          scm_list: [\"/dev/pmem{engine}\"]"));
                    lines.push(format!("          scm_mount: /mnt/daos{engine}"));
                }
                (0, TierType::MdOnSsd) => {
                    lines.push("          class: ram".to_string());
                    lines.push("          scm_list: None".to_string());
                    lines.push(format!("          scm_mount: /mnt/daos{engine}"));
                    lines.push(format!("          scm_size: {}", options.scm_size));
                }
                _ => {
                    lines.push("          class: nvme".to_string());
                    lines.push("          bdev_list: []".to_string());
                }
            }
        }
    }
    lines
}

/// Validates `tier_type` and writes the storage section to `path`.
///
/// An unknown tier type fails before the file is created.
pub fn set_storage_yaml(
    path: impl AsRef<Path>,
    engines: usize,
    tiers: usize,
    tier_type: &str,
    scm_size: Option<u64>,
) -> Result<()> {
    let tier_type = tier_type.parse::<TierType>().map_err(|err| {
        error!("{err}");
        err
    })?;
    write_storage_yaml(
        path,
        &StorageYamlOptions {
            engines,
            tiers,
            tier_type,
            scm_size: scm_size.unwrap_or(DEFAULT_SCM_SIZE),
        },
    )
}

pub fn write_storage_yaml(path: impl AsRef<Path>, options: &StorageYamlOptions) -> Result<()> {
    let path = path.as_ref();
    let mut payload = render_storage_yaml(options).join("\n");
    payload.push('\n');
    debug!("Writing {} storage tiers to {}", options.tier_type, path.display());
    fs::write(path, payload).map_err(|source| {
        let err = StorageInventoryError::Io {
            path: path.to_path_buf(),
            source,
        };
        error!("{err}");
        err
    })
}
