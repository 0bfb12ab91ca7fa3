use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageInventoryError>;

#[derive(Debug, Error)]
pub enum StorageInventoryError {
    #[error("Error issuing command '{command}' on {hosts}")]
    CommandFailure { command: String, hosts: String },

    #[error("Error: Non-homogeneous {families} PCI addresses.")]
    NonHomogeneous { families: String },

    #[error("Error: Non-homogeneous NVMe device behind VMD addresses.")]
    NonHomogeneousControllers,

    #[error("Error: Invalid storage type '{tier_type}'")]
    InvalidConfiguration { tier_type: String },

    #[error("invalid device filter '{filter}': {source}")]
    InvalidFilter {
        filter: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid host set '{expression}': {reason}")]
    InvalidHostSet { expression: String, reason: String },

    #[error("remote executor failed: {0}")]
    Executor(String),

    #[error("Error writing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
