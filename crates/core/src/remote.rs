use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use crate::error::{Result, StorageInventoryError};
use crate::hosts::HostSet;

/// Runs one shell command on every host of a set.
///
/// Implementations own any parallel fan-out and must only return once every
/// host has answered or timed out.
pub trait RemoteExecutor {
    fn run(&self, hosts: &HostSet, command: &str) -> Result<CommandResult>;
}

impl<E: RemoteExecutor + ?Sized> RemoteExecutor for &E {
    fn run(&self, hosts: &HostSet, command: &str) -> Result<CommandResult> {
        (**self).run(hosts, command)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputGroup {
    pub hosts: HostSet,
    #[serde(default)]
    pub stdout: Vec<String>,
    #[serde(default = "default_exit_status")]
    pub exit_status: Option<i32>,
}

fn default_exit_status() -> Option<i32> {
    Some(0)
}

impl OutputGroup {
    pub fn new(hosts: HostSet, stdout: Vec<String>) -> Self {
        Self {
            hosts,
            stdout,
            exit_status: Some(0),
        }
    }

    pub fn joined_stdout(&self) -> String {
        self.stdout.join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub passed: bool,
    #[serde(default)]
    pub output: Vec<OutputGroup>,
}

impl CommandResult {
    pub fn failed_on(hosts: &HostSet) -> Self {
        Self {
            passed: false,
            output: vec![OutputGroup {
                hosts: hosts.clone(),
                stdout: Vec::new(),
                exit_status: None,
            }],
        }
    }

    /// Hosts that reported a non-zero or missing exit status.
    pub fn failed_hosts(&self) -> HostSet {
        let mut failed = HostSet::new();
        for group in &self.output {
            if group.exit_status != Some(0) {
                failed.update(&group.hosts);
            }
        }
        failed
    }

    /// Merges groups whose stdout and exit status are byte-identical.
    ///
    /// Group order follows the first host group that produced each output.
    pub fn regroup(self) -> Self {
        let mut order: Vec<OutputGroup> = Vec::new();
        let mut index_by_digest: HashMap<blake3::Hash, usize> = HashMap::new();

        for group in self.output {
            let digest = output_digest(&group);
            match index_by_digest.get(&digest) {
                Some(&index) => order[index].hosts.update(&group.hosts),
                None => {
                    index_by_digest.insert(digest, order.len());
                    order.push(group);
                }
            }
        }

        Self {
            passed: self.passed,
            output: order,
        }
    }
}

fn output_digest(group: &OutputGroup) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&group.exit_status.unwrap_or(i32::MIN).to_le_bytes());
    for line in &group.stdout {
        hasher.update(&(line.len() as u64).to_le_bytes());
        hasher.update(line.as_bytes());
    }
    hasher.finalize()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshOptions {
    #[serde(default = "default_ssh_program")]
    pub program: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Wall-clock limit for the whole remote command. Hosts that run past it
    /// are killed and reported without an exit status.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_server_alive_interval_secs")]
    pub server_alive_interval_secs: u64,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_ssh_program() -> String {
    "ssh".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_command_timeout_secs() -> u64 {
    120
}

fn default_server_alive_interval_secs() -> u64 {
    15
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            program: default_ssh_program(),
            connect_timeout_secs: default_connect_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            server_alive_interval_secs: default_server_alive_interval_secs(),
            extra_args: Vec::new(),
        }
    }
}

/// Fans a command out over ssh with one thread per host.
#[derive(Debug, Clone, Default)]
pub struct SshExecutor {
    options: SshOptions,
}

impl SshExecutor {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    fn build_command(&self, host: &str, command: &str) -> Command {
        let mut process = Command::new(&self.options.program);
        process
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                self.options.connect_timeout_secs
            ))
            .arg("-o")
            .arg(format!(
                "ServerAliveInterval={}",
                self.options.server_alive_interval_secs
            ))
            .args(&self.options.extra_args)
            .arg(host)
            .arg(command);
        process
    }

    fn run_on_host(&self, host: &str, command: &str) -> Result<OutputGroup> {
        let mut child = self
            .build_command(host, command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                StorageInventoryError::Executor(format!(
                    "failed to spawn {} for {host}: {err}",
                    self.options.program
                ))
            })?;
        let stdout_reader = child.stdout.take().map(drain);
        let stderr_reader = child.stderr.take().map(drain);

        let limit = Duration::from_secs(self.options.command_timeout_secs);
        let waited = child.wait_timeout(limit).map_err(|err| {
            StorageInventoryError::Executor(format!("failed to wait on {host}: {err}"))
        })?;
        let Some(status) = waited else {
            warn!(
                "{host}: no answer within {}s, killing {}",
                self.options.command_timeout_secs, self.options.program
            );
            let _ = child.kill();
            let _ = child.wait();
            // Readers are left detached: a grandchild may still hold the pipes.
            return Ok(OutputGroup {
                hosts: HostSet::from_iter([host]),
                stdout: Vec::new(),
                exit_status: None,
            });
        };

        let stdout = String::from_utf8_lossy(&collect(stdout_reader))
            .lines()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let status = status.code();
        if status != Some(0) {
            debug!(
                "{host}: exit status {:?}: {}",
                status,
                String::from_utf8_lossy(&collect(stderr_reader)).trim()
            );
        }

        Ok(OutputGroup {
            hosts: HostSet::from_iter([host]),
            stdout,
            exit_status: status,
        })
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = pipe.read_to_end(&mut buffer);
        buffer
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

impl RemoteExecutor for SshExecutor {
    fn run(&self, hosts: &HostSet, command: &str) -> Result<CommandResult> {
        info!("Running on {hosts}: {command}");
        let per_host = thread::scope(|scope| {
            let handles = hosts
                .iter()
                .map(|host| scope.spawn(move || self.run_on_host(host, command)))
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(StorageInventoryError::Executor(
                            "ssh worker thread panicked".to_string(),
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let passed = per_host.iter().all(|group| group.exit_status == Some(0));
        Ok(CommandResult {
            passed,
            output: per_host,
        }
        .regroup())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayFixture {
    pub commands: Vec<ReplayEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayEntry {
    pub command: String,
    #[serde(flatten)]
    pub result: CommandResult,
}

/// Serves recorded command results instead of contacting hosts.
///
/// Commands without a recording fail on every requested host.
#[derive(Debug, Clone, Default)]
pub struct ReplayExecutor {
    results: HashMap<String, CommandResult>,
}

impl ReplayExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: ReplayFixture) -> Self {
        let mut executor = Self::new();
        for entry in fixture.commands {
            executor.record(entry.command, entry.result);
        }
        executor
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let fixture: ReplayFixture = serde_json::from_str(json)?;
        Ok(Self::from_fixture(fixture))
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read replay fixture {}", path.display()))?;
        Self::from_json(&data)
            .with_context(|| format!("failed to parse replay fixture {}", path.display()))
    }

    pub fn record(&mut self, command: impl Into<String>, result: CommandResult) {
        self.results.insert(command.into(), result);
    }
}

impl RemoteExecutor for ReplayExecutor {
    fn run(&self, hosts: &HostSet, command: &str) -> Result<CommandResult> {
        match self.results.get(command) {
            Some(result) => Ok(result.clone().regroup()),
            None => {
                debug!("no recorded result for '{command}'");
                Ok(CommandResult::failed_on(hosts))
            }
        }
    }
}
