//! Remote command fan-out and log location resolution.
//!
//! `SshExecutor` runs one command on every host concurrently (one thread per
//! host) and gathers the results over a crossbeam channel. The call blocks
//! until every host has answered; results come back in the caller's host order.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;

use crossbeam_channel as channel;

use crate::core::config::{LogsConfig, RemoteConfig};
use crate::core::errors::{PxhError, Result};

/// A command to run on remote hosts, kept structured until it is rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl RemoteCommand {
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `grep -- <pattern> <path>`: every line of `path` containing `pattern`.
    #[must_use]
    pub fn grep(pattern: &str, path: &Path) -> Self {
        Self::new(
            "grep",
            vec![
                "--".to_string(),
                pattern.to_string(),
                path.to_string_lossy().into_owned(),
            ],
        )
    }

    /// Single shell-safe command line.
    #[must_use]
    pub fn render(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./=:,+@%".contains(&b));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// What one host returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOutput {
    pub host: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs a command across a set of hosts.
///
/// Implementations report every host's exit code as-is; deciding which codes
/// are acceptable is the caller's job. `Err` is reserved for failing to run
/// the command at all.
pub trait RemoteExecutor: Send + Sync {
    fn run(&self, hosts: &[String], command: &RemoteCommand) -> Result<Vec<HostOutput>>;
}

/// Maps a logical log name to the path to search on each host.
pub trait LogLocator: Send + Sync {
    fn resolve(&self, name: &str) -> PathBuf;
}

/// Resolves log names relative to one directory; absolute names pass through.
#[derive(Debug, Clone)]
pub struct DirLogLocator {
    dir: PathBuf,
}

impl DirLogLocator {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn from_config(config: &LogsConfig) -> Self {
        Self::new(config.log_dir.clone())
    }
}

impl LogLocator for DirLogLocator {
    fn resolve(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dir.join(path)
        }
    }
}

/// Executes over `ssh`, or directly through `sh -c` for `localhost`.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    ssh_bin: String,
    connect_timeout_secs: u64,
}

impl SshExecutor {
    #[must_use]
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            ssh_bin: config.ssh_bin.clone(),
            connect_timeout_secs: config.connect_timeout_secs,
        }
    }

    fn command_for(&self, host: &str, rendered: &str) -> Command {
        if is_local(host) {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(rendered);
            cmd
        } else {
            let mut cmd = Command::new(&self.ssh_bin);
            cmd.arg("-o")
                .arg("BatchMode=yes")
                .arg("-o")
                .arg(format!("ConnectTimeout={}", self.connect_timeout_secs))
                .arg(host)
                .arg(rendered);
            cmd
        }
    }
}

fn is_local(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

impl RemoteExecutor for SshExecutor {
    fn run(&self, hosts: &[String], command: &RemoteCommand) -> Result<Vec<HostOutput>> {
        let rendered = command.render();
        let (tx, rx) = channel::unbounded::<(usize, Result<HostOutput>)>();

        let mut joins = Vec::with_capacity(hosts.len());
        for (index, host) in hosts.iter().enumerate() {
            let tx = tx.clone();
            let host = host.clone();
            let mut cmd = self.command_for(&host, &rendered);
            let join = thread::Builder::new()
                .name(format!("pxh-remote-{index}"))
                .spawn(move || {
                    let result = cmd
                        .output()
                        .map(|output| HostOutput {
                            host: host.clone(),
                            exit_code: output.status.code().unwrap_or(-1),
                            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                        })
                        .map_err(|source| PxhError::Io {
                            path: PathBuf::from(format!("{host}:{}", cmd.get_program().to_string_lossy())),
                            source,
                        });
                    let _ = tx.send((index, result));
                })
                .map_err(|e| PxhError::Runtime {
                    details: format!("failed to spawn remote worker for {}: {e}", hosts[index]),
                })?;
            joins.push(join);
        }
        drop(tx);

        let mut gathered: Vec<(usize, Result<HostOutput>)> = rx.iter().collect();
        for join in joins {
            if join.join().is_err() {
                return Err(PxhError::Runtime {
                    details: "remote worker thread panicked".to_string(),
                });
            }
        }
        if gathered.len() != hosts.len() {
            return Err(PxhError::ChannelClosed {
                component: "remote fan-in",
            });
        }

        gathered.sort_by_key(|(index, _)| *index);
        gathered.into_iter().map(|(_, result)| result).collect()
    }
}
