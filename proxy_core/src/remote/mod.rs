//! Everything that talks to the remote generation host.
//!
//! `RemoteShell` is the transport capability (session, commands, transfers).
//! `RemoteExecutionBridge` owns exactly one shell plus the state derived from
//! it, and is only ever driven by the generation worker.

pub mod command;
pub mod interpreter;
pub mod resolver;
pub mod ssh;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::error::Result;

pub use command::{GenerationCommand, GENERATED_MARKER};
pub use interpreter::{detect_interpreter, ProbeStrategy, FALLBACK_INTERPRETER};
pub use resolver::RemoteFileResolver;
pub use ssh::OpenSshShell;

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Transport to the remote host.
#[async_trait]
pub trait RemoteShell: Send {
    /// Establish a fresh session, replacing any previous one.
    async fn connect(&mut self) -> Result<()>;

    async fn is_alive(&mut self) -> bool;

    /// Run `command` through the remote shell. With `stream`, output lines
    /// are logged as they arrive; the returned capture is the same.
    async fn exec(&mut self, command: &str, stream: bool) -> Result<CommandOutput>;

    async fn download(&mut self, remote_path: &str, local_path: &Path) -> Result<()>;

    async fn remove(&mut self, remote_path: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSource {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

/// Severity of a remote output line, judged by the markers it embeds.
pub fn classify_line(source: OutputSource, line: &str) -> Severity {
    let warn = line.contains("WARNING") || line.contains("WARN");
    match source {
        OutputSource::Stdout => {
            if line.contains("ERROR") || line.contains("CRITICAL") {
                Severity::Error
            } else if warn {
                Severity::Warn
            } else if line.contains("INFO") {
                Severity::Info
            } else {
                Severity::Debug
            }
        }
        OutputSource::Stderr if warn => Severity::Warn,
        OutputSource::Stderr => Severity::Error,
    }
}

/// Re-emit one streamed remote line under the `remote` target.
pub fn log_remote_line(source: OutputSource, line: &str) {
    let line = line.trim_end();
    if line.trim().is_empty() {
        return;
    }
    match classify_line(source, line) {
        Severity::Error => error!(target: "remote", "{line}"),
        Severity::Warn => warn!(target: "remote", "{line}"),
        Severity::Info => info!(target: "remote", "{line}"),
        Severity::Debug => debug!(target: "remote", "{line}"),
    }
}

/// Single point of contact with the remote host.
pub struct RemoteExecutionBridge {
    shell: Box<dyn RemoteShell>,
    workdir: String,
    interpreter: Option<String>,
}

impl RemoteExecutionBridge {
    pub fn new(shell: Box<dyn RemoteShell>, workdir: impl Into<String>) -> Self {
        Self {
            shell,
            workdir: workdir.into(),
            interpreter: None,
        }
    }

    /// Use a fixed interpreter instead of probing for one.
    pub fn with_interpreter(mut self, interpreter: impl Into<String>) -> Self {
        self.interpreter = Some(interpreter.into());
        self
    }

    pub fn workdir(&self) -> &str {
        &self.workdir
    }

    /// Reuse the live session or establish a new one.
    pub async fn connect(&mut self) -> Result<()> {
        if self.shell.is_alive().await {
            debug!("reusing live remote session");
            return Ok(());
        }
        self.shell.connect().await?;
        info!("remote session established");
        Ok(())
    }

    /// Interpreter path, probed on first use and remembered afterwards.
    pub async fn ensure_interpreter(&mut self, conda_env: &str) -> &str {
        if self.interpreter.is_none() {
            let detected = detect_interpreter(self.shell.as_mut(), conda_env).await;
            info!(interpreter = %detected, "using remote interpreter");
            self.interpreter = Some(detected);
        }
        self.interpreter.as_deref().unwrap_or(FALLBACK_INTERPRETER)
    }

    pub fn interpreter(&self) -> Option<&str> {
        self.interpreter.as_deref()
    }

    pub async fn execute(&mut self, command: &str, stream: bool) -> Result<CommandOutput> {
        debug!(%command, "executing remote command");
        let output = self.shell.exec(command, stream).await?;
        if output.success() {
            debug!("remote command succeeded");
        } else {
            error!(exit_code = ?output.exit_code, "remote command failed");
        }
        Ok(output)
    }

    pub async fn download(&mut self, remote_path: &str, local_path: &Path) -> Result<()> {
        debug!(%remote_path, local_path = %local_path.display(), "downloading remote file");
        self.shell.download(remote_path, local_path).await?;
        info!(local_path = %local_path.display(), "download complete");
        Ok(())
    }

    pub async fn remove(&mut self, remote_path: &str) -> Result<()> {
        self.shell.remove(remote_path).await?;
        debug!(%remote_path, "remote file removed");
        Ok(())
    }

    pub fn resolver(&mut self) -> RemoteFileResolver<'_> {
        RemoteFileResolver::new(self.shell.as_mut(), &self.workdir)
    }
}
