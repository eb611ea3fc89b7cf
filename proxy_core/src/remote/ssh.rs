//! `RemoteShell` over the system OpenSSH client.
//!
//! One master connection is started per shell and every later `ssh`/`scp`
//! invocation is multiplexed over its control socket, so the remote session
//! is established once and reused.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::command::shell_quote;
use super::{log_remote_line, CommandOutput, OutputSource, RemoteShell};
use crate::config::SshConfig;
use crate::error::{ProxyError, Result};

/// Exit status `ssh` itself reports for connection-level failures.
const SSH_FAILURE_CODE: i32 = 255;

pub struct OpenSshShell {
    config: SshConfig,
    control_path: PathBuf,
    connected: bool,
}

impl OpenSshShell {
    pub fn new(config: SshConfig) -> Self {
        // %C is expanded by ssh to a hash of the connection tuple.
        let control_path =
            std::env::temp_dir().join(format!("tts-proxy-{}-%C", std::process::id()));
        Self {
            config,
            control_path,
            connected: false,
        }
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    fn base_command(&self, program: &str) -> Command {
        let mut cmd = match &self.config.password {
            Some(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg(program).env("SSHPASS", password);
                cmd
            }
            None => Command::new(program),
        };
        cmd.arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-o")
            .arg("StrictHostKeyChecking=accept-new");
        if let Some(identity) = &self.config.identity_file {
            cmd.arg("-i").arg(identity);
        }
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    fn ssh(&self) -> Command {
        let mut cmd = self.base_command("ssh");
        cmd.arg("-p").arg(self.config.port.to_string());
        cmd
    }

    fn scp(&self) -> Command {
        let mut cmd = self.base_command("scp");
        cmd.arg("-q").arg("-P").arg(self.config.port.to_string());
        cmd
    }

    fn control(&self, operation: &str) -> std::process::Command {
        let mut cmd = std::process::Command::new("ssh");
        cmd.arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg("-p")
            .arg(self.config.port.to_string())
            .arg("-O")
            .arg(operation)
            .arg(self.config.destination())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        cmd
    }
}

fn spawn_error(program: &str, e: std::io::Error) -> ProxyError {
    ProxyError::Connection(format!("failed to run {program}: {e}"))
}

fn describe(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

async fn read_lines<R: AsyncRead + Unpin>(
    reader: R,
    source: OutputSource,
    stream: bool,
) -> std::io::Result<String> {
    let mut reader = BufReader::new(reader);
    let mut captured = String::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        if stream {
            log_remote_line(source, &line);
        }
        captured.push_str(&line);
    }
    Ok(captured)
}

#[async_trait]
impl RemoteShell for OpenSshShell {
    async fn connect(&mut self) -> Result<()> {
        let timeout = self.config.connect_timeout();
        if self.connected {
            let mut exit = Command::from(self.control("exit"));
            exit.kill_on_drop(true);
            if tokio::time::timeout(timeout, exit.status()).await.is_err() {
                warn!(host = %self.config.host, "stale session did not close in time");
            }
            self.connected = false;
        }

        info!(
            host = %self.config.host,
            port = self.config.port,
            user = %self.config.username,
            "connecting to remote host"
        );

        // -f backgrounds the master once authenticated; its pipes must not
        // be inherited or waiting on them would never finish.
        let mut cmd = self.ssh();
        cmd.arg("-o")
            .arg("ControlMaster=yes")
            .arg("-o")
            .arg("ControlPersist=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", timeout.as_secs().max(1)))
            .arg("-M")
            .arg("-N")
            .arg("-f")
            .arg(self.config.destination())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let status = tokio::time::timeout(timeout, cmd.status())
            .await
            .map_err(|_| {
                ProxyError::Connection(format!(
                    "timed out after {}s connecting to {}",
                    timeout.as_secs(),
                    self.config.host
                ))
            })?
            .map_err(|e| spawn_error("ssh", e))?;

        if !status.success() {
            return Err(ProxyError::Connection(format!(
                "ssh to {}:{} failed ({})",
                self.config.host,
                self.config.port,
                describe(status)
            )));
        }
        self.connected = true;
        Ok(())
    }

    async fn is_alive(&mut self) -> bool {
        if !self.connected {
            return false;
        }
        let mut cmd = self.ssh();
        cmd.arg("-O")
            .arg("check")
            .arg(self.config.destination())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let alive = matches!(cmd.status().await, Ok(status) if status.success());
        if !alive {
            warn!(host = %self.config.host, "remote session is no longer alive");
            self.connected = false;
        }
        alive
    }

    async fn exec(&mut self, command: &str, stream: bool) -> Result<CommandOutput> {
        let mut cmd = self.ssh();
        cmd.arg(self.config.destination())
            .arg("--")
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| spawn_error("ssh", e))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProxyError::Connection("ssh stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProxyError::Connection("ssh stderr was not captured".to_string()))?;

        let (stdout, stderr) = tokio::try_join!(
            read_lines(stdout, OutputSource::Stdout, stream),
            read_lines(stderr, OutputSource::Stderr, stream)
        )?;
        let status = child.wait().await?;

        if status.code() == Some(SSH_FAILURE_CODE) {
            self.connected = false;
            return Err(ProxyError::Connection(format!(
                "ssh session failed: {}",
                stderr.trim()
            )));
        }
        Ok(CommandOutput {
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }

    async fn download(&mut self, remote_path: &str, local_path: &Path) -> Result<()> {
        let mut cmd = self.scp();
        cmd.arg(format!("{}:{}", self.config.destination(), remote_path))
            .arg(local_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let output = cmd.output().await.map_err(|e| spawn_error("scp", e))?;
        if !output.status.success() {
            return Err(ProxyError::Transfer(format!(
                "scp {remote_path} failed ({}): {}",
                describe(output.status),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn remove(&mut self, remote_path: &str) -> Result<()> {
        let output = self
            .exec(&format!("rm -f -- {}", shell_quote(remote_path)), false)
            .await?;
        if !output.success() {
            return Err(ProxyError::Transfer(format!(
                "could not remove {remote_path}: {}",
                output.stderr.trim()
            )));
        }
        Ok(())
    }
}

impl Drop for OpenSshShell {
    fn drop(&mut self) {
        if self.connected {
            debug!(host = %self.config.host, "closing remote session");
            // not waited on, drop may run on a runtime thread
            let _ = self.control("exit").spawn();
        }
    }
}
