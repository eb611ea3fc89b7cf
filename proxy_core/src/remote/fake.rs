//! Scripted in-memory `RemoteShell` for tests.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{CommandOutput, RemoteShell};
use crate::error::{ProxyError, Result};

/// A minimal RIFF/WAVE file: 16-bit mono, 16 kHz, 160 silent samples.
pub fn silent_wav() -> Vec<u8> {
    let samples = 160u32;
    let data_len = samples * 2;
    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&16_000u32.to_le_bytes());
    bytes.extend_from_slice(&32_000u32.to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    bytes.resize(44 + data_len as usize, 0);
    bytes
}

#[derive(Debug)]
pub struct FakeState {
    /// Absolute remote paths that `test -f` reports as present.
    pub remote_files: HashSet<String>,
    pub generation_stdout: String,
    pub generation_stderr: String,
    pub generation_exit: i32,
    pub generation_delay: Option<Duration>,
    pub artifact_bytes: Vec<u8>,
    pub fail_download: bool,
    /// Copy the artifact in two steps with this pause in between.
    pub download_pause: Option<Duration>,
    pub alive: bool,
    pub refuse_connect: bool,
    /// Panic inside the next generation command, once.
    pub panic_on_generation: bool,
    pub probe_responses: HashMap<String, CommandOutput>,

    pub commands: Vec<String>,
    pub connects: usize,
    pub generations: usize,
    pub downloads: Vec<(String, String)>,
    pub removals: Vec<String>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            remote_files: HashSet::new(),
            generation_stdout: "INFO done\nGenerated audio file: results/out.wav\n".to_string(),
            generation_stderr: String::new(),
            generation_exit: 0,
            generation_delay: None,
            artifact_bytes: silent_wav(),
            fail_download: false,
            download_pause: None,
            alive: false,
            refuse_connect: false,
            panic_on_generation: false,
            probe_responses: HashMap::new(),
            commands: Vec::new(),
            connects: 0,
            generations: 0,
            downloads: Vec::new(),
            removals: Vec::new(),
        }
    }
}

/// Cloning shares the scripted state, so a test keeps one handle while the
/// bridge owns another.
#[derive(Debug, Clone, Default)]
pub struct FakeShell {
    state: Arc<Mutex<FakeState>>,
}

impl FakeShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_remote_file(&self, path: impl Into<String>) {
        self.state().remote_files.insert(path.into());
    }

    /// Successful response with `stdout` for an exact command.
    pub fn respond(&self, command: &str, stdout: &str) {
        self.respond_with(
            command,
            CommandOutput {
                exit_code: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        );
    }

    pub fn respond_with(&self, command: &str, output: CommandOutput) {
        self.state().probe_responses.insert(command.to_string(), output);
    }

    pub fn generations(&self) -> usize {
        self.state().generations
    }
}

fn quoted_path(command: &str) -> Option<&str> {
    let rest = command.strip_prefix("test -f '")?;
    let end = rest.find("' &&")?;
    Some(&rest[..end])
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.state();
        if state.refuse_connect {
            return Err(ProxyError::Connection("connection refused".to_string()));
        }
        state.connects += 1;
        state.alive = true;
        Ok(())
    }

    async fn is_alive(&mut self) -> bool {
        self.state().alive
    }

    async fn exec(&mut self, command: &str, _stream: bool) -> Result<CommandOutput> {
        let delay = {
            let mut state = self.state();
            state.commands.push(command.to_string());

            if let Some(path) = quoted_path(command) {
                let stdout = if state.remote_files.contains(path) { "exists\n" } else { "missing\n" };
                return Ok(CommandOutput {
                    exit_code: Some(0),
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                });
            }
            if !command.starts_with("cd ") {
                return Ok(state.probe_responses.get(command).cloned().unwrap_or(CommandOutput {
                    exit_code: Some(1),
                    stdout: String::new(),
                    stderr: String::new(),
                }));
            }
            if state.panic_on_generation {
                state.panic_on_generation = false;
                panic!("scripted generation panic");
            }
            state.generations += 1;
            state.generation_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state();
        Ok(CommandOutput {
            exit_code: Some(state.generation_exit),
            stdout: state.generation_stdout.clone(),
            stderr: state.generation_stderr.clone(),
        })
    }

    async fn download(&mut self, remote_path: &str, local_path: &Path) -> Result<()> {
        let (bytes, fail, pause) = {
            let mut state = self.state();
            state
                .downloads
                .push((remote_path.to_string(), local_path.display().to_string()));
            (state.artifact_bytes.clone(), state.fail_download, state.download_pause)
        };
        if let Some(pause) = pause {
            std::fs::write(local_path, &bytes[..bytes.len().min(10)])?;
            tokio::time::sleep(pause).await;
        }
        if fail {
            // leave a truncated file behind, like an interrupted copy
            std::fs::write(local_path, &bytes[..bytes.len().min(8)])?;
            return Err(ProxyError::Transfer(format!("connection lost while copying {remote_path}")));
        }
        std::fs::write(local_path, bytes)?;
        Ok(())
    }

    async fn remove(&mut self, remote_path: &str) -> Result<()> {
        self.state().removals.push(remote_path.to_string());
        Ok(())
    }
}
