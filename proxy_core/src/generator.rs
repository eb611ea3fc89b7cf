//! One generation, end to end: resolve inputs remotely, run the model,
//! fetch the artifact into the cache.

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::config::GenerationConfig;
use crate::error::{ProxyError, Result};
use crate::params::{RequestParams, PROMPT_AUDIO, TEXT_FILE};
use crate::remote::command::{parse_generated_path, remote_artifact_path, GenerationCommand};
use crate::remote::RemoteExecutionBridge;
use crate::wav;

pub struct Generator {
    bridge: RemoteExecutionBridge,
    config: GenerationConfig,
}

impl Generator {
    pub fn new(bridge: RemoteExecutionBridge, config: GenerationConfig) -> Self {
        let bridge = match &config.interpreter {
            Some(interpreter) => bridge.with_interpreter(interpreter.clone()),
            None => bridge,
        };
        Self { bridge, config }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Generate audio for `params` and store it at `target`.
    ///
    /// The artifact is downloaded next to `target` and renamed into place
    /// once complete. On failure nothing is left at either path.
    pub async fn generate(&mut self, params: &RequestParams, target: &Path) -> Result<PathBuf> {
        self.bridge.connect().await?;
        let interpreter = self
            .bridge
            .ensure_interpreter(&self.config.conda_env)
            .await
            .to_string();

        let params = self.resolve_inputs(params).await?;
        let command = GenerationCommand::new(
            self.bridge.workdir(),
            interpreter,
            self.config.entrypoint.clone(),
            &params,
        );

        let output = self.bridge.execute(&command.render(), true).await?;
        if !output.success() {
            if !output.stderr.trim().is_empty() {
                error!(stderr = %output.stderr.trim(), "generation command failed");
            }
            return Err(ProxyError::Generation {
                reason: format!(
                    "remote command exited with {}",
                    output
                        .exit_code
                        .map(|code| code.to_string())
                        .unwrap_or_else(|| "no status".to_string())
                ),
                exit_code: output.exit_code,
            });
        }

        let reported = parse_generated_path(&output.stdout).ok_or_else(|| ProxyError::Generation {
            reason: "remote command did not report a generated file".to_string(),
            exit_code: output.exit_code,
        })?;
        let remote_path = remote_artifact_path(self.bridge.workdir(), &reported);
        info!(%remote_path, "remote generation finished");

        let staged = staging_path(target);
        self.fetch(&remote_path, &staged).await?;

        match wav::inspect(&staged) {
            Ok(summary) => info!(
                duration_ms = summary.duration_ms,
                sample_rate = summary.sample_rate,
                "downloaded audio"
            ),
            Err(e) => warn!(path = %staged.display(), error = %e, "downloaded file has no readable WAV header"),
        }

        // readers probing the cache only ever see the complete file
        if let Err(e) = tokio::fs::rename(&staged, target).await {
            discard(&staged).await;
            return Err(ProxyError::Transfer(format!(
                "could not move audio into cache at {}: {e}",
                target.display()
            )));
        }
        info!(path = %target.display(), "audio stored in cache");

        if let Err(e) = self.bridge.remove(&remote_path).await {
            warn!(%remote_path, error = %e, "could not remove remote artifact");
        }
        Ok(target.to_path_buf())
    }

    /// Replace logical `prompt_audio` and `text_file` names with paths that
    /// exist on the remote host.
    async fn resolve_inputs(&mut self, params: &RequestParams) -> Result<RequestParams> {
        let mut resolved = params.clone();
        let lookups = [
            (
                PROMPT_AUDIO,
                "prompt audio",
                &self.config.prompt_audio_dir,
                &self.config.prompt_audio_extensions,
            ),
            (
                TEXT_FILE,
                "text",
                &self.config.text_file_dir,
                &self.config.text_file_extensions,
            ),
        ];

        for (key, kind, remote_dir, extensions) in lookups {
            let Some(name) = params.non_empty(key) else {
                continue;
            };
            match self.bridge.resolver().resolve(name, remote_dir, extensions).await? {
                Some(path) => {
                    resolved.insert(key, path);
                }
                None => {
                    return Err(ProxyError::RemoteFileNotFound {
                        kind,
                        name: name.to_string(),
                        extensions: extensions.clone(),
                    })
                }
            }
        }
        Ok(resolved)
    }

    async fn fetch(&mut self, remote_path: &str, staged: &Path) -> Result<()> {
        if let Err(e) = self.bridge.download(remote_path, staged).await {
            discard(staged).await;
            return Err(match e {
                ProxyError::Transfer(_) => e,
                other => ProxyError::Transfer(other.to_string()),
            });
        }
        let size = tokio::fs::metadata(staged).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            discard(staged).await;
            return Err(ProxyError::Transfer(format!("{remote_path} arrived empty")));
        }
        Ok(())
    }
}

/// Sibling of `target` used while a download is in progress.
fn staging_path(target: &Path) -> PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "could not remove partial download");
        }
    }
}
