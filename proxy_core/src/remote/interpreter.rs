//! Locating a usable Python interpreter on the remote host.

use tracing::{debug, warn};

use super::RemoteShell;

/// Used when no probe succeeds.
pub const FALLBACK_INTERPRETER: &str = "python";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStrategy {
    /// Run the command as is.
    Direct(String),
    /// Find the conda base, activate `env` and ask for its python.
    Conda { env: String },
    /// Accept the path if a regular file exists there.
    KnownPath(String),
}

impl ProbeStrategy {
    /// Probes in the order they are tried.
    pub fn ordered(conda_env: &str) -> Vec<ProbeStrategy> {
        vec![
            ProbeStrategy::Direct("which python".to_string()),
            ProbeStrategy::Direct("bash -c 'which python'".to_string()),
            ProbeStrategy::Conda {
                env: conda_env.to_string(),
            },
            ProbeStrategy::KnownPath(format!("/root/miniconda3/envs/{conda_env}/bin/python")),
            ProbeStrategy::KnownPath(format!("$HOME/miniconda3/envs/{conda_env}/bin/python")),
            ProbeStrategy::KnownPath(format!("/opt/conda/envs/{conda_env}/bin/python")),
            ProbeStrategy::KnownPath("/usr/bin/python3".to_string()),
        ]
    }

    async fn run(&self, shell: &mut dyn RemoteShell) -> Option<String> {
        match self {
            ProbeStrategy::Direct(command) => probe(shell, command).await,
            ProbeStrategy::KnownPath(path) => {
                probe(shell, &format!("[ -f {path} ] && echo {path}")).await
            }
            ProbeStrategy::Conda { env } => {
                let output = shell
                    .exec("which conda && conda info --base", false)
                    .await
                    .ok()?;
                if !output.success() {
                    return None;
                }
                let base = output.stdout.lines().map(str::trim).filter(|l| !l.is_empty()).last()?;
                let activate = format!(
                    "source {base}/etc/profile.d/conda.sh && conda activate {env} && which python"
                );
                probe(shell, &activate).await
            }
        }
    }
}

/// First line of stdout when the command printed something and nothing on
/// stderr.
async fn probe(shell: &mut dyn RemoteShell, command: &str) -> Option<String> {
    let output = match shell.exec(command, false).await {
        Ok(output) => output,
        Err(e) => {
            debug!(%command, error = %e, "interpreter probe failed");
            return None;
        }
    };
    if !output.stderr.trim().is_empty() {
        return None;
    }
    output
        .stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Try each probe in order and return the first interpreter found.
pub async fn detect_interpreter(shell: &mut dyn RemoteShell, conda_env: &str) -> String {
    for strategy in ProbeStrategy::ordered(conda_env) {
        if let Some(path) = strategy.run(shell).await {
            debug!(?strategy, %path, "interpreter probe matched");
            return path;
        }
    }
    warn!(
        fallback = FALLBACK_INTERPRETER,
        "no remote interpreter found, relying on PATH"
    );
    FALLBACK_INTERPRETER.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::fake::FakeShell;
    use crate::remote::CommandOutput;

    #[tokio::test]
    async fn test_first_direct_probe_wins() {
        let mut shell = FakeShell::new();
        shell.respond("which python", "/usr/bin/python\n");
        shell.respond("bash -c 'which python'", "/other/python\n");

        assert_eq!(detect_interpreter(&mut shell, "sparktts").await, "/usr/bin/python");
        assert_eq!(shell.state().commands, vec!["which python".to_string()]);
    }

    #[tokio::test]
    async fn test_probe_with_stderr_is_rejected() {
        let mut shell = FakeShell::new();
        shell.respond_with(
            "which python",
            CommandOutput {
                exit_code: Some(0),
                stdout: "/usr/bin/python\n".to_string(),
                stderr: "bash: warning: setlocale failed\n".to_string(),
            },
        );
        shell.respond("bash -c 'which python'", "/bin/python\n");

        assert_eq!(detect_interpreter(&mut shell, "sparktts").await, "/bin/python");
    }

    #[tokio::test]
    async fn test_conda_probe_uses_reported_base() {
        let mut shell = FakeShell::new();
        shell.respond(
            "which conda && conda info --base",
            "/opt/miniconda/bin/conda\n/opt/miniconda\n",
        );
        shell.respond(
            "source /opt/miniconda/etc/profile.d/conda.sh && conda activate sparktts && which python",
            "/opt/miniconda/envs/sparktts/bin/python\n",
        );

        assert_eq!(
            detect_interpreter(&mut shell, "sparktts").await,
            "/opt/miniconda/envs/sparktts/bin/python"
        );
    }

    #[tokio::test]
    async fn test_known_path_probe() {
        let mut shell = FakeShell::new();
        shell.respond(
            "[ -f /opt/conda/envs/tts/bin/python ] && echo /opt/conda/envs/tts/bin/python",
            "/opt/conda/envs/tts/bin/python\n",
        );
        assert_eq!(
            detect_interpreter(&mut shell, "tts").await,
            "/opt/conda/envs/tts/bin/python"
        );
    }

    #[tokio::test]
    async fn test_fallback_when_nothing_matches() {
        let mut shell = FakeShell::new();
        assert_eq!(detect_interpreter(&mut shell, "sparktts").await, FALLBACK_INTERPRETER);
        // two direct probes, the conda lookup, four known paths
        assert_eq!(shell.state().commands.len(), 7);
    }
}
