use std::path::PathBuf;
use std::time::Duration;

/// Connection settings for the remote generation host.
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Password authentication is delegated to `sshpass` when set.
    pub password: Option<String>,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 22,
            username: "root".to_string(),
            password: None,
            identity_file: None,
            connect_timeout_secs: 10,
        }
    }
}

impl SshConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }
}

/// How generation commands are built and where their inputs live remotely.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Remote working directory the entrypoint runs in.
    pub workdir: String,
    /// Entrypoint passed to the interpreter, e.g. `cli/inference.py`.
    pub entrypoint: String,
    /// Conda environment probed for an interpreter.
    pub conda_env: String,
    /// Explicit remote interpreter; skips probing when set.
    pub interpreter: Option<String>,
    /// Prompt-audio directory, relative to `workdir`.
    pub prompt_audio_dir: String,
    /// Text-file directory, relative to `workdir`.
    pub text_file_dir: String,
    pub prompt_audio_extensions: Vec<String>,
    pub text_file_extensions: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            workdir: "/root/Spark-TTS".to_string(),
            entrypoint: "cli/inference.py".to_string(),
            conda_env: "sparktts".to_string(),
            interpreter: None,
            prompt_audio_dir: "prompt_audio".to_string(),
            text_file_dir: "text_file".to_string(),
            prompt_audio_extensions: vec![".wav".into(), ".mp3".into(), ".ogg".into()],
            text_file_extensions: vec![".txt".into()],
        }
    }
}
