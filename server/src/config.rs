// Configuration for the proxy server, read from the environment

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use proxy_core::params::DEFAULT_ALLOWED_PARAMS;
use proxy_core::{GenerationConfig, SshConfig};

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
    pub allowed_params: Vec<String>,
    pub dedup_ttl_secs: u64,
    pub dedup_capacity: usize,
    pub cache_dir: PathBuf,
    pub local_prompt_audio_path: PathBuf,
    pub local_text_file_path: PathBuf,
    pub local_prompt_text_path: PathBuf,
    pub ssh: SshConfig,
    pub generation: GenerationConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8085,
            rate_limit_per_minute: 120,
            request_timeout_secs: 600,
            cors_allowed_origins: None,
            allowed_params: DEFAULT_ALLOWED_PARAMS.iter().map(|s| s.to_string()).collect(),
            dedup_ttl_secs: 3,
            dedup_capacity: 1024,
            cache_dir: PathBuf::from("cache"),
            local_prompt_audio_path: PathBuf::from("prompt_audio"),
            local_text_file_path: PathBuf::from("text_file"),
            local_prompt_text_path: PathBuf::from("prompt_text"),
            ssh: SshConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_list(key: &str) -> Option<Vec<String>> {
    env_string(key).map(|v| split_list(&v))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Extensions are compared with a leading dot.
fn normalize_extensions(list: Vec<String>) -> Vec<String> {
    list.into_iter()
        .map(|ext| {
            if ext.starts_with('.') {
                ext.to_lowercase()
            } else {
                format!(".{}", ext.to_lowercase())
            }
        })
        .collect()
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let ssh = SshConfig {
            host: env_string("SSH_HOST").unwrap_or(defaults.ssh.host),
            port: env_parse("SSH_PORT", defaults.ssh.port),
            username: env_string("SSH_USERNAME").unwrap_or(defaults.ssh.username),
            password: env_string("SSH_PASSWORD"),
            identity_file: env_string("SSH_IDENTITY_FILE").map(PathBuf::from),
            connect_timeout_secs: env_parse("SSH_CONNECT_TIMEOUT_SECS", defaults.ssh.connect_timeout_secs),
        };

        let generation = GenerationConfig {
            workdir: env_string("TTS_WORKDIR").unwrap_or(defaults.generation.workdir),
            entrypoint: env_string("TTS_COMMAND").unwrap_or(defaults.generation.entrypoint),
            conda_env: env_string("TTS_CONDA_ENV").unwrap_or(defaults.generation.conda_env),
            interpreter: env_string("TTS_PYTHON_PATH"),
            prompt_audio_dir: env_string("REMOTE_PROMPT_AUDIO_PATH")
                .unwrap_or(defaults.generation.prompt_audio_dir),
            text_file_dir: env_string("REMOTE_TEXT_FILE_PATH")
                .unwrap_or(defaults.generation.text_file_dir),
            prompt_audio_extensions: env_list("PROMPT_AUDIO_EXTENSIONS")
                .map(normalize_extensions)
                .unwrap_or(defaults.generation.prompt_audio_extensions),
            text_file_extensions: env_list("TEXT_FILE_EXTENSIONS")
                .map(normalize_extensions)
                .unwrap_or(defaults.generation.text_file_extensions),
        };

        Self {
            host: env_string("HOST").unwrap_or(defaults.host),
            port: env_parse("PORT", defaults.port),
            rate_limit_per_minute: env_parse("RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            cors_allowed_origins: env_list("CORS_ALLOWED_ORIGINS"),
            allowed_params: env_list("ALLOWED_PARAMS").unwrap_or(defaults.allowed_params),
            dedup_ttl_secs: env_parse("DEDUP_TTL_SECS", defaults.dedup_ttl_secs),
            dedup_capacity: env_parse("DEDUP_CAPACITY", defaults.dedup_capacity),
            cache_dir: env_string("CACHE_DIR").map(PathBuf::from).unwrap_or(defaults.cache_dir),
            local_prompt_audio_path: env_string("LOCAL_PROMPT_AUDIO_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.local_prompt_audio_path),
            local_text_file_path: env_string("LOCAL_TEXT_FILE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.local_text_file_path),
            local_prompt_text_path: env_string("LOCAL_PROMPT_TEXT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.local_prompt_text_path),
            ssh,
            generation,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    /// Time for the shared bucket to regain one request.
    pub fn rate_limit_period(&self) -> Duration {
        let per_minute = u64::from(self.rate_limit_per_minute.max(1));
        Duration::from_millis((60_000 / per_minute).max(1))
    }
}
