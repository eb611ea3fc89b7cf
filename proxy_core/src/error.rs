use thiserror::Error;

/// Failures produced by the generation pipeline and the remote layer.
///
/// Everything here is absorbed at the task boundary and handed to the
/// waiting caller as the single failure signal of its `TaskHandle`.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Remote connection error: {0}")]
    Connection(String),

    #[error("Remote {kind} file not found: {name} (allowed extensions: {})", extensions.join(", "))]
    RemoteFileNotFound {
        kind: &'static str,
        name: String,
        extensions: Vec<String>,
    },

    #[error("Generation failed: {reason}")]
    Generation {
        reason: String,
        exit_code: Option<i32>,
    },

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generation worker is not running")]
    WorkerUnavailable,
}

pub type Result<T> = std::result::Result<T, ProxyError>;
