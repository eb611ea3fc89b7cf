//! Core of the TTS proxy: request fingerprinting, the on-disk result cache,
//! duplicate suppression, and single-flight generation on a remote host.

pub mod cache;
pub mod config;
pub mod dedup;
pub mod error;
pub mod generator;
pub mod params;
pub mod remote;
pub mod scheduler;
pub mod wav;

pub use cache::ResultCache;
pub use config::{GenerationConfig, SshConfig};
pub use dedup::DeduplicationGate;
pub use error::{ProxyError, Result};
pub use generator::Generator;
pub use params::{Fingerprint, RequestParams};
pub use remote::{OpenSshShell, RemoteExecutionBridge, RemoteShell};
pub use scheduler::{SchedulerSnapshot, TaskHandle, TaskOutput, TaskScheduler};
