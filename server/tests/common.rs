//! Common utilities for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use proxy_core::remote::fake::FakeShell;
use proxy_core::{GenerationConfig, Generator, RemoteExecutionBridge, ResultCache, TaskScheduler};
use tempfile::TempDir;
use tower::ServiceExt;
use tts_proxy::{build_router, AppState, ServerConfig};

pub const REMOTE_WORKDIR: &str = "/srv/tts";

/// A router wired to a scripted remote host and temporary local directories.
pub struct TestApp {
    pub router: Router,
    pub shell: FakeShell,
    pub dir: TempDir,
}

impl TestApp {
    pub async fn get(&self, uri: &str) -> Response {
        self.router
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub fn assert_status(response: &Response, status: StatusCode) {
    assert_eq!(response.status(), status, "unexpected status for response");
}

/// Create a test app instance
pub async fn create_test_app() -> TestApp {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    for sub in ["cache", "prompt_audio", "text_file", "prompt_text"] {
        std::fs::create_dir_all(root.join(sub)).unwrap();
    }
    std::fs::write(root.join("prompt_audio/aria.wav"), b"RIFF").unwrap();
    std::fs::write(root.join("prompt_audio/bram.mp3"), b"ID3").unwrap();
    std::fs::write(root.join("prompt_text/aria.txt"), "Reference line for Aria.\n").unwrap();

    let config = ServerConfig {
        cache_dir: root.join("cache"),
        local_prompt_audio_path: root.join("prompt_audio"),
        local_text_file_path: root.join("text_file"),
        local_prompt_text_path: root.join("prompt_text"),
        generation: GenerationConfig {
            workdir: REMOTE_WORKDIR.to_string(),
            interpreter: Some("python".to_string()),
            ..GenerationConfig::default()
        },
        ..ServerConfig::default()
    };

    let shell = FakeShell::new();
    shell.add_remote_file(format!("{REMOTE_WORKDIR}/prompt_audio/aria.wav"));

    let bridge = RemoteExecutionBridge::new(Box::new(shell.clone()), REMOTE_WORKDIR);
    let generator = Generator::new(bridge, config.generation.clone());
    let cache = ResultCache::new(&config.cache_dir, &config.local_text_file_path).unwrap();
    let scheduler = TaskScheduler::spawn(generator, Arc::new(cache));

    TestApp {
        router: build_router(AppState::new(config, scheduler)),
        shell,
        dir,
    }
}
