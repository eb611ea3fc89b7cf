use std::path::PathBuf;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use proxy_core::{Fingerprint, RequestParams};
use serde::Serialize;
use tracing::{info, warn};

use crate::enrich::enrich_prompt_text;
use crate::error::ApiError;
use crate::metrics::{DetailedMetricsResponse, EndpointMetricsResponse, SystemMetrics};
use crate::state::AppState;
use crate::validation::validate_params;

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Every route, mounted both at the root and under `/api`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/tts", get(tts_endpoint))
        .route("/allowed_params", get(allowed_params))
        .route("/config", get(server_config))
        .route("/files/{file_type}", get(list_files))
        .route("/metrics", get(metrics_endpoint))
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn tts_endpoint(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Response, ApiError> {
    let started = Instant::now();
    let result = synthesize(&state, pairs).await;

    state
        .metrics
        .tts
        .record_request(started.elapsed().as_millis() as u64);
    if result.is_err() {
        state.metrics.tts.record_error();
    }
    result
}

async fn synthesize(state: &AppState, pairs: Vec<(String, String)>) -> Result<Response, ApiError> {
    let raw = Fingerprint::of_pairs(&pairs);
    if state.dedup.seen(&raw) {
        warn!(fingerprint = %raw, "rejecting repeated request");
        state.metrics.proxy.record_duplicate();
        return Err(ApiError::DuplicateRequest);
    }

    let mut params = RequestParams::from_query(&pairs, &state.config.allowed_params);
    info!(?params, "received TTS request");

    if let Err(e) = validate_params(&params) {
        warn!(error = %e, "rejecting invalid request");
        state.metrics.proxy.record_validation_rejection();
        return Err(e);
    }

    enrich_prompt_text(&mut params, &state.config.local_prompt_text_path).await;

    let output = match state.scheduler.submit(params).await.wait().await {
        Ok(output) => output,
        Err(e) => {
            state.metrics.proxy.record_failure();
            return Err(ApiError::Generation(e));
        }
    };

    let audio = tokio::fs::read(&output.path).await.map_err(|e| {
        ApiError::InternalError(format!(
            "could not read audio {}: {e}",
            output.path.display()
        ))
    })?;
    state.metrics.proxy.record_served(output.served_from_cache);
    info!(
        path = %output.path.display(),
        from_cache = output.served_from_cache,
        "returning generated audio"
    );

    let cache_status = if output.served_from_cache { "HIT" } else { "MISS" };
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("audio/wav")),
            (X_CACHE, HeaderValue::from_static(cache_status)),
        ],
        audio,
    )
        .into_response())
}

#[derive(Serialize)]
pub struct AllowedParamsResponse {
    pub allowed_params: Vec<String>,
}

pub async fn allowed_params(State(state): State<AppState>) -> Json<AllowedParamsResponse> {
    Json(AllowedParamsResponse {
        allowed_params: state.config.allowed_params.clone(),
    })
}

#[derive(Serialize)]
pub struct ServerInfo {
    pub host: String,
    pub port: u16,
    pub api_base: &'static str,
}

#[derive(Serialize)]
pub struct ServerConfigResponse {
    pub server: ServerInfo,
    pub tts_endpoint: &'static str,
}

pub async fn server_config(State(state): State<AppState>) -> Json<ServerConfigResponse> {
    Json(ServerConfigResponse {
        server: ServerInfo {
            host: state.config.host.clone(),
            port: state.config.port,
            api_base: "/api",
        },
        tts_endpoint: "/tts",
    })
}

#[derive(Serialize)]
pub struct FilesResponse {
    pub files: Vec<String>,
}

pub async fn list_files(
    State(state): State<AppState>,
    Path(file_type): Path<String>,
) -> Result<Json<FilesResponse>, ApiError> {
    let dir: &PathBuf = match file_type.as_str() {
        "prompt_audio" => &state.config.local_prompt_audio_path,
        "text_file" => &state.config.local_text_file_path,
        "prompt_text" => &state.config.local_prompt_text_path,
        other => {
            return Err(ApiError::InvalidInput(format!("Invalid file type: {other}")));
        }
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::NotFound(format!("Directory does not exist: {}", dir.display()))
        } else {
            ApiError::InternalError(format!("could not list {}: {e}", dir.display()))
        }
    })?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ApiError::InternalError(format!("could not list {}: {e}", dir.display())))?
    {
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_file {
            files.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    files.sort();
    Ok(Json(FilesResponse { files }))
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<DetailedMetricsResponse> {
    let mut system = sysinfo::System::new();
    system.refresh_cpu();
    system.refresh_memory();

    let cpu_usage = system.global_cpu_info().cpu_usage();
    let memory_used = system.used_memory();
    let memory_total = system.total_memory();
    let memory_usage_percent = if memory_total > 0 {
        (memory_used as f64 / memory_total as f64 * 100.0) as f32
    } else {
        0.0
    };

    let load = sysinfo::System::load_average().one;
    let system_load = (load > 0.0).then_some(load);

    Json(DetailedMetricsResponse {
        timestamp: Utc::now(),
        system: SystemMetrics {
            cpu_usage_percent: cpu_usage,
            memory_used_mb: memory_used / 1024 / 1024,
            memory_total_mb: memory_total / 1024 / 1024,
            memory_usage_percent,
            uptime_seconds: state.started_at.elapsed().as_secs(),
            system_load,
        },
        endpoints: EndpointMetricsResponse {
            tts: state.metrics.tts.stats(),
        },
        proxy: state.metrics.proxy.stats(),
        scheduler: state.scheduler.stats(),
    })
}
