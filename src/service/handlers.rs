//! HTTPハンドラ

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::service::monitor::{round2, MetricsSnapshot, RequestLogEntry};
use crate::service::state::{ModelInfo, ServiceState};
use crate::types::Prediction;

pub const SERVICE_NAME: &str = "Cats vs Dogs Classifier API";

type HandlerError = (StatusCode, String);

#[derive(Debug, Serialize, Deserialize)]
pub struct RootResponse {
    pub message: String,
    pub version: String,
    pub endpoints: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub model_loaded: bool,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    #[serde(flatten)]
    pub prediction: Prediction,
    pub inference_time_ms: f64,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MetricsResponse {
    #[serde(flatten)]
    pub metrics: MetricsSnapshot,
    pub model_loaded: bool,
}

fn now() -> String {
    chrono::Local::now().to_rfc3339()
}

/// `GET /`
pub async fn root() -> Json<RootResponse> {
    let endpoints = [
        ("health", "/health"),
        ("predict", "/predict"),
        ("metrics", "/metrics"),
        ("model_info", "/model-info"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    Json(RootResponse {
        message: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoints,
    })
}

/// `GET /health`
pub async fn health_check(State(state): State<ServiceState>) -> impl IntoResponse {
    let loaded = state.model_loaded();
    let status = if loaded {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            status: if loaded { "healthy" } else { "unhealthy" }.to_string(),
            message: (!loaded).then(|| "Model not loaded".to_string()),
            model_loaded: loaded,
            timestamp: now(),
        }),
    )
}

/// `POST /predict`（multipart の `file` フィールド）
pub async fn predict(
    State(state): State<ServiceState>,
    mut multipart: Multipart,
) -> Result<Json<PredictResponse>, HandlerError> {
    let Some(classifier) = state.classifier.clone() else {
        return Err((StatusCode::SERVICE_UNAVAILABLE, "Model not loaded".to_string()));
    };

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let content_type = field.content_type().unwrap_or_default().to_string();
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid upload: {e}")))?;
        upload = Some((content_type, file_name, bytes));
        break;
    }

    let Some((content_type, file_name, bytes)) = upload else {
        return Err((StatusCode::BAD_REQUEST, "Missing file field".to_string()));
    };

    if !content_type.starts_with("image/") {
        return Err((StatusCode::BAD_REQUEST, "File must be an image".to_string()));
    }

    let image = image::load_from_memory(&bytes).map_err(|e| {
        error!("Invalid image file {}: {}", file_name, e);
        (StatusCode::BAD_REQUEST, format!("Invalid image file: {e}"))
    })?;

    let started = Instant::now();
    let result = tokio::task::spawn_blocking(move || classifier.predict(&image))
        .await
        .map_err(|e| anyhow::anyhow!("推論タスクが異常終了しました: {e}"))
        .and_then(|r| r);
    let elapsed = started.elapsed();

    match result {
        Ok(prediction) => {
            let inference_time_ms = round2(elapsed.as_secs_f64() * 1000.0);
            state.monitor.record_success(elapsed, &prediction.predicted_class);
            log_request(&state, elapsed, Ok(&prediction));
            info!(
                "Prediction: {} (confidence: {:.4}, time: {}ms)",
                prediction.predicted_class, prediction.confidence, inference_time_ms
            );
            Ok(Json(PredictResponse {
                prediction,
                inference_time_ms,
                timestamp: now(),
            }))
        }
        Err(e) => {
            state.monitor.record_error(elapsed);
            log_request(&state, elapsed, Err(&e));
            error!("Error during prediction for {}: {}", file_name, e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, format!("Prediction error: {e}")))
        }
    }
}

fn log_request(state: &ServiceState, elapsed: Duration, result: Result<&Prediction, &anyhow::Error>) {
    let Some(logger) = &state.request_logger else {
        return;
    };
    let entry = RequestLogEntry {
        timestamp: now(),
        inference_time_ms: elapsed.as_secs_f64() * 1000.0,
        success: result.is_ok(),
        predicted_class: result.ok().map(|p| p.predicted_class.clone()),
        confidence: result.ok().map(|p| p.confidence),
        error: result.err().map(|e| e.to_string()),
    };
    if let Err(e) = logger.log(&entry) {
        warn!("リクエストログの書き込みに失敗しました: {}", e);
    }
}

/// `GET /metrics`
pub async fn metrics(State(state): State<ServiceState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        metrics: state.monitor.snapshot(),
        model_loaded: state.model_loaded(),
    })
}

/// `GET /model-info`
pub async fn model_info(State(state): State<ServiceState>) -> Result<Json<ModelInfo>, HandlerError> {
    match &state.classifier {
        Some(classifier) => Ok(Json(classifier.info())),
        None => Err((StatusCode::SERVICE_UNAVAILABLE, "Model not loaded".to_string())),
    }
}
