//! 推論HTTPサービス

pub mod handlers;
pub mod monitor;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use monitor::{MetricsSnapshot, PerformanceMonitor, RequestLogEntry, RequestLogger};
pub use state::{Classifier, ModelInfo, ServiceState};

/// アップロードの上限
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// ルーターを構築
pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route("/predict", post(handlers::predict))
        .route("/metrics", get(handlers::metrics))
        .route("/model-info", get(handlers::model_info))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// バインド済みのリスナーでサービスを実行
pub async fn serve(listener: TcpListener, state: ServiceState) -> std::io::Result<()> {
    axum::serve(listener, build_router(state)).await
}

/// サーバーを起動し、Ctrl-C で停止する
///
/// `metrics_path` があれば停止時に集計値を保存する。
pub async fn start_server(
    addr: &str,
    state: ServiceState,
    metrics_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!("Starting API server on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    let monitor = state.monitor.clone();

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("シグナル待機に失敗しました: {}", e);
            }
        })
        .await?;

    if let Some(path) = metrics_path {
        monitor.save(&path)?;
        info!("メトリクスを保存しました: {}", path.display());
    }
    info!("サーバーを停止しました");
    Ok(())
}
