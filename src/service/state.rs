//! 推論サービスの共有状態

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::service::monitor::{PerformanceMonitor, RequestLogger};
use crate::types::Prediction;

/// `/model-info` で返すモデル情報
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelInfo {
    pub model_type: String,
    /// "HxW"
    pub input_size: String,
    pub classes: Vec<String>,
    pub device: String,
    /// チェックポイントの形式（packaged / bare）
    pub checkpoint: String,
}

/// 画像分類器
///
/// サービスはこのトレイト越しにモデルを呼び出す。
pub trait Classifier: Send + Sync {
    fn predict(&self, image: &DynamicImage) -> anyhow::Result<Prediction>;

    fn info(&self) -> ModelInfo;
}

/// ハンドラ間で共有する状態
#[derive(Clone)]
pub struct ServiceState {
    pub classifier: Option<Arc<dyn Classifier>>,
    pub monitor: Arc<PerformanceMonitor>,
    pub request_logger: Option<Arc<RequestLogger>>,
}

impl ServiceState {
    pub fn new(classifier: Option<Arc<dyn Classifier>>, class_names: &[String]) -> Self {
        Self {
            classifier,
            monitor: Arc::new(PerformanceMonitor::new(class_names)),
            request_logger: None,
        }
    }

    pub fn with_request_logger(mut self, logger: RequestLogger) -> Self {
        self.request_logger = Some(Arc::new(logger));
        self
    }

    pub fn model_loaded(&self) -> bool {
        self.classifier.is_some()
    }
}
