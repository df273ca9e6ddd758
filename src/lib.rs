//! 犬猫分類器
//!
//! - `dataset`: 生画像の走査・分割・正規化
//! - `ml`: CNN の学習と推論（`ml` フィーチャー）
//! - `service`: 推論HTTPサービス

pub mod dataset;
pub mod error;
pub mod evaluation;
pub mod model;
pub mod service;
pub mod tracking;
pub mod types;

#[cfg(feature = "ml")]
pub mod ml;

pub use error::{PipelineError, Result};
pub use model::AppConfig;
pub use types::{ImageFile, ImageSize, Prediction, Split};
