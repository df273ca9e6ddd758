//! 推論に必要な設定の解決
//!
//! パッケージ形式のチェックポイントはメタデータから、重みのみのチェックポイントは
//! アプリケーション設定からクラス名と入力サイズを取得します。

use anyhow::Result;

use crate::model::config::AppConfig;
use crate::model::model_storage::Checkpoint;
use crate::types::ImageSize;

/// モデル種別（`/model-info` で返す名前）
pub const MODEL_TYPE: &str = "CatDogCNN";

/// 推論設定
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceConfig {
    /// クラス名（出力インデックス順）
    pub class_names: Vec<String>,
    /// モデル入力解像度
    pub image_size: ImageSize,
    /// モデル構築時のドロップアウト率
    pub dropout: f64,
    /// チェックポイントの形式
    pub checkpoint_kind: &'static str,
}

impl InferenceConfig {
    /// チェックポイントから推論設定を作成
    pub fn resolve(checkpoint: &Checkpoint, config: &AppConfig) -> Result<Self> {
        let resolved = match checkpoint.metadata() {
            Some(metadata) => Self {
                class_names: metadata.class_names.clone(),
                image_size: metadata.image_size(),
                dropout: metadata.dropout,
                checkpoint_kind: checkpoint.kind(),
            },
            None => Self {
                class_names: config.classes.clone(),
                image_size: config.image.size(),
                dropout: config.model.dropout,
                checkpoint_kind: checkpoint.kind(),
            },
        };

        if resolved.class_names.is_empty() {
            anyhow::bail!("クラス名が空です");
        }
        Ok(resolved)
    }

    /// 全クラス数を取得
    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// クラスインデックスからクラス名を取得
    pub fn class_index_to_label(&self, index: usize) -> Option<&str> {
        self.class_names.get(index).map(String::as_str)
    }

    /// 設定情報を表示
    pub fn print_info(&self) {
        println!("\n=== 推論設定 ===");
        println!("モデル: {}", MODEL_TYPE);
        println!("クラス: {}", self.class_names.join(", "));
        println!("入力サイズ: {}", self.image_size);
        println!("チェックポイント形式: {}", self.checkpoint_kind);
        println!("==================");
    }
}
