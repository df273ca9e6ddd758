//! モデルメタデータの定義
//!
//! パッケージ形式のチェックポイント（tar.gz）内に `metadata.json` として保存される。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::ImageSize;

/// モデルメタデータ
///
/// tar.gz形式で保存される情報：
/// - metadata.json: このメタデータ（JSON形式）
/// - model.bin: モデルの重み（バイナリ）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMetadata {
    /// クラス名（出力インデックス順）
    /// 例: ["cat", "dog"]
    pub class_names: Vec<String>,

    /// モデル入力の高さ（ピクセル）
    pub image_height: u32,

    /// モデル入力の幅（ピクセル）
    pub image_width: u32,

    /// ドロップアウト率（モデル構築時の設定）
    #[serde(default)]
    pub dropout: f64,

    /// 学習エポック数（設定値）
    pub num_epochs: u32,

    /// 保存時点のエポック（1始まり）
    #[serde(default)]
    pub epoch: Option<u32>,

    /// 保存時点の検証精度
    #[serde(default)]
    pub val_acc: Option<f64>,

    /// 保存時点の検証損失
    #[serde(default)]
    pub val_loss: Option<f64>,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(class_names: Vec<String>, image_size: ImageSize, dropout: f64, num_epochs: u32) -> Self {
        let trained_at = chrono::Local::now().to_rfc3339();

        Self {
            class_names,
            image_height: image_size.height,
            image_width: image_size.width,
            dropout,
            num_epochs,
            epoch: None,
            val_acc: None,
            val_loss: None,
            trained_at,
        }
    }

    /// 検証結果を記録する
    pub fn with_validation(mut self, epoch: u32, val_acc: f64, val_loss: f64) -> Self {
        self.epoch = Some(epoch);
        self.val_acc = Some(val_acc);
        self.val_loss = Some(val_loss);
        self
    }

    pub fn image_size(&self) -> ImageSize {
        ImageSize::new(self.image_height, self.image_width)
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize metadata to JSON")
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to deserialize metadata from JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip_keeps_validation() {
        let metadata = ModelMetadata::new(
            vec!["cat".to_string(), "dog".to_string()],
            ImageSize::square(224),
            0.5,
            20,
        )
        .with_validation(7, 0.91, 0.23);

        let json = metadata.to_json_string().unwrap();
        let parsed = ModelMetadata::from_json_string(&json).unwrap();
        assert_eq!(parsed, metadata);
        assert_eq!(parsed.epoch, Some(7));
        assert_eq!(parsed.image_size(), ImageSize::square(224));
    }

    #[test]
    fn test_missing_optional_fields() {
        let json = r#"{
            "class_names": ["cat", "dog"],
            "image_height": 64,
            "image_width": 64,
            "num_epochs": 3,
            "trained_at": "2024-01-01T00:00:00+00:00"
        }"#;
        let parsed = ModelMetadata::from_json_string(json).unwrap();
        assert_eq!(parsed.num_classes(), 2);
        assert!(parsed.val_acc.is_none());
    }
}
