//! アプリケーション設定管理モジュール
//!
//! データパス・分割比率・学習設定・APIサーバー設定などをJSON形式で保存・読み込みします。
//! 読み込み後に環境変数 (`API_HOST`, `API_PORT`, `LOG_LEVEL`, `TRACKING_DIR`) で上書きできます。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::dataset::splitter::SplitRatios;
use crate::types::{ImageSize, DEFAULT_CLASS_NAMES};

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    #[default]
    Wgpu,
    /// NdArray (CPU) バックエンド
    Cpu,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "CPU (NdArray)"),
        }
    }
}

impl std::str::FromStr for DeviceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "wgpu" | "gpu" => Ok(DeviceType::Wgpu),
            "cpu" | "ndarray" => Ok(DeviceType::Cpu),
            other => Err(anyhow::anyhow!("不明なデバイス種別です: {}", other)),
        }
    }
}

/// ディレクトリ設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathSettings {
    /// 生画像 `{raw_dir}/{class}/`
    pub raw_dir: PathBuf,
    /// 前処理済み `{processed_dir}/{split}/{class}/`
    pub processed_dir: PathBuf,
    /// チェックポイントの保存先
    pub models_dir: PathBuf,
    /// リクエストログの保存先
    pub logs_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            raw_dir: PathBuf::from("data/raw"),
            processed_dir: PathBuf::from("data/processed"),
            models_dir: PathBuf::from("models"),
            logs_dir: PathBuf::from("logs"),
        }
    }
}

/// 画像サイズ設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageSettings {
    pub height: u32,
    pub width: u32,
}

impl Default for ImageSettings {
    fn default() -> Self {
        let size = ImageSize::default();
        Self {
            height: size.height,
            width: size.width,
        }
    }
}

impl ImageSettings {
    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.height, self.width)
    }
}

/// 分割設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SplitSettings {
    pub ratios: SplitRatios,
    /// シャッフル用のシード
    pub seed: u64,
}

impl Default for SplitSettings {
    fn default() -> Self {
        Self {
            ratios: SplitRatios::default(),
            seed: 42,
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelSettings {
    /// ドロップアウト率
    pub dropout: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self { dropout: 0.5 }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// ワーカー数
    pub num_workers: usize,
    /// 学習率
    pub learning_rate: f64,
    /// ランダムシード
    pub seed: u64,
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 20,
            batch_size: 32,
            num_workers: 4,
            learning_rate: 1e-3,
            seed: 42,
            device_type: DeviceType::default(),
        }
    }
}

/// 実験トラッキング設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackingSettings {
    pub tracking_dir: PathBuf,
    pub experiment_name: String,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            tracking_dir: PathBuf::from("mlruns"),
            experiment_name: "cats-dogs-classification".to_string(),
        }
    }
}

/// 推論APIサーバー設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl ApiSettings {
    /// `host:port`
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: PathSettings,
    #[serde(default)]
    pub image: ImageSettings,
    #[serde(default)]
    pub split: SplitSettings,
    /// 分類クラス（`raw_dir` 直下のディレクトリ名）
    #[serde(default = "default_classes")]
    pub classes: Vec<String>,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub training: TrainingSettings,
    #[serde(default)]
    pub tracking: TrackingSettings,
    #[serde(default)]
    pub api: ApiSettings,
    /// ログレベル（`INFO`, `DEBUG` など）
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_classes() -> Vec<String> {
    DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect()
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: PathSettings::default(),
            image: ImageSettings::default(),
            split: SplitSettings::default(),
            classes: default_classes(),
            model: ModelSettings::default(),
            training: TrainingSettings::default(),
            tracking: TrackingSettings::default(),
            api: ApiSettings::default(),
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("config.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("設定ファイルを読み込めません: {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("設定ファイルの形式が不正です: {}", path.display()))?;
        Ok(config)
    }

    /// ファイルがあれば読み込み、無ければデフォルト設定を返す
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("設定ファイルを保存できません: {}", path.display()))?;
        Ok(())
    }

    /// 環境変数で上書きする
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// `lookup` が返す値で上書きする
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("API_HOST") {
            self.api.host = host;
        }
        if let Some(port) = lookup("API_PORT") {
            self.api.port = port
                .parse()
                .with_context(|| format!("API_PORT が不正です: {}", port))?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(dir) = lookup("TRACKING_DIR") {
            self.tracking.tracking_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// `tracing_subscriber::EnvFilter` 用のフィルタ文字列
    pub fn log_filter(&self) -> String {
        self.log_level.to_ascii_lowercase()
    }

    /// 設定情報を表示
    pub fn display(&self) {
        println!("=== アプリケーション設定 ===");
        println!("生データ: {}", self.paths.raw_dir.display());
        println!("前処理済み: {}", self.paths.processed_dir.display());
        println!("モデル保存先: {}", self.paths.models_dir.display());
        println!("画像サイズ: {}", self.image.size());
        println!("クラス: {}", self.classes.join(", "));
        println!(
            "分割比率: train {} / val {} / test {} (シード {})",
            self.split.ratios.train, self.split.ratios.val, self.split.ratios.test, self.split.seed
        );
        println!("\n--- トレーニング設定 ---");
        println!("計算デバイス: {}", self.training.device_type);
        println!("エポック数: {}", self.training.num_epochs);
        println!("バッチサイズ: {}", self.training.batch_size);
        println!("学習率: {}", self.training.learning_rate);
        println!("ドロップアウト率: {}", self.model.dropout);
        println!("シード: {}", self.training.seed);
        println!("\n--- トラッキング / API ---");
        println!(
            "実験: {} ({})",
            self.tracking.experiment_name,
            self.tracking.tracking_dir.display()
        );
        println!("APIサーバー: {}", self.api.bind_address());
        println!("ログレベル: {}", self.log_level);
        println!("========================\n");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.training.device_type, DeviceType::Wgpu);
        assert_eq!(config.classes, vec!["cat", "dog"]);
        assert_eq!(config.training.num_epochs, 20);
        assert_eq!(config.training.batch_size, 32);
        assert_eq!(config.image.size(), ImageSize::square(224));
        assert_eq!(config.split.seed, 42);
        assert_eq!(config.api.port, 8000);
    }

    #[test]
    fn test_missing_default_path_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(AppConfig::default_path());
        assert!(path.ends_with("config.json"));
        let config = AppConfig::load_or_default(&path).unwrap();
        assert_eq!(config.log_level, "INFO");
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = AppConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"classes": ["a", "b", "c"]}"#).unwrap();
        assert_eq!(config.classes.len(), 3);
        assert_eq!(config.split.ratios, SplitRatios::default());
        assert_eq!(config.log_level, "INFO");
    }

    #[test]
    fn test_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/config.json");
        let mut config = AppConfig::default();
        config.training.device_type = DeviceType::Cpu;
        config.save(&path).unwrap();

        let loaded = AppConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded.training.device_type, DeviceType::Cpu);
        assert_eq!(
            AppConfig::load_or_default(tmp.path().join("missing.json")).unwrap(),
            AppConfig::default()
        );
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("API_HOST", "127.0.0.1"),
            ("API_PORT", "9000"),
            ("LOG_LEVEL", "DEBUG"),
            ("TRACKING_DIR", "/tmp/runs"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.api.bind_address(), "127.0.0.1:9000");
        assert_eq!(config.log_filter(), "debug");
        assert_eq!(config.tracking.tracking_dir, PathBuf::from("/tmp/runs"));
    }

    #[test]
    fn test_invalid_port_override() {
        let mut config = AppConfig::default();
        let result = config.apply_overrides(|k| (k == "API_PORT").then(|| "abc".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_device_type_display_and_parse() {
        assert_eq!(format!("{}", DeviceType::Wgpu), "WGPU (GPU)");
        assert_eq!(format!("{}", DeviceType::Cpu), "CPU (NdArray)");
        assert_eq!("cpu".parse::<DeviceType>().unwrap(), DeviceType::Cpu);
        assert!("tpu".parse::<DeviceType>().is_err());
    }
}
