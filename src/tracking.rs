//! 実験トラッキング
//!
//! 1回の学習を `{tracking_dir}/{experiment}/{run_name}/` に記録する。
//!
//! - `params.json`: ハイパーパラメータ
//! - `metrics.csv`: `step,key,value`
//! - `history.csv`: エポックごとの損失・精度
//! - `artifacts/`: 混同行列、分類レポート、モデルファイルのコピー
//! - `run.json`: 状態と開始・終了時刻

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// ラン名の接頭辞
pub const RUN_NAME_PREFIX: &str = "cnn_training";

/// 実験（ランの集まり）
#[derive(Debug, Clone)]
pub struct ExperimentTracker {
    tracking_dir: PathBuf,
    experiment_name: String,
}

impl ExperimentTracker {
    pub fn new(tracking_dir: impl Into<PathBuf>, experiment_name: impl Into<String>) -> Self {
        Self {
            tracking_dir: tracking_dir.into(),
            experiment_name: experiment_name.into(),
        }
    }

    pub fn experiment_dir(&self) -> PathBuf {
        self.tracking_dir.join(&self.experiment_name)
    }

    /// 現在時刻からラン名を作る (`cnn_training_YYYYMMDD_HHMMSS`)
    pub fn default_run_name() -> String {
        format!(
            "{}_{}",
            RUN_NAME_PREFIX,
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        )
    }

    /// ランを開始する
    pub fn start_run(&self, run_name: Option<String>) -> Result<RunTracker> {
        let run_name = run_name.unwrap_or_else(Self::default_run_name);
        let dir = self.experiment_dir().join(&run_name);
        fs::create_dir_all(dir.join("artifacts"))
            .with_context(|| format!("ランディレクトリを作成できません: {}", dir.display()))?;

        let mut metrics = csv::Writer::from_path(dir.join("metrics.csv"))
            .context("metrics.csv を作成できません")?;
        metrics.write_record(["step", "key", "value"])?;
        metrics.flush()?;

        let run = RunTracker {
            info: RunInfo {
                run_name,
                experiment_name: self.experiment_name.clone(),
                status: RunStatus::Running,
                start_time: chrono::Local::now().to_rfc3339(),
                end_time: None,
            },
            dir,
            params: BTreeMap::new(),
            metrics,
        };
        run.write_info()?;
        info!("実験ランを開始しました: {}", run.dir.display());
        Ok(run)
    }
}

/// ランの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

/// `run.json` の内容
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_name: String,
    pub experiment_name: String,
    pub status: RunStatus,
    pub start_time: String,
    pub end_time: Option<String>,
}

/// 1エポック分の学習結果（`history.csv` の1行）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_acc: f64,
    pub val_loss: f64,
    pub val_acc: f64,
    pub learning_rate: f64,
}

/// 実行中のラン
pub struct RunTracker {
    dir: PathBuf,
    info: RunInfo,
    params: BTreeMap<String, serde_json::Value>,
    metrics: csv::Writer<File>,
}

impl RunTracker {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn run_name(&self) -> &str {
        &self.info.run_name
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.dir.join("artifacts")
    }

    /// パラメータを記録する（`params.json` を書き直す）
    pub fn log_param<V: Serialize>(&mut self, key: &str, value: V) -> Result<()> {
        self.params
            .insert(key.to_string(), serde_json::to_value(value)?);
        let content = serde_json::to_string_pretty(&self.params)?;
        fs::write(self.dir.join("params.json"), content)?;
        Ok(())
    }

    /// 指標を1件追記する
    pub fn log_metric(&mut self, key: &str, value: f64, step: usize) -> Result<()> {
        self.metrics
            .write_record([step.to_string(), key.to_string(), value.to_string()])?;
        self.metrics.flush()?;
        debug!("metric {}={} (step {})", key, value, step);
        Ok(())
    }

    /// エポック履歴を `history.csv` に書き出す
    pub fn log_history(&self, history: &[EpochRecord]) -> Result<()> {
        let mut writer = csv::Writer::from_path(self.dir.join("history.csv"))?;
        for record in history {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// テキストを成果物として保存する
    pub fn log_text(&self, file_name: &str, content: &str) -> Result<PathBuf> {
        let path = self.artifacts_dir().join(file_name);
        fs::write(&path, content)?;
        Ok(path)
    }

    /// JSONを成果物として保存する
    pub fn log_json<T: Serialize>(&self, file_name: &str, value: &T) -> Result<PathBuf> {
        self.log_text(file_name, &serde_json::to_string_pretty(value)?)
    }

    /// ファイルを成果物ディレクトリにコピーする
    pub fn log_artifact(&self, source: &Path) -> Result<PathBuf> {
        let file_name = source
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("ファイル名がありません: {}", source.display()))?;
        let dest = self.artifacts_dir().join(file_name);
        fs::copy(source, &dest)
            .with_context(|| format!("成果物をコピーできません: {}", source.display()))?;
        Ok(dest)
    }

    /// ランを終了する
    pub fn finish(mut self, status: RunStatus) -> Result<RunInfo> {
        self.metrics.flush()?;
        self.info.status = status;
        self.info.end_time = Some(chrono::Local::now().to_rfc3339());
        self.write_info()?;
        info!("実験ランを終了しました: {} ({:?})", self.info.run_name, status);
        Ok(self.info)
    }

    fn write_info(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.info)?;
        fs::write(self.dir.join("run.json"), content)?;
        Ok(())
    }
}
