//! 推論サービスの監視
//!
//! [`PerformanceMonitor`] はリクエスト数・推論時間・エラー数・クラス別予測数を集計し、
//! [`RequestLogger`] は1リクエスト1行のJSONを `requests_YYYYMMDD.json` に追記する。

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
struct Counters {
    request_count: u64,
    total_inference_time: Duration,
    errors: u64,
    predictions: BTreeMap<String, u64>,
}

/// `/metrics` で返す集計値
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub average_inference_time_ms: f64,
    pub total_inference_time_s: f64,
    pub errors: u64,
    pub error_rate: f64,
    pub predictions: BTreeMap<String, u64>,
}

/// リクエスト単位の性能集計
#[derive(Debug)]
pub struct PerformanceMonitor {
    counters: Mutex<Counters>,
}

impl PerformanceMonitor {
    /// `class_names` は0件で初期化して常に表示する
    pub fn new(class_names: &[String]) -> Self {
        let counters = Counters {
            predictions: class_names.iter().map(|c| (c.clone(), 0)).collect(),
            ..Default::default()
        };
        Self {
            counters: Mutex::new(counters),
        }
    }

    fn with_counters<T>(&self, f: impl FnOnce(&mut Counters) -> T) -> T {
        let mut counters = self.counters.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut counters)
    }

    /// 成功した推論を記録
    pub fn record_success(&self, inference_time: Duration, predicted_class: &str) {
        self.with_counters(|c| {
            c.request_count += 1;
            c.total_inference_time += inference_time;
            *c.predictions.entry(predicted_class.to_string()).or_insert(0) += 1;
        });
    }

    /// 失敗した推論を記録
    pub fn record_error(&self, inference_time: Duration) {
        self.with_counters(|c| {
            c.request_count += 1;
            c.total_inference_time += inference_time;
            c.errors += 1;
        });
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.with_counters(|c| {
            let total_s = c.total_inference_time.as_secs_f64();
            let (avg_ms, error_rate) = if c.request_count > 0 {
                (
                    total_s * 1000.0 / c.request_count as f64,
                    c.errors as f64 / c.request_count as f64,
                )
            } else {
                (0.0, 0.0)
            };
            MetricsSnapshot {
                total_requests: c.request_count,
                average_inference_time_ms: round2(avg_ms),
                total_inference_time_s: round2(total_s),
                errors: c.errors,
                error_rate,
                predictions: c.predictions.clone(),
            }
        })
    }

    /// 集計値をJSONで保存
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.snapshot())?;
        fs::write(path, content)
            .with_context(|| format!("メトリクスを保存できません: {}", path.display()))
    }

    pub fn reset(&self) {
        self.with_counters(|c| {
            c.request_count = 0;
            c.total_inference_time = Duration::ZERO;
            c.errors = 0;
            for count in c.predictions.values_mut() {
                *count = 0;
            }
        });
    }
}

/// 小数第2位で丸める
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// リクエストログの1行
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestLogEntry {
    pub timestamp: String,
    pub inference_time_ms: f64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// JSON Lines 形式のリクエストログ
#[derive(Debug)]
pub struct RequestLogger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RequestLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// `{logs_dir}/requests_YYYYMMDD.json`
    pub fn in_dir(logs_dir: &Path) -> Result<Self> {
        fs::create_dir_all(logs_dir)
            .with_context(|| format!("ログディレクトリを作成できません: {}", logs_dir.display()))?;
        let file_name = format!("requests_{}.json", chrono::Local::now().format("%Y%m%d"));
        Ok(Self::new(logs_dir.join(file_name)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self, entry: &RequestLogEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}
