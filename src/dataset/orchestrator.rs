//! 前処理パイプライン全体の実行
//!
//! `start → scan → split → materialize(×3) → verify → done|fail`
//!
//! クラス単位で処理し、途中で失敗してもそれ以前に書き出したクラスは残る（ロールバックしない）。
//! 次回の実行開始時に出力ツリーごと作り直すので、再実行で整合した状態に戻る。

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

use crate::dataset::materializer::Materializer;
use crate::dataset::scanner::scan_images;
use crate::dataset::splitter::{split_files, SplitRatios};
use crate::dataset::tree::DatasetTree;
use crate::error::{PipelineError, Result};
use crate::model::AppConfig;
use crate::types::{ImageSize, Split};

/// 前処理の実行設定
#[derive(Debug, Clone)]
pub struct PreprocessOptions {
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub class_names: Vec<String>,
    pub image_size: ImageSize,
    pub ratios: SplitRatios,
    pub seed: u64,
    pub show_progress: bool,
}

impl PreprocessOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            raw_dir: config.paths.raw_dir.clone(),
            processed_dir: config.paths.processed_dir.clone(),
            class_names: config.classes.clone(),
            image_size: config.image.size(),
            ratios: config.split.ratios,
            seed: config.split.seed,
            show_progress: true,
        }
    }
}

/// クラスごとの分割件数と書き出し結果
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ClassSummary {
    pub scanned: usize,
    /// 分割直後の件数
    pub planned: BTreeMap<Split, usize>,
    /// 正規化に失敗してスキップした件数
    pub skipped: BTreeMap<Split, usize>,
}

/// 1回の前処理の結果
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreprocessSummary {
    pub classes: BTreeMap<String, ClassSummary>,
    /// 最終的に `{split}/{class}` に存在するファイル数
    pub final_counts: BTreeMap<Split, BTreeMap<String, usize>>,
}

impl PreprocessSummary {
    pub fn final_count(&self, split: Split, class_name: &str) -> usize {
        self.final_counts
            .get(&split)
            .and_then(|m| m.get(class_name))
            .copied()
            .unwrap_or(0)
    }

    /// 分割ごとの最終件数をログに出す
    pub fn log_distribution(&self) {
        info!("最終的なデータセット分布:");
        for (split, classes) in &self.final_counts {
            info!("{}:", split);
            for (class_name, count) in classes {
                info!("  {}: {}", class_name, count);
            }
        }
    }
}

pub struct Orchestrator {
    options: PreprocessOptions,
    tree: DatasetTree,
}

impl Orchestrator {
    pub fn new(options: PreprocessOptions) -> Self {
        let tree = DatasetTree::new(options.processed_dir.clone());
        Self { options, tree }
    }

    pub fn tree(&self) -> &DatasetTree {
        &self.tree
    }

    /// 前処理を実行する
    pub fn run(&self) -> Result<PreprocessSummary> {
        let opts = &self.options;

        // ファイルシステムに触れる前に設定を検証
        opts.ratios.validate()?;
        if opts.class_names.is_empty() {
            return Err(PipelineError::InvalidConfiguration(
                "クラスが1つも指定されていません".to_string(),
            ));
        }

        info!("データセットの前処理を開始します");
        if !opts.raw_dir.is_dir() {
            return Err(PipelineError::NotFound(opts.raw_dir.clone()));
        }

        self.tree.reset(&opts.class_names)?;

        let materializer = Materializer::new(opts.image_size).with_progress(opts.show_progress);
        let mut summary = PreprocessSummary::default();

        for class_name in &opts.class_names {
            let class_dir = opts.raw_dir.join(class_name);
            if !class_dir.is_dir() {
                return Err(PipelineError::NotFound(class_dir));
            }

            let files = scan_images(&class_dir)?;
            let scanned = files.len();
            let assignment = split_files(files, &opts.ratios, opts.seed)?;
            info!(
                "{}: {} 枚 -> train {} / val {} / test {}",
                class_name,
                scanned,
                assignment.train.len(),
                assignment.val.len(),
                assignment.test.len()
            );

            let mut class_summary = ClassSummary {
                scanned,
                ..Default::default()
            };
            for split in Split::ALL {
                let files = assignment.get(split);
                let report =
                    materializer.materialize(files, &self.tree.split_dir(split), class_name)?;
                class_summary.planned.insert(split, files.len());
                class_summary.skipped.insert(split, report.skipped());
            }
            summary.classes.insert(class_name.clone(), class_summary);
        }

        for (split, class_name, count) in self.tree.counts(&opts.class_names)? {
            summary
                .final_counts
                .entry(split)
                .or_default()
                .insert(class_name, count);
        }
        summary.log_distribution();

        self.tree.verify_non_empty(&opts.class_names)?;

        info!("データセットの前処理が完了しました");
        info!("出力先: {}", opts.processed_dir.display());
        Ok(summary)
    }
}

/// 設定から前処理を実行する
pub fn preprocess_dataset(options: PreprocessOptions) -> Result<PreprocessSummary> {
    Orchestrator::new(options).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::fs;
    use std::path::Path;

    fn make_raw(root: &Path, class_name: &str, n: usize) {
        let dir = root.join(class_name);
        fs::create_dir_all(&dir).unwrap();
        for i in 0..n {
            RgbImage::from_pixel(12, 12, Rgb([i as u8, 10, 20]))
                .save(dir.join(format!("{}.{}.png", class_name, i)))
                .unwrap();
        }
    }

    fn options(root: &Path) -> PreprocessOptions {
        PreprocessOptions {
            raw_dir: root.join("raw"),
            processed_dir: root.join("processed"),
            class_names: vec!["cat".to_string(), "dog".to_string()],
            image_size: ImageSize::square(8),
            ratios: SplitRatios::default(),
            seed: 42,
            show_progress: false,
        }
    }

    #[test]
    fn test_invalid_ratios_fail_before_io() {
        let tmp = tempfile::tempdir().unwrap();
        let mut opts = options(tmp.path());
        opts.ratios = SplitRatios {
            train: 0.8,
            val: 0.1,
            test: 0.2,
        };
        let err = preprocess_dataset(opts).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfiguration(_)));
        assert!(!tmp.path().join("processed").exists());
    }

    #[test]
    fn test_missing_raw_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let err = preprocess_dataset(options(tmp.path())).unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(p) if p.ends_with("raw")));
    }

    #[test]
    fn test_missing_class_dir() {
        let tmp = tempfile::tempdir().unwrap();
        make_raw(&tmp.path().join("raw"), "cat", 10);
        let err = preprocess_dataset(options(tmp.path())).unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(p) if p.ends_with("dog")));
    }

    #[test]
    fn test_small_run_counts() {
        let tmp = tempfile::tempdir().unwrap();
        make_raw(&tmp.path().join("raw"), "cat", 20);
        make_raw(&tmp.path().join("raw"), "dog", 20);

        let summary = preprocess_dataset(options(tmp.path())).unwrap();
        for class_name in ["cat", "dog"] {
            assert_eq!(summary.final_count(Split::Train, class_name), 16);
            assert_eq!(summary.final_count(Split::Val, class_name), 2);
            assert_eq!(summary.final_count(Split::Test, class_name), 2);
            assert_eq!(summary.classes[class_name].scanned, 20);
            assert!(summary.classes[class_name].skipped.values().all(|&n| n == 0));
        }
    }

    #[test]
    fn test_too_few_images_is_empty_output() {
        let tmp = tempfile::tempdir().unwrap();
        make_raw(&tmp.path().join("raw"), "cat", 20);
        // 5枚では val が 0 枚になる
        make_raw(&tmp.path().join("raw"), "dog", 5);

        let err = preprocess_dataset(options(tmp.path())).unwrap_err();
        match err {
            PipelineError::EmptyOutput { split, class } => {
                assert_eq!(split, Split::Val);
                assert_eq!(class, "dog");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
