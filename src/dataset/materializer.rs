//! 分割済みファイルの書き出し
//!
//! 各ファイルを正規化し、JPEG（品質95）で `{split_dir}/{class}/{元のファイル名}` に保存する。
//! 正規化に失敗したファイルはスキップとして記録し、バッチは続行する。

use image::codecs::jpeg::JpegEncoder;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::dataset::normalizer::{normalize_path, NormalizedImage};
use crate::error::Result;
use crate::types::{ImageFile, ImageSize};

/// 再エンコード時のJPEG品質
pub const JPEG_QUALITY: u8 = 95;

/// ファイル単位の処理結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// 書き出し成功（出力先パス）
    Written(PathBuf),
    /// 正規化または書き出しに失敗
    Skipped { source: PathBuf, reason: String },
}

impl FileOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, FileOutcome::Written(_))
    }
}

/// 1回の書き出し結果（入力順）
#[derive(Debug, Clone, Default)]
pub struct MaterializeReport {
    pub outcomes: Vec<FileOutcome>,
}

impl MaterializeReport {
    pub fn written(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_written()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.len() - self.written()
    }

    pub fn skipped_files(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.outcomes.iter().filter_map(|o| match o {
            FileOutcome::Skipped { source, reason } => Some((source.as_path(), reason.as_str())),
            FileOutcome::Written(_) => None,
        })
    }
}

/// 書き出し設定
#[derive(Debug, Clone)]
pub struct Materializer {
    pub image_size: ImageSize,
    pub jpeg_quality: u8,
    /// 進捗バーを表示するか
    pub show_progress: bool,
}

impl Materializer {
    pub fn new(image_size: ImageSize) -> Self {
        Self {
            image_size,
            jpeg_quality: JPEG_QUALITY,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// `files` を `{split_dir}/{class_name}/` に書き出す
    ///
    /// 出力ディレクトリが作れない場合のみエラー。ファイル単位の失敗は結果に含まれる。
    pub fn materialize(
        &self,
        files: &[ImageFile],
        split_dir: &Path,
        class_name: &str,
    ) -> Result<MaterializeReport> {
        let class_dir = split_dir.join(class_name);
        fs::create_dir_all(&class_dir)?;

        let progress = self.progress_bar(files.len(), split_dir, class_name);

        // 並列に処理しても collect は入力順を保つ
        let outcomes: Vec<FileOutcome> = files
            .par_iter()
            .map(|file| {
                let outcome = self.process_file(file, &class_dir);
                progress.inc(1);
                outcome
            })
            .collect();
        progress.finish_and_clear();

        let report = MaterializeReport { outcomes };
        for (source, reason) in report.skipped_files() {
            warn!("画像の処理に失敗したためスキップします {}: {}", source.display(), reason);
        }
        if report.skipped() > 0 {
            warn!(
                "{}/{}: {} 枚中 {} 枚をスキップしました",
                split_name(split_dir),
                class_name,
                files.len(),
                report.skipped()
            );
        }

        Ok(report)
    }

    fn process_file(&self, file: &ImageFile, class_dir: &Path) -> FileOutcome {
        let skipped = |reason: String| FileOutcome::Skipped {
            source: file.path().to_path_buf(),
            reason,
        };

        let Some(file_name) = file.file_name() else {
            return skipped("ファイル名がありません".to_string());
        };

        let normalized = match normalize_path(file.path(), self.image_size) {
            Ok(normalized) => normalized,
            Err(e) => return skipped(e.to_string()),
        };

        let dest = class_dir.join(file_name);
        match self.write_jpeg(&normalized, &dest) {
            Ok(()) => FileOutcome::Written(dest),
            Err(e) => skipped(format!("書き出しに失敗しました: {}", e)),
        }
    }

    fn write_jpeg(&self, normalized: &NormalizedImage, dest: &Path) -> anyhow::Result<()> {
        let rgb = normalized.to_rgb8();
        let mut writer = BufWriter::new(File::create(dest)?);
        let encoder = JpegEncoder::new_with_quality(&mut writer, self.jpeg_quality);
        rgb.write_with_encoder(encoder)?;
        Ok(())
    }

    fn progress_bar(&self, len: usize, split_dir: &Path, class_name: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        bar.set_message(format!("{}/{}", split_name(split_dir), class_name));
        bar
    }
}

fn split_name(split_dir: &Path) -> String {
    split_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}
