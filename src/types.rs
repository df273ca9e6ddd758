use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// 前処理対象として認識する拡張子（小文字）
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// デフォルトのクラス名（ディレクトリ名と一致）
pub const DEFAULT_CLASS_NAMES: [&str; 2] = ["cat", "dog"];

/// データセットの分割
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    /// 出力ツリー上のディレクトリ名
    pub fn dir_name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl std::fmt::Display for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// 画像の縦横サイズ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub height: u32,
    pub width: u32,
}

impl ImageSize {
    pub const fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }

    pub const fn square(size: u32) -> Self {
        Self::new(size, size)
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        Self::square(224)
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}

/// 走査で見つかった画像ファイル
///
/// クラスラベルは親ディレクトリ名から決まる。発見後は変更しない。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageFile {
    path: PathBuf,
    class_name: String,
}

impl ImageFile {
    pub fn new(path: PathBuf, class_name: impl Into<String>) -> Self {
        Self {
            path,
            class_name: class_name.into(),
        }
    }

    /// 親ディレクトリ名をクラス名として使う
    pub fn from_path(path: PathBuf) -> Self {
        let class_name = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self { path, class_name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn file_name(&self) -> Option<&std::ffi::OsStr> {
        self.path.file_name()
    }
}

/// 推論結果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prediction {
    pub predicted_class: String,
    pub confidence: f32,
    pub class_index: usize,
    pub probabilities: BTreeMap<String, f32>,
}

impl Prediction {
    /// クラスごとの確率から結果を組み立てる
    ///
    /// 確率が空、またはクラス名の数と一致しない場合は `None`。
    pub fn from_probabilities(probabilities: &[f32], class_names: &[String]) -> Option<Self> {
        if probabilities.is_empty() || probabilities.len() != class_names.len() {
            return None;
        }

        let (class_index, &confidence) = probabilities
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))?;

        let probabilities = class_names
            .iter()
            .cloned()
            .zip(probabilities.iter().copied())
            .collect();

        Some(Self {
            predicted_class: class_names[class_index].clone(),
            confidence,
            class_index,
            probabilities,
        })
    }
}
